pub mod decoder;
pub mod message;

pub use self::decoder::{HIGH_WATER_BYTES, LineDecoder};
pub use self::message::{DecodeFault, DeltaMsg, InboundMessage, RawFileState, SnapshotMsg};
