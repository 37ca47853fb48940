//! Per-agent connection records and the socket reader task.
//!
//! One reader task per agent: dial the probe's loopback port, frame the
//! byte stream into lines, decode, and forward frames to the orchestrator's
//! dispatch loop over a bounded channel. A full channel suspends the reader
//! between frames, which is what pauses a flooding probe's socket.

use std::collections::BTreeSet;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::processor::AgentProcessor;
use crate::wire::message::{DecodeFault, decode_line};
use crate::wire::{InboundMessage, LineDecoder};

/// Fixed palette, assigned by rotation in connection order. One-Dark hues
/// that read well on the graph's dark canvas.
pub(crate) const COLOR_PALETTE: [&str; 8] = [
    "#e06c75", "#61afef", "#98c379", "#e5c07b", "#c678dd", "#56b6c2", "#d19a66", "#abb2bf",
];

/// Depth of the shared inbound event channel.
pub(crate) const EVENT_CHANNEL_DEPTH: usize = 256;

const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Orchestrator-owned record for one agent lifetime.
pub(crate) struct AgentConnection {
    pub agent_type: String,
    pub display_name: String,
    pub color: &'static str,
    #[allow(dead_code)]
    pub tcp_port: u16,
    pub connected: bool,
    /// Highest inbound sequence number observed from this agent.
    pub last_seq: u64,
    pub processor: Box<dyn AgentProcessor>,
    /// Socket reader; None once the connection has closed.
    pub reader: Option<JoinHandle<()>>,
}

/// What a reader task reports back to the dispatch loop.
pub(crate) enum ConnEvent {
    Connected {
        instance_id: String,
    },
    Frame {
        instance_id: String,
        message: InboundMessage,
    },
    /// Clean EOF carries no error; connect failures and read errors do.
    Closed {
        instance_id: String,
        error: Option<String>,
    },
}

pub(crate) fn spawn_reader(
    instance_id: String,
    port: u16,
    events: mpsc::Sender<ConnEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stream = match TcpStream::connect(("127.0.0.1", port)).await {
            Ok(stream) => stream,
            Err(e) => {
                debug!(agent = %instance_id, port, error = %e, "probe connect failed");
                let _ = events
                    .send(ConnEvent::Closed {
                        instance_id,
                        error: Some(e.to_string()),
                    })
                    .await;
                return;
            }
        };
        if events
            .send(ConnEvent::Connected {
                instance_id: instance_id.clone(),
            })
            .await
            .is_err()
        {
            return;
        }

        let mut decoder = LineDecoder::new();
        let mut warned_kinds: BTreeSet<String> = BTreeSet::new();
        let mut chunk = [0u8; READ_CHUNK_BYTES];
        loop {
            let n = match stream.read(&mut chunk).await {
                Ok(0) => {
                    if decoder.pending() > 0 {
                        debug!(
                            agent = %instance_id,
                            pending = decoder.pending(),
                            "discarding partial line at EOF"
                        );
                    }
                    let _ = events
                        .send(ConnEvent::Closed {
                            instance_id,
                            error: None,
                        })
                        .await;
                    return;
                }
                Ok(n) => n,
                Err(e) => {
                    let _ = events
                        .send(ConnEvent::Closed {
                            instance_id,
                            error: Some(e.to_string()),
                        })
                        .await;
                    return;
                }
            };

            for line in decoder.push(&chunk[..n]) {
                match decode_line(&line) {
                    Ok(message) => {
                        // Bounded send: suspends here while the merge core
                        // is behind, pausing the socket.
                        if events
                            .send(ConnEvent::Frame {
                                instance_id: instance_id.clone(),
                                message,
                            })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    Err(DecodeFault::UnknownKind { kind }) => {
                        if warned_kinds.insert(kind.clone()) {
                            warn!(agent = %instance_id, kind = %kind, "ignoring unknown message kind");
                        }
                    }
                    Err(fault) => {
                        warn!(agent = %instance_id, %fault, "dropped wire line");
                    }
                }
            }
            if decoder.over_high_water() {
                debug!(agent = %instance_id, "inbound buffer over high-water mark; paused until drained");
            }
        }
    })
}
