//! Per-agent-type refinement of raw probe observations.
//!
//! Different coding agents emit subtly different tool-call patterns. A
//! processor normalizes one agent's raw messages before they reach the
//! merge: it may rename/canonicalize paths, reclassify actions, collapse
//! bursts, or drop noise, but never fabricate paths the agent didn't
//! mention or look at other agents' state. Agent identity stops here; the
//! merge algebra only ever sees [`NodeUpdate`]s.

pub mod claude;
pub mod codex;
pub mod default;
pub mod registry;

use std::collections::BTreeMap;

use serde_json::Value;

use crate::types::{AgentFileState, NodeUpdate};
use crate::wire::{DeltaMsg, SnapshotMsg};

pub use self::default::DefaultProcessor;
pub use self::registry::ProcessorRegistry;

// ── Processor output ──────────────────────────────────────────────────────────

/// A normalized complete replica of one agent's file state.
#[derive(Debug, Clone)]
pub struct ProcessedSnapshot {
    pub seq: u64,
    pub nodes: BTreeMap<String, AgentFileState>,
}

/// Normalized incremental updates and retractions.
#[derive(Debug, Clone)]
pub struct ProcessedDelta {
    pub seq: u64,
    pub updates: Vec<NodeUpdate>,
    pub removed: Vec<String>,
}

// ── Processor contract ────────────────────────────────────────────────────────

/// One instance per agent connection; state (like the newest observed turn)
/// is private to that agent's stream.
pub trait AgentProcessor: Send {
    fn process_snapshot(&mut self, raw: SnapshotMsg) -> ProcessedSnapshot;

    fn process_delta(&mut self, raw: DeltaMsg) -> ProcessedDelta;

    /// Usage payloads are processor-defined; the default passes them
    /// through untouched. Returning `None` swallows the message.
    fn process_usage(&mut self, raw: Value) -> Option<Value> {
        Some(raw)
    }
}

/// Canonical form for a probe-reported path: forward slashes, no `./`
/// prefixes, no duplicate separators. Agents observing the same workspace
/// must land on the same node id.
pub(crate) fn canonical_path(raw: &str) -> String {
    let mut path = raw.replace('\\', "/");
    while let Some(rest) = path.strip_prefix("./") {
        path = rest.to_string();
    }
    while path.contains("//") {
        path = path.replace("//", "/");
    }
    path
}

#[cfg(test)]
mod tests {
    use super::canonical_path;

    #[test]
    fn canonicalizes_separators_and_prefixes() {
        assert_eq!(canonical_path("src\\ui\\screen.rs"), "src/ui/screen.rs");
        assert_eq!(canonical_path("././src/lib.rs"), "src/lib.rs");
        assert_eq!(canonical_path("/work//src///a.rs"), "/work/src/a.rs");
        assert_eq!(canonical_path("/already/fine.rs"), "/already/fine.rs");
    }
}
