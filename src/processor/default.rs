//! Fall-through processor for agent types without a dedicated adapter.
//! Performs only action normalization and path canonicalization.

use std::collections::BTreeMap;

use crate::types::NodeUpdate;
use crate::wire::{DeltaMsg, SnapshotMsg};

use super::{AgentProcessor, ProcessedDelta, ProcessedSnapshot, canonical_path};

#[derive(Debug, Default)]
pub struct DefaultProcessor;

impl AgentProcessor for DefaultProcessor {
    fn process_snapshot(&mut self, raw: SnapshotMsg) -> ProcessedSnapshot {
        let mut nodes = BTreeMap::new();
        for (path, state) in &raw.nodes {
            nodes.insert(canonical_path(path), state.normalized());
        }
        ProcessedSnapshot {
            seq: raw.seq,
            nodes,
        }
    }

    fn process_delta(&mut self, raw: DeltaMsg) -> ProcessedDelta {
        ProcessedDelta {
            seq: raw.seq,
            updates: raw
                .updates
                .iter()
                .map(|u| NodeUpdate {
                    path: canonical_path(&u.path),
                    state: u.state.normalized(),
                })
                .collect(),
            removed: raw.removed.iter().map(|p| canonical_path(p)).collect(),
        }
    }
}
