//! Adapter for Claude-family probes.
//!
//! Claude's tool loop tends to emit a read → write → re-read triple against
//! the same file within one tick. Collapsing that burst to a single update
//! keeps the merged stream from flickering. The adapter also tracks the
//! newest conversation turn it has seen and reports files that have fallen
//! out of the context window as no longer in context.

use std::collections::BTreeMap;

use crate::types::NodeUpdate;
use crate::wire::{DeltaMsg, SnapshotMsg};

use super::{AgentProcessor, ProcessedDelta, ProcessedSnapshot, canonical_path};

/// Turns of inactivity after which a file is considered out of context.
/// Processor-private; the merge core never sees this.
const CONTEXT_WINDOW_TURNS: u64 = 8;

#[derive(Debug, Default)]
pub struct ClaudeProcessor {
    newest_turn: u64,
}

impl ClaudeProcessor {
    fn observe_turn(&mut self, turn: u64) {
        self.newest_turn = self.newest_turn.max(turn);
    }

    fn stale(&self, turn_accessed: u64) -> bool {
        self.newest_turn.saturating_sub(turn_accessed) > CONTEXT_WINDOW_TURNS
    }
}

impl AgentProcessor for ClaudeProcessor {
    fn process_snapshot(&mut self, raw: SnapshotMsg) -> ProcessedSnapshot {
        let mut nodes = BTreeMap::new();
        for (path, state) in &raw.nodes {
            let normalized = state.normalized();
            self.observe_turn(normalized.turn_accessed);
            nodes.insert(canonical_path(path), normalized);
        }
        for state in nodes.values_mut() {
            if self.stale(state.turn_accessed) {
                state.in_context = false;
            }
        }
        ProcessedSnapshot {
            seq: raw.seq,
            nodes,
        }
    }

    fn process_delta(&mut self, raw: DeltaMsg) -> ProcessedDelta {
        let mut collapsed: Vec<NodeUpdate> = Vec::new();
        let mut by_path: BTreeMap<String, usize> = BTreeMap::new();

        for update in &raw.updates {
            let path = canonical_path(&update.path);
            let state = update.state.normalized();
            self.observe_turn(state.turn_accessed);

            match by_path.get(&path).copied() {
                // Same file, same tick: one update survives with the
                // highest-priority action, the max heat, and the latest
                // context flag.
                Some(i) if collapsed[i].state.timestamp_ms == state.timestamp_ms => {
                    let prev = &mut collapsed[i].state;
                    prev.heat = prev.heat.max(state.heat);
                    prev.in_context = state.in_context;
                    prev.turn_accessed = prev.turn_accessed.max(state.turn_accessed);
                    if state.last_action.priority() > prev.last_action.priority() {
                        prev.last_action = state.last_action;
                    }
                }
                // Same file, later tick: the newer observation replaces the
                // older outright, matching wholesale-replacement semantics.
                Some(i) => collapsed[i] = NodeUpdate { path, state },
                None => {
                    by_path.insert(path.clone(), collapsed.len());
                    collapsed.push(NodeUpdate { path, state });
                }
            }
        }

        for update in &mut collapsed {
            if self.stale(update.state.turn_accessed) {
                update.state.in_context = false;
            }
        }

        ProcessedDelta {
            seq: raw.seq,
            updates: collapsed,
            removed: raw.removed.iter().map(|p| canonical_path(p)).collect(),
        }
    }
}
