//! Adapter for Codex-style probes, which report the concrete tool verb
//! (`grep`, `apply_patch`, …) instead of a normalized action. A verb table
//! reclassifies before normalization; unknown verbs fall back to the wire
//! default. Codex keeps files warm longer, so its context window is wider
//! than the Claude adapter's.

use std::collections::BTreeMap;

use crate::types::{Action, NodeUpdate};
use crate::wire::{DeltaMsg, SnapshotMsg};

use super::{AgentProcessor, ProcessedDelta, ProcessedSnapshot, canonical_path};

const CONTEXT_WINDOW_TURNS: u64 = 12;

/// Map a Codex tool verb onto a normalized action.
fn classify(verb: &str) -> Action {
    match verb.trim().to_ascii_lowercase().as_str() {
        "grep" | "rg" | "find" | "glob" | "ls" | "list" | "search" => Action::Search,
        "apply_patch" | "patch" | "edit" | "create" | "write" => Action::Write,
        "cat" | "open" | "view" | "read" => Action::Read,
        other => Action::normalize(other),
    }
}

#[derive(Debug, Default)]
pub struct CodexProcessor {
    newest_turn: u64,
}

impl CodexProcessor {
    fn stale(&self, turn_accessed: u64) -> bool {
        self.newest_turn.saturating_sub(turn_accessed) > CONTEXT_WINDOW_TURNS
    }
}

impl AgentProcessor for CodexProcessor {
    fn process_snapshot(&mut self, raw: SnapshotMsg) -> ProcessedSnapshot {
        let mut nodes = BTreeMap::new();
        for (path, state) in &raw.nodes {
            let normalized = state.with_action(classify(&state.last_action));
            self.newest_turn = self.newest_turn.max(normalized.turn_accessed);
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
        let mut updates: Vec<NodeUpdate> = raw
            .updates
            .iter()
            .map(|u| {
                let state = u.state.with_action(classify(&u.state.last_action));
                self.newest_turn = self.newest_turn.max(state.turn_accessed);
                NodeUpdate {
                    path: canonical_path(&u.path),
                    state,
                }
            })
            .collect();
        for update in &mut updates {
            if self.stale(update.state.turn_accessed) {
                update.state.in_context = false;
            }
        }
        ProcessedDelta {
            seq: raw.seq,
            updates,
            removed: raw.removed.iter().map(|p| canonical_path(p)).collect(),
        }
    }
}
