//! Conflict-free merge of per-agent file observations.
//!
//! Each file path maps to one [`MergedNode`] holding the per-agent replicas
//! and a derived view recomputed on every change. The three operations
//! (create, apply, remove) combine commutatively, associatively, and
//! idempotently across agents, so the visible view does not depend on how
//! observations from different agents interleave. See `convergence_tests`
//! for the permutation suites.

use std::collections::BTreeMap;

use crate::types::{Action, AgentFileState};

#[cfg(test)]
mod convergence_tests;

// ── Derived view ──────────────────────────────────────────────────────────────

/// The per-file triple the orchestrator exposes: max heat, any-in-context,
/// and a last-writer-wins action with a priority tiebreak.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedView {
    pub heat: f64,
    pub in_context: bool,
    pub last_action: Action,
    /// Instance id of the agent whose action won. Translated to a display
    /// name before anything leaves the orchestrator.
    pub last_agent_id: String,
    pub last_timestamp_ms: u64,
}

impl DerivedView {
    /// The view of an empty agents map. Never emitted (empty nodes are
    /// deleted instead) but keeps the derivation total.
    pub fn empty() -> Self {
        DerivedView {
            heat: 0.0,
            in_context: false,
            last_action: Action::Read,
            last_agent_id: String::new(),
            last_timestamp_ms: 0,
        }
    }
}

/// Recompute the view from scratch. Pure; the only function allowed to
/// produce a [`DerivedView`].
///
/// An entry dominates the running leader iff its timestamp is strictly
/// greater, or equal with a strictly higher action priority. On total ties
/// the iteration-first entry wins; iteration order is the BTreeMap key
/// order, so the choice is deterministic and the derived triple is equal
/// either way.
pub fn derive_view(agents: &BTreeMap<String, AgentFileState>) -> DerivedView {
    let mut heat = 0.0f64;
    let mut in_context = false;
    let mut leader: Option<(&String, &AgentFileState)> = None;

    for (id, state) in agents {
        heat = heat.max(state.heat);
        in_context |= state.in_context;
        let dominates = match leader {
            None => true,
            Some((_, best)) => {
                state.timestamp_ms > best.timestamp_ms
                    || (state.timestamp_ms == best.timestamp_ms
                        && state.last_action.priority() > best.last_action.priority())
            }
        };
        if dominates {
            leader = Some((id, state));
        }
    }

    match leader {
        None => DerivedView::empty(),
        Some((id, state)) => DerivedView {
            heat,
            in_context,
            last_action: state.last_action,
            last_agent_id: id.clone(),
            last_timestamp_ms: state.timestamp_ms,
        },
    }
}

// ── Merged node ───────────────────────────────────────────────────────────────

/// Aggregate state for one file path. Holds at least one per-agent entry
/// while it exists; the owner deletes the node when the last entry goes.
#[derive(Debug, Clone)]
pub struct MergedNode {
    agents: BTreeMap<String, AgentFileState>,
    view: DerivedView,
}

impl MergedNode {
    pub fn new(agent_id: &str, state: AgentFileState) -> Self {
        let mut agents = BTreeMap::new();
        agents.insert(agent_id.to_string(), state);
        let view = derive_view(&agents);
        MergedNode { agents, view }
    }

    /// Write one agent's entry wholesale and recompute the view.
    pub fn apply_agent_update(&mut self, agent_id: &str, state: AgentFileState) {
        self.agents.insert(agent_id.to_string(), state);
        self.view = derive_view(&self.agents);
    }

    /// Delete one agent's entry and recompute. Returns false iff the node is
    /// now empty and must be deleted by the caller. Removing an agent that
    /// has no entry here is a no-op (but still reports emptiness).
    pub fn remove_agent(&mut self, agent_id: &str) -> bool {
        self.agents.remove(agent_id);
        self.view = derive_view(&self.agents);
        !self.agents.is_empty()
    }

    pub fn contains_agent(&self, agent_id: &str) -> bool {
        self.agents.contains_key(agent_id)
    }

    pub fn agents(&self) -> &BTreeMap<String, AgentFileState> {
        &self.agents
    }

    pub fn view(&self) -> &DerivedView {
        &self.view
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(heat: f64, ctx: bool, action: Action, ts: u64) -> AgentFileState {
        AgentFileState {
            heat,
            in_context: ctx,
            last_action: action,
            timestamp_ms: ts,
            turn_accessed: 0,
        }
    }

    #[test]
    fn two_agents_converge_on_later_writer() {
        // A reads /x at t=1000, B writes it at t=1005; B's action wins,
        // heat and context are combined.
        let mut node = MergedNode::new("agent-a", state(1.0, true, Action::Read, 1000));
        node.apply_agent_update("agent-b", state(1.0, true, Action::Write, 1005));

        let view = node.view();
        assert_eq!(view.heat, 1.0);
        assert!(view.in_context);
        assert_eq!(view.last_action, Action::Write);
        assert_eq!(view.last_agent_id, "agent-b");
        assert_eq!(view.last_timestamp_ms, 1005);
    }

    #[test]
    fn same_millisecond_tie_breaks_on_priority() {
        // Three agents touch the file in the same millisecond; the writer
        // wins regardless of insertion order.
        let mut node = MergedNode::new("a", state(0.2, false, Action::Read, 2000));
        node.apply_agent_update("c", state(0.3, false, Action::Search, 2000));
        node.apply_agent_update("b", state(0.1, false, Action::Write, 2000));

        assert_eq!(node.view().last_action, Action::Write);
        assert_eq!(node.view().last_agent_id, "b");

        let mut reordered = MergedNode::new("b", state(0.1, false, Action::Write, 2000));
        reordered.apply_agent_update("a", state(0.2, false, Action::Read, 2000));
        reordered.apply_agent_update("c", state(0.3, false, Action::Search, 2000));
        assert_eq!(node.view(), reordered.view());
    }

    #[test]
    fn total_tie_is_deterministic() {
        let mut one = MergedNode::new("a", state(0.5, false, Action::Read, 7));
        one.apply_agent_update("b", state(0.5, false, Action::Read, 7));
        let mut two = MergedNode::new("b", state(0.5, false, Action::Read, 7));
        two.apply_agent_update("a", state(0.5, false, Action::Read, 7));
        // Key-ordered iteration picks the same leader either way.
        assert_eq!(one.view(), two.view());
        assert_eq!(one.view().last_agent_id, "a");
    }

    #[test]
    fn update_replaces_entry_wholesale() {
        let mut node = MergedNode::new("a", state(0.9, true, Action::Write, 10));
        node.apply_agent_update("a", state(0.2, false, Action::Read, 20));
        assert_eq!(node.view().heat, 0.2);
        assert!(!node.view().in_context);
        assert_eq!(node.view().last_action, Action::Read);
    }

    #[test]
    fn create_then_remove_reports_empty() {
        let mut node = MergedNode::new("a", state(1.0, true, Action::Write, 1));
        assert!(!node.remove_agent("a"));
        assert_eq!(*node.view(), DerivedView::empty());
    }

    #[test]
    fn removing_one_of_two_recomputes() {
        let mut node = MergedNode::new("a", state(0.9, true, Action::Write, 100));
        node.apply_agent_update("b", state(0.4, false, Action::Read, 50));
        assert!(node.remove_agent("a"));
        let view = node.view();
        assert_eq!(view.heat, 0.4);
        assert!(!view.in_context);
        assert_eq!(view.last_agent_id, "b");
        assert_eq!(view.last_timestamp_ms, 50);
    }

    #[test]
    fn removing_absent_agent_is_noop() {
        let mut node = MergedNode::new("a", state(0.9, true, Action::Write, 100));
        let before = node.view().clone();
        assert!(node.remove_agent("ghost"));
        assert_eq!(*node.view(), before);
    }

    #[test]
    fn empty_map_derivation_is_total() {
        let view = derive_view(&BTreeMap::new());
        assert_eq!(view, DerivedView::empty());
        assert_eq!(view.last_action, Action::Read);
        assert!(view.last_agent_id.is_empty());
    }
}
