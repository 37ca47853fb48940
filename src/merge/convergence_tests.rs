//! Property tests for merge convergence.
//!
//! The derived view must be a pure function of the per-agent states: for a
//! fixed set of final replicas the view is uniquely determined, no matter
//! how the updates that produced them interleaved. Verified here as
//! permutation invariance (commutativity + associativity), idempotency, and
//! agreement between incremental application and from-scratch derivation.
//!
//! Timestamps are drawn from a deliberately small range so same-millisecond
//! ties (the priority-tiebreak path) occur often.

use std::collections::BTreeMap;

use proptest::prelude::*;

use super::{DerivedView, MergedNode, derive_view};
use crate::types::{Action, AgentFileState};

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

fn arb_action() -> impl Strategy<Value = Action> {
    prop_oneof![
        Just(Action::Read),
        Just(Action::Write),
        Just(Action::Search)
    ]
}

fn arb_state() -> impl Strategy<Value = AgentFileState> {
    (0.0f64..=1.0, any::<bool>(), arb_action(), 0u64..64, 0u64..32).prop_map(
        |(heat, in_context, last_action, timestamp_ms, turn_accessed)| AgentFileState {
            heat,
            in_context,
            last_action,
            timestamp_ms,
            turn_accessed,
        },
    )
}

/// 2..=6 updates targeting distinct agents.
fn arb_distinct_updates() -> impl Strategy<Value = Vec<(String, AgentFileState)>> {
    prop::collection::btree_map("[a-f]", arb_state(), 2..=6)
        .prop_map(|m| m.into_iter().collect())
}

/// 1..=12 updates where agents may repeat (later updates replace earlier).
fn arb_update_sequence() -> impl Strategy<Value = Vec<(String, AgentFileState)>> {
    prop::collection::vec(("[a-d]", arb_state()), 1..=12)
}

fn apply_all(updates: &[(String, AgentFileState)]) -> Option<MergedNode> {
    let mut node: Option<MergedNode> = None;
    for (agent, state) in updates {
        match node.as_mut() {
            None => node = Some(MergedNode::new(agent, state.clone())),
            Some(n) => n.apply_agent_update(agent, state.clone()),
        }
    }
    node
}

fn view_of(updates: &[(String, AgentFileState)]) -> DerivedView {
    apply_all(updates).map_or_else(DerivedView::empty, |n| n.view().clone())
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Commutativity + associativity: any permutation of updates targeting
    /// distinct agents yields the same derived view.
    #[test]
    fn permutations_converge(updates in arb_distinct_updates().prop_shuffle()) {
        let mut canonical = updates.clone();
        canonical.sort_by(|a, b| a.0.cmp(&b.0));
        prop_assert_eq!(view_of(&updates), view_of(&canonical));
        let mut reversed = canonical.clone();
        reversed.reverse();
        prop_assert_eq!(view_of(&reversed), view_of(&canonical));
    }

    /// Idempotency: applying the same update twice yields the view of
    /// applying it once.
    #[test]
    fn reapplication_is_idempotent(
        updates in arb_update_sequence(),
        pick in any::<prop::sample::Index>(),
    ) {
        let (agent, state) = updates[pick.index(updates.len())].clone();
        let mut node = match apply_all(&updates) {
            Some(n) => n,
            None => return Ok(()),
        };
        node.apply_agent_update(&agent, state.clone());
        let once = node.view().clone();
        node.apply_agent_update(&agent, state);
        prop_assert_eq!(node.view(), &once);
    }

    /// Incremental application agrees with from-scratch derivation over the
    /// final replica set (convergence: the view is a pure function of the
    /// agents map).
    #[test]
    fn incremental_matches_batch(updates in arb_update_sequence()) {
        let node = match apply_all(&updates) {
            Some(n) => n,
            None => return Ok(()),
        };
        let mut finals: BTreeMap<String, AgentFileState> = BTreeMap::new();
        for (agent, state) in &updates {
            finals.insert(agent.clone(), state.clone());
        }
        prop_assert_eq!(node.view(), &derive_view(&finals));
        prop_assert_eq!(node.agents(), &finals);
    }

    /// Removing an agent leaves the view of the remaining replicas, and an
    /// emptied node reports itself removable with the empty view.
    #[test]
    fn removal_recomputes_remainder(updates in arb_distinct_updates()) {
        let (victim, _) = updates[0].clone();
        let mut node = match apply_all(&updates) {
            Some(n) => n,
            None => return Ok(()),
        };
        let keep = node.remove_agent(&victim);
        prop_assert!(!node.contains_agent(&victim));

        let mut remainder: BTreeMap<String, AgentFileState> = BTreeMap::new();
        for (agent, state) in updates.iter().skip(1) {
            remainder.insert(agent.clone(), state.clone());
        }
        prop_assert_eq!(keep, !remainder.is_empty());
        prop_assert_eq!(node.view(), &derive_view(&remainder));
    }

    /// The view invariant: heat is the running max, in_context the running
    /// OR, and the winning timestamp is the max timestamp present.
    #[test]
    fn view_bounds_hold(updates in arb_distinct_updates()) {
        let node = match apply_all(&updates) {
            Some(n) => n,
            None => return Ok(()),
        };
        let view = node.view();
        let max_heat = updates.iter().map(|(_, s)| s.heat).fold(0.0f64, f64::max);
        let any_ctx = updates.iter().any(|(_, s)| s.in_context);
        let max_ts = updates.iter().map(|(_, s)| s.timestamp_ms).max().unwrap_or(0);
        prop_assert_eq!(view.heat, max_heat);
        prop_assert_eq!(view.in_context, any_ctx);
        prop_assert_eq!(view.last_timestamp_ms, max_ts);
    }
}
