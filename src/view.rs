//! Outbound message types: what the orchestrator hands the host and what
//! the batcher posts to the front-end IPC channel.
//!
//! Per-agent data crosses this boundary keyed by display name only; the
//! opaque instance ids stay inside the orchestrator.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::types::Action;

// ── Agent roster ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInfo {
    /// Display name, e.g. `claude-2`. The only agent identifier the front
    /// end ever sees.
    pub name: String,
    pub agent_type: String,
    pub color: &'static str,
    pub connected: bool,
}

// ── Merged snapshot ───────────────────────────────────────────────────────────

/// Structural call edges come from the baseline graph provider, not from
/// live agent activity; the orchestrator always emits an empty list and the
/// host overlays.
#[allow(dead_code)]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallEdge {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSummary {
    /// Canonical file path; doubles as the graph node id.
    pub id: String,
    pub heat: f64,
    pub in_context: bool,
    pub last_action: Action,
    /// Display name of the agent whose action won.
    pub last_agent: String,
    pub last_timestamp_ms: u64,
    pub agent_heat: BTreeMap<String, f64>,
    pub agent_context: BTreeMap<String, bool>,
    /// Latest conversation turn each agent touched this file on. Display
    /// only.
    pub agent_turns: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedSnapshot {
    pub seq: u64,
    pub nodes: Vec<NodeSummary>,
    pub call_edges: Vec<CallEdge>,
    pub agents: Vec<AgentInfo>,
}

// ── Merged delta ──────────────────────────────────────────────────────────────

/// Action slot of a delta entry; `remove` retracts the node entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaAction {
    Read,
    Write,
    Search,
    Remove,
}

impl From<Action> for DeltaAction {
    fn from(action: Action) -> Self {
        match action {
            Action::Read => DeltaAction::Read,
            Action::Write => DeltaAction::Write,
            Action::Search => DeltaAction::Search,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaEntry {
    pub id: String,
    pub action: DeltaAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_context: Option<bool>,
    /// Wall-clock milliseconds of the view's winning action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_heat: Option<BTreeMap<String, f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_context: Option<BTreeMap<String, bool>>,
}

impl DeltaEntry {
    pub fn remove(id: String) -> Self {
        DeltaEntry {
            id,
            action: DeltaAction::Remove,
            in_context: None,
            changed: None,
            agent_heat: None,
            agent_context: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedDelta {
    pub seq: u64,
    pub entries: Vec<DeltaEntry>,
}

// ── IPC envelope ──────────────────────────────────────────────────────────────

/// One line on the front-end channel. Snapshots and roster updates bypass
/// the batcher; deltas arrive coalesced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum UiMessage {
    Snapshot(MergedSnapshot),
    Delta(MergedDelta),
    Agents { agents: Vec<AgentInfo> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_entry_serializes_minimal() {
        let entry = DeltaEntry::remove("/z.rs".into());
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["action"], "remove");
        assert_eq!(json["id"], "/z.rs");
        assert!(json.get("agentHeat").is_none());
        assert!(json.get("inContext").is_none());
    }

    #[test]
    fn update_entry_uses_display_name_maps() {
        let mut heat = BTreeMap::new();
        heat.insert("claude-1".to_string(), 0.7);
        let entry = DeltaEntry {
            id: "/a.rs".into(),
            action: DeltaAction::Write,
            in_context: Some(true),
            changed: Some(1234),
            agent_heat: Some(heat),
            agent_context: Some(BTreeMap::new()),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["action"], "write");
        assert_eq!(json["inContext"], true);
        assert_eq!(json["changed"], 1234);
        assert_eq!(json["agentHeat"]["claude-1"], 0.7);
    }

    #[test]
    fn ui_envelope_is_discriminated() {
        let msg = UiMessage::Delta(MergedDelta {
            seq: 9,
            entries: vec![DeltaEntry::remove("/g.rs".into())],
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "delta");
        assert_eq!(json["seq"], 9);

        let roster = UiMessage::Agents { agents: Vec::new() };
        let json = serde_json::to_value(&roster).unwrap();
        assert_eq!(json["type"], "agents");
    }
}
