use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::types::{Action, AgentFileState};

// ── Wire payloads ─────────────────────────────────────────────────────────────
//
// One JSON object per line, discriminated by `type`. The probe's agent_id is
// informational only; the authoritative identifier is the instance id the
// host passed to add_agent, so nothing downstream reads it.

/// Per-file state as the probe reports it. `last_action` stays a raw string
/// here so type-specific processors can remap probe verbs before
/// normalization.
#[derive(Debug, Clone, Deserialize)]
pub struct RawFileState {
    pub heat: f64,
    pub in_context: bool,
    pub last_action: String,
    pub timestamp_ms: u64,
    #[serde(default)]
    pub turn_accessed: u64,
}

impl RawFileState {
    /// Default normalization: clamp heat to [0, 1] and collapse the action
    /// string. Processors that don't remap verbs call straight through.
    pub fn normalized(&self) -> AgentFileState {
        self.with_action(Action::normalize(&self.last_action))
    }

    pub fn with_action(&self, action: Action) -> AgentFileState {
        AgentFileState {
            heat: self.heat.clamp(0.0, 1.0),
            in_context: self.in_context,
            last_action: action,
            timestamp_ms: self.timestamp_ms,
            turn_accessed: self.turn_accessed,
        }
    }
}

/// A complete replica of one agent's file state. Files the agent reported
/// earlier but omits here are implicitly retracted.
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotMsg {
    pub seq: u64,
    #[allow(dead_code)]
    pub agent_id: String,
    pub nodes: BTreeMap<String, RawFileState>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawNodeUpdate {
    pub path: String,
    #[serde(flatten)]
    pub state: RawFileState,
}

/// Incremental updates and explicit retractions from one agent.
#[derive(Debug, Clone, Deserialize)]
pub struct DeltaMsg {
    pub seq: u64,
    #[allow(dead_code)]
    pub agent_id: String,
    #[serde(default)]
    pub updates: Vec<RawNodeUpdate>,
    #[serde(default)]
    pub removed: Vec<String>,
}

/// A decoded inbound frame. Usage payloads are processor-defined, so they
/// stay untyped.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    Snapshot(SnapshotMsg),
    Delta(DeltaMsg),
    Usage(Value),
}

// ── Decode faults ─────────────────────────────────────────────────────────────

/// Why a wire line was dropped. None of these tear down the connection; the
/// reader logs and moves on.
#[derive(Debug, Error)]
pub enum DecodeFault {
    #[error("malformed JSON line: {0}")]
    WireParse(serde_json::Error),
    /// Unknown `type` discriminator; warned once per kind per connection.
    #[error("unknown message kind `{kind}`")]
    UnknownKind { kind: String },
    /// Well-formed JSON with a recognized kind but a missing or ill-typed
    /// required field.
    #[error("bad `{kind}` message: {source}")]
    Violation {
        kind: &'static str,
        source: serde_json::Error,
    },
}

/// Decode one complete line. Parsing is two-stage so the fault taxonomy is
/// observable: raw JSON first, then the discriminator, then the typed shape.
pub fn decode_line(line: &str) -> Result<InboundMessage, DecodeFault> {
    let value: Value = serde_json::from_str(line).map_err(DecodeFault::WireParse)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_default();
    match kind.as_str() {
        "snapshot" => serde_json::from_value(value)
            .map(InboundMessage::Snapshot)
            .map_err(|e| DecodeFault::Violation {
                kind: "snapshot",
                source: e,
            }),
        "delta" => serde_json::from_value(value)
            .map(InboundMessage::Delta)
            .map_err(|e| DecodeFault::Violation {
                kind: "delta",
                source: e,
            }),
        "usage" => Ok(InboundMessage::Usage(value)),
        _ => Err(DecodeFault::UnknownKind { kind }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_snapshot() {
        let line = r#"{"type":"snapshot","seq":3,"agent_id":"probe-1","nodes":{"/src/lib.rs":{"heat":0.8,"in_context":true,"last_action":"write","timestamp_ms":1000,"turn_accessed":4}}}"#;
        let msg = decode_line(line).unwrap();
        let InboundMessage::Snapshot(snap) = msg else {
            panic!("expected snapshot");
        };
        assert_eq!(snap.seq, 3);
        let state = &snap.nodes["/src/lib.rs"];
        assert_eq!(state.last_action, "write");
        assert_eq!(state.timestamp_ms, 1000);
    }

    #[test]
    fn decodes_delta_with_defaults() {
        let line = r#"{"type":"delta","seq":9,"agent_id":"probe-1","updates":[{"path":"/a.rs","heat":1.0,"in_context":false,"last_action":"read","timestamp_ms":5}]}"#;
        let msg = decode_line(line).unwrap();
        let InboundMessage::Delta(delta) = msg else {
            panic!("expected delta");
        };
        assert_eq!(delta.updates.len(), 1);
        assert!(delta.removed.is_empty());
        assert_eq!(delta.updates[0].state.turn_accessed, 0);
    }

    #[test]
    fn usage_passes_through_untyped() {
        let line = r#"{"type":"usage","agent_id":"probe-1","tokens_in":120,"tokens_out":30}"#;
        let msg = decode_line(line).unwrap();
        let InboundMessage::Usage(v) = msg else {
            panic!("expected usage");
        };
        assert_eq!(v["tokens_in"], 120);
    }

    #[test]
    fn bad_json_is_wire_parse() {
        assert!(matches!(
            decode_line("{not json"),
            Err(DecodeFault::WireParse(_))
        ));
    }

    #[test]
    fn unknown_kind_is_flagged() {
        let err = decode_line(r#"{"type":"heartbeat"}"#).unwrap_err();
        assert!(matches!(err, DecodeFault::UnknownKind { kind } if kind == "heartbeat"));
        // Missing discriminator reports an empty kind.
        let err = decode_line(r#"{"seq":1}"#).unwrap_err();
        assert!(matches!(err, DecodeFault::UnknownKind { kind } if kind.is_empty()));
    }

    #[test]
    fn missing_field_is_violation() {
        let err = decode_line(r#"{"type":"delta","agent_id":"x"}"#).unwrap_err();
        assert!(matches!(err, DecodeFault::Violation { kind: "delta", .. }));
    }

    #[test]
    fn normalization_clamps_heat() {
        let raw = RawFileState {
            heat: 1.7,
            in_context: true,
            last_action: "compile".into(),
            timestamp_ms: 1,
            turn_accessed: 0,
        };
        let state = raw.normalized();
        assert_eq!(state.heat, 1.0);
        assert_eq!(state.last_action, Action::Read);
    }
}
