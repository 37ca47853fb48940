use serde::Serialize;

// ── Normalized actions ────────────────────────────────────────────────────────

/// What an agent did to a file, collapsed to the three categories the merged
/// view distinguishes. Conversion from wire strings happens at the decode
/// boundary; nothing downstream switches on raw strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Read,
    Write,
    Search,
}

impl Action {
    /// Tie-break priority for same-millisecond observations: write beats
    /// search beats read.
    pub fn priority(self) -> u8 {
        match self {
            Action::Write => 3,
            Action::Search => 2,
            Action::Read => 1,
        }
    }

    /// Map a wire action string onto the normalized set. Anything the
    /// protocol doesn't recognize counts as a read.
    pub fn normalize(raw: &str) -> Self {
        match raw {
            "write" => Action::Write,
            "search" => Action::Search,
            _ => Action::Read,
        }
    }
}

// ── Per-agent file state ──────────────────────────────────────────────────────

/// One agent's most recent report about one file. Replaced wholesale on every
/// new observation from that agent; never patched field by field.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentFileState {
    /// Decaying recency signal in [0, 1], computed probe-side.
    pub heat: f64,
    /// Whether the agent currently holds the file in its active context.
    pub in_context: bool,
    pub last_action: Action,
    /// Wall-clock milliseconds of the action, probe-side.
    pub timestamp_ms: u64,
    /// Monotonic per-agent conversation turn. Carried for display only;
    /// the merge never consults it.
    pub turn_accessed: u64,
}

/// A per-agent file observation bound to its canonicalized path. What the
/// processor layer hands to the merge step.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeUpdate {
    pub path: String,
    pub state: AgentFileState,
}
