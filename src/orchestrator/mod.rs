//! The orchestrator: owns agent connections, routes decoded frames through
//! each agent's processor into the merge core, and emits sequence-numbered
//! merged snapshots and deltas to the host.
//!
//! All state lives behind one mutex; every public entry point and every
//! dispatch of a reader-task event locks it, mutates to completion, and
//! fires callbacks only after state writes are done. The merge algorithms
//! hold no locks internally. Host callbacks must not re-enter the
//! orchestrator; the intended implementations forward to channels or the
//! batcher.

mod connection;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::merge::MergedNode;
use crate::processor::ProcessorRegistry;
use crate::types::NodeUpdate;
use crate::view::{AgentInfo, DeltaEntry, MergedDelta, MergedSnapshot, NodeSummary};
use crate::wire::InboundMessage;

use self::connection::{AgentConnection, COLOR_PALETTE, ConnEvent, EVENT_CHANNEL_DEPTH, spawn_reader};

// ── Host event surface ────────────────────────────────────────────────────────

/// The three callbacks the host wires to the front end. Implementations are
/// invoked on the runtime's worker threads and should hand off quickly;
/// exceptions are not trapped here.
pub trait ViewEvents: Send + Sync {
    /// Full view; recipients must treat prior state as invalid.
    fn on_merged_snapshot(&self, snapshot: MergedSnapshot);
    /// Incremental updates and retractions.
    fn on_merged_delta(&self, delta: MergedDelta);
    /// Fired whenever an agent is added, removed, connects, or disconnects.
    fn on_agent_update(&self, agents: Vec<AgentInfo>);
}

// ── State ─────────────────────────────────────────────────────────────────────

struct State {
    /// Instance id → connection record.
    agents: BTreeMap<String, AgentConnection>,
    /// Canonical file path → merged node.
    nodes: BTreeMap<String, MergedNode>,
    /// Outbound sequence counter; strictly monotonic within one lifetime.
    out_seq: u64,
    /// Per-agent-type ordinal for display names.
    type_counters: BTreeMap<String, u64>,
    palette_cursor: usize,
    disposed: bool,
}

impl State {
    fn empty() -> Self {
        State {
            agents: BTreeMap::new(),
            nodes: BTreeMap::new(),
            out_seq: 0,
            type_counters: BTreeMap::new(),
            palette_cursor: 0,
            disposed: false,
        }
    }
}

fn lock(state: &Arc<Mutex<State>>) -> std::sync::MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Orchestrator {
    state: Arc<Mutex<State>>,
    sink: Arc<dyn ViewEvents>,
    registry: ProcessorRegistry,
    events_tx: mpsc::Sender<ConnEvent>,
    dispatch: JoinHandle<()>,
}

impl Orchestrator {
    /// Must be constructed inside a tokio runtime; the dispatch loop and
    /// connection readers are spawned tasks.
    pub fn new(sink: Arc<dyn ViewEvents>) -> Self {
        let (events_tx, mut events_rx) = mpsc::channel(EVENT_CHANNEL_DEPTH);
        let state = Arc::new(Mutex::new(State::empty()));
        let dispatch = tokio::spawn({
            let state = Arc::clone(&state);
            let sink = Arc::clone(&sink);
            async move {
                while let Some(event) = events_rx.recv().await {
                    dispatch_event(&state, sink.as_ref(), event);
                }
            }
        });
        Orchestrator {
            state,
            sink,
            registry: ProcessorRegistry::builtin(),
            events_tx,
            dispatch,
        }
    }

    /// Register an agent and dial its probe. Network failure is not an
    /// error here; it surfaces as an agent-update with connected=false.
    pub fn add_agent(&self, instance_id: &str, tcp_port: u16, agent_type: &str) {
        let mut state = lock(&self.state);
        if state.disposed {
            return;
        }
        if state.agents.contains_key(instance_id) {
            warn!(agent = instance_id, "duplicate agent registration ignored");
            return;
        }

        let ordinal = {
            let counter = state.type_counters.entry(agent_type.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };
        let display_name = format!("{agent_type}-{ordinal}");
        let color = COLOR_PALETTE[state.palette_cursor % COLOR_PALETTE.len()];
        state.palette_cursor += 1;

        info!(agent = instance_id, name = %display_name, port = tcp_port, "agent registered");
        let reader = spawn_reader(instance_id.to_string(), tcp_port, self.events_tx.clone());
        state.agents.insert(
            instance_id.to_string(),
            AgentConnection {
                agent_type: agent_type.to_string(),
                display_name,
                color,
                tcp_port,
                connected: false,
                last_seq: 0,
                processor: self.registry.create(agent_type),
                reader: Some(reader),
            },
        );
        self.sink.on_agent_update(roster(&state));
    }

    /// Tear an agent out of the merged view. Nodes it alone sustained are
    /// retracted; nodes shared with other agents get update entries, since
    /// their derived view may have changed. One merged delta covers both.
    pub fn remove_agent(&self, instance_id: &str) {
        let mut state = lock(&self.state);
        if state.disposed {
            return;
        }
        let Some(mut conn) = state.agents.remove(instance_id) else {
            warn!(agent = instance_id, "remove for unknown agent ignored");
            return;
        };
        if let Some(reader) = conn.reader.take() {
            reader.abort();
        }
        info!(agent = instance_id, name = %conn.display_name, "agent removed");

        let entries = strip_agent(&mut state, instance_id);
        if !entries.is_empty() {
            state.out_seq += 1;
            let delta = MergedDelta {
                seq: state.out_seq,
                entries: entries.into_values().collect(),
            };
            self.sink.on_merged_delta(delta);
        }
        self.sink.on_agent_update(roster(&state));
    }

    /// Materialize the full current view under a fresh sequence number.
    pub fn merged_snapshot(&self) -> MergedSnapshot {
        let mut state = lock(&self.state);
        state.out_seq += 1;
        materialize_snapshot(&state)
    }

    pub fn agent_count(&self) -> usize {
        lock(&self.state).agents.len()
    }

    /// Terminal. Aborts every reader, clears all state, and resets the
    /// name/color/sequence counters.
    pub fn dispose(&self) {
        let mut state = lock(&self.state);
        if state.disposed {
            return;
        }
        state.disposed = true;
        for conn in state.agents.values_mut() {
            if let Some(reader) = conn.reader.take() {
                reader.abort();
            }
        }
        state.agents.clear();
        state.nodes.clear();
        state.type_counters.clear();
        state.palette_cursor = 0;
        state.out_seq = 0;
        self.dispatch.abort();
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.dispose();
    }
}

// ── Dispatch ──────────────────────────────────────────────────────────────────

fn dispatch_event(state: &Arc<Mutex<State>>, sink: &dyn ViewEvents, event: ConnEvent) {
    let mut state = lock(state);
    if state.disposed {
        return;
    }
    match event {
        ConnEvent::Connected { instance_id } => {
            let Some(conn) = state.agents.get_mut(&instance_id) else {
                return;
            };
            conn.connected = true;
            info!(agent = %instance_id, "probe connected");
            sink.on_agent_update(roster(&state));
        }
        ConnEvent::Closed { instance_id, error } => {
            let Some(conn) = state.agents.get_mut(&instance_id) else {
                return;
            };
            conn.connected = false;
            conn.reader = None;
            match error {
                Some(e) => error!(agent = %instance_id, error = %e, "probe connection lost"),
                None => info!(agent = %instance_id, "probe closed the connection"),
            }
            // The agent's contributions stay in the merged view until the
            // host decides on an explicit remove_agent.
            sink.on_agent_update(roster(&state));
        }
        ConnEvent::Frame {
            instance_id,
            message,
        } => handle_frame(&mut state, sink, &instance_id, message),
    }
}

fn handle_frame(state: &mut State, sink: &dyn ViewEvents, instance_id: &str, message: InboundMessage) {
    match message {
        InboundMessage::Snapshot(raw) => {
            let processed = {
                let Some(conn) = state.agents.get_mut(instance_id) else {
                    return;
                };
                let processed = conn.processor.process_snapshot(raw);
                // A snapshot restarts the agent's replica; its seq becomes
                // the new lastSeq even if lower than a prior delta's.
                conn.last_seq = processed.seq;
                processed
            };

            // Full replace: strip the agent everywhere, then re-insert.
            // Files the snapshot omits are implicitly retracted.
            let mut emptied = Vec::new();
            for (path, node) in &mut state.nodes {
                if node.contains_agent(instance_id) && !node.remove_agent(instance_id) {
                    emptied.push(path.clone());
                }
            }
            for path in &emptied {
                state.nodes.remove(path);
            }
            for (path, file_state) in processed.nodes {
                state
                    .nodes
                    .entry(path)
                    .and_modify(|n| n.apply_agent_update(instance_id, file_state.clone()))
                    .or_insert_with(|| MergedNode::new(instance_id, file_state));
            }

            state.out_seq += 1;
            sink.on_merged_snapshot(materialize_snapshot(state));
        }
        InboundMessage::Delta(raw) => {
            let processed = {
                let Some(conn) = state.agents.get_mut(instance_id) else {
                    return;
                };
                if raw.seq <= conn.last_seq {
                    debug!(
                        agent = %instance_id,
                        seq = raw.seq,
                        last_seq = conn.last_seq,
                        "dropping stale delta"
                    );
                    return;
                }
                let processed = conn.processor.process_delta(raw);
                conn.last_seq = processed.seq;
                processed
            };

            let mut entries: BTreeMap<String, DeltaEntry> = BTreeMap::new();
            let State { nodes, agents, .. } = &mut *state;
            for NodeUpdate { path, state: file_state } in processed.updates {
                let node = nodes
                    .entry(path.clone())
                    .and_modify(|n| n.apply_agent_update(instance_id, file_state.clone()))
                    .or_insert_with(|| MergedNode::new(instance_id, file_state));
                entries.insert(path.clone(), update_entry(&path, node, agents));
            }
            for path in processed.removed {
                let Some(node) = nodes.get_mut(&path) else {
                    continue;
                };
                if !node.contains_agent(instance_id) {
                    continue;
                }
                if node.remove_agent(instance_id) {
                    entries.insert(path.clone(), update_entry(&path, node, agents));
                } else {
                    nodes.remove(&path);
                    entries.insert(path.clone(), DeltaEntry::remove(path));
                }
            }

            // An inbound delta that changes nothing emits nothing, and the
            // outbound counter is not burned.
            if entries.is_empty() {
                return;
            }
            state.out_seq += 1;
            sink.on_merged_delta(MergedDelta {
                seq: state.out_seq,
                entries: entries.into_values().collect(),
            });
        }
        InboundMessage::Usage(value) => {
            let Some(conn) = state.agents.get_mut(instance_id) else {
                return;
            };
            if let Some(payload) = conn.processor.process_usage(value) {
                debug!(agent = %conn.display_name, %payload, "usage report");
            }
        }
    }
}

// ── Materialization ───────────────────────────────────────────────────────────

fn display_name(agents: &BTreeMap<String, AgentConnection>, instance_id: &str) -> String {
    agents
        .get(instance_id)
        .map_or_else(|| instance_id.to_string(), |c| c.display_name.clone())
}

fn roster(state: &State) -> Vec<AgentInfo> {
    state
        .agents
        .values()
        .map(|conn| AgentInfo {
            name: conn.display_name.clone(),
            agent_type: conn.agent_type.clone(),
            color: conn.color,
            connected: conn.connected,
        })
        .collect()
}

fn update_entry(
    path: &str,
    node: &MergedNode,
    agents: &BTreeMap<String, AgentConnection>,
) -> DeltaEntry {
    let view = node.view();
    let mut agent_heat = BTreeMap::new();
    let mut agent_context = BTreeMap::new();
    for (id, file_state) in node.agents() {
        let name = display_name(agents, id);
        agent_heat.insert(name.clone(), file_state.heat);
        agent_context.insert(name, file_state.in_context);
    }
    DeltaEntry {
        id: path.to_string(),
        action: view.last_action.into(),
        in_context: Some(view.in_context),
        changed: Some(view.last_timestamp_ms),
        agent_heat: Some(agent_heat),
        agent_context: Some(agent_context),
    }
}

/// Build the full outbound view. The caller has already bumped `out_seq`.
fn materialize_snapshot(state: &State) -> MergedSnapshot {
    let nodes = state
        .nodes
        .iter()
        .map(|(path, node)| {
            let view = node.view();
            let mut agent_heat = BTreeMap::new();
            let mut agent_context = BTreeMap::new();
            let mut agent_turns = BTreeMap::new();
            for (id, file_state) in node.agents() {
                let name = display_name(&state.agents, id);
                agent_heat.insert(name.clone(), file_state.heat);
                agent_context.insert(name.clone(), file_state.in_context);
                agent_turns.insert(name, file_state.turn_accessed);
            }
            NodeSummary {
                id: path.clone(),
                heat: view.heat,
                in_context: view.in_context,
                last_action: view.last_action,
                last_agent: display_name(&state.agents, &view.last_agent_id),
                last_timestamp_ms: view.last_timestamp_ms,
                agent_heat,
                agent_context,
                agent_turns,
            }
        })
        .collect();

    MergedSnapshot {
        seq: state.out_seq,
        nodes,
        // Structural edges come from the baseline graph provider; the host
        // overlays them.
        call_edges: Vec::new(),
        agents: roster(state),
    }
}

/// Strip one agent from every node, producing remove entries for nodes it
/// alone sustained and update entries for the rest.
fn strip_agent(state: &mut State, instance_id: &str) -> BTreeMap<String, DeltaEntry> {
    let mut entries = BTreeMap::new();
    let mut emptied = Vec::new();
    let State { nodes, agents, .. } = &mut *state;
    for (path, node) in nodes.iter_mut() {
        if !node.contains_agent(instance_id) {
            continue;
        }
        if node.remove_agent(instance_id) {
            entries.insert(path.clone(), update_entry(path, node, agents));
        } else {
            emptied.push(path.clone());
        }
    }
    for path in emptied {
        nodes.remove(&path);
        entries.insert(path.clone(), DeltaEntry::remove(path));
    }
    entries
}
