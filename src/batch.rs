//! Coalescing rate limiter between the orchestrator's delta stream and the
//! front-end IPC channel.
//!
//! Merged deltas can arrive far faster than the UI channel wants to see
//! them. Within one flush window the batcher keeps only the latest entry
//! per file path and posts a single message whose sequence number is that
//! of the latest contributing delta. Snapshots and roster updates bypass
//! the window; a snapshot also clears it, since its sequence number
//! supersedes every pending entry and outbound ordering must stay
//! monotonic.
//!
//! Explicit three-state machine per the timer's lifecycle: Idle (no window
//! open), Pending (window armed, flush scheduled), Disposed (terminal).

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::view::{AgentInfo, DeltaEntry, MergedDelta, MergedSnapshot, UiMessage};

/// Flush window (≈5 Hz toward the UI).
pub const FLUSH_WINDOW: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushState {
    Idle,
    Pending,
    Disposed,
}

#[derive(Debug)]
struct Inner {
    state: FlushState,
    /// Latest entry per path within the open window.
    pending: BTreeMap<String, DeltaEntry>,
    /// Seq of the latest delta contributing to the open window.
    pending_seq: u64,
    timer: Option<JoinHandle<()>>,
}

pub struct Batcher {
    inner: Arc<Mutex<Inner>>,
    tx: mpsc::UnboundedSender<UiMessage>,
}

fn lock(inner: &Arc<Mutex<Inner>>) -> std::sync::MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Batcher {
    /// Must be constructed inside a tokio runtime; flush timers are spawned
    /// tasks.
    pub fn new(tx: mpsc::UnboundedSender<UiMessage>) -> Self {
        Batcher {
            inner: Arc::new(Mutex::new(Inner {
                state: FlushState::Idle,
                pending: BTreeMap::new(),
                pending_seq: 0,
                timer: None,
            })),
            tx,
        }
    }

    /// Accumulate a merged delta. The first delta after an idle period arms
    /// the flush timer; everything arriving before it fires is coalesced.
    pub fn push_delta(&self, delta: MergedDelta) {
        let mut inner = lock(&self.inner);
        if inner.state == FlushState::Disposed {
            return;
        }
        for entry in delta.entries {
            inner.pending.insert(entry.id.clone(), entry);
        }
        inner.pending_seq = delta.seq;
        if inner.state == FlushState::Idle {
            inner.state = FlushState::Pending;
            let handle_inner = Arc::clone(&self.inner);
            let tx = self.tx.clone();
            inner.timer = Some(tokio::spawn(async move {
                tokio::time::sleep(FLUSH_WINDOW).await;
                flush(&handle_inner, &tx);
            }));
        }
    }

    /// Snapshots invalidate all prior state downstream, so they skip the
    /// window and drop whatever it held.
    pub fn post_snapshot(&self, snapshot: MergedSnapshot) {
        let mut inner = lock(&self.inner);
        if inner.state == FlushState::Disposed {
            return;
        }
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }
        if !inner.pending.is_empty() {
            debug!(
                dropped = inner.pending.len(),
                "snapshot superseded pending delta window"
            );
        }
        inner.pending.clear();
        inner.state = FlushState::Idle;
        let _ = self.tx.send(UiMessage::Snapshot(snapshot));
    }

    /// Roster updates are small and rare; post immediately.
    pub fn post_agents(&self, agents: Vec<AgentInfo>) {
        let inner = lock(&self.inner);
        if inner.state == FlushState::Disposed {
            return;
        }
        let _ = self.tx.send(UiMessage::Agents { agents });
    }

    pub fn dispose(&self) {
        let mut inner = lock(&self.inner);
        inner.state = FlushState::Disposed;
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }
        inner.pending.clear();
    }
}

fn flush(inner: &Arc<Mutex<Inner>>, tx: &mpsc::UnboundedSender<UiMessage>) {
    let mut inner = lock(inner);
    if inner.state != FlushState::Pending {
        return;
    }
    inner.state = FlushState::Idle;
    inner.timer = None;
    if inner.pending.is_empty() {
        return;
    }
    let entries: Vec<DeltaEntry> = std::mem::take(&mut inner.pending).into_values().collect();
    let delta = MergedDelta {
        seq: inner.pending_seq,
        entries,
    };
    let _ = tx.send(UiMessage::Delta(delta));
}
