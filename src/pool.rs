//! Work deduplication: one in-flight operation per key, with progress fan-out
//! to every caller that joined the same key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::debug;

use crate::error::{PullError, Result};
use crate::progress::{ProgressEvent, ProgressSink};

// ---------------------------------------------------------------------------
// Broadcaster
// ---------------------------------------------------------------------------

struct BroadcasterState {
    sinks: Vec<Arc<dyn ProgressSink>>,
    /// Everything emitted so far, replayed to sinks that join late.
    history: Vec<ProgressEvent>,
    /// Terminal outcome; `Some(None)` is success, `Some(Some(_))` a shared
    /// error. Set exactly once.
    terminal: Option<Option<Arc<PullError>>>,
}

/// Fans progress output out to every caller that joined the same pool key,
/// and latches a single terminal outcome for all of them.
///
/// A sink added after events have been emitted receives the full history
/// first, so late joiners lose nothing beyond what already completed. A
/// waiter arriving after close observes the terminal state immediately.
pub struct Broadcaster {
    state: Mutex<BroadcasterState>,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

impl Broadcaster {
    pub fn new() -> Self {
        let (done_tx, done_rx) = watch::channel(false);
        Self {
            state: Mutex::new(BroadcasterState {
                sinks: Vec::new(),
                history: Vec::new(),
                terminal: None,
            }),
            done_tx,
            done_rx,
        }
    }

    /// Register an additional output sink, replaying all prior events to it.
    pub fn add(&self, sink: Arc<dyn ProgressSink>) {
        let mut state = self.state.lock().unwrap();
        for event in &state.history {
            sink.write(event.clone());
        }
        state.sinks.push(sink);
    }

    /// Emit an event to every registered sink. Events written after close are
    /// dropped.
    pub fn write(&self, event: ProgressEvent) {
        let mut state = self.state.lock().unwrap();
        if state.terminal.is_some() {
            return;
        }
        for sink in &state.sinks {
            sink.write(event.clone());
        }
        state.history.push(event);
    }

    /// Latch the terminal outcome and wake all waiters. Idempotent: only the
    /// first close is recorded.
    pub fn close(&self, error: Option<Arc<PullError>>) {
        {
            let mut state = self.state.lock().unwrap();
            if state.terminal.is_some() {
                return;
            }
            state.terminal = Some(error);
        }
        let _ = self.done_tx.send(true);
    }

    /// Block until the broadcaster is closed, then return the terminal
    /// outcome.
    pub async fn wait(&self) -> Result<()> {
        let mut done = self.done_rx.clone();
        loop {
            if *done.borrow_and_update() {
                break;
            }
            if done.changed().await.is_err() {
                break;
            }
        }
        let state = self.state.lock().unwrap();
        match state.terminal.as_ref().and_then(|t| t.clone()) {
            None => Ok(()),
            Some(err) => Err(PullError::Shared(err)),
        }
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for Broadcaster {
    fn write(&self, event: ProgressEvent) {
        Broadcaster::write(self, event);
    }
}

// ---------------------------------------------------------------------------
// PullPool
// ---------------------------------------------------------------------------

/// Keyed registry of in-flight operations. The first caller to acquire a key
/// performs the work; every later caller within the acquire/retire window
/// receives the same broadcaster and therefore the same progress stream and
/// terminal error.
///
/// Created once at process start and shared by reference across all pull
/// invocations.
pub struct PullPool {
    entries: Mutex<HashMap<(String, String), Arc<Broadcaster>>>,
}

impl PullPool {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Join or create the in-flight operation for `(scope, key)`. Returns the
    /// shared broadcaster and whether an operation already existed.
    pub fn acquire(&self, scope: &str, key: &str) -> (Arc<Broadcaster>, bool) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(existing) = entries.get(&(scope.to_string(), key.to_string())) {
            debug!(scope, key, "joining in-flight operation");
            return (existing.clone(), true);
        }
        let broadcaster = Arc::new(Broadcaster::new());
        entries.insert((scope.to_string(), key.to_string()), broadcaster.clone());
        (broadcaster, false)
    }

    /// Remove the entry for `(scope, key)` and close its broadcaster with the
    /// final error, waking all listeners. Retiring an absent key is a no-op.
    pub fn retire(&self, scope: &str, key: &str, error: Option<Arc<PullError>>) {
        let removed = {
            let mut entries = self.entries.lock().unwrap();
            entries.remove(&(scope.to_string(), key.to_string()))
        };
        if let Some(broadcaster) = removed {
            broadcaster.close(error);
        }
    }
}

impl Default for PullPool {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
