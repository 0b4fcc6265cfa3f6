//! A cloneable handle for controlling and observing a session from other tasks.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::{
    connection::{ConnectionPhase, ConnectionState},
    error::ErrorInfo,
    events::SessionEvent,
    store::{MessageStore, StreamMessage},
};

/// Mutable state owned by one session
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    pub(crate) store: MessageStore,
    pub(crate) connection: ConnectionState,
    pub(crate) phase: ConnectionPhase,
    pub(crate) error: Option<ErrorInfo>,
    pub(crate) is_streaming: bool,
    /// Last payload passed to `start`, kept for manual retry
    pub(crate) payload: Option<serde_json::Value>,
    /// Bumped by every `start` and `reset`; stale runs compare against it
    pub(crate) generation: u64,
}

impl SessionState {
    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            messages: self.store.snapshot().to_vec(),
            is_streaming: self.is_streaming,
            error: self.error.clone(),
            connection_state: self.connection.clone(),
            phase: self.phase,
        }
    }
}

/// Everything a collaborator renders
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub messages: Vec<StreamMessage>,
    pub is_streaming: bool,
    pub error: Option<ErrorInfo>,
    pub connection_state: ConnectionState,
    pub phase: ConnectionPhase,
}

/// A cloneable handle for poking the session from external code.
///
/// All fields are `Arc`-wrapped, so cloning is cheap.
#[derive(Clone)]
pub struct SessionHandle {
    pub(crate) state: Arc<Mutex<SessionState>>,
    pub(crate) cancel: Arc<Mutex<CancellationToken>>,
    pub(crate) event_tx: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    pub(crate) fn new() -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            state: Arc::new(Mutex::new(SessionState::default())),
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
            event_tx,
        }
    }

    /// Stop the in-flight attempt or pending backoff. Messages and the last
    /// error stay visible.
    pub fn cancel(&self) {
        self.cancel.lock().cancel();
    }

    /// Stop everything and return the session to its zero state.
    pub fn reset(&self) {
        {
            let mut state = self.state.lock();
            state.generation += 1;
            self.cancel.lock().cancel();
            state.store.clear();
            state.connection = ConnectionState::default();
            state.phase = ConnectionPhase::Idle;
            state.error = None;
            state.is_streaming = false;
            state.payload = None;
        }
        tracing::debug!("Session reset");
        self.emit(SessionEvent::Reset);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.lock().snapshot()
    }

    pub fn is_streaming(&self) -> bool {
        self.state.lock().is_streaming
    }

    pub fn messages(&self) -> Vec<StreamMessage> {
        self.state.lock().store.snapshot().to_vec()
    }

    pub fn error(&self) -> Option<ErrorInfo> {
        self.state.lock().error.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state.lock().connection.clone()
    }

    /// Subscribe to session notifications
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Install a fresh token for a new run, cancelling the previous one.
    pub(crate) fn renew_cancel(&self) -> CancellationToken {
        let mut cancel = self.cancel.lock();
        cancel.cancel();
        *cancel = CancellationToken::new();
        cancel.clone()
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        // no receivers is fine
        let _ = self.event_tx.send(event);
    }
}
