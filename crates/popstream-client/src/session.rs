//! Stream session facade
//!
//! [`StreamSession`] is the entry point collaborators use: `start` a run with
//! a payload, `retry_connection` after retries are exhausted, `reset` to
//! clear everything. Live state is read through [`StreamSession::snapshot`]
//! or the broadcast channel from [`StreamSession::subscribe`].

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::{
    config::SessionConfig,
    connection::{ConnectionManager, ConnectionObserver, ConnectionPhase, ConnectionState},
    error::{Error, ErrorInfo, Result},
    events::{SessionEvent, StreamEvent},
    handle::{SessionHandle, SessionSnapshot},
    interpreter,
    transport::{HttpTransport, StreamTransport},
};

pub use crate::connection::SessionOutcome;

/// One logical optimization request lifecycle
pub struct StreamSession {
    manager: ConnectionManager,
    handle: SessionHandle,
}

impl StreamSession {
    /// Create a session over any transport
    pub fn new(transport: Arc<dyn StreamTransport>, config: SessionConfig) -> Self {
        Self {
            manager: ConnectionManager::new(transport, config),
            handle: SessionHandle::new(),
        }
    }

    /// Create a session that POSTs to `config.endpoint`
    pub fn http(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let transport = HttpTransport::new(config.endpoint.clone());
        Ok(Self::new(Arc::new(transport), config))
    }

    pub fn config(&self) -> &SessionConfig {
        self.manager.config()
    }

    /// Get a cloneable handle for cancelling or observing from another task
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Subscribe to session notifications
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.handle.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.handle.snapshot()
    }

    pub fn is_streaming(&self) -> bool {
        self.handle.is_streaming()
    }

    pub fn error(&self) -> Option<ErrorInfo> {
        self.handle.error()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.handle.connection_state()
    }

    /// Start a run with `payload`, cancelling any run already in flight.
    ///
    /// Resolves once streaming has ended; progress is observed through the
    /// snapshot or subscription, not the return value.
    pub async fn start(&self, payload: serde_json::Value) -> SessionOutcome {
        let (generation, cancel) = self.begin_run(&payload);
        self.handle.emit(SessionEvent::MessagesChanged { count: 0 });
        tracing::debug!("Session run {} started", generation);

        let mut sink = SessionSink {
            handle: self.handle.clone(),
            generation,
        };
        let outcome = self.manager.run(&payload, &cancel, &mut sink).await;

        {
            let mut state = self.handle.state.lock();
            if state.generation != generation {
                return outcome;
            }
            state.is_streaming = false;
        }
        self.handle.emit(SessionEvent::Finished { outcome });
        outcome
    }

    /// Supersede any previous run and put the state in its starting shape
    fn begin_run(&self, payload: &serde_json::Value) -> (u64, CancellationToken) {
        let mut state = self.handle.state.lock();
        let cancel = self.handle.renew_cancel();
        state.generation += 1;
        state.store.clear();
        state.error = None;
        state.phase = ConnectionPhase::Idle;
        state.connection = ConnectionState::default();
        state.is_streaming = true;
        state.payload = Some(payload.clone());
        (state.generation, cancel)
    }

    /// Start again with the remembered payload, from a zero retry count.
    ///
    /// Returns `None` without touching any state when nothing was started
    /// since the last reset.
    pub async fn retry_connection(&self) -> Option<SessionOutcome> {
        let payload = {
            let mut state = self.handle.state.lock();
            let payload = state.payload.clone()?;
            state.error = None;
            state.connection.retry_count = 0;
            payload
        };
        tracing::debug!("Manual retry");
        Some(self.start(payload).await)
    }

    /// Cancel, clear messages, connection state, error, and the remembered payload
    pub fn reset(&self) {
        self.handle.reset();
    }

    /// Cancel the in-flight attempt, keeping what was received
    pub fn cancel(&self) {
        self.handle.cancel();
    }
}

/// Applies one run's output to the session state, unless a later
/// `start` or `reset` has superseded it.
struct SessionSink {
    handle: SessionHandle,
    generation: u64,
}

impl ConnectionObserver for SessionSink {
    fn on_transition(&mut self, phase: ConnectionPhase, connection: &ConnectionState) {
        {
            let mut state = self.handle.state.lock();
            if state.generation != self.generation {
                return;
            }
            state.phase = phase;
            state.connection = connection.clone();
            match phase {
                // each attempt's text starts its own message
                ConnectionPhase::Connecting => state.store.close_text(),
                ConnectionPhase::Streaming => state.error = None,
                _ => {}
            }
        }
        self.handle.emit(SessionEvent::ConnectionChanged {
            phase,
            state: connection.clone(),
        });
    }

    fn on_event(&mut self, event: StreamEvent) {
        let count = {
            let mut state = self.handle.state.lock();
            if state.generation != self.generation {
                return;
            }
            if !interpreter::apply(&mut state.store, event).changed() {
                return;
            }
            state.store.len()
        };
        self.handle.emit(SessionEvent::MessagesChanged { count });
    }

    fn on_failure(&mut self, error: &ErrorInfo) {
        {
            let mut state = self.handle.state.lock();
            if state.generation != self.generation {
                return;
            }
            state.error = Some(error.clone());
        }
        self.handle.emit(SessionEvent::Failed {
            error: error.clone(),
        });
    }

    fn on_decode_error(&mut self, error: &Error) {
        if self.handle.state.lock().generation != self.generation {
            return;
        }
        self.handle.emit(SessionEvent::DecodeSkipped {
            message: error.to_string(),
        });
    }
}
