//! Connection manager: one streaming request per attempt, with timeout,
//! cancellation, and exponential-backoff retries.
//!
//! The bookkeeping lives in [`ReconnectMachine`], which has no I/O so every
//! transition can be tested directly. [`ConnectionManager::run`] drives the
//! machine against a [`StreamTransport`] and reports to a
//! [`ConnectionObserver`].

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{RetryConfig, SessionConfig},
    decoder::decode_stream,
    error::{Error, ErrorInfo, Result},
    events::StreamEvent,
    transport::StreamTransport,
};

/// Where the connection currently is
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    /// No attempt running (never started, finished, or cancelled)
    #[default]
    Idle,
    /// Request sent, waiting for the response
    Connecting,
    /// Reading the response body
    Streaming,
    /// Waiting out a backoff delay
    Retrying,
    /// Retries exhausted; only a manual retry starts a new attempt
    Failed,
}

/// Connection flags exposed to collaborators
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub is_connected: bool,
    pub is_connecting: bool,
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Automatic retries scheduled so far in this run
    pub retry_count: u32,
}

/// Result of a failed attempt
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub info: ErrorInfo,
    /// Backoff before the next attempt, or `None` when retries are exhausted
    pub retry_in: Option<Duration>,
}

/// Reconnect state machine
#[derive(Debug, Clone)]
pub struct ReconnectMachine {
    retry: RetryConfig,
    phase: ConnectionPhase,
    state: ConnectionState,
    last_error: Option<ErrorInfo>,
}

impl ReconnectMachine {
    pub fn new(retry: RetryConfig) -> Self {
        Self {
            retry,
            phase: ConnectionPhase::Idle,
            state: ConnectionState::default(),
            last_error: None,
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn last_error(&self) -> Option<&ErrorInfo> {
        self.last_error.as_ref()
    }

    /// Idle, Retrying, or Failed -> Connecting
    pub fn begin_attempt(&mut self) {
        self.phase = ConnectionPhase::Connecting;
        self.state.is_connecting = true;
        self.state.is_connected = false;
    }

    /// Connecting -> Streaming. A successful connection clears the last error.
    pub fn connected(&mut self) {
        self.phase = ConnectionPhase::Streaming;
        self.state.is_connected = true;
        self.state.is_connecting = false;
        self.state.last_connected_at = Some(Utc::now());
        self.last_error = None;
    }

    /// Streaming -> Idle after the server closed the body
    pub fn completed(&mut self) {
        self.phase = ConnectionPhase::Idle;
        self.clear_flags();
    }

    /// Connecting or Streaming -> Retrying, or -> Failed once
    /// `retry_count` has reached `max_retries`.
    pub fn failed(&mut self, error: &Error) -> Failure {
        self.clear_flags();
        let info = ErrorInfo::from_error(error, self.state.retry_count);
        self.last_error = Some(info.clone());

        let retry_in = if self.state.retry_count < self.retry.max_retries {
            let delay = self.retry.delay_for_attempt(self.state.retry_count);
            self.state.retry_count += 1;
            self.phase = ConnectionPhase::Retrying;
            Some(delay)
        } else {
            self.phase = ConnectionPhase::Failed;
            None
        };

        Failure { info, retry_in }
    }

    /// Any state -> Idle on a deliberate stop. The last error is kept.
    pub fn cancelled(&mut self) {
        self.phase = ConnectionPhase::Idle;
        self.clear_flags();
    }

    fn clear_flags(&mut self) {
        self.state.is_connected = false;
        self.state.is_connecting = false;
    }
}

/// How a run of attempts ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    /// The server closed the stream normally
    Completed,
    /// Every allowed attempt failed
    Exhausted,
    /// Stopped by the caller
    Cancelled,
}

/// Receives everything a run produces, in order
pub trait ConnectionObserver: Send {
    /// Called after every phase change
    fn on_transition(&mut self, phase: ConnectionPhase, state: &ConnectionState);

    /// A decoded event, in delivery order
    fn on_event(&mut self, event: StreamEvent);

    /// An attempt failed (called before the matching transition)
    fn on_failure(&mut self, error: &ErrorInfo);

    /// A malformed line was skipped
    fn on_decode_error(&mut self, _error: &Error) {}
}

/// Drives streaming attempts for a session
pub struct ConnectionManager {
    transport: Arc<dyn StreamTransport>,
    config: SessionConfig,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn StreamTransport>, config: SessionConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Run attempts until one completes, retries run out, or `cancel` fires.
    pub async fn run(
        &self,
        payload: &serde_json::Value,
        cancel: &CancellationToken,
        observer: &mut dyn ConnectionObserver,
    ) -> SessionOutcome {
        let mut machine = ReconnectMachine::new(self.config.retry.clone());

        loop {
            if cancel.is_cancelled() {
                return Self::stop(&mut machine, observer);
            }

            machine.begin_attempt();
            observer.on_transition(machine.phase(), machine.state());
            tracing::debug!(
                "Opening stream (retry {}/{})",
                machine.state().retry_count,
                self.config.retry.max_retries
            );

            match self.attempt(payload, cancel, &mut machine, observer).await {
                Ok(()) => {
                    machine.completed();
                    observer.on_transition(machine.phase(), machine.state());
                    tracing::info!("Stream completed");
                    return SessionOutcome::Completed;
                }
                Err(e) if e.is_cancelled() => {
                    tracing::debug!("Stream cancelled");
                    return Self::stop(&mut machine, observer);
                }
                Err(e) => {
                    let failure = machine.failed(&e);
                    observer.on_failure(&failure.info);
                    observer.on_transition(machine.phase(), machine.state());

                    let Some(delay) = failure.retry_in else {
                        tracing::warn!(
                            "Stream failed after {} retries: {}",
                            failure.info.retry_count,
                            failure.info.message
                        );
                        return SessionOutcome::Exhausted;
                    };

                    tracing::warn!(
                        "Stream failed (attempt {}/{}): {}. Retrying in {:?}...",
                        failure.info.retry_count + 1,
                        self.config.retry.max_retries + 1,
                        failure.info.message,
                        delay
                    );

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Self::stop(&mut machine, observer),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    fn stop(machine: &mut ReconnectMachine, observer: &mut dyn ConnectionObserver) -> SessionOutcome {
        machine.cancelled();
        observer.on_transition(machine.phase(), machine.state());
        SessionOutcome::Cancelled
    }

    /// One request: open, then read and decode until the body ends.
    async fn attempt(
        &self,
        payload: &serde_json::Value,
        cancel: &CancellationToken,
        machine: &mut ReconnectMachine,
        observer: &mut dyn ConnectionObserver,
    ) -> Result<()> {
        let timeout = self.config.request_timeout;

        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            opened = tokio::time::timeout(timeout, self.transport.open(payload)) => {
                opened.map_err(|_| Error::Timeout(timeout))??
            }
        };

        machine.connected();
        observer.on_transition(machine.phase(), machine.state());
        tracing::info!("Connected to {}", self.config.endpoint);

        // the ceiling applies to each chunk wait, not to each decoded record
        let chunks = tokio_stream::StreamExt::timeout(body, timeout)
            .map(move |chunk| chunk.unwrap_or_else(|_| Err(Error::Timeout(timeout))));
        let mut records = std::pin::pin!(decode_stream(chunks));

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                next = records.next() => next,
            };

            match next {
                Some(Err(e)) if !matches!(e, Error::Decode { .. }) => return Err(e),
                Some(record) => dispatch(record, observer),
                None => return Ok(()),
            }
        }
    }
}

fn dispatch(record: Result<StreamEvent>, observer: &mut dyn ConnectionObserver) {
    match record {
        Ok(event) => {
            tracing::debug!("Received {} event", event.kind());
            observer.on_event(event);
        }
        Err(e) => {
            tracing::warn!("Skipping event line: {}", e);
            observer.on_decode_error(&e);
        }
    }
}
