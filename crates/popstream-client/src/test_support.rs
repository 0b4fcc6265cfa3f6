//! Scripted transport shared by the connection and session tests

use std::{collections::VecDeque, sync::Arc, time::Duration};

use async_stream::stream;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::{
    error::{Error, Result},
    transport::{ByteStream, StreamTransport},
};

/// What one `open` call does
#[derive(Debug, Clone)]
pub(crate) enum Step {
    /// Respond with a non-success status
    Status(u16),
    /// Fail before any response with this message
    Fail(&'static str),
    /// Never respond
    Hang,
    /// Respond and stream these parts
    Body(Vec<Part>),
}

#[derive(Debug, Clone)]
pub(crate) enum Part {
    Chunk(String),
    /// Body read fails with this message
    Error(&'static str),
    /// Body stops producing without closing
    Stall,
}

/// Plays back steps in order; the final step repeats forever.
pub(crate) struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    opens: Mutex<Vec<Instant>>,
    payloads: Mutex<Vec<serde_json::Value>>,
}

impl ScriptedTransport {
    pub(crate) fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            opens: Mutex::new(Vec::new()),
            payloads: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn open_count(&self) -> usize {
        self.opens.lock().len()
    }

    /// Time between consecutive `open` calls
    pub(crate) fn gaps(&self) -> Vec<Duration> {
        let opens = self.opens.lock();
        opens.windows(2).map(|w| w[1] - w[0]).collect()
    }

    pub(crate) fn payloads(&self) -> Vec<serde_json::Value> {
        self.payloads.lock().clone()
    }

    fn next_step(&self) -> Step {
        let mut steps = self.steps.lock();
        if steps.len() > 1 {
            steps.pop_front().unwrap()
        } else {
            steps.front().cloned().unwrap_or(Step::Body(Vec::new()))
        }
    }
}

#[async_trait]
impl StreamTransport for ScriptedTransport {
    async fn open(&self, payload: &serde_json::Value) -> Result<ByteStream> {
        self.opens.lock().push(Instant::now());
        self.payloads.lock().push(payload.clone());

        match self.next_step() {
            Step::Status(status) => Err(Error::Status {
                status,
                body: String::new(),
            }),
            Step::Fail(message) => Err(Error::Transport(message.to_string())),
            Step::Hang => futures::future::pending().await,
            Step::Body(parts) => Ok(Box::pin(stream! {
                for part in parts {
                    match part {
                        Part::Chunk(text) => yield Ok(Bytes::from(text)),
                        Part::Error(message) => {
                            yield Err(Error::Transport(message.to_string()));
                            return;
                        }
                        Part::Stall => futures::future::pending::<()>().await,
                    }
                }
            })),
        }
    }
}

/// Render events as `data: ` framed lines
pub(crate) fn sse(events: &[serde_json::Value]) -> String {
    events
        .iter()
        .map(|event| format!("data: {event}\n\n"))
        .collect()
}
