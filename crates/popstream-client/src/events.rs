//! Wire event records and session notifications

use serde::{Deserialize, Serialize};

use crate::{
    connection::{ConnectionPhase, ConnectionState},
    error::ErrorInfo,
    session::SessionOutcome,
};

/// One decoded record from a `data: ` line.
///
/// Fields the backend sends but nothing here uses (`timestamp`, `arguments`)
/// are ignored during deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Milestone marking the start of the analysis
    AnalysisStart {
        #[serde(default)]
        message: Option<String>,
    },
    /// A named backend tool began running
    ToolStart {
        #[serde(default)]
        tool_name: Option<String>,
        #[serde(default)]
        tool_description: Option<String>,
    },
    /// The most recent running tool finished
    ToolComplete {
        #[serde(default)]
        tool_name: Option<String>,
        #[serde(default)]
        tool_output: Option<serde_json::Value>,
    },
    /// Incremental agent answer text
    TextChunk {
        #[serde(default)]
        content: Option<String>,
    },
    /// Any other `type`; carries no effect
    #[serde(other)]
    Unrecognized,
}

impl StreamEvent {
    /// Wire name of this event kind
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::AnalysisStart { .. } => "analysis_start",
            StreamEvent::ToolStart { .. } => "tool_start",
            StreamEvent::ToolComplete { .. } => "tool_complete",
            StreamEvent::TextChunk { .. } => "text_chunk",
            StreamEvent::Unrecognized => "unrecognized",
        }
    }
}

/// Notifications broadcast by a session while it runs
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The message list changed (append, extend, or completion)
    MessagesChanged { count: usize },

    /// The connection moved to a new phase
    ConnectionChanged {
        phase: ConnectionPhase,
        state: ConnectionState,
    },

    /// An attempt failed
    Failed { error: ErrorInfo },

    /// A malformed event line was skipped
    DecodeSkipped { message: String },

    /// `start` returned
    Finished { outcome: SessionOutcome },

    /// The session was cleared
    Reset,
}
