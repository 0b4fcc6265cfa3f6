//! popstream-client: Streaming client for the popup optimization endpoint
//!
//! This crate consumes the server's `data: `-framed event stream, folds tool
//! and text events into an ordered message list, and reconnects with
//! exponential backoff when a transient failure interrupts the stream.

pub mod config;
pub mod connection;
pub mod decoder;
pub mod error;
pub mod events;
pub mod handle;
pub mod interpreter;
pub mod session;
pub mod store;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use config::{RetryConfig, SessionConfig};
pub use connection::{ConnectionPhase, ConnectionState, SessionOutcome};
pub use decoder::EventDecoder;
pub use error::{Error, ErrorCategory, ErrorInfo, Result};
pub use events::{SessionEvent, StreamEvent};
pub use handle::{SessionHandle, SessionSnapshot};
pub use session::StreamSession;
pub use store::{MessageKind, StreamMessage};
pub use transport::{HttpTransport, StreamTransport};
