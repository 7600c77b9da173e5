//! Remoting error types.
//!
//! # Error Classification
//!
//! Errors fall into two groups:
//!
//! - **Reported, session continues**: `ProtocolViolation` and `InvalidEvent`
//!   describe an event that was illegal in the current state. The engine
//!   logs and returns them, but the session state is untouched.
//! - **Surfaced from collaborators**: transport, key exchange, timer and
//!   configuration failures. Inside the engine these are never returned
//!   directly; they are converted into failure events that drive the session
//!   to `Closed` with a populated reason.
//!
//! The `KeyExchange` variant preserves the full error chain via `#[source]`.

use thiserror::Error;

use crate::crypto::KeyExchangeError;
use crate::protocol::{SessionEventKind, SessionState};

/// Remoting errors.
#[derive(Error, Debug)]
pub enum RemotingError {
    /// Event has no transition from the current state.
    #[error("Protocol violation: {event:?} is not legal in state {state:?}")]
    ProtocolViolation {
        /// State the session was in when the event arrived.
        state: SessionState,
        /// Offending event kind.
        event: SessionEventKind,
    },

    /// The `InvalidEvent` sentinel, or an event missing its required payload.
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Capability negotiation was rejected.
    #[error("Negotiation failed: {0}")]
    NegotiationFailed(String),

    /// Operation requires a session that has not reached `Closed`.
    #[error("Session closed")]
    SessionClosed,

    /// Transport could not move bytes.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Inbound bytes did not decode into an envelope.
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// Key exchange operation failed.
    #[error("Key exchange error: {0}")]
    KeyExchange(#[source] KeyExchangeError),

    /// No tokio runtime available for timers or callback dispatch.
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for remoting operations
pub type Result<T> = std::result::Result<T, RemotingError>;

impl RemotingError {
    /// Whether the session survives this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RemotingError::ProtocolViolation { .. } | RemotingError::InvalidEvent(_)
        )
    }
}

impl From<KeyExchangeError> for RemotingError {
    fn from(err: KeyExchangeError) -> Self {
        RemotingError::KeyExchange(err)
    }
}

impl From<toml::de::Error> for RemotingError {
    fn from(err: toml::de::Error) -> Self {
        RemotingError::Config(format!("Failed to parse config: {err}"))
    }
}
