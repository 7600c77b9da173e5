//! Session states and the immutable snapshots published on every transition.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SessionState {
    /// Sentinel; never entered at runtime
    Undefined,
    /// Initial state, nothing sent yet
    Idle,
    /// Transport connection being opened
    Connecting,
    /// Transport resumed without an established negotiation
    Connected,
    /// Local capability being sent
    NegotiationSending,
    /// Local capability being sent while connecting to an existing session
    NegotiationSendingOnConnect,
    /// Local capability sent, waiting for the peer
    NegotiationSent,
    /// Peer capability received, validation in progress
    NegotiationReceived,
    /// Waiting for the peer's capability
    NegotiationPending,
    /// Graceful shutdown initiated
    ClosingConnection,
    /// Session terminated (terminal)
    Closed,
    /// Negotiation complete, ready for data
    Established,
    /// Local public key sent, waiting for the peer's key
    EstablishedAndKeySent,
    /// Peer public key received
    EstablishedAndKeyReceived,
    /// Peer asked for our public key
    EstablishedAndKeyRequested,
    /// Key exchange complete
    EstablishedAndKeyExchanged,
    /// User-initiated disconnect in progress
    Disconnecting,
    /// Disconnected; transport released, session resumable
    Disconnected,
    /// Resuming the transport
    Reconnecting,
    /// Transport dropped underneath the session
    RCDisconnecting,
}

impl SessionState {
    /// Every state, in declaration order
    pub const ALL: [SessionState; 20] = [
        SessionState::Undefined,
        SessionState::Idle,
        SessionState::Connecting,
        SessionState::Connected,
        SessionState::NegotiationSending,
        SessionState::NegotiationSendingOnConnect,
        SessionState::NegotiationSent,
        SessionState::NegotiationReceived,
        SessionState::NegotiationPending,
        SessionState::ClosingConnection,
        SessionState::Closed,
        SessionState::Established,
        SessionState::EstablishedAndKeySent,
        SessionState::EstablishedAndKeyReceived,
        SessionState::EstablishedAndKeyRequested,
        SessionState::EstablishedAndKeyExchanged,
        SessionState::Disconnecting,
        SessionState::Disconnected,
        SessionState::Reconnecting,
        SessionState::RCDisconnecting,
    ];

    /// No event may leave this state
    pub fn is_terminal(&self) -> bool {
        *self == SessionState::Closed
    }

    /// States where the transport is up and a disconnect may start
    pub fn is_connected_family(&self) -> bool {
        matches!(
            self,
            SessionState::Connected
                | SessionState::Established
                | SessionState::EstablishedAndKeySent
                | SessionState::EstablishedAndKeyReceived
                | SessionState::EstablishedAndKeyRequested
                | SessionState::EstablishedAndKeyExchanged
        )
    }

    /// `Established` or one of its key-exchange refinements
    pub fn is_established(&self) -> bool {
        matches!(
            self,
            SessionState::Established
                | SessionState::EstablishedAndKeySent
                | SessionState::EstablishedAndKeyReceived
                | SessionState::EstablishedAndKeyRequested
                | SessionState::EstablishedAndKeyExchanged
        )
    }

    /// Covered by the negotiation timer
    pub fn is_negotiating(&self) -> bool {
        matches!(
            self,
            SessionState::NegotiationSending
                | SessionState::NegotiationSendingOnConnect
                | SessionState::NegotiationSent
                | SessionState::NegotiationPending
                | SessionState::NegotiationReceived
        )
    }

    /// The session holds no live transport resources
    pub fn is_released(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Disconnected)
    }

    /// State a reconnect resumes to when the disconnect began here.
    ///
    /// An interrupted key exchange restarts from `Established`; an
    /// interrupted negotiation restarts from `Connected`.
    pub fn resume_target(&self) -> Option<SessionState> {
        match self {
            SessionState::Connected => Some(SessionState::Connected),
            s if s.is_negotiating() => Some(SessionState::Connected),
            SessionState::EstablishedAndKeyExchanged => Some(SessionState::EstablishedAndKeyExchanged),
            s if s.is_established() => Some(SessionState::Established),
            _ => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Why a session failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// Version or feature mismatch
    Negotiation,
    /// Connect, send or receive failure
    Transport,
    /// Key request, send or receive failure
    KeyExchange,
    /// Negotiation or reconnect timer expired
    Timeout,
    /// Close did not complete cleanly
    Close,
    /// Disconnect or reconnect failed
    Reconnect,
    /// Unrecoverable error raised by a collaborator
    Fatal,
}

/// Failure reason carried by failure events and terminal snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    /// Failure category
    pub category: FailureCategory,
    /// Human-readable message
    pub message: String,
}

impl FailureReason {
    /// Create a reason
    pub fn new(category: FailureCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.category, self.message)
    }
}

/// Immutable snapshot of the session state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateInfo {
    /// Current state
    pub state: SessionState,
    /// Set only when a failure or terminal event caused the transition
    pub reason: Option<FailureReason>,
    /// When the state was entered
    pub entered_at: DateTime<Utc>,
}

impl StateInfo {
    /// Snapshot without a reason
    pub fn new(state: SessionState) -> Self {
        Self {
            state,
            reason: None,
            entered_at: Utc::now(),
        }
    }

    /// Snapshot with an optional reason
    pub fn with_reason(state: SessionState, reason: Option<FailureReason>) -> Self {
        Self {
            state,
            reason,
            entered_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_closed_is_terminal() {
        let terminal: Vec<_> = SessionState::ALL.iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(terminal, vec![&SessionState::Closed]);
    }

    #[test]
    fn test_released_states() {
        for state in SessionState::ALL {
            let expected = matches!(state, SessionState::Closed | SessionState::Disconnected);
            assert_eq!(state.is_released(), expected, "{state}");
        }
    }

    #[test]
    fn test_resume_target() {
        assert_eq!(
            SessionState::EstablishedAndKeyRequested.resume_target(),
            Some(SessionState::Established)
        );
        assert_eq!(
            SessionState::EstablishedAndKeyExchanged.resume_target(),
            Some(SessionState::EstablishedAndKeyExchanged)
        );
        assert_eq!(SessionState::Connected.resume_target(), Some(SessionState::Connected));
        assert_eq!(SessionState::NegotiationSent.resume_target(), Some(SessionState::Connected));
        assert_eq!(SessionState::Connecting.resume_target(), None);
    }
}
