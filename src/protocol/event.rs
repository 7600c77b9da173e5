//! Session events.
//!
//! Every occurrence that can move the state machine is a [`SessionEvent`]: a
//! kind plus at most one of a capability, an envelope, or a failure reason.
//! Constructors enforce which field a kind may carry.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{CapabilityDescriptor, FailureCategory, FailureReason, SessionEnvelope};

/// Event kinds consumed by the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum SessionEventKind {
    CreateSession,
    ConnectSession,
    NegotiationSending,
    NegotiationSendingOnConnect,
    NegotiationSendCompleted,
    NegotiationReceived,
    NegotiationCompleted,
    NegotiationPending,
    Close,
    CloseCompleted,
    CloseFailed,
    ConnectFailed,
    NegotiationFailed,
    NegotiationTimeout,
    SendFailed,
    ReceiveFailed,
    FatalError,
    MessageReceived,
    KeySent,
    KeySendFailed,
    KeyReceived,
    KeyReceiveFailed,
    KeyRequested,
    KeyRequestFailed,
    DisconnectStart,
    DisconnectCompleted,
    DisconnectFailed,
    ReconnectStart,
    ReconnectCompleted,
    ReconnectFailed,
    RCDisconnectStarted,
    /// Sentinel; never legal to submit
    InvalidEvent,
}

impl SessionEventKind {
    /// Every kind, including the `InvalidEvent` sentinel
    pub const ALL: [SessionEventKind; 32] = [
        SessionEventKind::CreateSession,
        SessionEventKind::ConnectSession,
        SessionEventKind::NegotiationSending,
        SessionEventKind::NegotiationSendingOnConnect,
        SessionEventKind::NegotiationSendCompleted,
        SessionEventKind::NegotiationReceived,
        SessionEventKind::NegotiationCompleted,
        SessionEventKind::NegotiationPending,
        SessionEventKind::Close,
        SessionEventKind::CloseCompleted,
        SessionEventKind::CloseFailed,
        SessionEventKind::ConnectFailed,
        SessionEventKind::NegotiationFailed,
        SessionEventKind::NegotiationTimeout,
        SessionEventKind::SendFailed,
        SessionEventKind::ReceiveFailed,
        SessionEventKind::FatalError,
        SessionEventKind::MessageReceived,
        SessionEventKind::KeySent,
        SessionEventKind::KeySendFailed,
        SessionEventKind::KeyReceived,
        SessionEventKind::KeyReceiveFailed,
        SessionEventKind::KeyRequested,
        SessionEventKind::KeyRequestFailed,
        SessionEventKind::DisconnectStart,
        SessionEventKind::DisconnectCompleted,
        SessionEventKind::DisconnectFailed,
        SessionEventKind::ReconnectStart,
        SessionEventKind::ReconnectCompleted,
        SessionEventKind::ReconnectFailed,
        SessionEventKind::RCDisconnectStarted,
        SessionEventKind::InvalidEvent,
    ];

    /// Category for kinds that end the session with a reason
    pub fn failure_category(&self) -> Option<FailureCategory> {
        use SessionEventKind as K;
        match self {
            K::NegotiationFailed => Some(FailureCategory::Negotiation),
            K::ConnectFailed | K::SendFailed | K::ReceiveFailed => Some(FailureCategory::Transport),
            K::KeySendFailed | K::KeyReceiveFailed | K::KeyRequestFailed => {
                Some(FailureCategory::KeyExchange)
            },
            K::NegotiationTimeout => Some(FailureCategory::Timeout),
            K::CloseFailed => Some(FailureCategory::Close),
            K::DisconnectFailed | K::ReconnectFailed => Some(FailureCategory::Reconnect),
            K::FatalError => Some(FailureCategory::Fatal),
            _ => None,
        }
    }

    /// Kind carries a failure reason
    pub fn is_failure(&self) -> bool {
        self.failure_category().is_some()
    }
}

impl fmt::Display for SessionEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Immutable event submitted to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    kind: SessionEventKind,
    capability: Option<CapabilityDescriptor>,
    payload: Option<SessionEnvelope>,
    reason: Option<FailureReason>,
}

impl SessionEvent {
    /// Event without data.
    ///
    /// Failure kinds built this way get a generic reason so that a `Closed`
    /// snapshot always says why.
    pub fn new(kind: SessionEventKind) -> Self {
        let reason = kind
            .failure_category()
            .map(|category| FailureReason::new(category, kind.to_string()));
        Self {
            kind,
            capability: None,
            payload: None,
            reason,
        }
    }

    /// Failure event with a reason.
    ///
    /// Non-failure kinds are rewritten to `FatalError`.
    pub fn failed(kind: SessionEventKind, message: impl Into<String>) -> Self {
        let (kind, category) = match kind.failure_category() {
            Some(category) => (kind, category),
            None => (SessionEventKind::FatalError, FailureCategory::Fatal),
        };
        Self::with_reason(kind, FailureReason::new(category, message))
    }

    /// Failure event with a prepared reason.
    ///
    /// Non-failure kinds are rewritten to `FatalError`.
    pub fn with_reason(kind: SessionEventKind, reason: FailureReason) -> Self {
        let kind = if kind.is_failure() {
            kind
        } else {
            SessionEventKind::FatalError
        };
        Self {
            kind,
            capability: None,
            payload: None,
            reason: Some(reason),
        }
    }

    /// `NegotiationReceived` carrying a decoded capability
    pub fn negotiation_received(capability: CapabilityDescriptor) -> Self {
        Self {
            kind: SessionEventKind::NegotiationReceived,
            capability: Some(capability),
            payload: None,
            reason: None,
        }
    }

    /// `NegotiationCompleted` carrying the accepted capability
    pub fn negotiation_completed(capability: CapabilityDescriptor) -> Self {
        Self {
            kind: SessionEventKind::NegotiationCompleted,
            capability: Some(capability),
            payload: None,
            reason: None,
        }
    }

    /// Data-bearing event (`MessageReceived`, `KeyReceived`, opaque
    /// `NegotiationReceived`).
    ///
    /// Failure kinds carry their generic reason instead and drop the payload.
    pub fn with_payload(kind: SessionEventKind, payload: SessionEnvelope) -> Self {
        if kind.is_failure() {
            return Self::new(kind);
        }
        Self {
            kind,
            capability: None,
            payload: Some(payload),
            reason: None,
        }
    }

    /// `MessageReceived` wrapping data bytes
    pub fn message_received(data: impl Into<Vec<u8>>) -> Self {
        Self::with_payload(SessionEventKind::MessageReceived, SessionEnvelope::data(data))
    }

    /// Event kind
    pub fn kind(&self) -> SessionEventKind {
        self.kind
    }

    /// Carried capability
    pub fn capability(&self) -> Option<&CapabilityDescriptor> {
        self.capability.as_ref()
    }

    /// Carried envelope
    pub fn payload(&self) -> Option<&SessionEnvelope> {
        self.payload.as_ref()
    }

    /// Carried failure reason
    pub fn reason(&self) -> Option<&FailureReason> {
        self.reason.as_ref()
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        SessionEventKind,
        Option<CapabilityDescriptor>,
        Option<SessionEnvelope>,
        Option<FailureReason>,
    ) {
        (self.kind, self.capability, self.payload, self.reason)
    }
}

impl From<SessionEventKind> for SessionEvent {
    fn from(kind: SessionEventKind) -> Self {
        Self::new(kind)
    }
}
