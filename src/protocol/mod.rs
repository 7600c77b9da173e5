//! Remote session protocol model.
//!
//! States, events, envelopes, capability descriptors and the transition
//! table that ties them together. Everything here is plain immutable data;
//! the [`engine`](crate::engine) applies it.
//!
//! # Message Flow
//!
//! ```text
//! Client                              Server
//!    |                                  |
//!    |-------- CAPABILITY (v2) ------->|  NegotiationSending -> NegotiationSent
//!    |                                  |  NegotiationPending -> NegotiationReceived
//!    |<------- CAPABILITY (v2) --------|  validate -> Established
//!    |                                  |
//!    |<------- KEY_REQUEST ------------|  EstablishedAndKeyRequested
//!    |-------- PUBLIC_KEY ------------>|  EstablishedAndKeyReceived
//!    |<------- PUBLIC_KEY -------------|  EstablishedAndKeyExchanged
//!    |                                  |
//!    |======== DATA ==================>|  MessageReceived
//!    |<======= DATA ===================|
//!    |                                  |
//!    |-------- CLOSE ----------------->|  ClosingConnection -> Closed
//! ```
//!
//! ## State Groups
//!
//! | Group        | States                                              |
//! |--------------|-----------------------------------------------------|
//! | Opening      | `Idle`, `Connecting`, `Connected`                   |
//! | Negotiation  | `NegotiationSending*`, `NegotiationSent`, `NegotiationPending`, `NegotiationReceived` |
//! | Established  | `Established`, `EstablishedAndKey*`                 |
//! | Robust       | `Disconnecting`, `Disconnected`, `RCDisconnecting`, `Reconnecting` |
//! | Closing      | `ClosingConnection`, `Closed` (terminal)            |
//!
//! ## Failure Categories
//!
//! | Category      | Raised by                                          |
//! |---------------|----------------------------------------------------|
//! | `Negotiation` | `NegotiationFailed`                                |
//! | `Transport`   | `ConnectFailed`, `SendFailed`, `ReceiveFailed`     |
//! | `KeyExchange` | `KeySendFailed`, `KeyReceiveFailed`, `KeyRequestFailed` |
//! | `Timeout`     | `NegotiationTimeout`, reconnect timer              |
//! | `Close`       | `CloseFailed`                                      |
//! | `Reconnect`   | `DisconnectFailed`, `ReconnectFailed`              |
//! | `Fatal`       | `FatalError`                                       |

mod capabilities;
mod envelope;
mod event;
mod state;
pub mod transition;

pub use capabilities::{
    CapabilityDescriptor, CapabilityValidator, CompatibilityValidator, FeatureFlags,
    ProtocolVersion, Verdict,
};
pub use envelope::{EnvelopePayload, SessionEnvelope};
pub use event::{SessionEvent, SessionEventKind};
pub use state::{FailureCategory, FailureReason, SessionState, StateInfo};
pub use transition::{table, SideEffect, Target, Transition, TransitionTable};

/// Protocol version spoken by this crate
pub const PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion::new(2, 3);

/// Default negotiation timeout (milliseconds)
pub const NEGOTIATION_TIMEOUT_MS: u64 = 60_000;

/// Default reconnect timeout (milliseconds)
pub const RECONNECT_TIMEOUT_MS: u64 = 180_000;
