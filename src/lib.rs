//! # Remoting Core - Remote Session State Machine
//!
//! Lifecycle engine for a remote execution session between a client and a
//! server over an arbitrary transport: connection, capability negotiation,
//! optional key exchange, graceful and transport-initiated disconnect, and
//! reconnect.
//!
//! ## Features
//!
//! - **Table-driven state machine**: 20 states, 32 event kinds, one immutable
//!   transition table
//! - **Serialized submission**: any number of threads may submit; transitions
//!   are totally ordered per session
//! - **Observers**: any number of channel or callback subscribers, never able
//!   to stall the engine
//! - **Timers**: negotiation and reconnect deadlines synthesize failure events
//! - **Key exchange**: X25519 + HKDF-SHA256 session keys
//!
//! ## Protocol Overview
//!
//! ```text
//! Client                         Transport                        Server
//!    |                              |                                |
//!    |------ CAPABILITY ----------->|------------------------------->|
//!    |<----- CAPABILITY ------------|<-------------------------------|
//!    |                              |                                |
//!    |<----- KEY_REQUEST -----------|<-------------------------------|
//!    |------ PUBLIC_KEY ----------->|------------------------------->|
//!    |<----- PUBLIC_KEY ------------|<-------------------------------|
//!    |                              |                                |
//!    |====== DATA =================>|===============================>|
//!    |------ CLOSE ---------------->|------------------------------->|
//! ```
//!
//! ### State Machine
//!
//! ```text
//!   [Idle] ──> [Connecting] ──> [NegotiationSending] ──> [NegotiationSent]
//!     │                                                        │
//!     └──────────> [NegotiationPending] ──> [NegotiationReceived] <┘
//!                                                │ NegotiationCompleted
//!                                                v
//!   [Reconnecting] ─resume─> ... ◄──── [Established] ──> [EstablishedAndKey*]
//!         ^                               │        │
//!         │   [Disconnected]/[RCDisconnecting] <───┘
//!         └───────────┘                   │ Close
//!                                         v
//!                           [ClosingConnection] ──> [Closed]
//! ```
//!
//! Any `*Failed`, `NegotiationTimeout` or `FatalError` closes the session
//! immediately with a [`FailureReason`]. An event with no table entry is a
//! protocol violation: logged, reported, and otherwise ignored.
//!
//! ## Quick Start
//!
//! ### Engine Only
//!
//! ```rust,ignore
//! use remoting::{SessionEngine, SessionEvent, SessionEventKind, CapabilityDescriptor};
//!
//! let engine = SessionEngine::new(CapabilityDescriptor::default())?;
//! let mut events = engine.subscribe();
//!
//! engine.submit(SessionEventKind::NegotiationPending)?;
//! engine.submit(SessionEvent::negotiation_received(CapabilityDescriptor::default()))?;
//! assert_eq!(engine.state(), SessionState::Established);
//! ```
//!
//! ### Loopback Session
//!
//! ```rust,ignore
//! use remoting::{channel_pair, Config, RemoteSession, Role};
//!
//! let (a, b) = channel_pair();
//! let client = RemoteSession::new(Role::Client, a.transport, &Config::default())?;
//! let server = RemoteSession::new(Role::Server, b.transport, &Config::default())?;
//!
//! server.connect()?;
//! client.connect()?;
//! // feed a.inbound into client.serve(), b.inbound into server.serve()
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: States, events, envelopes, capabilities, transition table
//! - [`engine`]: The state machine engine, timers and notifications
//! - [`session`]: Client/server session driving handshakes over a transport
//! - [`crypto`]: X25519 key exchange
//! - [`transport`]: Transport trait and in-memory channel pair
//! - [`config`]: Configuration management
//! - [`error`]: Error types and result aliases

pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use config::Config;
pub use engine::{EngineBuilder, Notification, SessionEngine, StateChange, Subscription};
pub use error::{RemotingError, Result};
pub use protocol::{
    CapabilityDescriptor, FailureCategory, FailureReason, FeatureFlags, ProtocolVersion,
    SessionEnvelope, SessionEvent, SessionEventKind, SessionState, StateInfo,
};
pub use session::{RemoteSession, Role};
pub use transport::{channel_pair, SessionTransport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
