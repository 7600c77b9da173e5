//! Transport abstraction.
//!
//! The session layer never knows how bytes move; it only needs a way to send
//! an encoded envelope and to be handed inbound bytes. Real transports (TCP,
//! WebSocket, named pipes, a robust-connection layer) implement
//! [`SessionTransport`] outside this crate.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            RemoteSession                │
//! │   (engine + role + key exchange)        │
//! └──────────────────┬──────────────────────┘
//!                    │ send_bytes / handle_inbound
//!          ┌────────┴────────┐
//!          ▼                 ▼
//! ┌─────────────────┐ ┌─────────────────┐
//! │ ChannelTransport│ │  your transport │
//! │   (in-memory)   │ │                 │
//! └─────────────────┘ └─────────────────┘
//! ```

mod channel;

pub use channel::{channel_pair, ChannelEndpoint, ChannelTransport};

use crate::error::Result;

/// Outbound half of a transport.
///
/// A send error is mapped by the engine to `SendFailed` (or to the matching
/// key-exchange failure while exchanging keys).
pub trait SessionTransport: Send + Sync {
    /// Send one encoded envelope
    fn send_bytes(&self, payload: &[u8]) -> Result<()>;

    /// Get the transport name for logging
    fn name(&self) -> &'static str;
}
