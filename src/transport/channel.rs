//! In-memory transport pair.
//!
//! Two endpoints wired back to back with unbounded tokio channels. Used by the
//! loopback demo and the end-to-end tests; `sever` simulates the underlying
//! connection dropping so robust-connection paths can be exercised.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::SessionTransport;
use crate::error::{RemotingError, Result};

/// Sending half of one endpoint
#[derive(Debug)]
pub struct ChannelTransport {
    tx: UnboundedSender<Bytes>,
    connected: AtomicBool,
}

impl ChannelTransport {
    /// Drop the link; sends fail until `restore`
    pub fn sever(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Bring the link back
    pub fn restore(&self) {
        self.connected.store(true, Ordering::SeqCst);
    }

    /// Link is up
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.tx.is_closed()
    }
}

impl SessionTransport for ChannelTransport {
    fn send_bytes(&self, payload: &[u8]) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(RemotingError::Transport("link severed".to_string()));
        }
        self.tx
            .send(Bytes::copy_from_slice(payload))
            .map_err(|_| RemotingError::Transport("peer endpoint dropped".to_string()))
    }

    fn name(&self) -> &'static str {
        "channel"
    }
}

/// One side of a channel pair
#[derive(Debug)]
pub struct ChannelEndpoint {
    /// Outbound half, shared with the session
    pub transport: Arc<ChannelTransport>,
    /// Bytes sent by the other endpoint
    pub inbound: UnboundedReceiver<Bytes>,
}

/// Create two connected endpoints
pub fn channel_pair() -> (ChannelEndpoint, ChannelEndpoint) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();

    let endpoint = |tx, inbound| ChannelEndpoint {
        transport: Arc::new(ChannelTransport {
            tx,
            connected: AtomicBool::new(true),
        }),
        inbound,
    };

    (endpoint(a_tx, a_rx), endpoint(b_tx, b_rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_delivers_both_ways() {
        let (mut a, mut b) = channel_pair();

        a.transport.send_bytes(b"ping").unwrap();
        b.transport.send_bytes(b"pong").unwrap();

        assert_eq!(b.inbound.try_recv().unwrap(), Bytes::from_static(b"ping"));
        assert_eq!(a.inbound.try_recv().unwrap(), Bytes::from_static(b"pong"));
    }

    #[test]
    fn test_severed_link_fails() {
        let (a, mut b) = channel_pair();

        a.transport.sever();
        assert!(!a.transport.is_connected());
        assert!(matches!(
            a.transport.send_bytes(b"lost"),
            Err(RemotingError::Transport(_))
        ));

        a.transport.restore();
        a.transport.send_bytes(b"back").unwrap();
        assert_eq!(b.inbound.try_recv().unwrap(), Bytes::from_static(b"back"));
    }

    #[test]
    fn test_dropped_peer_fails() {
        let (a, b) = channel_pair();
        drop(b);
        assert!(a.transport.send_bytes(b"anyone?").is_err());
    }
}
