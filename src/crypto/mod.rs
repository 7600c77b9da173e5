//! Session key agreement.
//!
//! The `KeyRequested` / `KeySent` / `KeyReceived` events only track where the
//! exchange is; the keys themselves live here. Each side generates an X25519
//! key pair, sends its public half in a `PUBLIC_KEY` envelope, and derives the
//! same 32-byte session key from the shared secret with HKDF-SHA256.
//!
//! ```text
//! client                                  server
//!   │  <──────────── KEY_REQUEST ───────────  │  KeyRequested
//!   │  ───────────── PUBLIC_KEY(c) ────────>  │  KeyReceived
//!   │  <──────────── PUBLIC_KEY(s) ─────────  │  KeySent
//!   │                                         │
//! derive(dh(c_secret, s), "remoting-session-v1") == derive(dh(s_secret, c), ...)
//! ```

mod exchange;

pub use exchange::{KeyExchange, KeyPair, PublicKey};

use std::fmt;

use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// HKDF info string for session keys
pub const SESSION_KEY_CONTEXT: &str = "remoting-session-v1";

/// Session key length in bytes
pub const SESSION_KEY_LEN: usize = 32;

/// Errors from key exchange operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyExchangeError {
    /// Peer sent something that is not an X25519 public key
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Peer public key has not arrived yet
    #[error("Key exchange incomplete: peer public key not received")]
    Incomplete,

    /// HKDF expansion failed
    #[error("Key derivation failed: {0}")]
    DerivationFailed(String),
}

/// Derived symmetric key, wiped on drop
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey {
    bytes: Vec<u8>,
}

impl SessionKey {
    pub(crate) fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Key length
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Check if the key is empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey([REDACTED, {} bytes])", self.bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_key_debug_is_redacted() {
        let key = SessionKey::new(vec![0xAB; SESSION_KEY_LEN]);
        let debug = format!("{key:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("171"));
    }

    #[test]
    fn test_zeroize_clears_bytes() {
        let mut key = SessionKey::new(vec![7; 4]);
        key.zeroize();
        assert!(key.is_empty());
    }
}
