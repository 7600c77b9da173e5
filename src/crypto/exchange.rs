//! X25519 key exchange with HKDF-SHA256 session key derivation.

use std::fmt;

use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;
use x25519_dalek::{PublicKey as X25519Public, SharedSecret, StaticSecret};

use super::{KeyExchangeError, SessionKey, SESSION_KEY_LEN};

/// X25519 public key (32 bytes)
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    /// Create from bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Create from a slice received off the wire
    pub fn from_slice(slice: &[u8]) -> Result<Self, KeyExchangeError> {
        let bytes: [u8; 32] = slice.try_into().map_err(|_| {
            KeyExchangeError::InvalidPublicKey(format!("Expected 32 bytes, got {}", slice.len()))
        })?;
        Ok(Self(bytes))
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PublicKey([{:02x}{:02x}{:02x}{:02x}...])",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

/// X25519 key pair
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        Self::from_static(StaticSecret::random_from_rng(OsRng))
    }

    /// Rebuild from secret bytes
    pub fn from_secret(secret: [u8; 32]) -> Self {
        Self::from_static(StaticSecret::from(secret))
    }

    fn from_static(secret: StaticSecret) -> Self {
        let public = PublicKey(X25519Public::from(&secret).to_bytes());
        Self { secret, public }
    }

    /// Public half
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    fn diffie_hellman(&self, peer: &PublicKey) -> SharedSecret {
        self.secret.diffie_hellman(&X25519Public::from(peer.0))
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// One side of a key exchange
#[derive(Debug)]
pub struct KeyExchange {
    key_pair: KeyPair,
    peer_public: Option<PublicKey>,
}

impl KeyExchange {
    /// Fresh exchange with a random key pair
    pub fn new() -> Self {
        Self::with_key_pair(KeyPair::generate())
    }

    /// Exchange using an existing key pair
    pub fn with_key_pair(key_pair: KeyPair) -> Self {
        Self {
            key_pair,
            peer_public: None,
        }
    }

    /// Our public key, to send to the peer
    pub fn public_key(&self) -> &PublicKey {
        self.key_pair.public_key()
    }

    /// Record the peer's public key
    pub fn set_peer_public(&mut self, peer: PublicKey) {
        self.peer_public = Some(peer);
    }

    /// Peer's public key, once received
    pub fn peer_public(&self) -> Option<&PublicKey> {
        self.peer_public.as_ref()
    }

    /// Peer key has arrived
    pub fn is_complete(&self) -> bool {
        self.peer_public.is_some()
    }

    /// Derive the session key for `context`
    pub fn derive_session_key(&self, context: &str) -> Result<SessionKey, KeyExchangeError> {
        let peer = self.peer_public.as_ref().ok_or(KeyExchangeError::Incomplete)?;
        let shared = self.key_pair.diffie_hellman(peer);
        if !shared.was_contributory() {
            return Err(KeyExchangeError::InvalidPublicKey(
                "low-order point".to_string(),
            ));
        }

        let hk = Hkdf::<Sha256>::new(None, shared.as_bytes());
        let mut okm = vec![0u8; SESSION_KEY_LEN];
        hk.expand(context.as_bytes(), &mut okm)
            .map_err(|e| KeyExchangeError::DerivationFailed(format!("HKDF expand failed: {e}")))?;

        Ok(SessionKey::new(okm))
    }
}

impl Default for KeyExchange {
    fn default() -> Self {
        Self::new()
    }
}
