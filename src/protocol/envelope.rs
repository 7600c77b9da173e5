//! Session envelopes.
//!
//! An envelope wraps any protocol payload that travels alongside a state
//! machine event: a capability descriptor, key material, application data or
//! a failure reason. The JSON encoding here is the default codec used by
//! [`RemoteSession`](crate::session::RemoteSession); the engine itself only
//! sees decoded envelopes.

use serde::{Deserialize, Serialize};

use super::{CapabilityDescriptor, FailureReason};
use crate::error::{RemotingError, Result};

/// Envelope payload variants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvelopePayload {
    /// Capability descriptor for negotiation
    Capability(CapabilityDescriptor),
    /// Ask the peer for its public key
    KeyRequest,
    /// Public key material
    PublicKey(#[serde(with = "base64_bytes")] Vec<u8>),
    /// Application data
    Data(#[serde(with = "base64_bytes")] Vec<u8>),
    /// Peer reports a failure
    Failure(FailureReason),
    /// Peer is closing the session
    Close,
}

impl EnvelopePayload {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            EnvelopePayload::Capability(_) => "capability",
            EnvelopePayload::KeyRequest => "key_request",
            EnvelopePayload::PublicKey(_) => "public_key",
            EnvelopePayload::Data(_) => "data",
            EnvelopePayload::Failure(_) => "failure",
            EnvelopePayload::Close => "close",
        }
    }
}

/// Typed wrapper around one protocol payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEnvelope {
    /// Session ID (absent before the peer knows it)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Payload
    pub payload: EnvelopePayload,
    /// Timestamp (Unix millis)
    pub timestamp: u64,
}

impl SessionEnvelope {
    /// Wrap a payload
    pub fn new(payload: EnvelopePayload) -> Self {
        Self {
            session_id: None,
            payload,
            timestamp: current_timestamp(),
        }
    }

    /// Tag with a session ID
    pub fn with_session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    /// Create a capability envelope
    pub fn capability(capability: CapabilityDescriptor) -> Self {
        Self::new(EnvelopePayload::Capability(capability))
    }

    /// Create a key request envelope
    pub fn key_request() -> Self {
        Self::new(EnvelopePayload::KeyRequest)
    }

    /// Create a public key envelope
    pub fn public_key(key: &[u8]) -> Self {
        Self::new(EnvelopePayload::PublicKey(key.to_vec()))
    }

    /// Create a data envelope
    pub fn data(data: impl Into<Vec<u8>>) -> Self {
        Self::new(EnvelopePayload::Data(data.into()))
    }

    /// Create a failure envelope
    pub fn failure(reason: FailureReason) -> Self {
        Self::new(EnvelopePayload::Failure(reason))
    }

    /// Create a close envelope
    pub fn close() -> Self {
        Self::new(EnvelopePayload::Close)
    }

    /// Get capability payload
    pub fn get_capability(&self) -> Option<&CapabilityDescriptor> {
        match &self.payload {
            EnvelopePayload::Capability(cap) => Some(cap),
            _ => None,
        }
    }

    /// Get data payload
    pub fn get_data(&self) -> Option<&[u8]> {
        match &self.payload {
            EnvelopePayload::Data(data) => Some(data),
            _ => None,
        }
    }

    /// Get public key payload
    pub fn get_public_key(&self) -> Option<&[u8]> {
        match &self.payload {
            EnvelopePayload::PublicKey(key) => Some(key),
            _ => None,
        }
    }

    /// Get failure payload
    pub fn get_failure(&self) -> Option<&FailureReason> {
        match &self.payload {
            EnvelopePayload::Failure(reason) => Some(reason),
            _ => None,
        }
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| RemotingError::InvalidEnvelope(e.to_string()))
    }
}

/// Get current timestamp in milliseconds
fn current_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FailureCategory, FeatureFlags, ProtocolVersion};

    #[test]
    fn test_capability_envelope() {
        let cap = CapabilityDescriptor::new(ProtocolVersion::new(2, 3), FeatureFlags::all());
        let env = SessionEnvelope::capability(cap).with_session("session-123");

        let bytes = env.to_bytes().unwrap();
        let parsed = SessionEnvelope::from_bytes(&bytes).unwrap();

        assert_eq!(parsed.get_capability(), Some(&cap));
        assert_eq!(parsed.session_id.as_deref(), Some("session-123"));
    }

    #[test]
    fn test_data_is_base64_on_the_wire() {
        let env = SessionEnvelope::data(b"hello".to_vec());
        let json = String::from_utf8(env.to_bytes().unwrap()).unwrap();

        assert!(json.contains("\"DATA\""));
        assert!(json.contains("aGVsbG8="));
        assert_eq!(
            SessionEnvelope::from_bytes(json.as_bytes()).unwrap().get_data(),
            Some(&b"hello"[..])
        );
    }

    #[test]
    fn test_failure_envelope() {
        let reason = FailureReason::new(FailureCategory::Negotiation, "version 9.0 unsupported");
        let env = SessionEnvelope::failure(reason.clone());
        assert_eq!(env.get_failure(), Some(&reason));
        assert!(env.get_data().is_none());
        assert_eq!(env.payload.name(), "failure");
    }

    #[test]
    fn test_garbage_is_rejected() {
        let err = SessionEnvelope::from_bytes(b"not json").unwrap_err();
        assert!(matches!(err, RemotingError::InvalidEnvelope(_)));
    }
}
