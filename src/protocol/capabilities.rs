//! Capability descriptors for protocol negotiation.
//!
//! A descriptor is exchanged exactly once at session start to establish
//! which protocol version and features both endpoints support. After the
//! session is `Established` the recorded descriptor never changes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RemotingError;

/// Protocol version as `major.minor`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProtocolVersion {
    /// Major version; must match for peers to interoperate
    pub major: u16,
    /// Minor version; differences are tolerated
    pub minor: u16,
}

impl ProtocolVersion {
    /// Create a version
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// Major versions match
    pub fn is_compatible(&self, other: &ProtocolVersion) -> bool {
        self.major == other.major
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        super::PROTOCOL_VERSION
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for ProtocolVersion {
    type Err = RemotingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = s.trim().split_once('.').unwrap_or((s.trim(), "0"));
        let parse = |part: &str| {
            part.parse::<u16>()
                .map_err(|e| RemotingError::Config(format!("Invalid protocol version '{s}': {e}")))
        };
        Ok(Self::new(parse(major)?, parse(minor)?))
    }
}

/// Feature bitfield advertised during negotiation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureFlags(u32);

impl FeatureFlags {
    /// Session-level key exchange over an unencrypted transport
    pub const KEY_EXCHANGE: u32 = 1 << 0;
    /// Transport-initiated disconnect/resume (robust connection)
    pub const ROBUST_CONNECTION: u32 = 1 << 1;
    /// User-initiated disconnect and later reconnect
    pub const DISCONNECT_RECONNECT: u32 = 1 << 2;
    /// Payload compression
    pub const COMPRESSION: u32 = 1 << 3;
    /// Connect to an existing server-side session
    pub const CONNECT_EXISTING: u32 = 1 << 4;

    const NAMES: [(&'static str, u32); 5] = [
        ("key_exchange", Self::KEY_EXCHANGE),
        ("robust_connection", Self::ROBUST_CONNECTION),
        ("disconnect_reconnect", Self::DISCONNECT_RECONNECT),
        ("compression", Self::COMPRESSION),
        ("connect_existing", Self::CONNECT_EXISTING),
    ];

    /// Create new empty flags
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Every known feature
    pub const fn all() -> Self {
        Self(
            Self::KEY_EXCHANGE
                | Self::ROBUST_CONNECTION
                | Self::DISCONNECT_RECONNECT
                | Self::COMPRESSION
                | Self::CONNECT_EXISTING,
        )
    }

    /// Create from raw bits
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Get raw bits
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Set a flag
    pub fn with(mut self, flag: u32) -> Self {
        self.0 |= flag;
        self
    }

    /// Check if flag is set
    pub fn has(&self, flag: u32) -> bool {
        self.0 & flag != 0
    }

    /// Every bit of `other` is also set here
    pub fn contains(&self, other: FeatureFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Build from config-style feature names
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, RemotingError> {
        names.iter().try_fold(Self::empty(), |flags, name| {
            let name = name.as_ref();
            Self::NAMES
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, bit)| flags.with(*bit))
                .ok_or_else(|| RemotingError::Config(format!("Unknown feature: {name}")))
        })
    }

    /// Names of the set flags, in bit order
    pub fn names(&self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(_, bit)| self.has(*bit))
            .map(|(n, _)| *n)
            .collect()
    }
}

/// Immutable protocol version + feature set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    /// Protocol version
    pub protocol_version: ProtocolVersion,
    /// Advertised features
    pub feature_flags: FeatureFlags,
}

impl CapabilityDescriptor {
    /// Create a descriptor
    pub const fn new(protocol_version: ProtocolVersion, feature_flags: FeatureFlags) -> Self {
        Self {
            protocol_version,
            feature_flags,
        }
    }

    /// Check version compatibility
    pub fn is_compatible(&self, other: &CapabilityDescriptor) -> bool {
        self.protocol_version.is_compatible(&other.protocol_version)
    }
}

/// Outcome of capability validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Remote capability is usable
    Accept,
    /// Remote capability is not usable, with a reason
    Reject(String),
}

/// Decides whether a remote descriptor is acceptable.
///
/// Called by the engine while it holds the session lock, so implementations
/// must not submit events back into the same engine.
pub trait CapabilityValidator: Send + Sync {
    /// Inspect the remote descriptor
    fn validate(&self, remote: &CapabilityDescriptor) -> Verdict;
}

/// Default validator: major version must match and required features must
/// be advertised by the peer.
#[derive(Debug, Clone)]
pub struct CompatibilityValidator {
    local: CapabilityDescriptor,
    required: FeatureFlags,
}

impl CompatibilityValidator {
    /// Validate against `local` with no required features
    pub fn new(local: CapabilityDescriptor) -> Self {
        Self {
            local,
            required: FeatureFlags::empty(),
        }
    }

    /// Require the peer to advertise these features
    pub fn with_required(mut self, required: FeatureFlags) -> Self {
        self.required = required;
        self
    }
}

impl CapabilityValidator for CompatibilityValidator {
    fn validate(&self, remote: &CapabilityDescriptor) -> Verdict {
        if !self.local.is_compatible(remote) {
            return Verdict::Reject(format!(
                "Version {} not compatible with {}",
                remote.protocol_version, self.local.protocol_version
            ));
        }

        if !remote.feature_flags.contains(self.required) {
            let missing = FeatureFlags::from_bits(self.required.bits() & !remote.feature_flags.bits());
            return Verdict::Reject(format!("Missing required features: {}", missing.names().join(", ")));
        }

        Verdict::Accept
    }
}

impl<F> CapabilityValidator for F
where
    F: Fn(&CapabilityDescriptor) -> Verdict + Send + Sync,
{
    fn validate(&self, remote: &CapabilityDescriptor) -> Verdict {
        self(remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_compatibility() {
        let v2 = ProtocolVersion::new(2, 3);
        assert!(v2.is_compatible(&ProtocolVersion::new(2, 0))); // Minor version diff OK
        assert!(!v2.is_compatible(&ProtocolVersion::new(3, 3))); // Major version diff NOT OK
    }

    #[test]
    fn test_version_parse() {
        assert_eq!("2.3".parse::<ProtocolVersion>().unwrap(), ProtocolVersion::new(2, 3));
        assert_eq!("4".parse::<ProtocolVersion>().unwrap(), ProtocolVersion::new(4, 0));
        assert!("two.three".parse::<ProtocolVersion>().is_err());
        assert_eq!(ProtocolVersion::new(2, 3).to_string(), "2.3");
    }

    #[test]
    fn test_feature_names() {
        let flags = FeatureFlags::from_names(&["key_exchange", "compression"]).unwrap();
        assert!(flags.has(FeatureFlags::KEY_EXCHANGE));
        assert!(!flags.has(FeatureFlags::ROBUST_CONNECTION));
        assert_eq!(flags.names(), vec!["key_exchange", "compression"]);

        assert!(FeatureFlags::from_names(&["teleport"]).is_err());
    }

    #[test]
    fn test_validator_rejects_major_mismatch() {
        let local = CapabilityDescriptor::new(ProtocolVersion::new(2, 3), FeatureFlags::all());
        let remote = CapabilityDescriptor::new(ProtocolVersion::new(3, 0), FeatureFlags::all());

        let validator = CompatibilityValidator::new(local);
        assert!(matches!(validator.validate(&remote), Verdict::Reject(_)));
    }

    #[test]
    fn test_validator_required_features() {
        let local = CapabilityDescriptor::new(ProtocolVersion::new(2, 3), FeatureFlags::all());
        let remote = CapabilityDescriptor::new(
            ProtocolVersion::new(2, 1),
            FeatureFlags::empty().with(FeatureFlags::COMPRESSION),
        );

        let lenient = CompatibilityValidator::new(local);
        assert_eq!(lenient.validate(&remote), Verdict::Accept);

        let strict = lenient.with_required(FeatureFlags::empty().with(FeatureFlags::KEY_EXCHANGE));
        match strict.validate(&remote) {
            Verdict::Reject(reason) => assert!(reason.contains("key_exchange")),
            Verdict::Accept => panic!("expected rejection"),
        }
    }

    #[test]
    fn test_closure_validator() {
        let deny_all = |_: &CapabilityDescriptor| Verdict::Reject("closed for maintenance".into());
        assert!(matches!(
            deny_all.validate(&CapabilityDescriptor::default()),
            Verdict::Reject(_)
        ));
    }
}
