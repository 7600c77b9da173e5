//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables (`REMOTING_*`)
//! - CLI arguments (for the `remoting` binary)

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RemotingError, Result};
use crate::protocol::{
    CapabilityDescriptor, FeatureFlags, ProtocolVersion, NEGOTIATION_TIMEOUT_MS,
    RECONNECT_TIMEOUT_MS,
};

/// Main configuration struct
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Session timing and policy
    #[serde(default)]
    pub session: SessionConfig,

    /// Advertised and required capabilities
    #[serde(default)]
    pub capability: CapabilityConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| RemotingError::Config(format!("Failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Default config file location (`<config_dir>/remoting/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("remoting").join("config.toml"))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("REMOTING_NEGOTIATION_TIMEOUT_MS") {
            if let Ok(val) = val.parse() {
                config.session.negotiation_timeout_ms = val;
            }
        }
        if let Ok(val) = std::env::var("REMOTING_RECONNECT_TIMEOUT_MS") {
            if let Ok(val) = val.parse() {
                config.session.reconnect_timeout_ms = val;
            }
        }
        if let Ok(val) = std::env::var("REMOTING_REQUIRE_KEY_EXCHANGE") {
            config.session.require_key_exchange = matches!(val.as_str(), "1" | "true" | "yes");
        }
        if let Ok(version) = std::env::var("REMOTING_PROTOCOL_VERSION") {
            config.capability.protocol_version = version;
        }

        config
    }

    /// Merge with another config (other takes precedence where it differs
    /// from the defaults)
    pub fn merge(self, other: Self) -> Self {
        let session_default = SessionConfig::default();
        let capability_default = CapabilityConfig::default();

        Self {
            session: SessionConfig {
                negotiation_timeout_ms: if other.session.negotiation_timeout_ms
                    != session_default.negotiation_timeout_ms
                {
                    other.session.negotiation_timeout_ms
                } else {
                    self.session.negotiation_timeout_ms
                },
                reconnect_timeout_ms: if other.session.reconnect_timeout_ms
                    != session_default.reconnect_timeout_ms
                {
                    other.session.reconnect_timeout_ms
                } else {
                    self.session.reconnect_timeout_ms
                },
                require_key_exchange: other.session.require_key_exchange
                    || self.session.require_key_exchange,
            },
            capability: CapabilityConfig {
                protocol_version: if other.capability.protocol_version
                    != capability_default.protocol_version
                {
                    other.capability.protocol_version
                } else {
                    self.capability.protocol_version
                },
                features: if other.capability.features != capability_default.features {
                    other.capability.features
                } else {
                    self.capability.features
                },
                required_features: if other.capability.required_features.is_empty() {
                    self.capability.required_features
                } else {
                    other.capability.required_features
                },
            },
        }
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<()> {
        if self.session.negotiation_timeout_ms == 0 {
            return Err(RemotingError::Config(
                "negotiation_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.session.reconnect_timeout_ms == 0 {
            return Err(RemotingError::Config(
                "reconnect_timeout_ms must be greater than zero".to_string(),
            ));
        }
        self.capability.descriptor()?;
        self.capability.required()?;
        Ok(())
    }
}

/// Session timing and policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Negotiation must complete within this many milliseconds
    pub negotiation_timeout_ms: u64,

    /// Reconnect must complete within this many milliseconds
    pub reconnect_timeout_ms: u64,

    /// Server requests the client's key as soon as the session is established
    pub require_key_exchange: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            negotiation_timeout_ms: NEGOTIATION_TIMEOUT_MS,
            reconnect_timeout_ms: RECONNECT_TIMEOUT_MS,
            require_key_exchange: false,
        }
    }
}

impl SessionConfig {
    /// Negotiation timeout
    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_millis(self.negotiation_timeout_ms)
    }

    /// Reconnect timeout
    pub fn reconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.reconnect_timeout_ms)
    }
}

/// Capability advertisement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityConfig {
    /// Protocol version as `major.minor`
    pub protocol_version: String,

    /// Feature names advertised to the peer
    pub features: Vec<String>,

    /// Feature names the peer must advertise
    pub required_features: Vec<String>,
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            protocol_version: crate::protocol::PROTOCOL_VERSION.to_string(),
            features: FeatureFlags::all()
                .names()
                .into_iter()
                .map(String::from)
                .collect(),
            required_features: Vec::new(),
        }
    }
}

impl CapabilityConfig {
    /// Local capability descriptor
    pub fn descriptor(&self) -> Result<CapabilityDescriptor> {
        let version: ProtocolVersion = self.protocol_version.parse()?;
        let flags = FeatureFlags::from_names(&self.features)?;
        Ok(CapabilityDescriptor::new(version, flags))
    }

    /// Features the peer must advertise
    pub fn required(&self) -> Result<FeatureFlags> {
        FeatureFlags::from_names(&self.required_features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.session.negotiation_timeout(), Duration::from_secs(60));
        assert!(!config.session.require_key_exchange);

        let descriptor = config.capability.descriptor().unwrap();
        assert_eq!(descriptor.protocol_version, crate::protocol::PROTOCOL_VERSION);
        assert_eq!(descriptor.feature_flags, FeatureFlags::all());
        config.validate().unwrap();
    }

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
            [session]
            negotiation_timeout_ms = 5000
            require_key_exchange = true

            [capability]
            protocol_version = "2.1"
            features = ["key_exchange", "robust_connection"]
            required_features = ["key_exchange"]
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.session.negotiation_timeout_ms, 5000);
        assert_eq!(config.session.reconnect_timeout_ms, RECONNECT_TIMEOUT_MS);
        assert!(config.session.require_key_exchange);

        let descriptor = config.capability.descriptor().unwrap();
        assert_eq!(descriptor.protocol_version, ProtocolVersion::new(2, 1));
        assert!(descriptor.feature_flags.has(FeatureFlags::ROBUST_CONNECTION));
        assert!(!descriptor.feature_flags.has(FeatureFlags::COMPRESSION));
        assert!(config.capability.required().unwrap().has(FeatureFlags::KEY_EXCHANGE));
    }

    #[test]
    fn test_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[session]\nreconnect_timeout_ms = 1234").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.session.reconnect_timeout(), Duration::from_millis(1234));
    }

    #[test]
    fn test_config_rejects_unknown_feature() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[capability]\nfeatures = [\"telepathy\"]").unwrap();

        let err = Config::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("telepathy"));
    }

    #[test]
    fn test_config_malformed_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[session\nreconnect_timeout_ms = ").unwrap();

        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, RemotingError::Config(_)));
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_config_rejects_zero_timeout() {
        let mut config = Config::default();
        config.session.negotiation_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_merge_prefers_non_default() {
        let base = Config {
            session: SessionConfig {
                negotiation_timeout_ms: 1000,
                ..Default::default()
            },
            ..Default::default()
        };
        let overlay = Config {
            session: SessionConfig {
                reconnect_timeout_ms: 2000,
                ..Default::default()
            },
            ..Default::default()
        };

        let merged = base.merge(overlay);
        assert_eq!(merged.session.negotiation_timeout_ms, 1000);
        assert_eq!(merged.session.reconnect_timeout_ms, 2000);
    }
}
