//! Session configuration
//!
//! Every field has a default, so an empty TOML document is a valid config:
//!
//! ```toml
//! resource_prefix = "venom_probe_"
//! handshake_timeout_ms = 10000
//! key_env_var = "VENOM_PROBE_KEY"
//! activation_env_var = "VENOM_PROBE_AGENT"
//! activation_id = "{6F1E5D2A-3B7C-4E8F-9A0D-1C2B3E4F5A6B}"
//! enable_env_var = "VENOM_PROBE_ENABLE"
//! enable_value = "1"
//! ```

use crate::error::{ProbeError, Result};
use crate::names::DEFAULT_PREFIX;
use crate::shm::MAX_NAME_LEN;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// How long the host waits for the target to pick up its environment
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Identifier the agent checks before attaching
pub const DEFAULT_ACTIVATION_ID: &str = "{6F1E5D2A-3B7C-4E8F-9A0D-1C2B3E4F5A6B}";

// Longest suffix plus underscore plus 32-char key
const RESERVED_NAME_LEN: usize = "TelemetryResponse".len() + 1 + 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Prefix of every shared resource name
    pub resource_prefix: String,
    pub handshake_timeout_ms: u64,
    /// Variable carrying the session key into the target
    pub key_env_var: String,
    pub activation_env_var: String,
    pub activation_id: String,
    pub enable_env_var: String,
    pub enable_value: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            resource_prefix: DEFAULT_PREFIX.to_string(),
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT.as_millis() as u64,
            key_env_var: "VENOM_PROBE_KEY".to_string(),
            activation_env_var: "VENOM_PROBE_AGENT".to_string(),
            activation_id: DEFAULT_ACTIVATION_ID.to_string(),
            enable_env_var: "VENOM_PROBE_ENABLE".to_string(),
            enable_value: "1".to_string(),
        }
    }
}

impl SessionConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| ProbeError::Config(format!("parse: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ProbeError::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.resource_prefix.contains('/') {
            return Err(ProbeError::Config(
                "resource_prefix must not contain '/'".to_string(),
            ));
        }
        if self.resource_prefix.len() + RESERVED_NAME_LEN > MAX_NAME_LEN {
            return Err(ProbeError::Config(format!(
                "resource_prefix too long: max {} chars",
                MAX_NAME_LEN - RESERVED_NAME_LEN
            )));
        }
        if self.handshake_timeout_ms == 0 {
            return Err(ProbeError::Config(
                "handshake_timeout_ms must be non-zero".to_string(),
            ));
        }
        for (field, value) in [
            ("key_env_var", &self.key_env_var),
            ("activation_env_var", &self.activation_env_var),
            ("enable_env_var", &self.enable_env_var),
        ] {
            if value.is_empty() || value.contains('=') || value.contains('\0') {
                return Err(ProbeError::Config(format!(
                    "{field} is not a valid environment variable name"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.handshake_timeout(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
        assert_eq!(SessionConfig::from_toml_str("").unwrap(), config);
    }

    #[test]
    fn test_partial_override() {
        let config = SessionConfig::from_toml_str(
            r#"
            resource_prefix = "probe_"
            handshake_timeout_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(config.resource_prefix, "probe_");
        assert_eq!(config.handshake_timeout(), Duration::from_millis(250));
        assert_eq!(config.key_env_var, "VENOM_PROBE_KEY");
    }

    #[test]
    fn test_rejects_invalid() {
        assert!(SessionConfig::from_toml_str("resource_prefix = \"a/b\"").is_err());
        assert!(SessionConfig::from_toml_str("handshake_timeout_ms = 0").is_err());
        assert!(SessionConfig::from_toml_str("key_env_var = \"A=B\"").is_err());
        assert!(SessionConfig::from_toml_str("no_such_field = 1").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "enable_value = \"yes\"").unwrap();
        let config = SessionConfig::load(file.path()).unwrap();
        assert_eq!(config.enable_value, "yes");

        assert!(matches!(
            SessionConfig::load(Path::new("/nonexistent/venom_probe.toml")),
            Err(ProbeError::Config(_))
        ));
    }
}
