//! Envelope defaults.
//!
//! Loaded from the environment with development-friendly fallbacks:
//! - `ENVIRONMENT`: deployment tag stamped on every envelope (default: `development`)
//! - `EVENT_ENVELOPE_VERSION`: envelope schema version (default: `1.0.0`)

use crate::envelope::{DEFAULT_ENVIRONMENT, DEFAULT_VERSION};
use serde::{Deserialize, Serialize};

/// Process-wide defaults used when constructing envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeConfig {
    /// Deployment environment tag.
    pub environment: String,

    /// Envelope and metadata schema version.
    pub version: String,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            environment: DEFAULT_ENVIRONMENT.to_string(),
            version: DEFAULT_VERSION.to_string(),
        }
    }
}

impl EnvelopeConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            environment: std::env::var("ENVIRONMENT")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(default.environment),
            version: std::env::var("EVENT_ENVELOPE_VERSION")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(default.version),
        }
    }

    /// Override the environment tag.
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EnvelopeConfig::default();
        assert_eq!(config.environment, "development");
        assert_eq!(config.version, "1.0.0");
    }

    #[test]
    fn test_with_environment() {
        let config = EnvelopeConfig::default().with_environment("staging");
        assert_eq!(config.environment, "staging");
    }
}
