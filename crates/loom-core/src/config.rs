//! Worker configuration loaded from TOML.
//!
//! ```toml
//! workers = 4
//! poll_interval_ms = 250
//! max_idle_backoff_ms = 5000
//! claim_timeout_ms = 10000
//! backoff_multiplier = 2.0
//! ```
//!
//! Every key is optional. A missing file yields the defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app::PollBackoff;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing config {path}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
    /// Number of concurrent workers.
    pub workers: usize,
    /// Base delay after an idle poll.
    pub poll_interval_ms: u64,
    /// Upper bound for the idle backoff.
    pub max_idle_backoff_ms: u64,
    /// Deadline for one claim attempt; on expiry the transaction is rolled back.
    pub claim_timeout_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            poll_interval_ms: 250,
            max_idle_backoff_ms: 5_000,
            claim_timeout_ms: 10_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl WorkerConfig {
    /// Loads and validates `path`; a missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                });
            }
        };
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be positive".into()));
        }
        if self.claim_timeout_ms == 0 {
            return Err(ConfigError::Invalid("claim_timeout_ms must be positive".into()));
        }
        if self.max_idle_backoff_ms < self.poll_interval_ms {
            return Err(ConfigError::Invalid(
                "max_idle_backoff_ms must not be below poll_interval_ms".into(),
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "backoff_multiplier must be a finite number >= 1.0".into(),
            ));
        }
        Ok(())
    }

    pub fn claim_timeout(&self) -> Duration {
        Duration::from_millis(self.claim_timeout_ms)
    }

    pub fn poll_backoff(&self) -> PollBackoff {
        PollBackoff::new(
            Duration::from_millis(self.poll_interval_ms),
            Duration::from_millis(self.max_idle_backoff_ms),
            self.backoff_multiplier,
        )
    }
}
