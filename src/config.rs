//! Configuration management for the voting session engine
//!
//! Loads settings from environment variables (and a `.env` file when present)
//! with validation.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Hard upper bound on voter codes issued in one batch
pub const MAX_CREDENTIALS_PER_BATCH: usize = 1000;

/// Engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How often the session clock forces overdue events to `ended` (seconds)
    pub poll_interval_seconds: u64,

    /// How long a cached session status may be served (milliseconds)
    pub status_cache_ttl_ms: u64,

    /// Buffered change notifications per subscriber before it lags
    pub notifier_capacity: usize,

    /// Largest batch accepted by `issue_credentials`
    pub max_credentials_per_batch: usize,

    /// Length of generated voter codes
    pub code_length: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 10,
            status_cache_ttl_ms: 500,
            notifier_capacity: 1024,
            max_credentials_per_batch: MAX_CREDENTIALS_PER_BATCH,
            code_length: 8,
        }
    }
}

impl EngineConfig {
    /// Load engine configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            poll_interval_seconds: env_or("VOTEBOX_POLL_INTERVAL_SECONDS", defaults.poll_interval_seconds)?,
            status_cache_ttl_ms: env_or("VOTEBOX_STATUS_CACHE_TTL_MS", defaults.status_cache_ttl_ms)?,
            notifier_capacity: env_or("VOTEBOX_NOTIFIER_CAPACITY", defaults.notifier_capacity)?,
            max_credentials_per_batch: env_or(
                "VOTEBOX_MAX_CREDENTIALS_PER_BATCH",
                defaults.max_credentials_per_batch,
            )?,
            code_length: env_or("VOTEBOX_CODE_LENGTH", defaults.code_length)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Create configuration for testing
    pub fn for_testing() -> Self {
        Self {
            poll_interval_seconds: 1,
            status_cache_ttl_ms: 50,
            notifier_capacity: 256,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_seconds == 0 {
            return Err(Error::config("VOTEBOX_POLL_INTERVAL_SECONDS must be positive"));
        }
        if self.notifier_capacity == 0 {
            return Err(Error::config("VOTEBOX_NOTIFIER_CAPACITY must be positive"));
        }
        if self.max_credentials_per_batch == 0
            || self.max_credentials_per_batch > MAX_CREDENTIALS_PER_BATCH
        {
            return Err(Error::config(format!(
                "VOTEBOX_MAX_CREDENTIALS_PER_BATCH must be between 1 and {MAX_CREDENTIALS_PER_BATCH}"
            )));
        }
        if !(6..=32).contains(&self.code_length) {
            return Err(Error::config("VOTEBOX_CODE_LENGTH must be between 6 and 32"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn status_cache_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.status_cache_ttl_ms)
    }
}

/// External ledger relay settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub enabled: bool,

    /// Records buffered between submissions and the relay task
    pub queue_capacity: usize,

    /// Ed25519 signing seed (base64, 32 bytes); a fresh key is generated when absent
    #[serde(skip_serializing)]
    pub signing_key: Option<String>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            queue_capacity: 4096,
            signing_key: None,
        }
    }
}

impl LedgerConfig {
    /// Load ledger configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            enabled: env_or("VOTEBOX_LEDGER_ENABLED", defaults.enabled)?,
            queue_capacity: env_or("VOTEBOX_LEDGER_QUEUE_CAPACITY", defaults.queue_capacity)?,
            signing_key: std::env::var("VOTEBOX_LEDGER_SIGNING_KEY").ok(),
        };

        if config.queue_capacity == 0 {
            return Err(Error::config("VOTEBOX_LEDGER_QUEUE_CAPACITY must be positive"));
        }
        if config.signing_key.is_some() {
            config.signing_seed()?;
        }
        Ok(config)
    }

    /// Create configuration for testing
    pub fn for_testing() -> Self {
        Self {
            enabled: true,
            queue_capacity: 64,
            signing_key: None,
        }
    }

    /// Decode the configured signing seed, if any
    pub fn signing_seed(&self) -> Result<Option<Zeroizing<[u8; 32]>>> {
        use base64::Engine;

        let Some(encoded) = &self.signing_key else {
            return Ok(None);
        };

        let decoded = Zeroizing::new(
            base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|_| Error::config("VOTEBOX_LEDGER_SIGNING_KEY must be valid base64"))?,
        );

        if decoded.len() != 32 {
            return Err(Error::config(
                "VOTEBOX_LEDGER_SIGNING_KEY must decode to exactly 32 bytes",
            ));
        }

        let mut seed = Zeroizing::new([0u8; 32]);
        seed.copy_from_slice(&decoded);
        Ok(Some(seed))
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub engine: EngineConfig,
    pub ledger: LedgerConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from environment
    pub fn from_env() -> Result<Self> {
        let engine = EngineConfig::from_env()?;
        let ledger = LedgerConfig::from_env()?;

        let logging = LoggingConfig {
            level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string()),
        };

        Ok(Self {
            engine,
            ledger,
            logging,
        })
    }

    /// Create configuration for testing
    pub fn for_testing() -> Self {
        Self {
            engine: EngineConfig::for_testing(),
            ledger: LedgerConfig::for_testing(),
            logging: LoggingConfig {
                level: "debug".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::config(format!("Invalid {name}"))),
        Err(_) => Ok(default),
    }
}
