//! Engine configuration
//!
//! Plain values injected into task construction and into the runner:
//! attempt budget, compression recency window, context budget and the
//! backoff policy. Loaded from YAML, TOML or JSON, then overridden by
//! `HEALING_*` environment variables.

use crate::{HealingError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Backoff policy for retryable failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Base delay for exponential backoff in milliseconds
    pub base_ms: u64,

    /// Upper bound for exponential backoff in milliseconds
    pub cap_ms: u64,

    /// Wait used for rate limits that don't say how long to wait
    pub rate_limit_default_ms: u64,

    /// Upper bound for any single wait, including server-supplied ones
    pub max_wait_ms: u64,

    /// Whether to add up to 25% random jitter to exponential delays
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 2_000,
            cap_ms: 60_000,
            rate_limit_default_ms: 5_000,
            max_wait_ms: 60_000,
            jitter: false,
        }
    }
}

impl BackoffConfig {
    /// Set base delay
    pub fn with_base(mut self, ms: u64) -> Self {
        self.base_ms = ms;
        self
    }

    /// Set exponential cap
    pub fn with_cap(mut self, ms: u64) -> Self {
        self.cap_ms = ms;
        self
    }

    /// Set the default rate-limit wait
    pub fn with_rate_limit_default(mut self, ms: u64) -> Self {
        self.rate_limit_default_ms = ms;
        self
    }

    /// Enable or disable jitter
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Exponential delay for a given attempt: `base * 2^attempt`, capped
    pub fn exponential_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let delay_ms = self.base_ms.saturating_mul(factor);

        let delay_ms = if self.jitter {
            let jitter_amount = (delay_ms.min(self.cap_ms) as f64 * 0.25 * rand::random::<f64>()) as u64;
            delay_ms.saturating_add(jitter_amount)
        } else {
            delay_ms
        };

        Duration::from_millis(delay_ms.min(self.cap_ms).min(self.max_wait_ms))
    }

    /// Clamp a wait requested by the failing service
    pub fn clamp_wait(&self, requested: Duration) -> Duration {
        requested.min(Duration::from_millis(self.max_wait_ms))
    }

    /// Wait used when a rate limit carries no hint
    pub fn rate_limit_default(&self) -> Duration {
        self.clamp_wait(Duration::from_millis(self.rate_limit_default_ms))
    }
}

/// Configuration for the task runner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum worker invocations per task
    pub max_attempts: u32,

    /// Most recent non-system messages the compressor never touches
    pub recency_window: usize,

    /// Estimated-token budget the compressor aims for
    pub context_budget: usize,

    /// Whether retries carry a note about the previous failure
    pub annotate_retries: bool,

    /// Backoff policy
    pub backoff: BackoffConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            recency_window: 4,
            context_budget: 100_000,
            annotate_retries: true,
            backoff: BackoffConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Create the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a file, picking the format from its extension
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = Self::parse_file(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides
    ///
    /// Validation runs after the overrides, so the environment can repair a
    /// bad file value.
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::parse_file(path.as_ref())?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn parse_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HealingError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();

        let config: Self = match extension.as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&content).map_err(|e| {
                HealingError::Config(format!("Failed to parse YAML config: {}", e))
            })?,
            "toml" => toml::from_str(&content).map_err(|e| {
                HealingError::Config(format!("Failed to parse TOML config: {}", e))
            })?,
            "json" => serde_json::from_str(&content).map_err(|e| {
                HealingError::Config(format!("Failed to parse JSON config: {}", e))
            })?,
            other => {
                return Err(HealingError::Config(format!(
                    "Unsupported config file extension: {:?}",
                    other
                )))
            }
        };

        Ok(config)
    }

    /// Create configuration from environment variables only
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - HEALING_MAX_ATTEMPTS: Maximum worker invocations per task
    /// - HEALING_RECENCY_WINDOW: Messages kept verbatim by compression
    /// - HEALING_CONTEXT_BUDGET: Estimated-token budget
    /// - HEALING_BACKOFF_BASE_MS: Exponential backoff base
    /// - HEALING_BACKOFF_CAP_MS: Exponential backoff cap
    /// - HEALING_ANNOTATE_RETRIES: Annotate retry instructions (true/false)
    ///
    /// Unparseable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Some(value) = env_parse::<u32>("HEALING_MAX_ATTEMPTS") {
            self.max_attempts = value;
        }

        if let Some(value) = env_parse::<usize>("HEALING_RECENCY_WINDOW") {
            self.recency_window = value;
        }

        if let Some(value) = env_parse::<usize>("HEALING_CONTEXT_BUDGET") {
            self.context_budget = value;
        }

        if let Some(value) = env_parse::<u64>("HEALING_BACKOFF_BASE_MS") {
            self.backoff.base_ms = value;
        }

        if let Some(value) = env_parse::<u64>("HEALING_BACKOFF_CAP_MS") {
            self.backoff.cap_ms = value;
        }

        if let Ok(value) = env::var("HEALING_ANNOTATE_RETRIES") {
            self.annotate_retries = value.eq_ignore_ascii_case("true")
                || value == "1"
                || value.eq_ignore_ascii_case("yes");
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(HealingError::Config(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        if self.context_budget == 0 {
            return Err(HealingError::Config(
                "context_budget must be greater than 0".to_string(),
            ));
        }

        if self.backoff.base_ms > self.backoff.cap_ms {
            return Err(HealingError::Config(format!(
                "backoff base ({}ms) exceeds cap ({}ms)",
                self.backoff.base_ms, self.backoff.cap_ms
            )));
        }

        Ok(())
    }

    /// Set maximum attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set recency window
    pub fn with_recency_window(mut self, window: usize) -> Self {
        self.recency_window = window;
        self
    }

    /// Set context budget
    pub fn with_context_budget(mut self, budget: usize) -> Self {
        self.context_budget = budget;
        self
    }

    /// Set backoff policy
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Enable or disable retry annotations
    pub fn with_annotate_retries(mut self, enabled: bool) -> Self {
        self.annotate_retries = enabled;
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}
