//! Configuration types for resilient clients.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigurationError;
use crate::resilience::{CircuitBreakerConfig, RateLimiterConfig, RetryConfig};

/// Default maximum number of concurrent operations.
pub const DEFAULT_MAX_CONCURRENT: usize = 2;

/// Default requests per minute.
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 60;

/// Default consecutive failures before the circuit opens.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default circuit cooldown (60 seconds).
pub const DEFAULT_COOLDOWN_MS: u64 = 60_000;

/// Default total attempts per call.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base backoff delay.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;

/// Default backoff cap.
pub const DEFAULT_MAX_DELAY_MS: u64 = 10_000;

/// Default circuit cooldown after a quota error (5 minutes).
pub const DEFAULT_QUOTA_COOLDOWN_MS: u64 = 300_000;

/// Log level for observers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Error level - only errors.
    Error,
    /// Warning level - errors and warnings.
    Warn,
    /// Info level - general information.
    #[default]
    Info,
    /// Debug level - detailed information.
    Debug,
    /// Trace level - very detailed information.
    Trace,
}

impl LogLevel {
    /// Numeric severity, lower is more severe.
    pub fn severity(&self) -> u8 {
        match self {
            LogLevel::Error => 0,
            LogLevel::Warn => 1,
            LogLevel::Info => 2,
            LogLevel::Debug => 3,
            LogLevel::Trace => 4,
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Configuration for a [`ResilientClient`](crate::resilience::ResilientClient).
///
/// Serializes with durations as integer milliseconds; missing fields take
/// their defaults.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilientConfig {
    /// Maximum number of operations in flight at once.
    pub max_concurrent: usize,
    /// Maximum call starts per minute.
    pub requests_per_minute: u32,
    /// Consecutive failed calls before the circuit opens.
    pub failure_threshold: u32,
    /// How long the circuit stays open before a trial call.
    #[serde(rename = "cooldown_ms", with = "duration_ms")]
    pub cooldown: Duration,
    /// Total attempts per call, including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    #[serde(rename = "base_delay_ms", with = "duration_ms")]
    pub base_delay: Duration,
    /// Maximum delay between attempts.
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
    /// How long a quota error keeps the circuit open when the server gives no hint.
    #[serde(rename = "quota_cooldown_ms", with = "duration_ms")]
    pub quota_cooldown: Duration,
}

impl Default for ResilientConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            requests_per_minute: DEFAULT_REQUESTS_PER_MINUTE,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown: Duration::from_millis(DEFAULT_COOLDOWN_MS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            quota_cooldown: Duration::from_millis(DEFAULT_QUOTA_COOLDOWN_MS),
        }
    }
}

impl ResilientConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ResilientConfigBuilder {
        ResilientConfigBuilder::default()
    }

    /// Create configuration from environment variables.
    ///
    /// Reads `{PREFIX}_MAX_CONCURRENT`, `{PREFIX}_RATE_LIMIT`,
    /// `{PREFIX}_FAILURE_THRESHOLD`, `{PREFIX}_COOLDOWN_MS`,
    /// `{PREFIX}_MAX_RETRIES`, `{PREFIX}_BASE_DELAY_MS` and
    /// `{PREFIX}_MAX_DELAY_MS`. Unset variables keep their defaults; a set
    /// but unparsable variable is an error.
    pub fn from_env(prefix: &str) -> Result<Self, ConfigurationError> {
        Self::from_lookup(prefix, |name| std::env::var(name).ok())
    }

    fn from_lookup<L>(prefix: &str, lookup: L) -> Result<Self, ConfigurationError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| -> Result<Option<u64>, ConfigurationError> {
            let name = format!("{}_{}", prefix, suffix);
            match lookup(&name) {
                None => Ok(None),
                Some(value) => value
                    .trim()
                    .parse::<u64>()
                    .map(Some)
                    .map_err(|_| ConfigurationError::InvalidEnvVar { name, value }),
            }
        };
        let narrow = |suffix: &str, value: u64| -> Result<u32, ConfigurationError> {
            u32::try_from(value).map_err(|_| ConfigurationError::InvalidEnvVar {
                name: format!("{}_{}", prefix, suffix),
                value: value.to_string(),
            })
        };

        let mut builder = Self::builder();
        if let Some(v) = var("MAX_CONCURRENT")? {
            builder = builder.max_concurrent(usize::try_from(v).unwrap_or(usize::MAX));
        }
        if let Some(v) = var("RATE_LIMIT")? {
            builder = builder.requests_per_minute(narrow("RATE_LIMIT", v)?);
        }
        if let Some(v) = var("FAILURE_THRESHOLD")? {
            builder = builder.failure_threshold(narrow("FAILURE_THRESHOLD", v)?);
        }
        if let Some(v) = var("COOLDOWN_MS")? {
            builder = builder.cooldown(Duration::from_millis(v));
        }
        if let Some(v) = var("MAX_RETRIES")? {
            builder = builder.max_attempts(narrow("MAX_RETRIES", v)?);
        }
        if let Some(v) = var("BASE_DELAY_MS")? {
            builder = builder.base_delay(Duration::from_millis(v));
        }
        if let Some(v) = var("MAX_DELAY_MS")? {
            builder = builder.max_delay(Duration::from_millis(v));
        }

        builder.build()
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json(document: &str) -> Result<Self, ConfigurationError> {
        let config: Self = serde_json::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every field against its allowed range.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        fn positive(field: &'static str, ok: bool) -> Result<(), ConfigurationError> {
            if ok {
                Ok(())
            } else {
                Err(ConfigurationError::InvalidValue {
                    field,
                    message: "must be at least 1".to_string(),
                })
            }
        }

        positive("max_concurrent", self.max_concurrent >= 1)?;
        positive("requests_per_minute", self.requests_per_minute >= 1)?;
        positive("failure_threshold", self.failure_threshold >= 1)?;
        positive("max_attempts", self.max_attempts >= 1)?;

        if self.base_delay > self.max_delay {
            return Err(ConfigurationError::InvalidValue {
                field: "base_delay",
                message: format!(
                    "{:?} exceeds max_delay {:?}",
                    self.base_delay, self.max_delay
                ),
            });
        }

        Ok(())
    }

    /// Rate limiter settings.
    pub fn rate_limiter_config(&self) -> RateLimiterConfig {
        RateLimiterConfig::new(self.requests_per_minute)
    }

    /// Circuit breaker settings.
    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            cooldown: self.cooldown,
            quota_cooldown: self.quota_cooldown,
        }
    }

    /// Retry settings.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(self.max_attempts, self.base_delay, self.max_delay)
    }
}

/// Builder for ResilientConfig.
#[derive(Default)]
pub struct ResilientConfigBuilder {
    max_concurrent: Option<usize>,
    requests_per_minute: Option<u32>,
    failure_threshold: Option<u32>,
    cooldown: Option<Duration>,
    max_attempts: Option<u32>,
    base_delay: Option<Duration>,
    max_delay: Option<Duration>,
    quota_cooldown: Option<Duration>,
}

impl ResilientConfigBuilder {
    /// Set the maximum number of concurrent operations.
    pub fn max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = Some(max_concurrent);
        self
    }

    /// Set the rate limit in requests per minute.
    pub fn requests_per_minute(mut self, requests_per_minute: u32) -> Self {
        self.requests_per_minute = Some(requests_per_minute);
        self
    }

    /// Set the consecutive failures that open the circuit.
    pub fn failure_threshold(mut self, failure_threshold: u32) -> Self {
        self.failure_threshold = Some(failure_threshold);
        self
    }

    /// Set the circuit cooldown.
    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = Some(cooldown);
        self
    }

    /// Set the total attempts per call.
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Set the base backoff delay.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = Some(delay);
        self
    }

    /// Set the backoff cap.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set the circuit cooldown used after quota errors.
    pub fn quota_cooldown(mut self, cooldown: Duration) -> Self {
        self.quota_cooldown = Some(cooldown);
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> Result<ResilientConfig, ConfigurationError> {
        let defaults = ResilientConfig::default();

        let config = ResilientConfig {
            max_concurrent: self.max_concurrent.unwrap_or(defaults.max_concurrent),
            requests_per_minute: self.requests_per_minute.unwrap_or(defaults.requests_per_minute),
            failure_threshold: self.failure_threshold.unwrap_or(defaults.failure_threshold),
            cooldown: self.cooldown.unwrap_or(defaults.cooldown),
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts),
            base_delay: self.base_delay.unwrap_or(defaults.base_delay),
            max_delay: self.max_delay.unwrap_or(defaults.max_delay),
            quota_cooldown: self.quota_cooldown.unwrap_or(defaults.quota_cooldown),
        };

        config.validate()?;
        Ok(config)
    }
}
