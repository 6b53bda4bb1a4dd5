//! File-based configuration for breakers and retry policies
//!
//! A [`ShieldConfig`] describes the breakers a process expects, the settings
//! used for breakers created on demand and an optional shared retry policy.
//! Durations are written in milliseconds.
//!
//! ```toml
//! [default_breaker]
//! failure_threshold = 5
//! timeout_ms = 60000
//!
//! [[breakers]]
//! name = "payments"
//! failure_threshold = 3
//! timeout_ms = 2000
//!
//! [retry]
//! max_attempts = 4
//! retry_on = ["transient", "timeout"]
//!
//! [retry.backoff]
//! kind = "jittered_exponential"
//! initial_delay_ms = 100
//! multiplier = 2.0
//! max_delay_ms = 5000
//! jitter_factor = 0.2
//! ```
//!
//! Files ending in `.json` are read as JSON; anything else as TOML.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult, ErrorKind};
use crate::resilience::backoff::{
    BackoffStrategy, DEFAULT_INITIAL_DELAY, DEFAULT_JITTER_FACTOR, DEFAULT_MAX_DELAY,
    DEFAULT_MULTIPLIER,
};
use crate::resilience::retry::DEFAULT_MAX_ATTEMPTS;
use crate::resilience::{CircuitBreakerConfig, RetryPolicy};
use crate::utils::duration_millis;

/// Serialized form of a [`BackoffStrategy`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffConfig {
    Fixed {
        #[serde(rename = "delay_ms", with = "duration_millis")]
        delay: Duration,
    },
    Linear {
        #[serde(rename = "increment_ms", with = "duration_millis")]
        increment: Duration,
        #[serde(rename = "max_delay_ms", with = "duration_millis", default = "default_max_delay")]
        max_delay: Duration,
    },
    Exponential {
        #[serde(
            rename = "initial_delay_ms",
            with = "duration_millis",
            default = "default_initial_delay"
        )]
        initial_delay: Duration,
        #[serde(default = "default_multiplier")]
        multiplier: f64,
        #[serde(rename = "max_delay_ms", with = "duration_millis", default = "default_max_delay")]
        max_delay: Duration,
    },
    JitteredExponential {
        #[serde(
            rename = "initial_delay_ms",
            with = "duration_millis",
            default = "default_initial_delay"
        )]
        initial_delay: Duration,
        #[serde(default = "default_multiplier")]
        multiplier: f64,
        #[serde(rename = "max_delay_ms", with = "duration_millis", default = "default_max_delay")]
        max_delay: Duration,
        #[serde(default = "default_jitter_factor")]
        jitter_factor: f64,
    },
}

fn default_initial_delay() -> Duration {
    DEFAULT_INITIAL_DELAY
}

fn default_max_delay() -> Duration {
    DEFAULT_MAX_DELAY
}

fn default_multiplier() -> f64 {
    DEFAULT_MULTIPLIER
}

fn default_jitter_factor() -> f64 {
    DEFAULT_JITTER_FACTOR
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig::Exponential {
            initial_delay: DEFAULT_INITIAL_DELAY,
            multiplier: DEFAULT_MULTIPLIER,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl From<&BackoffConfig> for BackoffStrategy {
    fn from(config: &BackoffConfig) -> Self {
        match *config {
            BackoffConfig::Fixed { delay } => BackoffStrategy::fixed(delay),
            BackoffConfig::Linear { increment, max_delay } => {
                BackoffStrategy::linear_capped(increment, max_delay)
            }
            BackoffConfig::Exponential { initial_delay, multiplier, max_delay } => {
                BackoffStrategy::exponential_with(initial_delay, multiplier, max_delay)
            }
            BackoffConfig::JitteredExponential {
                initial_delay,
                multiplier,
                max_delay,
                jitter_factor,
            } => BackoffStrategy::jittered_with(initial_delay, multiplier, max_delay, jitter_factor),
        }
    }
}

impl From<&BackoffStrategy> for BackoffConfig {
    fn from(strategy: &BackoffStrategy) -> Self {
        match *strategy {
            BackoffStrategy::Fixed(delay) => BackoffConfig::Fixed { delay },
            BackoffStrategy::Linear { increment, max_delay } => {
                BackoffConfig::Linear { increment, max_delay }
            }
            BackoffStrategy::Exponential { initial_delay, multiplier, max_delay } => {
                BackoffConfig::Exponential { initial_delay, multiplier, max_delay }
            }
            BackoffStrategy::JitteredExponential {
                initial_delay,
                multiplier,
                max_delay,
                jitter_factor,
            } => BackoffConfig::JitteredExponential {
                initial_delay,
                multiplier,
                max_delay,
                jitter_factor,
            },
        }
    }
}

/// Serialized form of a [`RetryPolicy`]
///
/// An empty `retry_on` list retries every error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub backoff: BackoffConfig,
    pub retry_on: Vec<ErrorKind>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffConfig::default(),
            retry_on: Vec::new(),
        }
    }
}

impl RetrySettings {
    pub fn backoff_strategy(&self) -> BackoffStrategy {
        BackoffStrategy::from(&self.backoff)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("retry.max_attempts must be greater than 0"));
        }
        self.backoff_strategy().validate()
    }

    /// Build a retry policy for errors of type `E`
    pub fn into_policy<E>(&self) -> ConfigResult<RetryPolicy<E>> {
        self.validate()?;
        let policy = RetryPolicy::new()
            .with_max_attempts(self.max_attempts)
            .with_backoff(self.backoff_strategy());
        Ok(self.retry_on.iter().fold(policy, |policy, kind| policy.retry_on(*kind)))
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShieldConfig {
    /// Settings for breakers created on demand
    pub default_breaker: CircuitBreakerConfig,
    /// Breakers registered up front
    pub breakers: Vec<CircuitBreakerConfig>,
    /// Shared retry policy, if any
    pub retry: Option<RetrySettings>,
}

impl ShieldConfig {
    /// Parse and validate TOML
    pub fn from_toml_str(contents: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| ConfigError::Parse { format: "TOML", message: e.to_string() })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate JSON
    pub fn from_json_str(contents: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(contents)
            .map_err(|e| ConfigError::Parse { format: "JSON", message: e.to_string() })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file, choosing the format by extension
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "Loading resilience configuration from file");

        let contents = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&contents),
            _ => Self::from_toml_str(&contents),
        }
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> ConfigResult<String> {
        toml::to_string(self)
            .map_err(|e| ConfigError::Parse { format: "TOML", message: e.to_string() })
    }

    /// Check every breaker and the retry settings
    ///
    /// Breaker names must be unique.
    pub fn validate(&self) -> ConfigResult<()> {
        self.default_breaker.validate()?;

        let mut seen = HashSet::new();
        for breaker in &self.breakers {
            breaker.validate()?;
            if !seen.insert(breaker.name.as_str()) {
                return Err(ConfigError::invalid(format!(
                    "circuit breaker '{}' is configured more than once",
                    breaker.name
                )));
            }
        }

        if let Some(retry) = &self.retry {
            retry.validate()?;
        }
        Ok(())
    }

    /// Configuration of the breaker called `name`, if listed
    pub fn breaker(&self, name: &str) -> Option<&CircuitBreakerConfig> {
        self.breakers.iter().find(|breaker| breaker.name == name)
    }
}
