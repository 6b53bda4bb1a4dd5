//! Named circuit breaker state machine
//!
//! A breaker counts consecutive failures of the calls it guards. Once the
//! count reaches the configured threshold it opens and denies admission until
//! the recovery timeout has passed since the last failure. The first admission
//! after that moves it to half-open; a success there closes it again and any
//! failure re-opens it.
//!
//! The failure count is not reset on entering half-open, so it is still at or
//! above the threshold and a single probe failure is enough to re-open.
//!
//! [`CircuitBreaker`] is a cheap handle. Clones share one state cell guarded
//! by a mutex, which makes admission and recording linearizable across
//! threads. Breakers are normally obtained from a
//! [`CircuitBreakerRegistry`](super::CircuitBreakerRegistry) so every call site
//! using a name shares one state.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::time::{Clock, SystemClock};

/// Failures tolerated before opening when none is configured
pub const DEFAULT_FAILURE_THRESHOLD: u64 = 5;
/// Recovery timeout used when none is configured
pub const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(60);
/// Name of a breaker built from the default configuration
pub const DEFAULT_BREAKER_NAME: &str = "default";

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(rename_all = "snake_case"))]
pub enum CircuitState {
    /// Calls are admitted
    Closed,
    /// Calls are denied until the recovery timeout passes
    Open,
    /// Trial calls are admitted to probe recovery
    HalfOpen,
}

crate::impl_tag_conversions!(CircuitState {
    Closed => "closed",
    Open => "open",
    HalfOpen => "half_open",
});

/// Configuration for one named breaker
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct CircuitBreakerConfig {
    /// Identity shared by every call site using this breaker
    pub name: String,
    /// Consecutive failures before the breaker opens
    pub failure_threshold: u64,
    /// Time after the last failure before a trial call is admitted
    #[cfg_attr(
        feature = "config",
        serde(rename = "timeout_ms", with = "crate::utils::duration_millis")
    )]
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_BREAKER_NAME.to_string(),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            timeout: DEFAULT_RECOVERY_TIMEOUT,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(name: impl Into<String>, failure_threshold: u64, timeout: Duration) -> Self {
        Self { name: name.into(), failure_threshold, timeout }
    }

    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Copy of this configuration under another name
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self { name: name.into(), ..self.clone() }
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::invalid("circuit breaker name must not be empty"));
        }

        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid(format!(
                "failure_threshold for '{}' must be greater than 0",
                self.name
            )));
        }

        Ok(())
    }
}

/// Builder for [`CircuitBreakerConfig`]
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn failure_threshold(mut self, threshold: u64) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Point-in-time view of a breaker for monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerMetrics {
    /// Registry name of the breaker
    pub name: String,
    /// State at the time of the snapshot
    pub state: CircuitState,
    /// Failures recorded since the last success or reset
    pub failure_count: u64,
    /// Failures that open the breaker
    pub failure_threshold: u64,
    /// When the most recent failure was recorded, if any
    pub last_failure_time: Option<Instant>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u64,
    last_failure_time: Option<Instant>,
}

impl BreakerState {
    const fn closed() -> Self {
        Self { state: CircuitState::Closed, failure_count: 0, last_failure_time: None }
    }
}

struct BreakerCell {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
    clock: Arc<dyn Clock>,
}

/// Shared handle to one breaker's state
#[derive(Clone)]
pub struct CircuitBreaker {
    cell: Arc<BreakerCell>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.cell.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("config", &self.cell.config)
            .field("state", &inner.state)
            .field("failure_count", &inner.failure_count)
            .finish()
    }
}

impl CircuitBreaker {
    /// Standalone breaker reading the system clock
    pub fn new(config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Standalone breaker reading time from `clock`
    pub fn with_clock(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self::from_parts(config, clock))
    }

    pub(crate) fn from_parts(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            cell: Arc::new(BreakerCell { config, inner: Mutex::new(BreakerState::closed()), clock }),
        }
    }

    pub fn name(&self) -> &str {
        &self.cell.config.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.cell.config
    }

    pub fn state(&self) -> CircuitState {
        self.cell.inner.lock().state
    }

    pub fn failure_count(&self) -> u64 {
        self.cell.inner.lock().failure_count
    }

    pub fn last_failure_time(&self) -> Option<Instant> {
        self.cell.inner.lock().last_failure_time
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.cell.inner.lock();
        CircuitBreakerMetrics {
            name: self.cell.config.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            failure_threshold: self.cell.config.failure_threshold,
            last_failure_time: inner.last_failure_time,
        }
    }

    /// Whether both handles refer to the same breaker state
    pub fn shares_state_with(&self, other: &CircuitBreaker) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    /// Non-mutating peek: `false` only while open
    ///
    /// Unlike [`admit`](Self::admit) this never moves an open breaker to
    /// half-open, even once the timeout has passed.
    pub fn is_available(&self) -> bool {
        self.state() != CircuitState::Open
    }

    /// Decide whether a call may proceed
    ///
    /// An open breaker whose timeout has strictly elapsed since the last
    /// failure moves to half-open and admits the call. Concurrent callers see
    /// exactly one such transition.
    pub fn admit(&self) -> bool {
        let mut inner = self.cell.inner.lock();
        if inner.state != CircuitState::Open {
            return true;
        }

        let now = self.cell.clock.now();
        let cooled_down = inner.last_failure_time.map_or(true, |last| {
            now.saturating_duration_since(last) > self.cell.config.timeout
        });

        if cooled_down {
            inner.state = CircuitState::HalfOpen;
            info!(breaker = %self.name(), "Circuit breaker half-open, admitting trial call");
            true
        } else {
            debug!(
                breaker = %self.name(),
                failure_count = inner.failure_count,
                "Circuit breaker rejecting call"
            );
            false
        }
    }

    /// Record a successful call: clear failures and close a half-open breaker
    pub fn record_success(&self) {
        let mut inner = self.cell.inner.lock();
        inner.failure_count = 0;

        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Closed;
            info!(breaker = %self.name(), "Circuit breaker closed after successful trial call");
        }
    }

    /// Record a failed call, opening the breaker at the threshold
    pub fn record_failure(&self) {
        let mut inner = self.cell.inner.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_time = Some(self.cell.clock.now());

        if inner.failure_count >= self.cell.config.failure_threshold
            && inner.state != CircuitState::Open
        {
            let previous = inner.state;
            inner.state = CircuitState::Open;
            warn!(
                breaker = %self.name(),
                from = %previous,
                "Circuit breaker opened after {} failures",
                inner.failure_count
            );
        }
    }

    /// Force the breaker closed with no recorded failures
    pub fn reset(&self) {
        let mut inner = self.cell.inner.lock();
        *inner = BreakerState::closed();
        info!(breaker = %self.name(), "Circuit breaker manually reset to closed state");
    }
}
