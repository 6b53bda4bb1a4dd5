//! Thread-safe registry of named circuit breakers
//!
//! The registry is an explicit object created once and shared by reference
//! (usually behind an `Arc`) with every [`Circuit`](super::Circuit). Lookups
//! are get-or-create: the first reference to a name creates its breaker and
//! every later reference receives a handle to the same state. Configuration
//! passed for a name that already exists is ignored.
//!
//! # Examples
//!
//! ```rust
//! use std::time::Duration;
//!
//! use shield::resilience::CircuitBreakerRegistry;
//!
//! let registry = CircuitBreakerRegistry::new();
//! let first = registry.create("billing", 3, Duration::from_secs(30)).unwrap();
//! let second = registry.create("billing", 10, Duration::from_secs(1)).unwrap();
//!
//! assert!(first.shares_state_with(&second));
//! assert_eq!(second.config().failure_threshold, 3);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::debug;

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
#[cfg(feature = "config")]
use crate::config::ShieldConfig;
use crate::error::ConfigResult;
use crate::time::{Clock, SystemClock};

/// Named breakers sharing one clock
pub struct CircuitBreakerRegistry {
    breakers: RwLock<HashMap<String, CircuitBreaker>>,
    default_config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("breakers", &self.names())
            .field("default_config", &self.default_config)
            .finish_non_exhaustive()
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreakerRegistry {
    /// Empty registry on the system clock with default breaker settings
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    /// Empty registry whose breakers read time from `clock`
    pub fn with_clock<C: Clock>(clock: C) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            default_config: CircuitBreakerConfig::default(),
            clock: Arc::new(clock),
        }
    }

    /// Settings for breakers created on demand by [`get`](Self::get)
    ///
    /// The name in `config` is replaced by the requested name.
    pub fn with_default_config(mut self, config: CircuitBreakerConfig) -> ConfigResult<Self> {
        config.validate()?;
        self.default_config = config;
        Ok(self)
    }

    pub fn default_config(&self) -> &CircuitBreakerConfig {
        &self.default_config
    }

    /// Get or create the breaker called `name`
    ///
    /// Parameters are validated and applied only when the name is new.
    pub fn create(
        &self,
        name: &str,
        failure_threshold: u64,
        timeout: Duration,
    ) -> ConfigResult<CircuitBreaker> {
        self.create_from_config(CircuitBreakerConfig::new(name, failure_threshold, timeout))
    }

    /// Get or create the breaker named by `config.name`
    pub fn create_from_config(&self, config: CircuitBreakerConfig) -> ConfigResult<CircuitBreaker> {
        if let Some(existing) = self.lookup(&config.name) {
            return Ok(existing);
        }
        config.validate()?;

        let mut breakers = self.breakers.write();
        let breaker = breakers
            .entry(config.name.clone())
            .or_insert_with(|| {
                debug!(
                    breaker = %config.name,
                    failure_threshold = config.failure_threshold,
                    timeout = ?config.timeout,
                    "Registered circuit breaker"
                );
                CircuitBreaker::from_parts(config, Arc::clone(&self.clock))
            })
            .clone();
        Ok(breaker)
    }

    /// Get the breaker called `name`, creating it with the default settings
    pub fn get(&self, name: &str) -> CircuitBreaker {
        if let Some(existing) = self.lookup(name) {
            return existing;
        }

        let mut breakers = self.breakers.write();
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(breaker = %name, "Created circuit breaker with default settings");
                CircuitBreaker::from_parts(
                    self.default_config.renamed(name),
                    Arc::clone(&self.clock),
                )
            })
            .clone()
    }

    /// Existing breaker called `name`, without creating one
    pub fn lookup(&self, name: &str) -> Option<CircuitBreaker> {
        self.breakers.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.breakers.read().contains_key(name)
    }

    /// Registered names in sorted order
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.breakers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.read().is_empty()
    }

    /// Forget the breaker called `name`
    ///
    /// Outstanding handles keep working on the detached state; the next
    /// lookup of the name starts fresh.
    pub fn remove(&self, name: &str) -> Option<CircuitBreaker> {
        self.breakers.write().remove(name)
    }

    /// Forget every breaker
    pub fn clear(&self) {
        let mut breakers = self.breakers.write();
        debug!(count = breakers.len(), "Clearing circuit breaker registry");
        breakers.clear();
    }

    /// Admission check for a registered breaker; unknown names are denied
    pub fn admit(&self, name: &str) -> bool {
        self.lookup(name).is_some_and(|breaker| breaker.admit())
    }

    /// Record a success on a registered breaker; unknown names are ignored
    pub fn record_success(&self, name: &str) {
        if let Some(breaker) = self.lookup(name) {
            breaker.record_success();
        }
    }

    /// Record a failure on a registered breaker; unknown names are ignored
    pub fn record_failure(&self, name: &str) {
        if let Some(breaker) = self.lookup(name) {
            breaker.record_failure();
        }
    }
}

#[cfg(feature = "config")]
impl CircuitBreakerRegistry {
    /// Registry on the system clock pre-populated from `config`
    pub fn from_config(config: &ShieldConfig) -> ConfigResult<Self> {
        Self::from_config_with_clock(config, SystemClock)
    }

    /// Registry on `clock` pre-populated from `config`
    ///
    /// Every listed breaker is registered up front and `default_breaker`
    /// applies to names created later by [`get`](Self::get).
    pub fn from_config_with_clock<C: Clock>(config: &ShieldConfig, clock: C) -> ConfigResult<Self> {
        let registry = Self::with_clock(clock).with_default_config(config.default_breaker.clone())?;
        for breaker in &config.breakers {
            registry.create_from_config(breaker.clone())?;
        }
        Ok(registry)
    }
}
