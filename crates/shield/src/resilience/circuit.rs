//! Guarded calls composing a breaker, retries and a fallback
//!
//! A [`Circuit`] wraps one named [`CircuitBreaker`] with an optional
//! [`RetryPolicy`] and an optional [`FallbackPolicy`]. Each call to
//! [`Circuit::run`] asks the breaker for admission once, then either
//! delegates to the retry loop (recording every attempt on the breaker) or
//! runs the operation a single time.
//!
//! The circuit's own fallback always wins: attaching one binds it into the
//! retry policy, replacing whatever fallback the retry policy carried. A
//! retry policy's fallback is only used when the circuit has none.
//!
//! # Examples
//!
//! ```rust
//! use std::time::Duration;
//!
//! use shield::error::OperationError;
//! use shield::resilience::{Circuit, CircuitBreakerRegistry, FallbackPolicy, RetryPolicy};
//!
//! let registry = CircuitBreakerRegistry::new();
//! registry.create("pricing", 3, Duration::from_secs(30)).unwrap();
//!
//! let circuit = Circuit::new(&registry, "pricing")
//!     .with_retry(RetryPolicy::new().with_max_attempts(2).with_fixed_backoff(Duration::ZERO))
//!     .with_fallback(FallbackPolicy::with_value(0_u64));
//!
//! let price = circuit.run(|| Err::<u64, _>(OperationError::transient("quote service down")));
//! assert_eq!(price.ok(), Some(0));
//! assert_eq!(registry.get("pricing").failure_count(), 2);
//! ```

use std::fmt;

use tracing::{debug, instrument};

use super::circuit_breaker::CircuitBreaker;
use super::fallback::{recover, FallbackPolicy, FallbackValue};
use super::registry::CircuitBreakerRegistry;
use super::retry::RetryPolicy;
use crate::error::{ErrorClassification, ErrorKind, ResilienceError, ResilienceResult};

/// A breaker with optional retry and fallback policies
pub struct Circuit<E> {
    breaker: CircuitBreaker,
    retry: Option<RetryPolicy<E>>,
    fallback: Option<FallbackPolicy>,
}

impl<E> Clone for Circuit<E> {
    fn clone(&self) -> Self {
        Self {
            breaker: self.breaker.clone(),
            retry: self.retry.clone(),
            fallback: self.fallback.clone(),
        }
    }
}

impl<E> fmt::Debug for Circuit<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Circuit")
            .field("breaker", &self.breaker)
            .field("retry", &self.retry)
            .field("fallback", &self.fallback)
            .finish()
    }
}

impl<E> Circuit<E> {
    /// Circuit over the breaker called `name`, created on demand
    pub fn new(registry: &CircuitBreakerRegistry, name: &str) -> Self {
        Self::from_breaker(registry.get(name))
    }

    pub fn from_breaker(breaker: CircuitBreaker) -> Self {
        Self { breaker, retry: None, fallback: None }
    }

    /// Retry admitted calls with `policy`
    ///
    /// The circuit's fallback, if any, replaces the policy's own.
    pub fn with_retry(mut self, mut policy: RetryPolicy<E>) -> Self {
        match &self.fallback {
            Some(fallback) => policy.set_fallback(Some(fallback.clone())),
            None => self.fallback = policy.fallback().cloned(),
        }
        self.retry = Some(policy);
        self
    }

    /// Substitute results on denial or failure with `fallback`
    pub fn with_fallback(mut self, fallback: FallbackPolicy) -> Self {
        if let Some(retry) = &mut self.retry {
            retry.set_fallback(Some(fallback.clone()));
        }
        self.fallback = Some(fallback);
        self
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn name(&self) -> &str {
        self.breaker.name()
    }

    pub fn retry_policy(&self) -> Option<&RetryPolicy<E>> {
        self.retry.as_ref()
    }

    /// The effective fallback used on denial and failure
    pub fn fallback_policy(&self) -> Option<&FallbackPolicy> {
        self.fallback.as_ref()
    }
}

impl<E> Circuit<E>
where
    E: std::error::Error + ErrorClassification + Send + Sync + 'static,
{
    /// Run `operation` under the breaker, treating every error as a failure
    ///
    /// # Errors
    ///
    /// - [`ResilienceError::CircuitOpen`] when admission is denied and no
    ///   fallback produced a value; `operation` is not invoked
    /// - [`ResilienceError::Fallback`] when the fallback refuses
    /// - [`ResilienceError::OperationFailed`] with the operation's last error
    ///   when no fallback produced a value
    pub fn run<T, F>(&self, operation: F) -> ResilienceResult<T, E>
    where
        T: FallbackValue,
        F: FnMut() -> Result<T, E>,
    {
        self.guard(operation, |_| true)
    }

    /// Run `operation` under the breaker, handling only errors of `kind`
    ///
    /// Errors of any other kind propagate on first occurrence without being
    /// retried, recorded on the breaker or replaced by the fallback.
    pub fn run_expecting<T, F>(&self, kind: ErrorKind, operation: F) -> ResilienceResult<T, E>
    where
        T: FallbackValue,
        F: FnMut() -> Result<T, E>,
    {
        self.guard(operation, move |error: &E| error.kind() == kind)
    }

    #[instrument(skip(self, operation, expected), fields(breaker = %self.breaker.name()))]
    fn guard<T, F, X>(&self, mut operation: F, expected: X) -> ResilienceResult<T, E>
    where
        T: FallbackValue,
        F: FnMut() -> Result<T, E>,
        X: Fn(&E) -> bool,
    {
        if !self.breaker.admit() {
            return self.on_rejected();
        }

        if let Some(retry) = &self.retry {
            let breaker = &self.breaker;
            let attempt = || match operation() {
                Ok(value) => {
                    breaker.record_success();
                    Ok(value)
                }
                Err(error) => {
                    if expected(&error) {
                        breaker.record_failure();
                    }
                    Err(error)
                }
            };
            return retry.run_intercepting(attempt, &expected);
        }

        match operation() {
            Ok(value) => {
                self.breaker.record_success();
                Ok(value)
            }
            Err(error) if expected(&error) => {
                self.breaker.record_failure();
                recover(self.fallback.as_ref(), error)
            }
            Err(error) => Err(ResilienceError::OperationFailed { source: error }),
        }
    }

    fn on_rejected<T: FallbackValue>(&self) -> ResilienceResult<T, E> {
        let open = || ResilienceError::CircuitOpen { name: self.breaker.name().to_string() };
        let Some(fallback) = &self.fallback else {
            debug!("Circuit open with no fallback bound");
            return Err(open());
        };

        match fallback.resolve::<T>()? {
            Some(value) => {
                debug!(kind = %fallback.kind(), "Circuit open, substituted fallback value");
                Ok(value)
            }
            None => Err(open()),
        }
    }
}
