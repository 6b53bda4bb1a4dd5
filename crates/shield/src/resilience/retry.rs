//! Retry policy with pluggable backoff and error filtering
//!
//! [`RetryPolicy`] drives a bounded attempt loop on the calling thread. After
//! each failed attempt it decides whether the error is eligible for another
//! try, asks its [`BackoffStrategy`] for the delay and blocks for that long.
//! When retrying stops, a bound [`FallbackPolicy`] may substitute the result;
//! otherwise the last operation error propagates unchanged.
//!
//! Eligibility is decided, in order of precedence, by a custom predicate, an
//! allow-list of [`ErrorKind`]s, or "retry on all".
//!
//! # Examples
//!
//! ```rust
//! use std::time::Duration;
//!
//! use shield::error::{ErrorKind, OperationError};
//! use shield::resilience::RetryPolicy;
//!
//! let policy = RetryPolicy::<OperationError>::new()
//!     .with_max_attempts(4)
//!     .with_fixed_backoff(Duration::from_millis(1))
//!     .retry_on(ErrorKind::Transient);
//!
//! let mut calls = 0;
//! let value = policy.run(|| {
//!     calls += 1;
//!     if calls < 3 {
//!         Err(OperationError::transient("connection reset"))
//!     } else {
//!         Ok(calls)
//!     }
//! });
//! assert_eq!(value.ok(), Some(3));
//! ```

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use super::backoff::{BackoffStrategy, DEFAULT_MAX_DELAY, DEFAULT_MULTIPLIER};
use super::fallback::{recover, FallbackPolicy, FallbackValue};
use crate::error::{ConfigResult, ErrorClassification, ErrorKind, ResilienceError, ResilienceResult};

/// Attempts made when none is configured
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Observer invoked before each retry with `(error, attempt, delay)`
pub type RetryCallback<E> = Arc<dyn Fn(&E, u32, Duration) + Send + Sync>;

/// Custom eligibility check taking `(error, attempt)`
pub type RetryPredicate<E> = Arc<dyn Fn(&E, u32) -> bool + Send + Sync>;

/// Bounded retry loop over a backoff strategy
pub struct RetryPolicy<E> {
    max_attempts: u32,
    backoff: BackoffStrategy,
    retry_all: bool,
    retry_on: Vec<ErrorKind>,
    predicate: Option<RetryPredicate<E>>,
    on_retry: Option<RetryCallback<E>>,
    fallback: Option<FallbackPolicy>,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            backoff: self.backoff.clone(),
            retry_all: self.retry_all,
            retry_on: self.retry_on.clone(),
            predicate: self.predicate.clone(),
            on_retry: self.on_retry.clone(),
            fallback: self.fallback.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("retry_all", &self.retry_all)
            .field("retry_on", &self.retry_on)
            .field("has_predicate", &self.predicate.is_some())
            .field("has_on_retry", &self.on_retry.is_some())
            .field("fallback", &self.fallback)
            .finish()
    }
}

impl<E> Default for RetryPolicy<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> RetryPolicy<E> {
    /// Three attempts, exponential backoff from 100 ms, retry on every error
    pub fn new() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: BackoffStrategy::default(),
            retry_all: true,
            retry_on: Vec::new(),
            predicate: None,
            on_retry: None,
            fallback: None,
        }
    }

    /// Exponential backoff doubling from `initial_delay`
    pub fn exponential(max_attempts: u32, initial_delay: Duration) -> Self {
        Self::new().with_max_attempts(max_attempts).with_exponential_backoff(
            initial_delay,
            DEFAULT_MULTIPLIER,
            DEFAULT_MAX_DELAY,
        )
    }

    /// Jittered exponential backoff from `initial_delay` with default jitter
    pub fn jittered(max_attempts: u32, initial_delay: Duration) -> Self {
        Self::new()
            .with_max_attempts(max_attempts)
            .with_backoff(BackoffStrategy::jittered(initial_delay))
    }

    /// Total attempts including the first; values below 1 are raised to 1
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_fixed_backoff(self, delay: Duration) -> Self {
        self.with_backoff(BackoffStrategy::fixed(delay))
    }

    pub fn with_linear_backoff(self, increment: Duration, max_delay: Duration) -> Self {
        self.with_backoff(BackoffStrategy::linear_capped(increment, max_delay))
    }

    pub fn with_exponential_backoff(
        self,
        initial_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
    ) -> Self {
        self.with_backoff(BackoffStrategy::exponential_with(initial_delay, multiplier, max_delay))
    }

    pub fn with_jittered_backoff(
        self,
        initial_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
        jitter_factor: f64,
    ) -> Self {
        self.with_backoff(BackoffStrategy::jittered_with(
            initial_delay,
            multiplier,
            max_delay,
            jitter_factor,
        ))
    }

    /// Retry only errors of the listed kinds
    ///
    /// The first call turns off "retry on all"; later calls extend the list.
    pub fn retry_on(mut self, kind: ErrorKind) -> Self {
        self.retry_all = false;
        if !self.retry_on.contains(&kind) {
            self.retry_on.push(kind);
        }
        self
    }

    /// Go back to retrying every error, forgetting the allow-list
    pub fn retry_on_all(mut self) -> Self {
        self.retry_all = true;
        self.retry_on.clear();
        self
    }

    /// Decide eligibility with `predicate(error, attempt)`
    ///
    /// Takes precedence over the allow-list.
    pub fn retry_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&E, u32) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Observe each retry before its delay
    pub fn on_retry<C>(mut self, callback: C) -> Self
    where
        C: Fn(&E, u32, Duration) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(callback));
        self
    }

    /// Substitute the result once retrying stops
    pub fn with_fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub(crate) fn set_fallback(&mut self, fallback: Option<FallbackPolicy>) {
        self.fallback = fallback;
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> &BackoffStrategy {
        &self.backoff
    }

    pub fn fallback(&self) -> Option<&FallbackPolicy> {
        self.fallback.as_ref()
    }

    /// Kinds on the allow-list; empty when retrying on all errors
    pub fn retry_kinds(&self) -> &[ErrorKind] {
        &self.retry_on
    }

    /// Check the backoff parameters
    ///
    /// `max_attempts` needs no check since the builder never stores 0.
    pub fn validate(&self) -> ConfigResult<()> {
        self.backoff.validate()
    }
}

impl<E> RetryPolicy<E>
where
    E: std::error::Error + ErrorClassification + Send + Sync + 'static,
{
    /// Run `operation` until it succeeds or retrying stops
    ///
    /// # Errors
    ///
    /// - [`ResilienceError::OperationFailed`] with the last error when retrying
    ///   stops and no fallback produced a value
    /// - [`ResilienceError::Fallback`] when the bound fallback refuses
    #[instrument(skip(self, operation), fields(max_attempts = self.max_attempts))]
    pub fn run<T, F>(&self, operation: F) -> ResilienceResult<T, E>
    where
        T: FallbackValue,
        F: FnMut() -> Result<T, E>,
    {
        self.run_intercepting(operation, |_| true)
    }

    /// Retry loop that only handles errors accepted by `intercept`
    ///
    /// Other errors propagate on first occurrence without fallback.
    pub(crate) fn run_intercepting<T, F, I>(
        &self,
        mut operation: F,
        intercept: I,
    ) -> ResilienceResult<T, E>
    where
        T: FallbackValue,
        F: FnMut() -> Result<T, E>,
        I: Fn(&E) -> bool,
    {
        let mut attempt: u32 = 1;

        loop {
            debug!("Executing operation (attempt {}/{})", attempt, self.max_attempts);

            let error = match operation() {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("Operation succeeded after {} retries", attempt - 1);
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !intercept(&error) {
                debug!(kind = %error.kind(), "Error outside the intercepted kind, propagating");
                return Err(ResilienceError::operation(error));
            }

            if attempt >= self.max_attempts {
                warn!("All retry attempts exhausted after {} tries, last error: {}", attempt, error);
                return self.settle(error);
            }

            if !self.should_retry(&error, attempt) {
                debug!(kind = %error.kind(), "Retry policy determined not to retry: {}", error);
                return self.settle(error);
            }

            let delay = self.backoff.calculate_delay(attempt);
            if let Some(callback) = &self.on_retry {
                callback(&error, attempt, delay);
            }
            warn!("Operation failed (attempt {}), retrying after {:?}", attempt, delay);
            thread::sleep(delay);
            attempt += 1;
        }
    }

    fn should_retry(&self, error: &E, attempt: u32) -> bool {
        if let Some(predicate) = &self.predicate {
            return predicate(error, attempt);
        }
        self.retry_all || self.retry_on.contains(&error.kind())
    }

    fn settle<T: FallbackValue>(&self, error: E) -> ResilienceResult<T, E> {
        recover(self.fallback.as_ref(), error)
    }
}

/// Retry `operation` up to `max_attempts` times, doubling the delay from
/// `initial_delay`
pub fn retry<T, E, F>(max_attempts: u32, initial_delay: Duration, operation: F) -> ResilienceResult<T, E>
where
    T: FallbackValue,
    E: std::error::Error + ErrorClassification + Send + Sync + 'static,
    F: FnMut() -> Result<T, E>,
{
    RetryPolicy::exponential(max_attempts, initial_delay).run(operation)
}

#[cfg(test)]
mod tests {
    //! Unit tests for the retry policy
    //!
    //! Tests cover attempt counting, backoff delays, filter precedence,
    //! callbacks, fallback resolution on exhaustion and cloning.

    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    use parking_lot::Mutex;

    use super::*;
    use crate::error::{FallbackError, OperationError};

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    fn quick_policy(max_attempts: u32) -> RetryPolicy<OperationError> {
        RetryPolicy::new().with_max_attempts(max_attempts).with_fixed_backoff(ms(1))
    }

    // =========================================================================
    // Attempt loop
    // =========================================================================

    /// A successful first attempt returns immediately.
    #[test]
    fn test_success_first_attempt() {
        let mut calls = 0;
        let result = quick_policy(3).run(|| {
            calls += 1;
            Ok::<_, OperationError>(42)
        });

        assert_eq!(result.ok(), Some(42));
        assert_eq!(calls, 1);
    }

    /// Failing twice then succeeding takes three invocations and both delays.
    #[test]
    fn test_success_after_retries() {
        let policy = RetryPolicy::new().with_max_attempts(5).with_fixed_backoff(ms(10));
        let mut calls = 0;
        let start = Instant::now();

        let result = policy.run(|| {
            calls += 1;
            if calls <= 2 {
                Err(OperationError::transient("flaky"))
            } else {
                Ok("ready".to_string())
            }
        });

        assert_eq!(result.ok().as_deref(), Some("ready"));
        assert_eq!(calls, 3);
        assert!(start.elapsed() >= ms(20), "two fixed delays should elapse");
    }

    /// Exhaustion without a fallback propagates the last error verbatim.
    #[test]
    fn test_exhaustion_propagates_last_error() {
        let mut calls = 0;
        let result: ResilienceResult<u32, _> = quick_policy(3).run(|| {
            calls += 1;
            Err(OperationError::transient(format!("failure {calls}")))
        });

        assert_eq!(calls, 3);
        let error = result.expect_err("all attempts fail").into_operation_error();
        assert_eq!(error, Some(OperationError::transient("failure 3")));
    }

    /// A single attempt never sleeps or retries.
    #[test]
    fn test_single_attempt() {
        let mut calls = 0;
        let policy = RetryPolicy::new().with_max_attempts(1).with_fixed_backoff(Duration::from_secs(5));
        let start = Instant::now();

        let result: ResilienceResult<(), _> = policy.run(|| {
            calls += 1;
            Err(OperationError::transient("down"))
        });

        assert!(result.is_err());
        assert_eq!(calls, 1);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    /// Zero attempts are raised to one, so the operation still runs once.
    #[test]
    fn test_max_attempts_floor() {
        let policy = RetryPolicy::<OperationError>::new()
            .with_max_attempts(0)
            .with_fixed_backoff(Duration::ZERO);
        assert_eq!(policy.max_attempts(), 1);
        assert!(policy.validate().is_ok());

        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy.run(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(OperationError::transient("down"))
        });
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// An unvalidated infinite jitter factor still retries without panicking.
    #[test]
    fn test_infinite_jitter_runs_to_exhaustion() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new()
            .with_max_attempts(2)
            .with_jittered_backoff(ms(1), 2.0, ms(5), f64::INFINITY);

        let result: Result<(), _> = policy.run(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(OperationError::transient("down"))
        });

        assert!(result.expect_err("exhausted").operation_error().is_some());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    /// An unusable jitter factor fails validation instead of slipping through.
    #[test]
    fn test_validate_jitter_factor() {
        let policy = RetryPolicy::<OperationError>::new()
            .with_jittered_backoff(ms(1), 2.0, ms(5), f64::INFINITY);
        assert!(policy.validate().is_err());
    }

    // =========================================================================
    // Filtering
    // =========================================================================

    /// Errors outside the allow-list propagate on first occurrence.
    #[test]
    fn test_allow_list_rejects_other_kinds() {
        let policy = quick_policy(5).retry_on(ErrorKind::Transient);
        let mut calls = 0;

        let result: ResilienceResult<(), _> = policy.run(|| {
            calls += 1;
            Err(OperationError::invalid_input("bad request"))
        });

        assert_eq!(calls, 1);
        assert_eq!(
            result.expect_err("non-retryable").into_operation_error(),
            Some(OperationError::invalid_input("bad request"))
        );
    }

    /// Allow-listed kinds are retried.
    #[test]
    fn test_allow_list_accepts_listed_kinds() {
        let policy = quick_policy(4).retry_on(ErrorKind::Transient).retry_on(ErrorKind::Timeout);
        let mut calls = 0;

        let result = policy.run(|| {
            calls += 1;
            match calls {
                1 => Err(OperationError::transient("reset")),
                2 => Err(OperationError::timeout("slow")),
                _ => Ok(calls),
            }
        });

        assert_eq!(result.ok(), Some(3));
        assert_eq!(policy.retry_kinds(), &[ErrorKind::Transient, ErrorKind::Timeout]);
    }

    /// Resetting to "retry on all" clears the allow-list.
    #[test]
    fn test_retry_on_all_resets_filter() {
        let policy = quick_policy(3).retry_on(ErrorKind::Timeout).retry_on_all();
        let mut calls = 0;

        let _: ResilienceResult<(), _> = policy.run(|| {
            calls += 1;
            Err(OperationError::invalid_input("still retried"))
        });

        assert_eq!(calls, 3);
        assert!(policy.retry_kinds().is_empty());
    }

    /// A predicate takes precedence over the allow-list.
    #[test]
    fn test_predicate_precedence() {
        let policy = quick_policy(5)
            .retry_on(ErrorKind::Transient)
            .retry_if(|error: &OperationError, attempt| {
                error.kind() == ErrorKind::InvalidInput && attempt < 3
            });
        let mut calls = 0;

        let _: ResilienceResult<(), _> = policy.run(|| {
            calls += 1;
            Err(OperationError::invalid_input("predicate decides"))
        });

        assert_eq!(calls, 3, "predicate allows attempts 1 and 2 to retry");
    }

    // =========================================================================
    // Callbacks
    // =========================================================================

    /// The callback observes each retry with its attempt and delay.
    #[test]
    fn test_on_retry_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let policy = RetryPolicy::new()
            .with_max_attempts(3)
            .with_linear_backoff(ms(1), ms(10))
            .on_retry(move |error: &OperationError, attempt, delay| {
                sink.lock().push((error.message().to_string(), attempt, delay));
            });

        let _: ResilienceResult<(), _> = policy.run(|| Err(OperationError::transient("again")));

        let seen = seen.lock();
        assert_eq!(
            *seen,
            vec![("again".to_string(), 1, ms(1)), ("again".to_string(), 2, ms(2))],
            "no callback after the final attempt"
        );
    }

    // =========================================================================
    // Fallback
    // =========================================================================

    /// Exhaustion resolves a bound fallback.
    #[test]
    fn test_fallback_on_exhaustion() {
        let policy = quick_policy(2).with_fallback(FallbackPolicy::with_value(-1_i64));
        let result = policy.run(|| Err(OperationError::transient("down")));
        assert_eq!(result.ok(), Some(-1_i64));
    }

    /// A non-retryable error also resolves the fallback.
    #[test]
    fn test_fallback_on_non_retryable() {
        let policy = quick_policy(5)
            .retry_on(ErrorKind::Timeout)
            .with_fallback(FallbackPolicy::with_default());
        let mut calls = 0;

        let result = policy.run(|| {
            calls += 1;
            Err::<String, _>(OperationError::invalid_input("bad"))
        });

        assert_eq!(result.ok(), Some(String::new()));
        assert_eq!(calls, 1);
    }

    /// A throwing fallback replaces the operation error with a refusal.
    #[test]
    fn test_throw_fallback_refuses() {
        let policy = quick_policy(2).with_fallback(FallbackPolicy::with_throw());
        let result: ResilienceResult<u8, _> = policy.run(|| Err(OperationError::transient("down")));

        assert!(matches!(result, Err(ResilienceError::Fallback(FallbackError::Refused))));
    }

    /// A fallback with no value for the type lets the operation error through.
    #[test]
    fn test_fallback_without_value_propagates_error() {
        let policy = quick_policy(2).with_fallback(FallbackPolicy::with_value("wrong type"));
        let result: ResilienceResult<u8, _> = policy.run(|| Err(OperationError::timeout("slow")));

        assert_eq!(
            result.expect_err("fallback type mismatch").into_operation_error(),
            Some(OperationError::timeout("slow"))
        );
    }

    // =========================================================================
    // Interception
    // =========================================================================

    /// Errors outside the intercepted kind skip retries and fallback.
    #[test]
    fn test_intercept_propagates_unexpected_errors() {
        let policy = quick_policy(5).with_fallback(FallbackPolicy::with_value(7_u8));
        let mut calls = 0;

        let result: ResilienceResult<u8, _> = policy.run_intercepting(
            || {
                calls += 1;
                Err(OperationError::invalid_input("not ours"))
            },
            |error| error.kind() == ErrorKind::Transient,
        );

        assert_eq!(calls, 1);
        assert!(result.expect_err("propagated").operation_error().is_some());
    }

    // =========================================================================
    // Construction
    // =========================================================================

    /// Defaults: three attempts, exponential from 100 ms.
    #[test]
    fn test_defaults() {
        let policy = RetryPolicy::<OperationError>::default();

        assert_eq!(policy.max_attempts(), DEFAULT_MAX_ATTEMPTS);
        assert_eq!(policy.backoff(), &BackoffStrategy::default());
        assert!(policy.fallback().is_none());
        assert!(policy.retry_kinds().is_empty());
    }

    /// Convenience constructors configure attempts and backoff.
    #[test]
    fn test_convenience_constructors() {
        let exponential = RetryPolicy::<OperationError>::exponential(4, ms(20));
        assert_eq!(exponential.max_attempts(), 4);
        assert_eq!(exponential.backoff().calculate_delay(3), ms(80));

        let jittered = RetryPolicy::<OperationError>::jittered(2, ms(20));
        assert!(matches!(jittered.backoff(), BackoffStrategy::JitteredExponential { .. }));
    }

    /// Clones own their configuration.
    #[test]
    fn test_clone_is_independent() {
        let original = quick_policy(3).retry_on(ErrorKind::Timeout);
        let modified = original.clone().with_max_attempts(9).with_fixed_backoff(ms(7));

        assert_eq!(original.max_attempts(), 3);
        assert_eq!(original.backoff(), &BackoffStrategy::fixed(ms(1)));
        assert_eq!(modified.max_attempts(), 9);
        assert_eq!(modified.retry_kinds(), &[ErrorKind::Timeout]);
    }

    /// Invalid backoff parameters fail validation.
    #[test]
    fn test_validate_backoff() {
        let policy = RetryPolicy::<OperationError>::new()
            .with_exponential_backoff(ms(10), -2.0, ms(100));
        assert!(policy.validate().is_err());
    }

    /// The free helper retries with doubling delays.
    #[test]
    fn test_retry_helper() {
        let calls = AtomicU32::new(0);
        let result = retry(3, ms(1), || {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(OperationError::transient("once"))
            } else {
                Ok(true)
            }
        });

        assert_eq!(result.ok(), Some(true));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
