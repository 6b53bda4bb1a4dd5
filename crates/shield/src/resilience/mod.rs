//! Resilience patterns for fault tolerance
//!
//! This module provides composable primitives that wrap a caller-supplied
//! operation:
//! - **[`backoff`]**: delay schedules between attempts (fixed, linear,
//!   exponential, jittered exponential)
//! - **[`retry`]**: a bounded, blocking retry loop with error filtering
//! - **[`fallback`]**: type-erased substitute results
//! - **[`circuit_breaker`]**: the per-name closed/open/half-open state machine
//! - **[`registry`]**: get-or-create storage for named breakers
//! - **[`circuit`]**: the orchestrator running one guarded call through all of
//!   the above
//!
//! Everything runs on the calling thread. Bounding how long an operation may
//! take is left to the caller; a timeout surfaces here as just another error
//! tagged [`ErrorKind::Timeout`](crate::error::ErrorKind::Timeout).
//!
//! ## Outcome precedence
//!
//! For one [`Circuit::run`] call:
//!
//! 1. A denied admission resolves the fallback, or fails with
//!    [`ResilienceError::CircuitOpen`](crate::error::ResilienceError::CircuitOpen).
//! 2. Admitted calls go through the retry loop when one is bound, each attempt
//!    recording success or failure on the breaker.
//! 3. When attempts run out, or an error is not retryable, the fallback is
//!    resolved; if it has no value the last operation error propagates.
//! 4. A `Throw` fallback always turns the outcome into
//!    [`FallbackError::Refused`](crate::error::FallbackError::Refused).

pub mod backoff;
pub mod circuit;
pub mod circuit_breaker;
pub mod fallback;
pub mod registry;
pub mod retry;

pub use backoff::BackoffStrategy;
pub use circuit::Circuit;
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerMetrics,
    CircuitState,
};
pub use fallback::{ErasedValue, FallbackCallable, FallbackKind, FallbackPolicy, FallbackValue};
pub use registry::CircuitBreakerRegistry;
pub use retry::{retry, RetryCallback, RetryPolicy, RetryPredicate};
