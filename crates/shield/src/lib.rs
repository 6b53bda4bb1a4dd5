//! Fault-tolerance primitives for synchronous Rust services.
//!
//! `shield` wraps a caller-supplied operation with retries, a named circuit
//! breaker and a typed fallback, composed by [`Circuit`](resilience::Circuit).
//!
//! # Modules
//!
//! - [`error`]: error kinds, classification and the resilience error taxonomy
//! - [`time`]: clock abstraction for deterministic recovery timing
//! - [`resilience`]: backoff, retry, fallback, circuit breaker, registry and
//!   the circuit orchestrator
//! - `config` (feature `config`, on by default): TOML/JSON configuration
//! - [`utils`]: declarative macros and serde helpers
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//!
//! use shield::error::OperationError;
//! use shield::resilience::{Circuit, CircuitBreakerRegistry, FallbackPolicy, RetryPolicy};
//!
//! let registry = CircuitBreakerRegistry::new();
//! let circuit = Circuit::new(&registry, "exchange-rates")
//!     .with_retry(RetryPolicy::exponential(3, Duration::from_millis(1)))
//!     .with_fallback(FallbackPolicy::with_value(1.0_f64));
//!
//! let rate = circuit.run(|| Err::<f64, _>(OperationError::transient("rate feed offline")));
//! assert_eq!(rate.ok(), Some(1.0));
//! ```
//!
//! Logging goes through `tracing`; the crate never installs a subscriber.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

#[macro_use]
pub mod utils;

pub mod error;
pub mod resilience;
pub mod time;

#[cfg(feature = "config")]
pub mod config;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "config")]
pub use config::{BackoffConfig, RetrySettings, ShieldConfig};
pub use error::{
    ConfigError, ConfigResult, ErrorClassification, ErrorKind, FallbackError, OperationError,
    ResilienceError, ResilienceResult,
};
pub use resilience::{
    retry, BackoffStrategy, Circuit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry,
    CircuitState, FallbackKind, FallbackPolicy, FallbackValue, RetryPolicy,
};
pub use time::{Clock, MockClock, SystemClock};
#[cfg(feature = "config")]
pub use utils::duration_millis;
