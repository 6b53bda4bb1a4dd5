//! Error types and error classification for resilience operations
//!
//! The error handling system is built on three pieces:
//!
//! 1. **[`ErrorKind`]**: a closed set of tags describing what went wrong
//!    (transient fault, timeout, capacity exceeded, ...). Retry allow-lists
//!    and a circuit's expected-error filter compare these tags by equality.
//!
//! 2. **[`ErrorClassification`]**: the trait an operation's error type
//!    implements so the retry and circuit machinery can read its tag.
//!
//! 3. **[`ResilienceError`]**: what a guarded call returns when it does not
//!    produce a value. Its variants keep "never ran" (`CircuitOpen`) apart
//!    from "ran and failed" (`OperationFailed`) and from an explicit fallback
//!    refusal (`Fallback`).
//!
//! ## Error taxonomy
//!
//! | Situation | Surfaces as |
//! |-----------|-------------|
//! | Admission denied, no usable fallback | [`ResilienceError::CircuitOpen`] |
//! | Fallback policy set to throw | [`ResilienceError::Fallback`] with [`FallbackError::Refused`] |
//! | Attempts exhausted, no fallback | [`ResilienceError::OperationFailed`] with the last error |
//! | Error excluded by the retry filter | [`ResilienceError::OperationFailed`] on first occurrence |
//! | Invalid policy/config construction | [`ConfigError`] at construction time |
//!
//! ## Example
//!
//! ```rust
//! use shield::error::{ErrorClassification, ErrorKind, OperationError};
//!
//! let err = OperationError::new(ErrorKind::Timeout, "inventory lookup took too long");
//! assert_eq!(err.kind(), ErrorKind::Timeout);
//! assert!(err.is_retryable());
//! ```

use std::io;

use thiserror::Error;

/// Boxed error type for type-erased failures (fallback callables, config IO)
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

//==============================================================================
// Error kinds
//==============================================================================

/// Tag attached to every error seen by the resilience machinery
///
/// `Timeout` and `CapacityExceeded` are the tags external timeout and
/// bulkhead wrappers produce; the core treats them like any other kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "config", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config", serde(rename_all = "snake_case"))]
pub enum ErrorKind {
    /// A fault expected to clear on its own (dropped connection, contention)
    Transient,
    /// The operation did not finish within its deadline
    Timeout,
    /// A concurrency or rate limit rejected the call
    CapacityExceeded,
    /// The downstream dependency is unreachable or refusing work
    Unavailable,
    /// The request itself is wrong; retrying cannot help
    InvalidInput,
    /// A bug or broken invariant
    Internal,
    /// Anything not covered above
    Other,
}

crate::impl_tag_conversions!(ErrorKind {
    Transient => "transient",
    Timeout => "timeout",
    CapacityExceeded => "capacity_exceeded",
    Unavailable => "unavailable",
    InvalidInput => "invalid_input",
    Internal => "internal",
    Other => "other",
});

impl ErrorKind {
    /// All kinds, in declaration order
    pub const ALL: [ErrorKind; 7] = [
        ErrorKind::Transient,
        ErrorKind::Timeout,
        ErrorKind::CapacityExceeded,
        ErrorKind::Unavailable,
        ErrorKind::InvalidInput,
        ErrorKind::Internal,
        ErrorKind::Other,
    ];

    /// Whether errors of this kind usually succeed when attempted again
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorKind::Transient
                | ErrorKind::Timeout
                | ErrorKind::CapacityExceeded
                | ErrorKind::Unavailable
        )
    }
}

impl From<io::ErrorKind> for ErrorKind {
    fn from(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::TimedOut => ErrorKind::Timeout,
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::BrokenPipe => ErrorKind::Unavailable,
            io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock => ErrorKind::Transient,
            io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => ErrorKind::InvalidInput,
            io::ErrorKind::OutOfMemory => ErrorKind::CapacityExceeded,
            _ => ErrorKind::Other,
        }
    }
}

//==============================================================================
// Classification
//==============================================================================

/// Classify an error by its [`ErrorKind`] tag
///
/// Implement this for the error type your guarded operations return. The
/// retry allow-list and the circuit's expected-kind filter only ever look
/// at [`kind`](ErrorClassification::kind).
pub trait ErrorClassification {
    /// The tag for this error value
    fn kind(&self) -> ErrorKind;

    /// Whether this error is worth retrying by default
    fn is_retryable(&self) -> bool {
        self.kind().is_transient()
    }
}

impl ErrorClassification for io::Error {
    fn kind(&self) -> ErrorKind {
        ErrorKind::from(io::Error::kind(self))
    }
}

impl<E> ErrorClassification for ResilienceError<E>
where
    E: std::error::Error + ErrorClassification + Send + Sync + 'static,
{
    fn kind(&self) -> ErrorKind {
        match self {
            ResilienceError::CircuitOpen { .. } => ErrorKind::Unavailable,
            ResilienceError::Fallback(_) => ErrorKind::Internal,
            ResilienceError::OperationFailed { source } => source.kind(),
        }
    }
}

/// Ready-made kind-tagged error for operations without their own error type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct OperationError {
    kind: ErrorKind,
    message: String,
}

impl OperationError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl ErrorClassification for OperationError {
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

//==============================================================================
// Configuration errors
//==============================================================================

/// Raised synchronously when a policy, breaker or config file is invalid
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[cfg(feature = "config")]
    #[error("Failed to read configuration file {path}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[cfg(feature = "config")]
    #[error("Invalid {format} configuration: {message}")]
    Parse { format: &'static str, message: String },
}

impl ConfigError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ConfigError::Invalid { message: message.into() }
    }
}

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;

//==============================================================================
// Fallback and resilience errors
//==============================================================================

/// Errors raised while resolving a fallback policy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FallbackError {
    /// The policy is configured to refuse instead of substituting a value
    #[error("Fallback policy was configured to refuse")]
    Refused,

    /// No value of the requested type could be produced
    #[error("Fallback policy could not produce a value of type {type_name}")]
    NoValue { type_name: &'static str },
}

/// Errors returned by guarded calls
///
/// Generic over the operation's own error type `E`, which is preserved
/// untouched in [`ResilienceError::OperationFailed`].
#[derive(Debug, Error)]
pub enum ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Admission was denied and no fallback value could be obtained
    #[error("Circuit '{name}' is open and no fallback value could be obtained")]
    CircuitOpen { name: String },

    /// The fallback policy refused to substitute a value
    #[error(transparent)]
    Fallback(#[from] FallbackError),

    /// The operation failed and its error is propagated as-is
    #[error("Operation failed: {source}")]
    OperationFailed {
        #[source]
        source: E,
    },
}

impl<E> ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub(crate) fn operation(source: E) -> Self {
        ResilienceError::OperationFailed { source }
    }

    /// The call never ran because the circuit was open
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ResilienceError::CircuitOpen { .. })
    }

    /// The fallback policy refused to produce a value
    pub fn is_fallback_refusal(&self) -> bool {
        matches!(self, ResilienceError::Fallback(FallbackError::Refused))
    }

    /// Borrow the operation's own error, if that is what this is
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            ResilienceError::OperationFailed { source } => Some(source),
            _ => None,
        }
    }

    /// Take the operation's own error, if that is what this is
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            ResilienceError::OperationFailed { source } => Some(source),
            _ => None,
        }
    }
}

/// Result type for guarded calls
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;
