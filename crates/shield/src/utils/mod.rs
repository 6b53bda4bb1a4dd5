//! Common utility functions and helper macros
//!
//! - **[`macros`]**: declarative macros for tag enums and fallback defaults
//! - **[`serde`]**: serialization helpers for configuration types

#[macro_use]
pub mod macros;
#[cfg(feature = "config")]
pub mod serde;

#[cfg(feature = "config")]
pub use self::serde::duration_millis;
