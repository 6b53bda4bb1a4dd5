//! Time abstractions
//!
//! - **[`clock`]**: real and mock monotonic clocks used by circuit breakers

pub mod clock;

pub use clock::{Clock, MockClock, SystemClock};
