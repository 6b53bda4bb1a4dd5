//! Macros for reducing boilerplate code
//!
//! This module contains declarative macros that eliminate repetitive
//! implementations across the crate: string conversions for the small
//! tag enums (circuit states, error kinds, fallback kinds) and
//! [`FallbackValue`](crate::resilience::FallbackValue) implementations for
//! default-constructible types.

/// Implements Display and FromStr traits for tag enums
///
/// This macro generates:
/// - Display trait: converts enum variants to their string form
/// - FromStr trait: parses case-insensitive strings to enum variants
///
/// # Arguments
///
/// * `$enum_name` - The name of the enum type
/// * `$variant => $str` - Mapping of enum variants to their string
///   representations (must be lowercase for parsing to round-trip)
///
/// # Example
///
/// ```rust
/// use shield::impl_tag_conversions;
///
/// #[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// pub enum Lane {
///     Fast,
///     Slow,
/// }
///
/// impl_tag_conversions!(Lane {
///     Fast => "fast",
///     Slow => "slow",
/// });
///
/// assert_eq!(Lane::Fast.to_string(), "fast");
/// assert_eq!("SLOW".parse::<Lane>(), Ok(Lane::Slow));
/// ```
#[macro_export]
macro_rules! impl_tag_conversions {
    ($enum_name:ident { $($variant:ident => $str:expr),+ $(,)? }) => {
        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(Self::$variant => f.write_str($str),)+
                }
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_lowercase().as_str() {
                    $($str => Ok(Self::$variant),)+
                    _ => Err(format!("Invalid {}: {}", stringify!($enum_name), s)),
                }
            }
        }
    };
}

/// Implements [`FallbackValue`](crate::resilience::FallbackValue) for types
/// whose zero value is their [`Default`]
///
/// A `Default` fallback policy resolves to `T::default()` for every type
/// listed here. Types that are not listed (and do not implement the trait by
/// hand) cannot be used with fallback resolution at all; implement the trait
/// with the provided `None` body to opt in without a zero value.
///
/// # Example
///
/// ```rust
/// use shield::impl_fallback_default;
/// use shield::resilience::FallbackPolicy;
///
/// #[derive(Debug, Clone, Default, PartialEq)]
/// struct Quote {
///     price: u64,
/// }
///
/// impl_fallback_default!(Quote);
///
/// let policy = FallbackPolicy::with_default();
/// assert_eq!(policy.resolve::<Quote>().ok().flatten(), Some(Quote::default()));
/// ```
#[macro_export]
macro_rules! impl_fallback_default {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::resilience::FallbackValue for $ty {
                fn default_value() -> Option<Self> {
                    Some(<$ty as Default>::default())
                }
            }
        )+
    };
}
