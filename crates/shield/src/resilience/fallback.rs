//! Fallback policies: substitute results for calls that cannot complete
//!
//! A [`FallbackPolicy`] is type-erased so one policy can be attached to
//! circuits of any result type. The requested type is chosen at resolution
//! time with [`FallbackPolicy::resolve`]; a stored value or callable output
//! only resolves when its type matches the requested one exactly.
//!
//! Four variants are supported:
//!
//! | Variant | Resolves to |
//! |---------|-------------|
//! | [`FallbackKind::Default`] | the type's zero value, see [`FallbackValue`] |
//! | [`FallbackKind::SpecificValue`] | a clone of the stored value |
//! | [`FallbackKind::Callable`] | the output of the callable, invoked on every resolution |
//! | [`FallbackKind::Throw`] | always [`FallbackError::Refused`] |
//!
//! Resolution never fails for the first three variants. A callable that
//! returns an error or panics yields "no value" instead.
//!
//! # Examples
//!
//! ```rust
//! use shield::resilience::FallbackPolicy;
//!
//! let cached = FallbackPolicy::with_value(42_i32);
//! assert_eq!(cached.resolve::<i32>(), Ok(Some(42)));
//! assert_eq!(cached.resolve::<String>(), Ok(None));
//!
//! let empty = FallbackPolicy::with_default();
//! assert_eq!(empty.resolve::<String>(), Ok(Some(String::new())));
//! ```

use std::any::{type_name, Any, TypeId};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{
    BoxedError, ConfigError, ConfigResult, FallbackError, ResilienceError, ResilienceResult,
};

/// Type-erased fallback callable
pub type FallbackCallable =
    Arc<dyn Fn() -> Result<Box<dyn Any + Send + Sync>, BoxedError> + Send + Sync>;

/// Types a fallback policy can resolve to
///
/// `default_value` is the value a [`FallbackKind::Default`] policy produces.
/// The provided implementation returns `None`, which marks the type as having
/// no zero value. Use [`impl_fallback_default!`](crate::impl_fallback_default)
/// for types whose zero value is their `Default`.
pub trait FallbackValue: Any + Clone + Send + Sync {
    fn default_value() -> Option<Self> {
        None
    }
}

crate::impl_fallback_default!(
    (),
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    f32,
    f64,
    String,
);

impl FallbackValue for &'static str {
    fn default_value() -> Option<Self> {
        Some("")
    }
}

impl<T: Clone + Send + Sync + 'static> FallbackValue for Option<T> {
    fn default_value() -> Option<Self> {
        Some(None)
    }
}

impl<T: Clone + Send + Sync + 'static> FallbackValue for Vec<T> {
    fn default_value() -> Option<Self> {
        Some(Vec::new())
    }
}

impl<T: Clone + Send + Sync + 'static> FallbackValue for VecDeque<T> {
    fn default_value() -> Option<Self> {
        Some(VecDeque::new())
    }
}

impl<K, V> FallbackValue for HashMap<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default_value() -> Option<Self> {
        Some(HashMap::new())
    }
}

impl<K, V> FallbackValue for BTreeMap<K, V>
where
    K: Clone + Ord + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default_value() -> Option<Self> {
        Some(BTreeMap::new())
    }
}

impl<T: Clone + Eq + Hash + Send + Sync + 'static> FallbackValue for HashSet<T> {
    fn default_value() -> Option<Self> {
        Some(HashSet::new())
    }
}

impl<T: Clone + Ord + Send + Sync + 'static> FallbackValue for BTreeSet<T> {
    fn default_value() -> Option<Self> {
        Some(BTreeSet::new())
    }
}

macro_rules! impl_fallback_tuple {
    ($($name:ident),+) => {
        impl<$($name: FallbackValue),+> FallbackValue for ($($name,)+) {
            fn default_value() -> Option<Self> {
                Some(($($name::default_value()?,)+))
            }
        }
    };
}

impl_fallback_tuple!(A);
impl_fallback_tuple!(A, B);
impl_fallback_tuple!(A, B, C);
impl_fallback_tuple!(A, B, C, D);

/// Which substitute a fallback policy produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FallbackKind {
    Default,
    SpecificValue,
    Callable,
    Throw,
}

impl fmt::Display for FallbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FallbackKind::Default => "DEFAULT",
            FallbackKind::SpecificValue => "SPECIFIC_VALUE",
            FallbackKind::Callable => "CALLABLE",
            FallbackKind::Throw => "THROW",
        })
    }
}

/// A value stored together with its runtime type tag
#[derive(Clone)]
pub struct ErasedValue {
    value: Arc<dyn Any + Send + Sync>,
    type_id: TypeId,
    type_name: &'static str,
}

impl ErasedValue {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self { value: Arc::new(value), type_id: TypeId::of::<T>(), type_name: type_name::<T>() }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    fn downcast<T: FallbackValue>(&self) -> Option<T> {
        self.value.downcast_ref::<T>().cloned()
    }
}

impl fmt::Debug for ErasedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErasedValue").field("type_name", &self.type_name).finish()
    }
}

/// Type-erased substitute-result policy
#[derive(Clone)]
pub struct FallbackPolicy {
    kind: FallbackKind,
    value: Option<ErasedValue>,
    callable: Option<FallbackCallable>,
}

impl fmt::Debug for FallbackPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackPolicy")
            .field("kind", &self.kind)
            .field("value", &self.value)
            .field("has_callable", &self.callable.is_some())
            .finish()
    }
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self::with_default()
    }
}

impl FallbackPolicy {
    /// Build a policy from its parts, validating that the variant has what it
    /// needs
    ///
    /// `SpecificValue` requires `value`; `Callable` requires `callable`.
    /// Parts a variant does not use are dropped.
    pub fn new(
        kind: FallbackKind,
        value: Option<ErasedValue>,
        callable: Option<FallbackCallable>,
    ) -> ConfigResult<Self> {
        match kind {
            FallbackKind::SpecificValue if value.is_none() => Err(ConfigError::invalid(
                "a value must be provided for a SPECIFIC_VALUE fallback policy",
            )),
            FallbackKind::Callable if callable.is_none() => Err(ConfigError::invalid(
                "a callable must be provided for a CALLABLE fallback policy",
            )),
            FallbackKind::SpecificValue => Ok(Self { kind, value, callable: None }),
            FallbackKind::Callable => Ok(Self { kind, value: None, callable }),
            FallbackKind::Default | FallbackKind::Throw => {
                Ok(Self { kind, value: None, callable: None })
            }
        }
    }

    /// Resolve to the requested type's zero value
    pub fn with_default() -> Self {
        Self { kind: FallbackKind::Default, value: None, callable: None }
    }

    /// Resolve to a clone of `value` when the requested type is `T`
    pub fn with_value<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            kind: FallbackKind::SpecificValue,
            value: Some(ErasedValue::new(value)),
            callable: None,
        }
    }

    /// Resolve by invoking `callable` on every resolution
    pub fn with_callable<T, F>(callable: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let erased: FallbackCallable =
            Arc::new(move || Ok(Box::new(callable()) as Box<dyn Any + Send + Sync>));
        Self { kind: FallbackKind::Callable, value: None, callable: Some(erased) }
    }

    /// Like [`with_callable`](Self::with_callable), for callables that can
    /// fail; an `Err` resolves to "no value"
    pub fn with_fallible_callable<T, E, F>(callable: F) -> Self
    where
        T: Any + Send + Sync,
        E: Into<BoxedError>,
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
    {
        let erased: FallbackCallable = Arc::new(move || {
            callable().map(|value| Box::new(value) as Box<dyn Any + Send + Sync>).map_err(Into::into)
        });
        Self { kind: FallbackKind::Callable, value: None, callable: Some(erased) }
    }

    /// Always refuse with [`FallbackError::Refused`]
    pub fn with_throw() -> Self {
        Self { kind: FallbackKind::Throw, value: None, callable: None }
    }

    /// Resolve a substitute value of type `T`
    ///
    /// Returns `Ok(None)` when no value of type `T` can be produced.
    /// Only the `Throw` variant returns an error.
    pub fn resolve<T: FallbackValue>(&self) -> Result<Option<T>, FallbackError> {
        let resolved = match self.kind {
            FallbackKind::Throw => {
                debug!("Fallback policy refused to produce a value");
                return Err(FallbackError::Refused);
            }
            FallbackKind::Default => T::default_value(),
            FallbackKind::SpecificValue => self.value.as_ref().and_then(ErasedValue::downcast),
            FallbackKind::Callable => self.invoke_callable().and_then(|output| {
                output.downcast::<T>().ok().map(|boxed| *boxed)
            }),
        };

        debug!(
            kind = %self.kind,
            requested = type_name::<T>(),
            resolved = resolved.is_some(),
            "Resolved fallback policy"
        );
        Ok(resolved)
    }

    /// Resolve a value of type `T`, or return `default`
    ///
    /// Never fails: a `Throw` policy also yields `default`.
    pub fn resolve_or<T: FallbackValue>(&self, default: T) -> T {
        match self.resolve::<T>() {
            Ok(Some(value)) => value,
            Ok(None) | Err(_) => default,
        }
    }

    /// Resolve a value of type `T`, treating "no value" as an error
    pub fn resolve_required<T: FallbackValue>(&self) -> Result<T, FallbackError> {
        self.resolve::<T>()?.ok_or(FallbackError::NoValue { type_name: type_name::<T>() })
    }

    /// Produce the substitute without choosing a type
    ///
    /// `Default` has no type to construct and yields `None`.
    pub fn execute(&self) -> Result<Option<Arc<dyn Any + Send + Sync>>, FallbackError> {
        match self.kind {
            FallbackKind::Throw => Err(FallbackError::Refused),
            FallbackKind::Default => Ok(None),
            FallbackKind::SpecificValue => {
                Ok(self.value.as_ref().map(|stored| Arc::clone(&stored.value)))
            }
            FallbackKind::Callable => Ok(self.invoke_callable().map(Arc::from)),
        }
    }

    pub fn kind(&self) -> FallbackKind {
        self.kind
    }

    pub fn has_specific_value(&self) -> bool {
        self.value.is_some()
    }

    pub fn has_callable(&self) -> bool {
        self.callable.is_some()
    }

    /// Type of the stored specific value, if any
    pub fn stored_type(&self) -> Option<TypeId> {
        self.value.as_ref().map(ErasedValue::type_id)
    }

    /// Name of the stored specific value's type, if any
    pub fn stored_type_name(&self) -> Option<&'static str> {
        self.value.as_ref().map(ErasedValue::type_name)
    }

    /// Whether resolving to `T` can produce a value
    ///
    /// Exact for `Default`, `SpecificValue` and `Throw`. Optimistic for
    /// `Callable`, whose output type is only known once it runs.
    pub fn can_resolve<T: FallbackValue>(&self) -> bool {
        match self.kind {
            FallbackKind::Default => T::default_value().is_some(),
            FallbackKind::SpecificValue => self.stored_type() == Some(TypeId::of::<T>()),
            FallbackKind::Callable => true,
            FallbackKind::Throw => false,
        }
    }

    fn invoke_callable(&self) -> Option<Box<dyn Any + Send + Sync>> {
        let callable = self.callable.as_ref()?;
        match catch_unwind(AssertUnwindSafe(|| callable())) {
            Ok(Ok(output)) => Some(output),
            Ok(Err(error)) => {
                warn!(error = %error, "Fallback callable failed; treating as no value");
                None
            }
            Err(_) => {
                warn!("Fallback callable panicked; treating as no value");
                None
            }
        }
    }
}

/// Replace a terminal operation error with the fallback's value
///
/// The error propagates unchanged when there is no fallback or it has no
/// value of type `T`; a refusing fallback turns it into
/// [`ResilienceError::Fallback`].
pub(crate) fn recover<T, E>(fallback: Option<&FallbackPolicy>, error: E) -> ResilienceResult<T, E>
where
    T: FallbackValue,
    E: std::error::Error + Send + Sync + 'static,
{
    let Some(fallback) = fallback else {
        return Err(ResilienceError::operation(error));
    };
    match fallback.resolve::<T>()? {
        Some(value) => {
            debug!(kind = %fallback.kind(), "Substituted fallback value after failure");
            Ok(value)
        }
        None => Err(ResilienceError::operation(error)),
    }
}
