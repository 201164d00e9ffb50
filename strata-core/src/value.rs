//! Values and Bindings
//!
//! Contexts store dynamically typed values. Any `Send + Sync + Debug +
//! PartialEq` type can be wrapped in a [`Value`]; equality between two values
//! is the `PartialEq` of the wrapped type, and values of different types are
//! never equal.
//!
//! A context slot holds a [`Binding`]: either a plain value or a
//! [`ContextFunction`] that computes the value on demand. Lookups report
//! their outcome as a [`Slot`], which separates "no binding" from "bound to
//! null".

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::context::Context;
use crate::error::Result;

/// Object-safe view of a value stored in a context.
///
/// Implemented automatically for every `Any + Send + Sync + Debug +
/// PartialEq` type.
pub trait Object: Any + Send + Sync + fmt::Debug {
    /// Upcast for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Compare with another object of possibly different type.
    fn equals(&self, other: &dyn Object) -> bool;
}

impl<T> Object for T
where
    T: Any + Send + Sync + fmt::Debug + PartialEq,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn equals(&self, other: &dyn Object) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| self == other)
    }
}

/// A shared, dynamically typed value.
///
/// Cloning is cheap: the payload lives behind an `Arc`.
#[derive(Clone)]
pub struct Value(Arc<dyn Object>);

impl Value {
    /// Wrap a value.
    pub fn new<T: Object>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Borrow the payload as `T`, if it has that type.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        (*self.0).as_any().downcast_ref::<T>()
    }

    /// Check the payload type.
    pub fn is<T: Any>(&self) -> bool {
        (*self.0).as_any().is::<T>()
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &Value) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || (*self.0).equals(&*other.0)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

/// Outcome of a lookup.
///
/// Value providers also return a `Slot`: `Slot::Absent` means "not a value",
/// and the lookup continues in the parent context as if the key were unbound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot<V> {
    /// Nothing is bound.
    Absent,
    /// Bound to null.
    Null,
    /// Bound to a value.
    Present(V),
}

impl<V> Slot<V> {
    /// Build a bound slot from an optional value; `None` is null.
    pub fn from_option(value: Option<V>) -> Self {
        match value {
            Some(value) => Slot::Present(value),
            None => Slot::Null,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Slot::Absent)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Slot::Null)
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Slot::Present(_))
    }

    /// Collapse to an `Option`; both absent and null become `None`.
    pub fn into_option(self) -> Option<V> {
        match self {
            Slot::Present(value) => Some(value),
            Slot::Absent | Slot::Null => None,
        }
    }

    pub fn as_ref(&self) -> Slot<&V> {
        match self {
            Slot::Absent => Slot::Absent,
            Slot::Null => Slot::Null,
            Slot::Present(value) => Slot::Present(value),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(V) -> U) -> Slot<U> {
        match self {
            Slot::Absent => Slot::Absent,
            Slot::Null => Slot::Null,
            Slot::Present(value) => Slot::Present(f(value)),
        }
    }
}

impl<V> From<V> for Slot<V> {
    fn from(value: V) -> Self {
        Slot::Present(value)
    }
}

/// A value provider bound to a key.
///
/// The provider is evaluated against the context the lookup started from, so
/// a function bound on a root sees the values of the child it is queried
/// through. Every context read it performs becomes a dependency of the cached
/// result.
pub trait ContextFunction: Send + Sync + 'static {
    fn compute(&self, context: &Context, key: &str) -> Result<Slot<Value>>;
}

impl<F> ContextFunction for F
where
    F: Fn(&Context, &str) -> Result<Slot<Value>> + Send + Sync + 'static,
{
    fn compute(&self, context: &Context, key: &str) -> Result<Slot<Value>> {
        self(context, key)
    }
}

/// What a context slot holds.
#[derive(Clone)]
pub enum Binding {
    Value(Value),
    Function(Arc<dyn ContextFunction>),
}

impl Binding {
    /// Bind a closure provider.
    pub fn function<F>(function: F) -> Self
    where
        F: Fn(&Context, &str) -> Result<Slot<Value>> + Send + Sync + 'static,
    {
        Binding::Function(Arc::new(function))
    }

    /// Bind any [`ContextFunction`] implementation.
    pub fn provider<P: ContextFunction>(provider: P) -> Self {
        Binding::Function(Arc::new(provider))
    }
}

impl PartialEq for Binding {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Binding::Value(a), Binding::Value(b)) => a == b,
            (Binding::Function(a), Binding::Function(b)) => same_function(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Binding::Function(function) => {
                write!(f, "Function({:p})", Arc::as_ptr(function).cast::<()>())
            }
        }
    }
}

impl From<Value> for Binding {
    fn from(value: Value) -> Self {
        Binding::Value(value)
    }
}

pub(crate) fn same_function(a: &Arc<dyn ContextFunction>, b: &Arc<dyn ContextFunction>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
