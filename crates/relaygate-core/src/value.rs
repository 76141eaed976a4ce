//! Published values and the messages that carry them

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

/// Type-erased, shared published value
///
/// The producer creates a value and keeps the first handle. Each delivery to
/// a subscriber clones the handle, and the consuming worker drops its copy
/// once the message has been processed.
#[derive(Clone)]
pub struct Value {
    inner: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Value {
    /// Wrap any thread-safe value
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            inner: Arc::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Borrow the payload as `T`
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// Whether the payload is a `T`
    pub fn is<T: Any>(&self) -> bool {
        self.inner.is::<T>()
    }

    /// Rust type name of the payload
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Number of live handles
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Non-owning handle, used for publication records
    pub fn downgrade(&self) -> WeakValue {
        WeakValue {
            inner: Arc::downgrade(&self.inner),
            type_name: self.type_name,
        }
    }

    /// Human-readable rendering for the control protocol
    pub fn render(&self) -> String {
        macro_rules! try_render {
            ($($ty:ty),*) => {
                $(
                    if let Some(v) = self.downcast_ref::<$ty>() {
                        return v.to_string();
                    }
                )*
            };
        }

        try_render!(String, &'static str, bool, i8, i16, i32, i64, u8, u16, u32, u64, usize, isize, f32, f64);

        if let Some(v) = self.downcast_ref::<serde_json::Value>() {
            return v.to_string();
        }

        format!("<{}>", self.type_name)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Value")
            .field("type_name", &self.type_name)
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

/// Non-owning handle to a published value
#[derive(Clone)]
pub struct WeakValue {
    inner: Weak<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl WeakValue {
    /// Recover the value if any handle is still alive
    pub fn upgrade(&self) -> Option<Value> {
        self.inner.upgrade().map(|inner| Value {
            inner,
            type_name: self.type_name,
        })
    }

    /// Whether every strong handle is gone
    pub fn is_dropped(&self) -> bool {
        self.inner.strong_count() == 0
    }
}

impl fmt::Debug for WeakValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakValue")
            .field("type_name", &self.type_name)
            .field("alive", &!self.is_dropped())
            .finish()
    }
}

/// Identity of the plugin that published a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    /// Plugin instance name
    pub plugin: String,
    /// Module (library) the plugin was loaded from
    pub module: String,
}

impl Origin {
    /// Create a new origin
    pub fn new(plugin: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            plugin: plugin.into(),
            module: module.into(),
        }
    }
}

/// A published value delivered to one subscriber
#[derive(Debug, Clone)]
pub struct Message {
    /// Fully-qualified topic name
    pub fq_name: String,
    /// Shared payload
    pub value: Value,
    /// Publisher identity
    pub origin: Origin,
}

impl Message {
    /// Create a new message
    pub fn new(fq_name: impl Into<String>, value: Value, origin: Origin) -> Self {
        Self {
            fq_name: fq_name.into(),
            value,
            origin,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downcast() {
        let v = Value::new(42u32);
        assert_eq!(v.downcast_ref::<u32>(), Some(&42));
        assert!(v.downcast_ref::<i64>().is_none());
        assert!(v.is::<u32>());
    }

    #[test]
    fn test_render() {
        assert_eq!(Value::new("up".to_string()).render(), "up");
        assert_eq!(Value::new(3.5f64).render(), "3.5");
        assert_eq!(Value::new(true).render(), "true");
        assert_eq!(
            Value::new(serde_json::json!({"a": 1})).render(),
            "{\"a\":1}"
        );

        struct Opaque;
        assert!(Value::new(Opaque).render().starts_with('<'));
    }

    #[test]
    fn test_clone_counts_and_weak() {
        let v = Value::new(7i64);
        let weak = v.downgrade();
        let copy = v.clone();
        assert_eq!(v.ref_count(), 2);
        drop(copy);
        assert_eq!(v.ref_count(), 1);
        assert!(weak.upgrade().is_some());
        drop(v);
        assert!(weak.is_dropped());
        assert!(weak.upgrade().is_none());
    }
}
