use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// The value other modules observe through `require`
///
/// Type-erased and cheap to clone. Engines pick the concrete type: JSON modules
/// export a `serde_json::Value`, native modules export whatever Rust type they like.
#[derive(Clone)]
pub struct Exports(Arc<dyn Any + Send + Sync>);

impl Exports {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Exports of a module that defines neither static exports nor a generator
    pub fn empty() -> Self {
        Self::new(())
    }

    pub fn json(value: serde_json::Value) -> Self {
        Self::new(value)
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        self.downcast_ref::<serde_json::Value>()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is::<()>()
    }

    /// Whether both handles point at the same exported value
    pub fn ptr_eq(&self, other: &Exports) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for Exports {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Exports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(json) = self.as_json() {
            write!(f, "Exports({})", json)
        } else if self.is_empty() {
            write!(f, "Exports(empty)")
        } else {
            write!(f, "Exports(<opaque>)")
        }
    }
}
