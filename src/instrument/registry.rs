//! The set of types that opted in to allocation instrumentation.
//!
//! The sandbox policy layer registers the types it does not trust; the gate consults the set
//! once per class load. The set is built once, shared through an [`std::sync::Arc`] and never
//! torn down. Types cannot be unregistered.

use dashmap::DashSet;

/// Opaque identity the host assigns to a loaded type.
///
/// On the JVM side this is whatever stable handle the agent adapter uses for a
/// `java.lang.Class` (a JNI global reference, a tag, an interned id). Identity is the only
/// thing the crate relies on: two handles are the same type exactly when they are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeHandle(pub u64);

impl TypeHandle {
    /// The raw handle value.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Concurrent, add-only set of registered types.
///
/// Any number of threads may register and query at the same time. A membership check that
/// races with the registration of the same type may observe either state; register a type
/// before its first load if coverage must be strict.
///
/// # Examples
///
/// ```rust
/// use allocscope::instrument::{RegistrationSet, TypeHandle};
///
/// let set = RegistrationSet::new();
/// assert!(set.register(TypeHandle(7)));
/// assert!(!set.register(TypeHandle(7)));
/// assert!(set.is_registered(TypeHandle(7)));
/// assert!(!set.is_registered(TypeHandle(8)));
/// ```
#[derive(Debug, Default)]
pub struct RegistrationSet {
    types: DashSet<TypeHandle>,
}

impl RegistrationSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        RegistrationSet {
            types: DashSet::new(),
        }
    }

    /// Register a type. Returns `true` if it was not registered before.
    pub fn register(&self, handle: TypeHandle) -> bool {
        let inserted = self.types.insert(handle);
        if inserted {
            log::debug!("Registered type {:#x} for allocation instrumentation", handle.0);
        }
        inserted
    }

    /// Whether the type has been registered.
    #[must_use]
    pub fn is_registered(&self, handle: TypeHandle) -> bool {
        self.types.contains(&handle)
    }

    /// Number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether no type has been registered yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl FromIterator<TypeHandle> for RegistrationSet {
    fn from_iter<I: IntoIterator<Item = TypeHandle>>(iter: I) -> Self {
        let set = RegistrationSet::new();
        for handle in iter {
            set.register(handle);
        }
        set
    }
}
