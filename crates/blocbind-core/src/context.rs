#![forbid(unsafe_code)]

//! Build contexts: ambient lookup-by-type and rebuild scheduling.
//!
//! # Design
//!
//! [`BuildContext`] is the handle a component receives from its host. It
//! carries a chain of provider scopes: each scope maps `TypeId` to a stored
//! value, and lookups walk from the innermost scope outward, so a child
//! scope can shadow a parent's provider. Values are stored by clone and
//! returned by clone — providing a [`Store<S>`](crate::store::Store) hands
//! out handles that all share one container identity.
//!
//! A context is constructible standalone ([`BuildContext::root`]), so
//! components can be exercised in unit tests without any surrounding
//! component tree.
//!
//! [`RebuildHandle`] is the `setState`-equivalent: a per-component dirty
//! flag plus a monotonic request counter. A component's adapter calls
//! [`request()`](RebuildHandle::request) when its rebuild gate passes; the
//! host polls [`take()`](RebuildHandle::take) and re-invokes the
//! component's build function when it returns true.
//!
//! # Invariants
//!
//! 1. `resolve::<T>()` returns the innermost provided `T`, or `None`.
//! 2. Providing `T` twice in one scope replaces the earlier value.
//! 3. Cloning a `BuildContext` shares its scope chain.
//! 4. `requests()` never decreases; `take()` only clears the dirty flag.

use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use tracing::trace;

/// One provider scope in a context chain.
struct Scope {
    providers: RefCell<HashMap<TypeId, Box<dyn Any>>>,
    parent: Option<Rc<Scope>>,
}

/// Handle to a provider-scope chain, cheaply cloneable.
///
/// See the module docs for the lookup and shadowing rules.
pub struct BuildContext {
    scope: Rc<Scope>,
}

impl Clone for BuildContext {
    fn clone(&self) -> Self {
        Self {
            scope: Rc::clone(&self.scope),
        }
    }
}

impl std::fmt::Debug for BuildContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildContext")
            .field("depth", &self.depth())
            .field("local_providers", &self.scope.providers.borrow().len())
            .finish()
    }
}

impl BuildContext {
    /// Create a root context with an empty provider scope.
    #[must_use]
    pub fn root() -> Self {
        Self {
            scope: Rc::new(Scope {
                providers: RefCell::new(HashMap::new()),
                parent: None,
            }),
        }
    }

    /// Create a nested context whose lookups fall back to this one.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            scope: Rc::new(Scope {
                providers: RefCell::new(HashMap::new()),
                parent: Some(Rc::clone(&self.scope)),
            }),
        }
    }

    /// Provide `value` in this scope, shadowing any `T` from outer scopes.
    /// Providing the same type twice in one scope replaces the first value.
    pub fn provide<T: Clone + 'static>(&self, value: T) {
        self.scope
            .providers
            .borrow_mut()
            .insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Look up a `T` by type, walking from this scope outward.
    ///
    /// Returns a clone of the innermost provided value, or `None` when no
    /// scope in the chain provides one.
    #[must_use]
    pub fn resolve<T: Clone + 'static>(&self) -> Option<T> {
        let mut scope = Some(&self.scope);
        while let Some(s) = scope {
            if let Some(v) = s.providers.borrow().get(&TypeId::of::<T>()) {
                return v.downcast_ref::<T>().cloned();
            }
            scope = s.parent.as_ref();
        }
        None
    }

    /// Whether some scope in the chain provides a `T`.
    #[must_use]
    pub fn contains<T: 'static>(&self) -> bool {
        let mut scope = Some(&self.scope);
        while let Some(s) = scope {
            if s.providers.borrow().contains_key(&TypeId::of::<T>()) {
                return true;
            }
            scope = s.parent.as_ref();
        }
        false
    }

    /// Number of scopes in the chain (root context has depth 1).
    #[must_use]
    pub fn depth(&self) -> usize {
        let mut depth = 1;
        let mut scope = &self.scope;
        while let Some(parent) = &scope.parent {
            depth += 1;
            scope = parent;
        }
        depth
    }
}

/// Shared interior for [`RebuildHandle`].
struct RebuildInner {
    dirty: Cell<bool>,
    requests: Cell<u64>,
}

/// Per-component rebuild scheduling handle.
///
/// Cheaply cloneable; all clones share one dirty flag and counter.
pub struct RebuildHandle {
    inner: Rc<RebuildInner>,
}

impl Clone for RebuildHandle {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl Default for RebuildHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RebuildHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RebuildHandle")
            .field("dirty", &self.inner.dirty.get())
            .field("requests", &self.inner.requests.get())
            .finish()
    }
}

impl RebuildHandle {
    /// Create a clean handle with zero requests.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RebuildInner {
                dirty: Cell::new(false),
                requests: Cell::new(0),
            }),
        }
    }

    /// Mark the component dirty and count the request.
    pub fn request(&self) {
        self.inner.dirty.set(true);
        self.inner.requests.set(self.inner.requests.get() + 1);
        trace!(requests = self.inner.requests.get(), "rebuild requested");
    }

    /// Whether a rebuild is pending.
    #[must_use]
    pub fn needs_build(&self) -> bool {
        self.inner.dirty.get()
    }

    /// Read and clear the dirty flag. Returns the value it had.
    pub fn take(&self) -> bool {
        self.inner.dirty.replace(false)
    }

    /// Total rebuild requests ever made through this handle.
    #[must_use]
    pub fn requests(&self) -> u64 {
        self.inner.requests.get()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
