#![forbid(unsafe_code)]

//! State container with a synchronous read path and a change stream.
//!
//! # Design
//!
//! [`Store<S>`] wraps a state value in shared, reference-counted storage
//! (`Rc<RefCell<..>>`). Transitions go through [`emit()`](Store::emit): if
//! the next state differs from the current one (by `PartialEq`), the state
//! is replaced, the version counter is bumped, and every live observer is
//! called in registration order with the new state. Emitting a state equal
//! to the current one is a no-op.
//!
//! A store can be [`close()`](Store::close)d by whoever owns it. After close
//! the change stream is inert: no further observers fire, later `emit()`
//! calls are ignored, and existing [`Subscription`] guards become harmless
//! no-ops. Closing never raises an error toward observers.
//!
//! Cloning a `Store` clones the *handle*, not the container — both handles
//! share state, observers, and identity. Identity is what distinguishes two
//! containers; see [`StoreId`]. Two independently created stores are
//! different containers even when their states compare equal.
//!
//! # Performance
//!
//! | Operation   | Complexity                 |
//! |-------------|----------------------------|
//! | `state()`   | O(1) + one clone of `S`    |
//! | `emit()`    | O(N) where N = observers   |
//! | `watch()`   | O(1) amortized             |
//!
//! # Failure Modes
//!
//! - **Re-entrant emit**: calling `emit()` from inside an observer panics
//!   (`RefCell` borrow rules). Re-entrant transitions indicate a bug in the
//!   observer graph.
//! - **Observer leak**: dead weak observers accumulate until the next
//!   notification prunes them.

use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::debug;

type ObserverRc<S> = Rc<dyn Fn(&S)>;
type ObserverWeak<S> = Weak<dyn Fn(&S)>;

/// Identity of a state container.
///
/// Derived from the shared allocation, so every handle cloned from the same
/// store reports the same id, and two independently created stores always
/// report different ids — even when their states compare equal. Ids are
/// only meaningful for comparison while at least one handle is alive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StoreId(usize);

/// Shared interior for [`Store<S>`].
struct StoreInner<S> {
    state: S,
    version: u64,
    closed: bool,
    /// Observers stored as weak references. Dead entries are pruned on notify.
    observers: Vec<ObserverWeak<S>>,
}

/// A shared state container with change notification.
///
/// # Invariants
///
/// 1. `version` increments by exactly 1 per state-changing emission.
/// 2. `emit(s)` where `s == current` is a no-op.
/// 3. Observers are notified in registration order.
/// 4. After `close()`, no observer ever fires again and `emit()` is ignored.
/// 5. Handles cloned from one store share a single [`StoreId`].
pub struct Store<S> {
    inner: Rc<RefCell<StoreInner<S>>>,
}

// Manual Clone: shares the same Rc, preserving identity.
impl<S> Clone for Store<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<S: std::fmt::Debug> std::fmt::Debug for Store<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Store")
            .field("state", &inner.state)
            .field("version", &inner.version)
            .field("closed", &inner.closed)
            .field("observer_count", &inner.observers.len())
            .finish()
    }
}

impl<S: Clone + PartialEq + 'static> Store<S> {
    /// Create a store holding `initial` as its current state.
    ///
    /// The initial version is 0 and no observers are registered.
    #[must_use]
    pub fn new(initial: S) -> Self {
        Self {
            inner: Rc::new(RefCell::new(StoreInner {
                state: initial,
                version: 0,
                closed: false,
                observers: Vec::new(),
            })),
        }
    }

    /// Get a clone of the current state.
    #[must_use]
    pub fn state(&self) -> S {
        self.inner.borrow().state.clone()
    }

    /// Access the current state by reference without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.inner.borrow().state)
    }

    /// Transition to `next`. If `next` differs from the current state
    /// (by `PartialEq`), the version is bumped and live observers fire in
    /// registration order. Ignored after [`close()`](Store::close).
    ///
    /// # Panics
    ///
    /// Panics if called re-entrantly from inside an observer.
    pub fn emit(&self, next: S) {
        let changed = {
            let mut inner = self.inner.borrow_mut();
            if inner.closed {
                debug!(id = self.id().0, "emit on closed store ignored");
                return;
            }
            if inner.state == next {
                return;
            }
            inner.state = next;
            inner.version += 1;
            true
        };
        if changed {
            self.notify();
        }
    }

    /// Transition by deriving the next state from the current one.
    ///
    /// Equivalent to `emit(f(&current))`.
    pub fn update(&self, f: impl FnOnce(&S) -> S) {
        let next = self.with(f);
        self.emit(next);
    }

    /// Subscribe to the change stream. The callback fires with a reference
    /// to each new state emitted after this call; it never fires for the
    /// state current at subscribe time (read that via [`state()`](Store::state)).
    ///
    /// Returns a [`Subscription`] guard. Dropping the guard (or calling
    /// [`Subscription::cancel`]) detaches the callback. Subscribing to a
    /// closed store returns an inert guard.
    pub fn watch(&self, callback: impl Fn(&S) + 'static) -> Subscription {
        let mut inner = self.inner.borrow_mut();
        if inner.closed {
            return Subscription { guard: None };
        }
        let strong: ObserverRc<S> = Rc::new(callback);
        inner.observers.push(Rc::downgrade(&strong));
        // The guard keeps the callback Rc alive; the store holds only the
        // Weak side, so dropping the guard detaches the observer.
        Subscription {
            guard: Some(Box::new(strong)),
        }
    }

    /// End the change stream. Idempotent.
    ///
    /// Observers are dropped immediately, further `emit()` calls are
    /// ignored, and no error is surfaced to anyone still holding a
    /// [`Subscription`].
    pub fn close(&self) {
        let mut inner = self.inner.borrow_mut();
        if inner.closed {
            return;
        }
        inner.closed = true;
        inner.observers.clear();
        debug!(id = self.id().0, version = inner.version, "store closed");
    }

    /// Whether [`close()`](Store::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.borrow().closed
    }

    /// Identity of this container. Stable across handle clones.
    #[must_use]
    pub fn id(&self) -> StoreId {
        StoreId(Rc::as_ptr(&self.inner) as *const () as usize)
    }

    /// Current version. Increments by 1 per state-changing emission.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    /// Number of registered observers, including dead ones not yet pruned.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.inner.borrow().observers.len()
    }

    /// Notify live observers and prune dead ones.
    fn notify(&self) {
        // Collect live callbacks first so no borrow is held during calls.
        let callbacks: Vec<ObserverRc<S>> = {
            let mut inner = self.inner.borrow_mut();
            inner.observers.retain(|w| w.strong_count() > 0);
            inner.observers.iter().filter_map(Weak::upgrade).collect()
        };

        let state = self.inner.borrow().state.clone();
        for cb in &callbacks {
            cb(&state);
        }
    }
}

/// RAII guard for an observer registration.
///
/// Dropping the guard drops the strong callback reference, so the weak
/// entry in the store's observer list dies and is pruned on the next
/// notification. [`cancel()`](Subscription::cancel) does the same thing
/// eagerly and is idempotent — calling it twice, or on a guard whose
/// stream has already ended, is a no-op.
pub struct Subscription {
    guard: Option<Box<dyn Any>>,
}

impl Subscription {
    /// Detach the observer now. Safe to call any number of times.
    pub fn cancel(&mut self) {
        self.guard = None;
    }

    /// Whether this guard still holds an observer registration.
    ///
    /// Note: a guard on a closed store still reports `true` until
    /// cancelled; the observer simply never fires again.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.guard.is_some()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.guard.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
