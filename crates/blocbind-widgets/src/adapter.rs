#![forbid(unsafe_code)]

//! The subscription adapter every binding component is built from.
//!
//! # Design
//!
//! [`StateAdapter<S>`] owns the one mechanism the four components share:
//! resolve a [`Store<S>`] (explicitly supplied or looked up from the
//! ambient [`BuildContext`]), baseline its current state, subscribe to its
//! change stream, and run an ordered list of **gates** against every
//! emission. A gate is a `(when, react)` pair: `when` is a two-argument
//! predicate over `(previous, current)` state, `react` runs when it passes.
//! The components differ only in which gates they register — rebuild
//! requests, side-effect callbacks, or a projection compare.
//!
//! Per emission, gates are evaluated in registration order against the same
//! `(previous, current)` pair, then the baseline advances to the emitted
//! state exactly once — regardless of how many gates passed. No gate's
//! outcome affects another gate.
//!
//! # Lifecycle
//!
//! - [`attach()`](StateAdapter::attach): resolve, baseline, subscribe.
//!   Resolution failure is [`BindError::ContainerNotFound`], surfaced
//!   synchronously.
//! - [`reresolve()`](StateAdapter::reresolve): run resolution again after
//!   an ambient-dependency or configuration change. A result with the same
//!   [`StoreId`] is a no-op (the live subscription is kept); a different
//!   identity cancels the old subscription, re-baselines from the new
//!   store's current state, and subscribes afresh.
//! - [`detach()`](StateAdapter::detach): cancel the subscription.
//!   Idempotent, and harmless after the store has closed its stream.
//!
//! At most one live subscription exists per adapter at any time.
//!
//! # Failure Modes
//!
//! - **Re-entrant mutation**: a `react` closure emitting into the watched
//!   store panics (`RefCell` borrow rules in [`Store`]).
//! - **Panicking user code**: a panic in `when` or `react` propagates to
//!   the host; the baseline does not advance for that emission.

use std::cell::RefCell;
use std::rc::Rc;

use blocbind_core::context::BuildContext;
use blocbind_core::error::{BindError, Result};
use blocbind_core::store::{Store, Subscription};
use tracing::{debug, trace};

/// How an adapter obtains its store.
pub enum Source<S> {
    /// Use this exact store handle; ambient lookup is skipped.
    Explicit(Store<S>),
    /// Resolve a `Store<S>` from the ambient context at attach time.
    Ambient,
}

impl<S> std::fmt::Debug for Source<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Explicit(_) => f.write_str("Source::Explicit"),
            Self::Ambient => f.write_str("Source::Ambient"),
        }
    }
}

/// A `(when, react)` pair run against each emission.
struct Gate<S> {
    when: Box<dyn Fn(&S, &S) -> bool>,
    react: Box<dyn Fn(&S, &S)>,
}

/// State shared with the live subscription callback.
struct Shared<S> {
    /// Baseline for the next predicate evaluation. `Some` while attached.
    previous: RefCell<Option<S>>,
    gates: RefCell<Vec<Gate<S>>>,
}

/// Generic subscription adapter. See the module docs.
pub struct StateAdapter<S: Clone + PartialEq + 'static> {
    source: Source<S>,
    shared: Rc<Shared<S>>,
    store: Option<Store<S>>,
    subscription: Option<Subscription>,
}

impl<S: Clone + PartialEq + 'static> std::fmt::Debug for StateAdapter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateAdapter")
            .field("source", &self.source)
            .field("attached", &self.subscription.is_some())
            .field("gates", &self.shared.gates.borrow().len())
            .finish()
    }
}

impl<S: Clone + PartialEq + 'static> StateAdapter<S> {
    /// Create a detached adapter with no gates.
    #[must_use]
    pub fn new(source: Source<S>) -> Self {
        Self {
            source,
            shared: Rc::new(Shared {
                previous: RefCell::new(None),
                gates: RefCell::new(Vec::new()),
            }),
            store: None,
            subscription: None,
        }
    }

    /// Append a gate. Gates run in registration order per emission.
    pub fn gate(
        &mut self,
        when: impl Fn(&S, &S) -> bool + 'static,
        react: impl Fn(&S, &S) + 'static,
    ) {
        self.shared.gates.borrow_mut().push(Gate {
            when: Box::new(when),
            react: Box::new(react),
        });
    }

    /// Remove all gates. Components re-register their gates on every mount
    /// so a remount never stacks duplicates.
    pub fn clear_gates(&mut self) {
        self.shared.gates.borrow_mut().clear();
    }

    /// Replace the resolution strategy. Takes effect on the next
    /// [`attach()`](Self::attach) or [`reresolve()`](Self::reresolve).
    pub fn set_source(&mut self, source: Source<S>) {
        self.source = source;
    }

    /// Resolve the store, baseline its current state, and subscribe.
    ///
    /// An already-attached adapter rebinds: the previous subscription is
    /// cancelled first, so at most one subscription is ever live.
    ///
    /// # Errors
    ///
    /// [`BindError::ContainerNotFound`] when the source is ambient and no
    /// scope in `ctx` provides a `Store<S>`.
    pub fn attach(&mut self, ctx: &BuildContext) -> Result<()> {
        let store = self.resolve(ctx)?;
        self.bind(store);
        Ok(())
    }

    /// Re-run resolution after a dependency or configuration change.
    ///
    /// Returns `Ok(true)` when the adapter rebound to a different
    /// container, `Ok(false)` when resolution yielded the store already
    /// held (no action taken).
    ///
    /// # Errors
    ///
    /// [`BindError::ContainerNotFound`] as for [`attach()`](Self::attach).
    pub fn reresolve(&mut self, ctx: &BuildContext) -> Result<bool> {
        let resolved = self.resolve(ctx)?;
        if let Some(held) = &self.store {
            if held.id() == resolved.id() {
                return Ok(false);
            }
        }
        debug!(new_id = ?resolved.id(), "adapter rebinding to new container");
        self.bind(resolved);
        Ok(true)
    }

    /// Cancel the subscription and drop the store handle. Idempotent.
    pub fn detach(&mut self) {
        if self.subscription.is_none() && self.store.is_none() {
            return;
        }
        self.subscription = None;
        self.store = None;
        *self.shared.previous.borrow_mut() = None;
        debug!("adapter detached");
    }

    /// Whether a subscription is currently held.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.subscription.is_some()
    }

    /// The resolved store, while attached.
    #[must_use]
    pub fn store(&self) -> Option<&Store<S>> {
        self.store.as_ref()
    }

    /// The current baseline (last state seen), while attached.
    #[must_use]
    pub fn previous(&self) -> Option<S> {
        self.shared.previous.borrow().clone()
    }

    fn resolve(&self, ctx: &BuildContext) -> Result<Store<S>> {
        match &self.source {
            Source::Explicit(store) => Ok(store.clone()),
            Source::Ambient => {
                ctx.resolve::<Store<S>>()
                    .ok_or(BindError::ContainerNotFound {
                        type_name: std::any::type_name::<S>(),
                    })
            }
        }
    }

    /// Baseline from `store`'s current state and subscribe, replacing any
    /// previous subscription.
    fn bind(&mut self, store: Store<S>) {
        // Cancel the old subscription before opening the new one.
        self.subscription = None;
        *self.shared.previous.borrow_mut() = Some(store.state());

        let weak = Rc::downgrade(&self.shared);
        let sub = store.watch(move |next| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let Some(previous) = shared.previous.borrow().clone() else {
                return;
            };
            {
                let gates = shared.gates.borrow();
                for (idx, gate) in gates.iter().enumerate() {
                    if (gate.when)(&previous, next) {
                        trace!(gate = idx, "gate passed");
                        (gate.react)(&previous, next);
                    }
                }
            }
            // Baseline advances once per emission, whatever the gates did.
            *shared.previous.borrow_mut() = Some(next.clone());
        });

        debug!(id = ?store.id(), "adapter attached");
        self.subscription = Some(sub);
        self.store = Some(store);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn explicit(store: &Store<i32>) -> StateAdapter<i32> {
        StateAdapter::new(Source::Explicit(store.clone()))
    }

    #[test]
    fn attach_baselines_current_state() {
        let store = Store::new(7);
        let mut adapter = explicit(&store);
        adapter.attach(&BuildContext::root()).unwrap();

        assert!(adapter.is_attached());
        assert_eq!(adapter.previous(), Some(7));
        assert_eq!(adapter.store().unwrap().id(), store.id());
    }

    #[test]
    fn ambient_resolution() {
        let ctx = BuildContext::root();
        let store = Store::new(1);
        ctx.provide(store.clone());

        let mut adapter: StateAdapter<i32> = StateAdapter::new(Source::Ambient);
        adapter.attach(&ctx).unwrap();
        assert_eq!(adapter.store().unwrap().id(), store.id());
    }

    #[test]
    fn ambient_resolution_failure_is_synchronous() {
        let ctx = BuildContext::root();
        let mut adapter: StateAdapter<i32> = StateAdapter::new(Source::Ambient);

        let err = adapter.attach(&ctx).unwrap_err();
        match err {
            BindError::ContainerNotFound { type_name } => {
                assert!(type_name.contains("i32"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!adapter.is_attached());
    }

    #[test]
    fn gate_fires_iff_predicate_passes() {
        let store = Store::new(0);
        let mut adapter = explicit(&store);

        let fired = Rc::new(RefCell::new(Vec::new()));
        let probe = Rc::clone(&fired);
        adapter.gate(
            |_, current| current % 2 == 0,
            move |_, current| probe.borrow_mut().push(*current),
        );
        adapter.attach(&BuildContext::root()).unwrap();

        for s in [1, 2, 3, 4] {
            store.emit(s);
        }
        assert_eq!(*fired.borrow(), vec![2, 4]);
    }

    #[test]
    fn baseline_advances_regardless_of_gate_outcome() {
        let store = Store::new(0);
        let mut adapter = explicit(&store);

        let prevs = Rc::new(RefCell::new(Vec::new()));
        let probe = Rc::clone(&prevs);
        adapter.gate(
            move |previous, _| {
                probe.borrow_mut().push(*previous);
                false // never react
            },
            |_, _| panic!("gate must not react"),
        );
        adapter.attach(&BuildContext::root()).unwrap();

        for s in [1, 2, 3, 4] {
            store.emit(s);
        }
        assert_eq!(*prevs.borrow(), vec![0, 1, 2, 3]);
        assert_eq!(adapter.previous(), Some(4));
    }

    #[test]
    fn gates_run_in_registration_order() {
        let store = Store::new(0);
        let mut adapter = explicit(&store);

        let log = Rc::new(RefCell::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let probe = Rc::clone(&log);
            adapter.gate(|_, _| true, move |_, _| probe.borrow_mut().push(tag));
        }
        adapter.attach(&BuildContext::root()).unwrap();

        store.emit(1);
        assert_eq!(*log.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn gates_see_identical_pair() {
        let store = Store::new(10);
        let mut adapter = explicit(&store);

        let pairs = Rc::new(RefCell::new(Vec::new()));
        for _ in 0..2 {
            let probe = Rc::clone(&pairs);
            adapter.gate(
                |_, _| true,
                move |p, c| probe.borrow_mut().push((*p, *c)),
            );
        }
        adapter.attach(&BuildContext::root()).unwrap();

        store.emit(20);
        assert_eq!(*pairs.borrow(), vec![(10, 20), (10, 20)]);
    }

    #[test]
    fn reresolve_same_identity_is_noop() {
        let ctx = BuildContext::root();
        let store = Store::new(0);
        ctx.provide(store.clone());

        let mut adapter: StateAdapter<i32> = StateAdapter::new(Source::Ambient);
        adapter.attach(&ctx).unwrap();
        store.emit(1); // prune queue so observer_count is exact
        assert_eq!(store.observer_count(), 1);

        let rebound = adapter.reresolve(&ctx).unwrap();
        assert!(!rebound);
        store.emit(2);
        assert_eq!(store.observer_count(), 1, "subscription was kept");
        assert_eq!(adapter.previous(), Some(2));
    }

    #[test]
    fn reresolve_new_identity_rebinds_and_rebaselines() {
        let ctx = BuildContext::root();
        let first = Store::new(1);
        ctx.provide(first.clone());

        let hits = Rc::new(Cell::new(0u32));
        let probe = Rc::clone(&hits);
        let mut adapter: StateAdapter<i32> = StateAdapter::new(Source::Ambient);
        adapter.gate(|_, _| true, move |_, _| probe.set(probe.get() + 1));
        adapter.attach(&ctx).unwrap();

        first.emit(5);
        assert_eq!(hits.get(), 1);

        // Shadow the provider with a different container.
        let second = Store::new(100);
        ctx.provide(second.clone());
        let rebound = adapter.reresolve(&ctx).unwrap();
        assert!(rebound);
        assert_eq!(
            adapter.previous(),
            Some(100),
            "baseline reset to the new container's current state, not a stale one"
        );

        // Old container no longer reaches the adapter.
        first.emit(6);
        assert_eq!(hits.get(), 1);

        second.emit(101);
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn explicit_source_ignores_ambient() {
        let ctx = BuildContext::root();
        ctx.provide(Store::new(999));

        let store = Store::new(1);
        let mut adapter = explicit(&store);
        adapter.attach(&ctx).unwrap();
        assert_eq!(adapter.store().unwrap().id(), store.id());
    }

    #[test]
    fn set_source_then_reresolve_switches_container() {
        let ctx = BuildContext::root();
        let a = Store::new(1);
        let b = Store::new(2);

        let mut adapter = explicit(&a);
        adapter.attach(&ctx).unwrap();

        adapter.set_source(Source::Explicit(b.clone()));
        assert!(adapter.reresolve(&ctx).unwrap());
        assert_eq!(adapter.store().unwrap().id(), b.id());
        assert_eq!(adapter.previous(), Some(2));
    }

    #[test]
    fn detach_stops_callbacks_and_is_idempotent() {
        let store = Store::new(0);
        let hits = Rc::new(Cell::new(0u32));
        let probe = Rc::clone(&hits);

        let mut adapter = explicit(&store);
        adapter.gate(|_, _| true, move |_, _| probe.set(probe.get() + 1));
        adapter.attach(&BuildContext::root()).unwrap();

        store.emit(1);
        assert_eq!(hits.get(), 1);

        adapter.detach();
        adapter.detach(); // second teardown is a no-op
        assert!(!adapter.is_attached());
        assert_eq!(adapter.previous(), None);

        store.emit(2);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn closed_store_leaves_adapter_inert() {
        let store = Store::new(0);
        let hits = Rc::new(Cell::new(0u32));
        let probe = Rc::clone(&hits);

        let mut adapter = explicit(&store);
        adapter.gate(|_, _| true, move |_, _| probe.set(probe.get() + 1));
        adapter.attach(&BuildContext::root()).unwrap();

        store.emit(1);
        store.close();
        store.emit(2);
        assert_eq!(hits.get(), 1);

        // Teardown after stream end must not fault.
        adapter.detach();
    }

    #[test]
    fn reattach_replaces_subscription() {
        let store = Store::new(0);
        let mut adapter = explicit(&store);
        let ctx = BuildContext::root();

        adapter.attach(&ctx).unwrap();
        adapter.attach(&ctx).unwrap();
        store.emit(1); // prunes the cancelled observer
        assert_eq!(store.observer_count(), 1, "one live subscription at most");
    }

    #[test]
    fn clear_gates_prevents_stacking() {
        let store = Store::new(0);
        let hits = Rc::new(Cell::new(0u32));

        let mut adapter = explicit(&store);
        for _ in 0..2 {
            adapter.clear_gates();
            let probe = Rc::clone(&hits);
            adapter.gate(|_, _| true, move |_, _| probe.set(probe.get() + 1));
        }
        adapter.attach(&BuildContext::root()).unwrap();

        store.emit(1);
        assert_eq!(hits.get(), 1);
    }
}
