#![forbid(unsafe_code)]

//! Side-effect binding: run a callback when state warrants it.
//!
//! [`BlocListener<S, V>`] applies the [`StateAdapter`] with side-effect
//! semantics only: one gate whose predicate is the optional `listen_when`
//! (always-true when omitted) and whose reaction invokes the user callback
//! with the build context and the newly emitted state. The listener never
//! requests a rebuild.
//!
//! A listener may declare a static child subtree. The child is returned
//! unconditionally from [`build()`](BlocListener::build) and is not itself
//! reactive — the listener is a pass-through wrapper whose sole job is to
//! run the callback.
//!
//! [`MultiListener`] flattens a stack of nested binding components into one
//! flat list, forwarding each lifecycle call in order (teardown runs in
//! reverse registration order).

use std::rc::Rc;

use blocbind_core::context::BuildContext;
use blocbind_core::error::Result;
use blocbind_core::store::Store;
use tracing::debug;

use crate::adapter::{Source, StateAdapter};
use crate::Component;

type ListenFn<S> = Rc<dyn Fn(&BuildContext, &S)>;
type WhenFn<S> = Rc<dyn Fn(&S, &S) -> bool>;

/// Side-effect binding component. See the module docs.
pub struct BlocListener<S: Clone + PartialEq + 'static, V = ()> {
    adapter: StateAdapter<S>,
    on_state: ListenFn<S>,
    when: Option<WhenFn<S>>,
    child: Option<V>,
    mounted: bool,
}

impl<S: Clone + PartialEq + 'static, V> std::fmt::Debug for BlocListener<S, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlocListener")
            .field("mounted", &self.mounted)
            .field("gated", &self.when.is_some())
            .field("has_child", &self.child.is_some())
            .finish()
    }
}

impl<S: Clone + PartialEq + 'static, V> BlocListener<S, V> {
    /// Create a listener that resolves its store from the ambient context.
    #[must_use]
    pub fn new(on_state: impl Fn(&BuildContext, &S) + 'static) -> Self {
        Self::with_source(Source::Ambient, on_state)
    }

    /// Create a listener bound to an explicit store.
    #[must_use]
    pub fn with_store(store: Store<S>, on_state: impl Fn(&BuildContext, &S) + 'static) -> Self {
        Self::with_source(Source::Explicit(store), on_state)
    }

    fn with_source(source: Source<S>, on_state: impl Fn(&BuildContext, &S) + 'static) -> Self {
        Self {
            adapter: StateAdapter::new(source),
            on_state: Rc::new(on_state),
            when: None,
            child: None,
            mounted: false,
        }
    }

    /// Gate the callback on `when(previous, current)`. Omitted means the
    /// callback fires on every emission.
    #[must_use]
    pub fn listen_when(mut self, when: impl Fn(&S, &S) -> bool + 'static) -> Self {
        self.when = Some(Rc::new(when));
        self
    }

    /// Attach a static child subtree, rendered unconditionally.
    #[must_use]
    pub fn child(mut self, child: V) -> Self {
        self.child = Some(child);
        self
    }

    /// Resolve and subscribe.
    ///
    /// # Errors
    ///
    /// [`BindError::ContainerNotFound`](blocbind_core::BindError::ContainerNotFound)
    /// when ambient resolution fails.
    pub fn mount(&mut self, ctx: &BuildContext) -> Result<()> {
        self.register_gate(ctx);
        self.adapter.attach(ctx)?;
        self.mounted = true;
        Ok(())
    }

    /// React to an ambient-dependency change: rebind only when the resolved
    /// container identity changed.
    pub fn did_change_dependencies(&mut self, ctx: &BuildContext) -> Result<()> {
        if !self.mounted {
            return Ok(());
        }
        // The gate captures the context, so refresh it alongside resolution.
        self.register_gate(ctx);
        self.adapter.reresolve(ctx)?;
        Ok(())
    }

    /// Reconfigure with a new store (`None` switches back to ambient
    /// lookup), rebinding only on an identity change.
    pub fn update_store(&mut self, store: Option<Store<S>>, ctx: &BuildContext) -> Result<()> {
        self.adapter.set_source(match store {
            Some(s) => Source::Explicit(s),
            None => Source::Ambient,
        });
        if self.mounted {
            self.adapter.reresolve(ctx)?;
        }
        Ok(())
    }

    /// The static child, unconditionally. Not reactive to state changes.
    #[must_use]
    pub fn build(&self) -> Option<&V> {
        self.child.as_ref()
    }

    /// Cancel the subscription. Idempotent.
    pub fn unmount(&mut self) {
        self.adapter.detach();
        self.mounted = false;
    }

    fn register_gate(&mut self, ctx: &BuildContext) {
        self.adapter.clear_gates();
        let on_state = Rc::clone(&self.on_state);
        let cx = ctx.clone();
        match &self.when {
            Some(when) => {
                let when = Rc::clone(when);
                self.adapter
                    .gate(move |p, c| when(p, c), move |_, c| on_state(&cx, c));
            }
            None => {
                self.adapter.gate(|_, _| true, move |_, c| on_state(&cx, c));
            }
        }
    }
}

impl<S: Clone + PartialEq + 'static, V: 'static> Component for BlocListener<S, V> {
    fn mount(&mut self, ctx: &BuildContext) -> Result<()> {
        BlocListener::mount(self, ctx)
    }

    fn did_change_dependencies(&mut self, ctx: &BuildContext) -> Result<()> {
        BlocListener::did_change_dependencies(self, ctx)
    }

    fn unmount(&mut self) {
        BlocListener::unmount(self);
    }
}

/// Flat composition of binding components sharing one lifecycle.
///
/// Children are mounted and updated in registration order and unmounted in
/// reverse order. A mount failure unmounts the children already mounted
/// before returning the error, so a partially mounted stack never leaks a
/// subscription.
#[derive(Default)]
pub struct MultiListener {
    children: Vec<Box<dyn Component>>,
    mounted: usize,
}

impl std::fmt::Debug for MultiListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiListener")
            .field("children", &self.children.len())
            .field("mounted", &self.mounted)
            .finish()
    }
}

impl MultiListener {
    /// Create an empty composition.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a component. Order here is lifecycle order.
    #[must_use]
    pub fn with(mut self, component: impl Component + 'static) -> Self {
        self.children.push(Box::new(component));
        self
    }

    /// Number of composed components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Whether the composition is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

impl Component for MultiListener {
    fn mount(&mut self, ctx: &BuildContext) -> Result<()> {
        for (idx, child) in self.children.iter_mut().enumerate() {
            if let Err(err) = child.mount(ctx) {
                debug!(failed_at = idx, "multi-listener mount failed, rolling back");
                for earlier in self.children[..idx].iter_mut().rev() {
                    earlier.unmount();
                }
                self.mounted = 0;
                return Err(err);
            }
        }
        self.mounted = self.children.len();
        Ok(())
    }

    fn did_change_dependencies(&mut self, ctx: &BuildContext) -> Result<()> {
        for child in &mut self.children {
            child.did_change_dependencies(ctx)?;
        }
        Ok(())
    }

    fn unmount(&mut self) {
        for child in self.children.iter_mut().rev() {
            child.unmount();
        }
        self.mounted = 0;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    #[test]
    fn callback_fires_on_every_emission_by_default() {
        let store = Store::new(0);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let probe = Rc::clone(&seen);

        let mut listener: BlocListener<i32> =
            BlocListener::with_store(store.clone(), move |_, s| probe.borrow_mut().push(*s));
        listener.mount(&BuildContext::root()).unwrap();

        for s in [1, 2, 3] {
            store.emit(s);
        }
        assert_eq!(*seen.borrow(), vec![1, 2, 3]);
    }

    #[test]
    fn listen_when_gates_the_callback() {
        let store = Store::new(0);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let probe = Rc::clone(&seen);

        let mut listener: BlocListener<i32> =
            BlocListener::with_store(store.clone(), move |_, s| probe.borrow_mut().push(*s))
                .listen_when(|previous, current| current > previous);
        listener.mount(&BuildContext::root()).unwrap();

        store.emit(5); // 0 -> 5, rising
        store.emit(3); // 5 -> 3, falling
        store.emit(7); // 3 -> 7, rising
        assert_eq!(*seen.borrow(), vec![5, 7]);
    }

    #[test]
    fn callback_receives_the_build_context() {
        #[derive(Clone, PartialEq, Debug)]
        struct Flag(&'static str);

        let ctx = BuildContext::root();
        ctx.provide(Flag("from-scope"));
        let store = Store::new(0);
        ctx.provide(store.clone());

        let seen = Rc::new(RefCell::new(None));
        let probe = Rc::clone(&seen);
        let mut listener: BlocListener<i32> =
            BlocListener::new(move |cx, _| *probe.borrow_mut() = cx.resolve::<Flag>());
        listener.mount(&ctx).unwrap();

        store.emit(1);
        assert_eq!(*seen.borrow(), Some(Flag("from-scope")));
    }

    #[test]
    fn child_is_rendered_unconditionally() {
        let store = Store::new(0);
        let mut listener = BlocListener::with_store(store.clone(), |_, _: &i32| {})
            .child("static subtree");
        listener.mount(&BuildContext::root()).unwrap();

        assert_eq!(listener.build(), Some(&"static subtree"));
        store.emit(1);
        assert_eq!(listener.build(), Some(&"static subtree"), "child is not reactive");
    }

    #[test]
    fn no_child_builds_none() {
        let listener: BlocListener<i32> = BlocListener::with_store(Store::new(0), |_, _| {});
        assert_eq!(listener.build(), None);
    }

    #[test]
    fn unmount_stops_the_callback() {
        let store = Store::new(0);
        let hits = Rc::new(Cell::new(0u32));
        let probe = Rc::clone(&hits);

        let mut listener: BlocListener<i32> =
            BlocListener::with_store(store.clone(), move |_, _| probe.set(probe.get() + 1));
        listener.mount(&BuildContext::root()).unwrap();

        store.emit(1);
        listener.unmount();
        listener.unmount();
        store.emit(2);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn rebind_resets_baseline_for_listen_when() {
        let ctx = BuildContext::root();
        let first = Store::new(10);
        ctx.provide(first.clone());

        let seen = Rc::new(RefCell::new(Vec::new()));
        let probe = Rc::clone(&seen);
        let mut listener: BlocListener<i32> =
            BlocListener::new(move |_, s| probe.borrow_mut().push(*s))
                .listen_when(|previous, current| current > previous);
        listener.mount(&ctx).unwrap();

        // New container whose current state is 100.
        let second = Store::new(100);
        ctx.provide(second.clone());
        listener.did_change_dependencies(&ctx).unwrap();

        // 50 > 10 would pass against the stale baseline; against the fresh
        // baseline of 100 it must not.
        second.emit(50);
        assert!(seen.borrow().is_empty());

        second.emit(150);
        assert_eq!(*seen.borrow(), vec![150]);
    }

    // ── MultiListener ────────────────────────────────────────────────

    #[test]
    fn multi_listener_mounts_all_children() {
        let ctx = BuildContext::root();
        let store = Store::new(0);
        ctx.provide(store.clone());

        let hits = Rc::new(Cell::new(0u32));
        let a = Rc::clone(&hits);
        let b = Rc::clone(&hits);

        let mut multi = MultiListener::new()
            .with(BlocListener::<i32>::new(move |_, _| a.set(a.get() + 1)))
            .with(BlocListener::<i32>::new(move |_, _| b.set(b.get() + 10)));
        assert_eq!(multi.len(), 2);

        multi.mount(&ctx).unwrap();
        store.emit(1);
        assert_eq!(hits.get(), 11);

        multi.unmount();
        store.emit(2);
        assert_eq!(hits.get(), 11);
    }

    #[test]
    fn multi_listener_mount_failure_rolls_back() {
        let ctx = BuildContext::root();
        let store = Store::new(0);
        ctx.provide(store.clone());

        let hits = Rc::new(Cell::new(0u32));
        let probe = Rc::clone(&hits);

        let mut multi = MultiListener::new()
            .with(BlocListener::<i32>::new(move |_, _| probe.set(probe.get() + 1)))
            // No Store<String> in scope: this child fails to mount.
            .with(BlocListener::<String>::new(|_, _| {}));

        assert!(multi.mount(&ctx).is_err());

        // The first child must have been unmounted by the rollback.
        store.emit(1);
        assert_eq!(hits.get(), 0);
    }
}
