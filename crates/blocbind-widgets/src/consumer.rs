#![forbid(unsafe_code)]

//! Combined side-effect and rebuild binding over one subscription.
//!
//! [`BlocConsumer<S, V>`] registers two gates on a single
//! [`StateAdapter`], in fixed order:
//!
//! 1. the side-effect gate (`listen_when` / `on_state`), then
//! 2. the rebuild gate (`build_when` / dirty flag).
//!
//! Both gates evaluate the same `(previous, current)` pair for each
//! emission, and neither outcome affects the other: the side effect runs
//! strictly before the rebuild decision, a failing `listen_when` never
//! blocks a rebuild, and a failing `build_when` never blocks the side
//! effect. The side-effect gate is a first-class gate on the shared
//! subscription rather than a hook buried inside the rebuild predicate, so
//! it runs even when the host would skip rebuild evaluation entirely.
//!
//! Build semantics are identical to [`BlocBuilder`](crate::BlocBuilder):
//! mounting marks the component dirty, and [`build()`](BlocConsumer::build)
//! renders from the store's current state and clears the flag.

use std::rc::Rc;

use blocbind_core::context::{BuildContext, RebuildHandle};
use blocbind_core::error::{BindError, Result};
use blocbind_core::store::Store;

use crate::adapter::{Source, StateAdapter};
use crate::Component;

type BuildFn<S, V> = Rc<dyn Fn(&S) -> V>;
type ListenFn<S> = Rc<dyn Fn(&BuildContext, &S)>;
type WhenFn<S> = Rc<dyn Fn(&S, &S) -> bool>;

/// Combined binding component. See the module docs.
pub struct BlocConsumer<S: Clone + PartialEq + 'static, V> {
    adapter: StateAdapter<S>,
    build: BuildFn<S, V>,
    on_state: ListenFn<S>,
    build_when: Option<WhenFn<S>>,
    listen_when: Option<WhenFn<S>>,
    rebuild: RebuildHandle,
    mounted: bool,
}

impl<S: Clone + PartialEq + 'static, V> std::fmt::Debug for BlocConsumer<S, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlocConsumer")
            .field("mounted", &self.mounted)
            .field("build_gated", &self.build_when.is_some())
            .field("listen_gated", &self.listen_when.is_some())
            .finish()
    }
}

impl<S: Clone + PartialEq + 'static, V> BlocConsumer<S, V> {
    /// Create a consumer that resolves its store from the ambient context.
    #[must_use]
    pub fn new(
        on_state: impl Fn(&BuildContext, &S) + 'static,
        build: impl Fn(&S) -> V + 'static,
    ) -> Self {
        Self::with_source(Source::Ambient, on_state, build)
    }

    /// Create a consumer bound to an explicit store.
    #[must_use]
    pub fn with_store(
        store: Store<S>,
        on_state: impl Fn(&BuildContext, &S) + 'static,
        build: impl Fn(&S) -> V + 'static,
    ) -> Self {
        Self::with_source(Source::Explicit(store), on_state, build)
    }

    fn with_source(
        source: Source<S>,
        on_state: impl Fn(&BuildContext, &S) + 'static,
        build: impl Fn(&S) -> V + 'static,
    ) -> Self {
        Self {
            adapter: StateAdapter::new(source),
            build: Rc::new(build),
            on_state: Rc::new(on_state),
            build_when: None,
            listen_when: None,
            rebuild: RebuildHandle::new(),
            mounted: false,
        }
    }

    /// Gate rebuilds on `when(previous, current)`. Independent of the
    /// side-effect gate.
    #[must_use]
    pub fn build_when(mut self, when: impl Fn(&S, &S) -> bool + 'static) -> Self {
        self.build_when = Some(Rc::new(when));
        self
    }

    /// Gate the side-effect callback on `when(previous, current)`.
    /// Independent of the rebuild gate.
    #[must_use]
    pub fn listen_when(mut self, when: impl Fn(&S, &S) -> bool + 'static) -> Self {
        self.listen_when = Some(Rc::new(when));
        self
    }

    /// Resolve, subscribe, and mark dirty for the initial render.
    ///
    /// # Errors
    ///
    /// [`BindError::ContainerNotFound`] when ambient resolution fails.
    pub fn mount(&mut self, ctx: &BuildContext) -> Result<()> {
        self.register_gates(ctx);
        self.adapter.attach(ctx)?;
        self.rebuild.request();
        self.mounted = true;
        Ok(())
    }

    /// React to an ambient-dependency change: rebind (and mark dirty) only
    /// when the resolved container identity changed.
    pub fn did_change_dependencies(&mut self, ctx: &BuildContext) -> Result<()> {
        if !self.mounted {
            return Ok(());
        }
        self.register_gates(ctx);
        if self.adapter.reresolve(ctx)? {
            self.rebuild.request();
        }
        Ok(())
    }

    /// Reconfigure with a new store (`None` switches back to ambient
    /// lookup), rebinding only on an identity change.
    pub fn update_store(&mut self, store: Option<Store<S>>, ctx: &BuildContext) -> Result<()> {
        self.adapter.set_source(match store {
            Some(s) => Source::Explicit(s),
            None => Source::Ambient,
        });
        if self.mounted && self.adapter.reresolve(ctx)? {
            self.rebuild.request();
        }
        Ok(())
    }

    /// Render the subtree from the store's current state and clear the
    /// dirty flag.
    ///
    /// # Errors
    ///
    /// [`BindError::NotMounted`] outside the mounted window.
    pub fn build(&self) -> Result<V> {
        let store = self.adapter.store().ok_or(BindError::NotMounted {
            component: "BlocConsumer",
        })?;
        let view = store.with(|s| (self.build)(s));
        self.rebuild.take();
        Ok(view)
    }

    /// Whether a rebuild is pending.
    #[must_use]
    pub fn needs_build(&self) -> bool {
        self.rebuild.needs_build()
    }

    /// The component's rebuild handle.
    #[must_use]
    pub fn rebuild_handle(&self) -> RebuildHandle {
        self.rebuild.clone()
    }

    /// Cancel the subscription. Idempotent.
    pub fn unmount(&mut self) {
        self.adapter.detach();
        self.mounted = false;
    }

    /// Side-effect gate first, rebuild gate second. The order is the
    /// ordering contract: for each emission the callback runs before the
    /// rebuild decision for that same emission.
    fn register_gates(&mut self, ctx: &BuildContext) {
        self.adapter.clear_gates();

        let on_state = Rc::clone(&self.on_state);
        let cx = ctx.clone();
        match &self.listen_when {
            Some(when) => {
                let when = Rc::clone(when);
                self.adapter
                    .gate(move |p, c| when(p, c), move |_, c| on_state(&cx, c));
            }
            None => {
                self.adapter.gate(|_, _| true, move |_, c| on_state(&cx, c));
            }
        }

        let rebuild = self.rebuild.clone();
        match &self.build_when {
            Some(when) => {
                let when = Rc::clone(when);
                self.adapter
                    .gate(move |p, c| when(p, c), move |_, _| rebuild.request());
            }
            None => {
                self.adapter.gate(|_, _| true, move |_, _| rebuild.request());
            }
        }
    }
}

impl<S: Clone + PartialEq + 'static, V> Component for BlocConsumer<S, V> {
    fn mount(&mut self, ctx: &BuildContext) -> Result<()> {
        BlocConsumer::mount(self, ctx)
    }

    fn did_change_dependencies(&mut self, ctx: &BuildContext) -> Result<()> {
        BlocConsumer::did_change_dependencies(self, ctx)
    }

    fn unmount(&mut self) {
        BlocConsumer::unmount(self);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
