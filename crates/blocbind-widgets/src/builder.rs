#![forbid(unsafe_code)]

//! Rebuild-gated binding: recompute a subtree when state warrants it.
//!
//! [`BlocBuilder<S, V>`] applies the [`StateAdapter`] with rebuild-gate
//! semantics only: one gate whose predicate is the optional `build_when`
//! (always-true when omitted) and whose reaction marks the component dirty
//! through its [`RebuildHandle`]. The host polls
//! [`needs_build()`](BlocBuilder::needs_build) and calls
//! [`build()`](BlocBuilder::build), which renders the subtree from the
//! store's *current* state — not from the emission that requested the
//! rebuild, so coalesced emissions render once with the latest state.
//!
//! Mounting marks the component dirty so the host renders it at least once.
//!
//! # Ambient identity tracking
//!
//! With no explicit store, the builder stays subscribed to whatever
//! container the ambient lookup currently yields:
//! [`did_change_dependencies()`](BlocBuilder::did_change_dependencies)
//! re-resolves and rebinds only when the resolved identity actually
//! changed, so provider churn that yields the same container is free.

use std::rc::Rc;

use blocbind_core::context::{BuildContext, RebuildHandle};
use blocbind_core::error::{BindError, Result};
use blocbind_core::store::Store;

use crate::adapter::{Source, StateAdapter};
use crate::Component;

type BuildFn<S, V> = Rc<dyn Fn(&S) -> V>;
type WhenFn<S> = Rc<dyn Fn(&S, &S) -> bool>;

/// Rebuild-gated binding component. See the module docs.
pub struct BlocBuilder<S: Clone + PartialEq + 'static, V> {
    adapter: StateAdapter<S>,
    build: BuildFn<S, V>,
    when: Option<WhenFn<S>>,
    rebuild: RebuildHandle,
    mounted: bool,
}

impl<S: Clone + PartialEq + 'static, V> std::fmt::Debug for BlocBuilder<S, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlocBuilder")
            .field("mounted", &self.mounted)
            .field("gated", &self.when.is_some())
            .field("needs_build", &self.rebuild.needs_build())
            .finish()
    }
}

impl<S: Clone + PartialEq + 'static, V> BlocBuilder<S, V> {
    /// Create a builder that resolves its store from the ambient context.
    #[must_use]
    pub fn new(build: impl Fn(&S) -> V + 'static) -> Self {
        Self::with_source(Source::Ambient, build)
    }

    /// Create a builder bound to an explicit store.
    #[must_use]
    pub fn with_store(store: Store<S>, build: impl Fn(&S) -> V + 'static) -> Self {
        Self::with_source(Source::Explicit(store), build)
    }

    fn with_source(source: Source<S>, build: impl Fn(&S) -> V + 'static) -> Self {
        Self {
            adapter: StateAdapter::new(source),
            build: Rc::new(build),
            when: None,
            rebuild: RebuildHandle::new(),
            mounted: false,
        }
    }

    /// Gate rebuilds on `when(previous, current)`. Omitted means rebuild on
    /// every emission.
    #[must_use]
    pub fn build_when(mut self, when: impl Fn(&S, &S) -> bool + 'static) -> Self {
        self.when = Some(Rc::new(when));
        self
    }

    /// Resolve, subscribe, and mark dirty for the initial render.
    ///
    /// # Errors
    ///
    /// [`BindError::ContainerNotFound`] when ambient resolution fails.
    pub fn mount(&mut self, ctx: &BuildContext) -> Result<()> {
        self.register_gate();
        self.adapter.attach(ctx)?;
        self.rebuild.request();
        self.mounted = true;
        Ok(())
    }

    /// React to an ambient-dependency change: re-resolve, and rebind (plus
    /// mark dirty) only when the resolved container identity changed.
    pub fn did_change_dependencies(&mut self, ctx: &BuildContext) -> Result<()> {
        if !self.mounted {
            return Ok(());
        }
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
    /// [`BindError::NotMounted`] before [`mount()`](Self::mount) or after
    /// [`unmount()`](Self::unmount).
    pub fn build(&self) -> Result<V> {
        let store = self.adapter.store().ok_or(BindError::NotMounted {
            component: "BlocBuilder",
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

    /// The component's rebuild handle (shared with the adapter's gate).
    #[must_use]
    pub fn rebuild_handle(&self) -> RebuildHandle {
        self.rebuild.clone()
    }

    /// Cancel the subscription. Idempotent.
    pub fn unmount(&mut self) {
        self.adapter.detach();
        self.mounted = false;
    }

    fn register_gate(&mut self) {
        self.adapter.clear_gates();
        let rebuild = self.rebuild.clone();
        match &self.when {
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

impl<S: Clone + PartialEq + 'static, V> Component for BlocBuilder<S, V> {
    fn mount(&mut self, ctx: &BuildContext) -> Result<()> {
        BlocBuilder::mount(self, ctx)
    }

    fn did_change_dependencies(&mut self, ctx: &BuildContext) -> Result<()> {
        BlocBuilder::did_change_dependencies(self, ctx)
    }

    fn unmount(&mut self) {
        BlocBuilder::unmount(self);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
