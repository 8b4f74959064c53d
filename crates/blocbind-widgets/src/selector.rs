#![forbid(unsafe_code)]

//! Projection binding: rebuild only when a derived value changes.
//!
//! [`BlocSelector<S, T, V>`] wraps the [`StateAdapter`] with a projection
//! step. Every emission is mapped through the user's selector function
//! `Fn(&S) -> T`; the result is compared by `PartialEq` to the projection
//! currently held, and only a *different* projection is stored and allowed
//! to request a rebuild. The underlying state changing is neither necessary
//! nor sufficient — distinct states mapping to equal projections do not
//! rebuild, and value equality (not identity) is what's compared.
//!
//! [`build()`](BlocSelector::build) renders from the held projection, not
//! from the raw state.
//!
//! The selector function is assumed pure and its outputs immutable;
//! mutating a projected value in place breaks the change-detection
//! contract.

use std::cell::RefCell;
use std::rc::Rc;

use blocbind_core::context::{BuildContext, RebuildHandle};
use blocbind_core::error::{BindError, Result};
use blocbind_core::store::Store;

use crate::adapter::{Source, StateAdapter};
use crate::Component;

type SelectFn<S, T> = Rc<dyn Fn(&S) -> T>;
type BuildFn<T, V> = Rc<dyn Fn(&T) -> V>;

/// Projection binding component. See the module docs.
pub struct BlocSelector<S, T, V>
where
    S: Clone + PartialEq + 'static,
    T: Clone + PartialEq + 'static,
{
    adapter: StateAdapter<S>,
    select: SelectFn<S, T>,
    build: BuildFn<T, V>,
    /// Held projection; `Some` while mounted. Shared with the gate.
    selected: Rc<RefCell<Option<T>>>,
    rebuild: RebuildHandle,
    mounted: bool,
}

impl<S, T, V> std::fmt::Debug for BlocSelector<S, T, V>
where
    S: Clone + PartialEq + 'static,
    T: Clone + PartialEq + std::fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlocSelector")
            .field("mounted", &self.mounted)
            .field("selected", &self.selected.borrow())
            .finish()
    }
}

impl<S, T, V> BlocSelector<S, T, V>
where
    S: Clone + PartialEq + 'static,
    T: Clone + PartialEq + 'static,
{
    /// Create a selector that resolves its store from the ambient context.
    #[must_use]
    pub fn new(select: impl Fn(&S) -> T + 'static, build: impl Fn(&T) -> V + 'static) -> Self {
        Self::with_source(Source::Ambient, select, build)
    }

    /// Create a selector bound to an explicit store.
    #[must_use]
    pub fn with_store(
        store: Store<S>,
        select: impl Fn(&S) -> T + 'static,
        build: impl Fn(&T) -> V + 'static,
    ) -> Self {
        Self::with_source(Source::Explicit(store), select, build)
    }

    fn with_source(
        source: Source<S>,
        select: impl Fn(&S) -> T + 'static,
        build: impl Fn(&T) -> V + 'static,
    ) -> Self {
        Self {
            adapter: StateAdapter::new(source),
            select: Rc::new(select),
            build: Rc::new(build),
            selected: Rc::new(RefCell::new(None)),
            rebuild: RebuildHandle::new(),
            mounted: false,
        }
    }

    /// Resolve, subscribe, project the current state, and mark dirty for
    /// the initial render.
    ///
    /// # Errors
    ///
    /// [`BindError::ContainerNotFound`] when ambient resolution fails.
    pub fn mount(&mut self, ctx: &BuildContext) -> Result<()> {
        self.register_gate();
        self.adapter.attach(ctx)?;
        self.reproject();
        self.rebuild.request();
        self.mounted = true;
        Ok(())
    }

    /// React to an ambient-dependency change. On rebind the projection is
    /// recomputed from the new container's current state; a rebuild is
    /// requested only when the projection actually changed.
    pub fn did_change_dependencies(&mut self, ctx: &BuildContext) -> Result<()> {
        if !self.mounted {
            return Ok(());
        }
        if self.adapter.reresolve(ctx)? {
            let changed = self.reproject();
            if changed {
                self.rebuild.request();
            }
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
        if self.mounted && self.adapter.reresolve(ctx)? && self.reproject() {
            self.rebuild.request();
        }
        Ok(())
    }

    /// Render the subtree from the held projection and clear the dirty
    /// flag.
    ///
    /// # Errors
    ///
    /// [`BindError::NotMounted`] outside the mounted window.
    pub fn build(&self) -> Result<V> {
        let selected = self.selected.borrow();
        let value = selected.as_ref().ok_or(BindError::NotMounted {
            component: "BlocSelector",
        })?;
        let view = (self.build)(value);
        self.rebuild.take();
        Ok(view)
    }

    /// The projection currently held, while mounted.
    #[must_use]
    pub fn selected(&self) -> Option<T> {
        self.selected.borrow().clone()
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

    /// Cancel the subscription and drop the held projection. Idempotent.
    pub fn unmount(&mut self) {
        self.adapter.detach();
        *self.selected.borrow_mut() = None;
        self.mounted = false;
    }

    /// Recompute the projection from the attached store's current state.
    /// Returns whether the held value changed.
    fn reproject(&self) -> bool {
        let Some(store) = self.adapter.store() else {
            return false;
        };
        let projected = store.with(|s| (self.select)(s));
        let mut held = self.selected.borrow_mut();
        if held.as_ref() == Some(&projected) {
            false
        } else {
            *held = Some(projected);
            true
        }
    }

    fn register_gate(&mut self) {
        self.adapter.clear_gates();
        let select = Rc::clone(&self.select);
        let held = Rc::clone(&self.selected);
        let rebuild = self.rebuild.clone();
        self.adapter.gate(
            |_, _| true,
            move |_, current| {
                let projected = select(current);
                let mut held = held.borrow_mut();
                if held.as_ref() != Some(&projected) {
                    *held = Some(projected);
                    rebuild.request();
                }
            },
        );
    }
}

impl<S, T, V> Component for BlocSelector<S, T, V>
where
    S: Clone + PartialEq + 'static,
    T: Clone + PartialEq + 'static,
{
    fn mount(&mut self, ctx: &BuildContext) -> Result<()> {
        BlocSelector::mount(self, ctx)
    }

    fn did_change_dependencies(&mut self, ctx: &BuildContext) -> Result<()> {
        BlocSelector::did_change_dependencies(self, ctx)
    }

    fn unmount(&mut self) {
        BlocSelector::unmount(self);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
