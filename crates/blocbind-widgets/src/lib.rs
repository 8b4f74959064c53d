#![forbid(unsafe_code)]

//! Binding components connecting [`blocbind_core`] stores to a host's
//! rebuild cycle.
//!
//! One mechanism, four presets. [`StateAdapter`](adapter::StateAdapter)
//! owns the subscription lifecycle — resolve a store, baseline its current
//! state, run `(previous, current)` gates per emission, tear down
//! deterministically — and each component is a thin configuration of that
//! adapter:
//!
//! - [`BlocBuilder`]: rebuild the subtree when `build_when` passes.
//! - [`BlocListener`]: run a side-effect callback when `listen_when`
//!   passes; renders only its optional static child.
//! - [`BlocConsumer`]: both of the above on one subscription, side effect
//!   strictly first.
//! - [`BlocSelector`]: rebuild only when a projection of the state changes
//!   by value equality.
//!
//! Hosts drive components through the [`Component`] lifecycle and poll
//! each component's [`RebuildHandle`](blocbind_core::RebuildHandle) for
//! pending rebuilds. All omitted predicates default to always-true.

pub mod adapter;
pub mod builder;
pub mod consumer;
pub mod listener;
pub mod selector;

pub use adapter::{Source, StateAdapter};
pub use builder::BlocBuilder;
pub use consumer::BlocConsumer;
pub use listener::{BlocListener, MultiListener};
pub use selector::BlocSelector;

use blocbind_core::context::BuildContext;
use blocbind_core::error::Result;

/// Lifecycle contract shared by every binding component.
///
/// A host calls [`mount`](Component::mount) exactly once before using a
/// component, [`did_change_dependencies`](Component::did_change_dependencies)
/// whenever the ambient context may have changed what a lookup would
/// yield, and [`unmount`](Component::unmount) on teardown. Unmount is
/// idempotent; mount after unmount re-attaches.
pub trait Component {
    /// Resolve and subscribe. Resolution failure propagates synchronously.
    fn mount(&mut self, ctx: &BuildContext) -> Result<()>;

    /// Re-run resolution; rebinds only on a container identity change.
    fn did_change_dependencies(&mut self, ctx: &BuildContext) -> Result<()>;

    /// Release the subscription. Safe to call repeatedly.
    fn unmount(&mut self);
}
