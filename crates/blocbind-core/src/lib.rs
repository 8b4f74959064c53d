#![forbid(unsafe_code)]

//! Core primitives for blocbind: state containers, subscriptions, and
//! build contexts.
//!
//! This crate holds the two halves that the binding components in
//! `blocbind-widgets` adapt between:
//!
//! - The container side: [`Store`], a single-threaded state container with
//!   a synchronous read path, an equality-gated change stream, and a
//!   pointer-derived identity ([`StoreId`]); plus [`Subscription`], the
//!   RAII handle on that stream.
//! - The component side: [`BuildContext`], an ambient lookup-by-type scope
//!   chain, and [`RebuildHandle`], the dirty-flag primitive a host polls
//!   to drive rebuilds.
//!
//! Everything here is `Rc`-based and single-threaded; see the module docs
//! for the borrow discipline.

pub mod context;
pub mod error;
pub mod store;

pub use context::{BuildContext, RebuildHandle};
pub use error::{BindError, Result};
pub use store::{Store, StoreId, Subscription};
