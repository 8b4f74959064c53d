#![forbid(unsafe_code)]

//! Error taxonomy for binding components.
//!
//! Binding errors are deliberately few: resolution failure and misuse of
//! the component lifecycle. Anything thrown by user-supplied predicates,
//! builders, or callbacks is *not* wrapped here — it propagates (as a
//! panic) to the hosting framework's own error boundary.

use thiserror::Error;

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, BindError>;

/// Errors surfaced by the binding components themselves.
#[derive(Debug, Error)]
pub enum BindError {
    /// No explicit store was supplied and no scope in the ambient context
    /// provides one of the requested type. Surfaced synchronously at
    /// mount/update time; never retried.
    #[error("no state container of type `{type_name}` found in scope")]
    ContainerNotFound {
        /// `std::any::type_name` of the state type that failed to resolve.
        type_name: &'static str,
    },

    /// A component was asked to build outside its mounted window.
    #[error("{component} is not mounted")]
    NotMounted {
        /// Component constructor name, e.g. `"BlocBuilder"`.
        component: &'static str,
    },
}
