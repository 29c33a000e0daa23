//! The store seam.
//!
//! The pipeline never owns state. It reads state and re-dispatches through
//! a [`StoreApi`] implemented by the state container, and forwards allowed
//! actions to the rest of the container's middleware chain through a
//! [`Next`] function.

use std::sync::Arc;

use crate::action::Action;

/// Capabilities the pipeline needs from the state container.
pub trait StoreApi<S>: Send + Sync {
    /// Returns a snapshot of the current state.
    fn get_state(&self) -> S;

    /// Dispatches through the container's full middleware chain,
    /// including this pipeline.
    fn dispatch(&self, action: Action);
}

/// Forwards an action to the remainder of the container's chain (usually
/// the reducer).
pub type Next = Arc<dyn Fn(Action) + Send + Sync>;
