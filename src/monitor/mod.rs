//! MONITOR subsystem: the pipeline's lifecycle trace.
//!
//! Every transition of every chain is published as a [`MonitorEvent`]
//! through the pipeline's [`MonitorEmitter`]. Consumers either register a
//! callback or open a channel-backed [`MonitorStream`].

/// Multicast emitter and callback subscriptions.
pub mod emitter;
/// Event and id types.
pub mod event;
/// Channel-backed subscriber stream.
pub mod stream;

pub use emitter::{MonitorEmitter, Subscription};
pub use event::{ChainId, MonitorEvent, MonitorOp, SubscriptionId};
pub use stream::MonitorStream;
