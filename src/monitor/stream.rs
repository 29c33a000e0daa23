use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::error::{ExecutionError, KyroError, KyroResult};

use super::emitter::EmitterInner;
use super::event::{MonitorEvent, SubscriptionId};

/// A channel-backed subscription to a pipeline's monitor events.
///
/// Dropping this stream unsubscribes.
pub struct MonitorStream {
    subscription_id: SubscriptionId,
    rx: Receiver<MonitorEvent>,
    emitter: Weak<EmitterInner>,
    unregistered: AtomicBool,
}

impl MonitorStream {
    pub(crate) fn new(subscription_id: SubscriptionId, rx: Receiver<MonitorEvent>, emitter: Weak<EmitterInner>) -> Self {
        Self {
            subscription_id,
            rx,
            emitter,
            unregistered: AtomicBool::new(false),
        }
    }

    /// The subscription id backing this stream.
    #[must_use]
    pub const fn subscription_id(&self) -> SubscriptionId {
        self.subscription_id
    }

    /// Explicit unregistration. Idempotent.
    ///
    /// Events already buffered stay readable.
    pub fn unsubscribe(&self) {
        if self.unregistered.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(inner) = self.emitter.upgrade() {
            inner.remove(self.subscription_id);
        }
    }

    /// Receive the next event (blocking).
    pub fn recv(&self) -> KyroResult<MonitorEvent> {
        self.rx.recv().map_err(|_| {
            KyroError::Execution(ExecutionError::Disconnected {
                path: "monitor_stream".to_string(),
            })
        })
    }

    /// Receive the next event with a timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> KyroResult<MonitorEvent> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => KyroError::Execution(ExecutionError::Timeout {
                duration_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
            }),
            RecvTimeoutError::Disconnected => KyroError::Execution(ExecutionError::Disconnected {
                path: "monitor_stream".to_string(),
            }),
        })
    }

    /// Next buffered event, if any.
    #[must_use]
    pub fn try_recv(&self) -> Option<MonitorEvent> {
        self.rx.try_recv().ok()
    }

    /// Every buffered event, in emission order.
    #[must_use]
    pub fn drain(&self) -> Vec<MonitorEvent> {
        self.rx.try_iter().collect()
    }
}

impl Drop for MonitorStream {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for MonitorStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorStream")
            .field("subscription_id", &self.subscription_id)
            .field("buffered", &self.rx.len())
            .finish()
    }
}
