//! In-flight chain registry and drain notification.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::monitor::ChainId;

use super::scheduler::Scheduler;

type Waiter = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct TrackerState {
    pending: HashSet<ChainId>,
    waiters: Vec<Waiter>,
}

/// Tracks which chains are mid-flight.
///
/// A chain is entered when it is created at the top of the pipeline and
/// exited once it can emit nothing further (its process tail included).
pub struct ConcurrencyTracker {
    state: Mutex<TrackerState>,
    scheduler: Arc<dyn Scheduler>,
}

impl ConcurrencyTracker {
    /// Creates an idle tracker. Idle drain callbacks go through `scheduler`.
    #[must_use]
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            scheduler,
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn enter(&self, chain: ChainId) {
        self.lock().pending.insert(chain);
    }

    /// Returns true when this exit drained the registry.
    pub(crate) fn exit(&self, chain: ChainId) -> bool {
        let waiters = {
            let mut state = self.lock();
            if !state.pending.remove(&chain) || !state.pending.is_empty() {
                return false;
            }
            std::mem::take(&mut state.waiters)
        };

        debug!(waiters = waiters.len(), "pipeline drained");
        for waiter in waiters {
            waiter();
        }
        true
    }

    /// Number of chains in flight.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    /// Ids of chains in flight, in no particular order.
    #[must_use]
    pub fn pending_chains(&self) -> Vec<ChainId> {
        self.lock().pending.iter().copied().collect()
    }

    /// True when no chain is in flight.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.lock().pending.is_empty()
    }

    /// Runs `callback` once, the next time no chain is in flight.
    ///
    /// Chains started after registration are waited for too. When the
    /// pipeline is already idle the callback is deferred to the scheduler
    /// and idleness is checked again when it runs.
    pub fn when_complete<F>(self: &Arc<Self>, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.lock();
        if !state.pending.is_empty() {
            state.waiters.push(Box::new(callback));
            return;
        }
        drop(state);

        let tracker = Arc::clone(self);
        self.scheduler.defer(Box::new(move || tracker.complete_now_or_wait(Box::new(callback))));
    }

    fn complete_now_or_wait(&self, callback: Waiter) {
        let mut state = self.lock();
        if state.pending.is_empty() {
            drop(state);
            callback();
        } else {
            state.waiters.push(callback);
        }
    }
}

impl std::fmt::Debug for ConcurrencyTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ConcurrencyTracker")
            .field("pending", &state.pending.len())
            .field("waiters", &state.waiters.len())
            .finish()
    }
}
