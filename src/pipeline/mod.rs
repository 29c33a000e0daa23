//! PIPELINE subsystem: the interception engine.
//!
//! A [`Pipeline`] owns an ordered list of logic descriptors, one
//! [`MonitorEmitter`] and one [`ConcurrencyTracker`]. It is bound to a state
//! container once, either through the curried [`Pipeline::middleware`] hook
//! or with [`Pipeline::connect`], and then receives actions through
//! [`Pipeline::dispatch`].
//!
//! ```rust,ignore
//! let pipeline = Pipeline::new(vec![validate_dec], scheduler)?
//!     .middleware()
//!     .apply(&store)
//!     .next(reducer_next)?;
//! pipeline.dispatch(Action::new("DEC"))?;
//! ```

mod chain;
/// Phase contexts, decisions and the phase executor.
pub mod phase;
/// Deferred-work schedulers.
pub mod scheduler;
/// In-flight chain tracking.
pub mod tracker;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::action::Action;
use crate::error::{ExecutionError, KyroError, KyroResult};
use crate::logic::{Logic, Matchable, TypeMatcher};
use crate::monitor::{ChainId, MonitorEmitter};
use crate::store::{Next, StoreApi};

pub use phase::{CancellationToken, Decision, PhaseContext};
#[cfg(feature = "tokio-runtime")]
pub use scheduler::TokioScheduler;
pub use scheduler::{Job, ManualScheduler, Scheduler, ThreadScheduler};
pub use tracker::ConcurrencyTracker;

use phase::Invocation;

/// Pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Rejection redispatch nesting beyond which a warning is logged.
    pub redispatch_warn_depth: usize,
    /// Buffer of each channel-backed monitor stream; `None` is unbounded.
    pub stream_capacity: Option<usize>,
    /// Log every monitor event at `trace` level.
    pub trace_events: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            redispatch_warn_depth: 32,
            stream_capacity: None,
            trace_events: true,
        }
    }
}

/// A descriptor as registered: its name plus its in-flight invocations.
pub(crate) struct RegisteredLogic<S> {
    pub(crate) name: Arc<str>,
    pub(crate) logic: Logic<S>,
    in_flight: Mutex<Vec<Arc<Invocation>>>,
}

impl<S> RegisteredLogic<S> {
    fn new(index: usize, logic: Logic<S>) -> Self {
        Self {
            name: Arc::from(logic.pattern().logic_name(index)),
            logic,
            in_flight: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<Invocation>>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn begin(&self, chain: ChainId) -> Arc<Invocation> {
        let invocation = Arc::new(Invocation::new(chain));
        self.lock().push(Arc::clone(&invocation));
        invocation
    }

    pub(crate) fn release(&self, invocation: &Arc<Invocation>) {
        self.lock().retain(|i| !Arc::ptr_eq(i, invocation));
    }

    /// Cancels every in-flight invocation. Cancelled chains unwind on the
    /// calling thread, so no lock is held while cancelling.
    pub(crate) fn cancel_in_flight(&self) -> usize {
        let running = self.lock().clone();
        let cancelled = running.iter().filter(|i| i.cancel()).count();
        if cancelled > 0 {
            debug!(logic = %self.name, cancelled, "cancelled in-flight invocations");
        }
        cancelled
    }

    fn in_flight(&self) -> usize {
        self.lock().len()
    }
}

impl<S> Matchable for RegisteredLogic<S> {
    fn type_matcher(&self) -> &TypeMatcher {
        self.logic.pattern()
    }
}

struct Binding<S> {
    store: Weak<dyn StoreApi<S>>,
    next: Next,
}

/// State shared by every handle and every chain of one pipeline.
pub(crate) struct Core<S> {
    pub(crate) logics: Vec<Arc<RegisteredLogic<S>>>,
    pub(crate) monitor: MonitorEmitter,
    pub(crate) tracker: Arc<ConcurrencyTracker>,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) config: PipelineConfig,
    binding: OnceLock<Binding<S>>,
}

impl<S> Core<S> {
    pub(crate) fn store(&self) -> Option<Arc<dyn StoreApi<S>>> {
        self.binding.get()?.store.upgrade()
    }

    /// Hands an allowed action to the rest of the container's chain.
    pub(crate) fn forward(&self, action: Action) {
        match self.binding.get() {
            Some(binding) => (binding.next)(action),
            None => warn!(action = action.action_type(), "no store bound; dropping forwarded action"),
        }
    }

    pub(crate) fn settle(&self, chain: ChainId) {
        debug!(chain = %chain, "chain settled");
        self.tracker.exit(chain);
    }

    /// Applies `cancel_on` patterns for an action entering at the top.
    pub(crate) fn cancel_on(&self, action: &Action) {
        for logic in &self.logics {
            let cancels = logic
                .logic
                .cancel_on()
                .is_some_and(|m| m.matches(action.action_type()));
            if cancels {
                logic.cancel_in_flight();
            }
        }
    }
}

/// An interception pipeline. Cloning yields another handle to the same
/// pipeline.
pub struct Pipeline<S> {
    core: Arc<Core<S>>,
}

impl<S> Clone for Pipeline<S> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<S: 'static> Pipeline<S> {
    /// Creates a pipeline with the default configuration.
    ///
    /// Descriptor order is fixed for the pipeline's lifetime and determines
    /// both execution order and descriptor names (`L(<pattern>)-<index>`).
    pub fn new(logics: Vec<Logic<S>>, scheduler: Arc<dyn Scheduler>) -> KyroResult<Self> {
        Self::with_config(logics, scheduler, PipelineConfig::default())
    }

    /// Creates a pipeline with an explicit configuration.
    pub fn with_config(logics: Vec<Logic<S>>, scheduler: Arc<dyn Scheduler>, config: PipelineConfig) -> KyroResult<Self> {
        for logic in &logics {
            logic.pattern().validate()?;
            if let Some(cancel_on) = logic.cancel_on() {
                cancel_on.validate()?;
            }
        }

        let logics: Vec<_> = logics
            .into_iter()
            .enumerate()
            .map(|(index, logic)| Arc::new(RegisteredLogic::new(index, logic)))
            .collect();
        debug!(logics = logics.len(), "pipeline created");

        Ok(Self {
            core: Arc::new(Core {
                logics,
                monitor: MonitorEmitter::new(config.stream_capacity, config.trace_events),
                tracker: Arc::new(ConcurrencyTracker::new(Arc::clone(&scheduler))),
                scheduler,
                config,
                binding: OnceLock::new(),
            }),
        })
    }

    /// The curried middleware hook: `middleware().apply(&store).next(next)`.
    #[must_use]
    pub fn middleware(&self) -> Middleware<S> {
        Middleware {
            pipeline: self.clone(),
        }
    }

    /// Binds the pipeline to `store`, forwarding allowed actions to `next`.
    ///
    /// The store is held weakly. A pipeline can be bound once.
    pub fn connect<T>(&self, store: &Arc<T>, next: Next) -> KyroResult<()>
    where
        T: StoreApi<S> + 'static,
    {
        self.bind(downgrade(store), next)
    }

    fn bind(&self, store: Weak<dyn StoreApi<S>>, next: Next) -> KyroResult<()> {
        self.core
            .binding
            .set(Binding { store, next })
            .map_err(|_| KyroError::from(ExecutionError::AlreadyConnected))?;
        debug!("pipeline connected");
        Ok(())
    }

    /// True once bound to a store.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.core.binding.get().is_some()
    }

    /// Runs `action` through the pipeline.
    ///
    /// Synchronous phases complete before this returns. Failures inside
    /// the chain are reported on the monitor stream, not here.
    pub fn dispatch(&self, action: Action) -> KyroResult<()> {
        if !self.is_connected() {
            return Err(ExecutionError::NotConnected.into());
        }
        chain::start(&self.core, action, 0);
        Ok(())
    }

    /// The pipeline's monitor emitter.
    #[must_use]
    pub fn monitor(&self) -> &MonitorEmitter {
        &self.core.monitor
    }

    /// The configuration the pipeline was built with.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.core.config
    }

    /// Descriptor names in registration order.
    #[must_use]
    pub fn logic_names(&self) -> Vec<String> {
        self.core.logics.iter().map(|l| l.name.to_string()).collect()
    }

    /// Runs `callback` once no chain is in flight.
    pub fn when_complete<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.core.tracker.when_complete(callback);
    }

    /// Blocks until no chain is in flight.
    ///
    /// Must not be called from the thread that drives the pipeline's
    /// scheduler.
    pub fn wait_idle(&self, timeout: Duration) -> KyroResult<()> {
        let (tx, rx) = bounded(1);
        self.when_complete(move || {
            let _ = tx.send(());
        });

        rx.recv_timeout(timeout).map_err(|err| {
            let err = match err {
                RecvTimeoutError::Timeout => ExecutionError::Timeout {
                    duration_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
                },
                RecvTimeoutError::Disconnected => ExecutionError::Disconnected {
                    path: "when_complete".to_string(),
                },
            };
            err.into()
        })
    }

    /// Resolves once no chain is in flight.
    #[cfg(feature = "tokio-runtime")]
    pub async fn drained(&self) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.when_complete(move || {
            let _ = tx.send(());
        });
        let _ = rx.await;
    }

    /// Number of chains in flight.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.core.tracker.pending()
    }

    /// Ids of chains in flight.
    #[must_use]
    pub fn pending_chains(&self) -> Vec<ChainId> {
        self.core.tracker.pending_chains()
    }

    /// Number of in-flight invocations of each descriptor, by name.
    #[must_use]
    pub fn in_flight(&self) -> Vec<(String, usize)> {
        self.core
            .logics
            .iter()
            .map(|l| (l.name.to_string(), l.in_flight()))
            .collect()
    }
}

impl<S> fmt::Debug for Pipeline<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.core.logics.iter().map(|l| &*l.name).collect();
        f.debug_struct("Pipeline")
            .field("logics", &names)
            .field("connected", &self.core.binding.get().is_some())
            .field("tracker", &self.core.tracker)
            .finish_non_exhaustive()
    }
}

fn downgrade<S, T>(store: &Arc<T>) -> Weak<dyn StoreApi<S>>
where
    S: 'static,
    T: StoreApi<S> + 'static,
{
    let store: Arc<dyn StoreApi<S>> = Arc::clone(store) as Arc<dyn StoreApi<S>>;
    Arc::downgrade(&store)
}

/// First stage of the middleware hook, waiting for the store.
#[must_use = "a middleware does nothing until applied to a store"]
pub struct Middleware<S> {
    pipeline: Pipeline<S>,
}

impl<S: 'static> Middleware<S> {
    /// Supplies the store's read-state and dispatch capabilities.
    pub fn apply<T>(self, store: &Arc<T>) -> Apply<S>
    where
        T: StoreApi<S> + 'static,
    {
        Apply {
            pipeline: self.pipeline,
            store: downgrade(store),
        }
    }
}

/// Second stage of the middleware hook, waiting for `next`.
#[must_use = "a middleware does nothing until given its next function"]
pub struct Apply<S> {
    pipeline: Pipeline<S>,
    store: Weak<dyn StoreApi<S>>,
}

impl<S: 'static> Apply<S> {
    /// Supplies `next` and returns the bound pipeline, whose
    /// [`Pipeline::dispatch`] is the action stage.
    pub fn next(self, next: Next) -> KyroResult<Pipeline<S>> {
        self.pipeline.bind(self.store, next)?;
        Ok(self.pipeline)
    }
}

impl<S> fmt::Debug for Middleware<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Middleware").field("pipeline", &self.pipeline).finish()
    }
}

impl<S> fmt::Debug for Apply<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Apply").field("pipeline", &self.pipeline).finish_non_exhaustive()
    }
}
