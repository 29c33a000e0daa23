//! Phase execution.
//!
//! A phase function completes through a [`Decision`], either before it
//! returns or later from another thread. Internally every phase run owns a
//! single-resolution [`Completion`]: the first resolution runs the chain's
//! continuation, anything after that is reported as an anomaly (or quietly
//! discarded when the run was cancelled).

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::action::Action;
use crate::error::{BoxError, ExecutionError};
use crate::logic::{PhaseFn, PhaseKind};
use crate::monitor::{ChainId, MonitorEmitter, MonitorEvent};
use crate::store::StoreApi;

/// How a phase run ended.
#[derive(Debug, Clone)]
pub(crate) enum Resolution {
    Allow(Action),
    Reject(Action),
    Failed(String),
    Abandoned,
    Cancelled,
}

impl Resolution {
    const fn label(&self) -> &'static str {
        match self {
            Self::Allow(_) => "allow",
            Self::Reject(_) => "reject",
            Self::Failed(_) => "failure",
            Self::Abandoned => "abandonment",
            Self::Cancelled => "cancellation",
        }
    }
}

type Continuation = Box<dyn FnOnce(Resolution) + Send + 'static>;

struct CompletionState {
    continuation: Option<Continuation>,
    settled: Option<&'static str>,
    in_call: bool,
    abandoned: bool,
}

/// Where anomalies get reported.
struct Origin {
    monitor: MonitorEmitter,
    chain: ChainId,
    logic: Arc<str>,
    phase: PhaseKind,
    action: Action,
}

/// Single-resolution completion slot for one phase run.
#[derive(Clone)]
pub(crate) struct Completion {
    state: Arc<Mutex<CompletionState>>,
    origin: Arc<Origin>,
}

impl Completion {
    fn new(origin: Origin, continuation: Continuation) -> Self {
        Self {
            state: Arc::new(Mutex::new(CompletionState {
                continuation: Some(continuation),
                settled: None,
                in_call: false,
                abandoned: false,
            })),
            origin: Arc::new(origin),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CompletionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolves the slot. The continuation runs on the calling thread.
    pub(crate) fn settle(&self, resolution: Resolution) {
        let continuation = {
            let mut state = self.lock();
            if let Some(first) = state.settled {
                drop(state);
                self.late(first, &resolution);
                return;
            }
            state.settled = Some(resolution.label());
            state.continuation.take()
        };

        if let Some(continuation) = continuation {
            continuation(resolution);
        }
    }

    fn late(&self, first: &'static str, resolution: &Resolution) {
        let origin = &self.origin;
        if first == Resolution::Cancelled.label() || matches!(resolution, Resolution::Cancelled) {
            debug!(logic = %origin.logic, phase = %origin.phase, "discarding completion of a cancelled phase");
            return;
        }

        let detail = match resolution {
            Resolution::Failed(message) => format!("returned an error after {first}: {message}"),
            other => format!("{} after {first}", other.label()),
        };
        let err = ExecutionError::ContractViolation {
            logic: origin.logic.to_string(),
            phase: origin.phase.to_string(),
            detail,
        };
        warn!(error = %err, "phase completion anomaly");
        origin
            .monitor
            .emit(MonitorEvent::error(origin.chain, &origin.action, Some(&*origin.logic), err));
    }

    fn begin_call(&self) {
        self.lock().in_call = true;
    }

    fn end_call(&self, result: Result<(), BoxError>) {
        let abandoned = {
            let mut state = self.lock();
            state.in_call = false;
            state.abandoned
        };

        match result {
            Err(e) => self.settle(Resolution::Failed(e.to_string())),
            Ok(()) if abandoned => self.settle(Resolution::Abandoned),
            Ok(()) => {}
        }
    }

    /// The decision handle was dropped without completing.
    fn abandon(&self) {
        {
            let mut state = self.lock();
            if state.settled.is_some() {
                return;
            }
            if state.in_call {
                // Wait for the phase function to return: an `Err` it
                // returns takes precedence over the abandonment.
                state.abandoned = true;
                return;
            }
        }
        self.settle(Resolution::Abandoned);
    }
}

/// Cooperative cancellation flag for asynchronous phase bodies.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// True once the invocation this token belongs to was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// One descriptor's handling of one action, from `begin` to `end`.
pub(crate) struct Invocation {
    chain: ChainId,
    token: CancellationToken,
    current: Mutex<Option<Completion>>,
}

impl Invocation {
    pub(crate) fn new(chain: ChainId) -> Self {
        Self {
            chain,
            token: CancellationToken::default(),
            current: Mutex::new(None),
        }
    }

    pub(crate) const fn chain(&self) -> ChainId {
        self.chain
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Records the running phase. Returns false if already cancelled.
    fn attach(&self, completion: Completion) -> bool {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_cancelled() {
            return false;
        }
        *current = Some(completion);
        true
    }

    /// Cancels the invocation; a suspended phase resolves as cancelled on
    /// this thread. Returns false if it was already cancelled.
    pub(crate) fn cancel(&self) -> bool {
        if self.token.flag.swap(true, Ordering::AcqRel) {
            return false;
        }
        let running = self.current.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(completion) = running {
            completion.settle(Resolution::Cancelled);
        }
        true
    }
}

/// What a phase function sees.
pub struct PhaseContext<S> {
    action: Action,
    name: Arc<str>,
    phase: PhaseKind,
    store: Arc<dyn StoreApi<S>>,
    token: CancellationToken,
}

impl<S> PhaseContext<S> {
    /// The action this phase is working on.
    #[must_use]
    pub const fn action(&self) -> &Action {
        &self.action
    }

    /// Current store state.
    #[must_use]
    pub fn get_state(&self) -> S {
        self.store.get_state()
    }

    /// Dispatches through the store's full middleware chain.
    pub fn dispatch(&self, action: Action) {
        self.store.dispatch(action);
    }

    /// Tracing name of the running descriptor, e.g. `L(DEC)-0`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Which phase is running.
    #[must_use]
    pub const fn phase(&self) -> PhaseKind {
        self.phase
    }

    /// True once this invocation was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// A token to move into asynchronous work.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl<S> fmt::Debug for PhaseContext<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseContext")
            .field("action", &self.action)
            .field("name", &self.name)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

/// Completion handle handed to a phase function.
///
/// Consume it with exactly one of [`allow`](Decision::allow),
/// [`reject`](Decision::reject) or [`fail`](Decision::fail). Dropping it
/// unused terminates the chain with a contract-violation `error` event.
#[must_use = "a phase must allow, reject or fail its decision"]
pub struct Decision {
    completion: Option<Completion>,
}

impl Decision {
    fn new(completion: Completion) -> Self {
        Self {
            completion: Some(completion),
        }
    }

    /// Lets `action` continue down the pipeline.
    pub fn allow(mut self, action: Action) {
        if let Some(c) = self.completion.take() {
            c.settle(Resolution::Allow(action));
        }
    }

    /// Stops the current action and dispatches `action` in its place.
    pub fn reject(mut self, action: Action) {
        if let Some(c) = self.completion.take() {
            c.settle(Resolution::Reject(action));
        }
    }

    /// Fails the chain, e.g. from an asynchronous error path.
    pub fn fail(mut self, error: impl fmt::Display) {
        if let Some(c) = self.completion.take() {
            c.settle(Resolution::Failed(error.to_string()));
        }
    }
}

impl Drop for Decision {
    fn drop(&mut self) {
        if let Some(c) = self.completion.take() {
            c.abandon();
        }
    }
}

impl fmt::Debug for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decision")
            .field("pending", &self.completion.is_some())
            .finish()
    }
}

/// Everything needed to run one phase of one descriptor.
pub(crate) struct PhaseRun<'a, S> {
    pub(crate) monitor: &'a MonitorEmitter,
    pub(crate) store: Option<Arc<dyn StoreApi<S>>>,
    pub(crate) name: &'a Arc<str>,
    pub(crate) kind: PhaseKind,
    pub(crate) function: Option<&'a PhaseFn<S>>,
    pub(crate) invocation: &'a Arc<Invocation>,
    pub(crate) action: Action,
}

impl<S> PhaseRun<'_, S> {
    /// Runs the phase; `then` receives the first resolution.
    ///
    /// A missing phase function allows the action unchanged.
    pub(crate) fn run<F>(self, then: F)
    where
        F: FnOnce(Resolution) + Send + 'static,
    {
        if self.invocation.is_cancelled() {
            then(Resolution::Cancelled);
            return;
        }
        let Some(function) = self.function else {
            then(Resolution::Allow(self.action));
            return;
        };
        let Some(store) = self.store else {
            then(Resolution::Failed(ExecutionError::StoreUnavailable.to_string()));
            return;
        };

        let completion = Completion::new(
            Origin {
                monitor: self.monitor.clone(),
                chain: self.invocation.chain(),
                logic: Arc::clone(self.name),
                phase: self.kind,
                action: self.action.clone(),
            },
            Box::new(then),
        );
        if !self.invocation.attach(completion.clone()) {
            completion.settle(Resolution::Cancelled);
            return;
        }

        let ctx = PhaseContext {
            action: self.action,
            name: Arc::clone(self.name),
            phase: self.kind,
            store,
            token: self.invocation.token.clone(),
        };

        completion.begin_call();
        let decision = Decision::new(completion.clone());
        let result = panic::catch_unwind(AssertUnwindSafe(|| function(&ctx, decision)))
            .unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                warn!(logic = %ctx.name, phase = %ctx.phase, panic = %message, "phase function panicked");
                Err(format!("panicked: {message}").into())
            });
        completion.end_call(result);
    }
}

/// Text of a panic payload, when it carries one.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}
