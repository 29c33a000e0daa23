//! Chain coordinator.
//!
//! A [`Chain`] is one action's pass through the pipeline. It is an owned
//! value that moves from one phase continuation into the next, so a chain
//! suspended on an asynchronous phase holds no lock and no thread.
//!
//! Forward pass: `top`, then `begin` plus validate and transform per
//! matched descriptor, then `bottom`. Descriptors that allowed get their
//! process phase and `end` in a [`Tail`] run on the pipeline's scheduler.
//! A rejection re-enters the pipeline synchronously with the substitute
//! action and then unwinds.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::action::Action;
use crate::error::{ExecutionError, ValidationError};
use crate::logic::{match_logic, PhaseKind};
use crate::monitor::{ChainId, MonitorEvent};

use super::phase::{Invocation, PhaseRun, Resolution};
use super::{Core, RegisteredLogic};

const DROPPED_DECISION: &str = "decision dropped without allow, reject or fail";

/// A descriptor that let the action through.
struct Passed<S> {
    logic: Arc<RegisteredLogic<S>>,
    invocation: Arc<Invocation>,
    /// Action the descriptor began with.
    action: Action,
    /// Action it forwarded.
    forwarded: Action,
}

struct Chain<S> {
    id: ChainId,
    core: Arc<Core<S>>,
    depth: usize,
    original: Action,
    matched: Vec<Arc<RegisteredLogic<S>>>,
    passed: Vec<Passed<S>>,
}

/// Runs `action` through the pipeline from the top.
///
/// `depth` counts rejection redispatches leading to this call.
pub(crate) fn start<S: 'static>(core: &Arc<Core<S>>, action: Action, depth: usize) {
    let id = ChainId::new();
    if !action.is_well_formed() {
        warn!(chain = %id, "dropping action without a type label");
        core.monitor
            .emit(MonitorEvent::error(id, &action, None, ValidationError::MissingActionType));
        return;
    }
    if depth > core.config.redispatch_warn_depth {
        warn!(
            chain = %id,
            depth,
            action = action.action_type(),
            "redispatch nesting is deep; a logic may be rejecting into its own type"
        );
    }

    core.tracker.enter(id);
    core.monitor.emit(MonitorEvent::top(id, &action));
    core.cancel_on(&action);

    let matched = match_logic(&action, &core.logics);
    debug!(chain = %id, action = action.action_type(), matched = matched.len(), depth, "chain started");

    let chain = Chain {
        id,
        core: Arc::clone(core),
        depth,
        original: action.clone(),
        matched,
        passed: Vec::new(),
    };
    chain.advance(0, action);
}

impl<S: 'static> Chain<S> {
    fn advance(self, index: usize, action: Action) {
        let Some(logic) = self.matched.get(index).cloned() else {
            self.bottom(action);
            return;
        };

        if logic.logic.is_latest() {
            logic.cancel_in_flight();
        }
        let invocation = logic.begin(self.id);
        self.core
            .monitor
            .emit(MonitorEvent::begin(self.id, &action, &logic.name));

        self.intercept(logic, invocation, index, action, PhaseKind::Validate, None);
    }

    /// Runs validate (with `working` unset) or transform (on `working`).
    fn intercept(
        self,
        logic: Arc<RegisteredLogic<S>>,
        invocation: Arc<Invocation>,
        index: usize,
        action: Action,
        kind: PhaseKind,
        working: Option<Action>,
    ) {
        let core = Arc::clone(&self.core);
        let run = PhaseRun {
            monitor: &core.monitor,
            store: core.store(),
            name: &logic.name,
            kind,
            function: logic.logic.phase(kind),
            invocation: &invocation,
            action: working.unwrap_or_else(|| action.clone()),
        };

        let (logic_cont, invocation_cont) = (Arc::clone(&logic), Arc::clone(&invocation));
        run.run(move |resolution| match (kind, resolution) {
            (PhaseKind::Validate, Resolution::Allow(next)) => self.intercept(
                logic_cont,
                invocation_cont,
                index,
                action,
                PhaseKind::Transform,
                Some(next),
            ),
            (kind, resolution) => {
                self.intercepted(logic_cont, invocation_cont, index, action, kind, resolution);
            }
        });
    }

    fn intercepted(
        mut self,
        logic: Arc<RegisteredLogic<S>>,
        invocation: Arc<Invocation>,
        index: usize,
        action: Action,
        kind: PhaseKind,
        resolution: Resolution,
    ) {
        let monitor = &self.core.monitor;
        match resolution {
            Resolution::Allow(next) => {
                monitor.emit(MonitorEvent::next(self.id, &action, &next, &logic.name));
                self.passed.push(Passed {
                    logic,
                    invocation,
                    action,
                    forwarded: next.clone(),
                });
                self.advance(index + 1, next);
            }
            Resolution::Reject(substitute) => {
                monitor.emit(MonitorEvent::next_disp(self.id, &action, &substitute, &logic.name));
                monitor.emit(MonitorEvent::dispatch(self.id, &action, &substitute));
                start(&self.core, substitute, self.depth + 1);
                self.end(&logic, &invocation, &action, false);
                self.unwind();
            }
            Resolution::Failed(message) => {
                let err = ExecutionError::PhaseFailed {
                    logic: logic.name.to_string(),
                    phase: kind.to_string(),
                    message,
                };
                self.fail(&logic, &invocation, &action, &err);
            }
            Resolution::Abandoned => {
                let err = ExecutionError::ContractViolation {
                    logic: logic.name.to_string(),
                    phase: kind.to_string(),
                    detail: DROPPED_DECISION.to_string(),
                };
                self.fail(&logic, &invocation, &action, &err);
            }
            Resolution::Cancelled => {
                debug!(chain = %self.id, logic = %logic.name, "intercept cancelled");
                self.end(&logic, &invocation, &action, true);
                let original = self.original.clone();
                let (id, core) = (self.id, Arc::clone(&self.core));
                self.unwind_quietly();
                core.monitor.emit(MonitorEvent::cancelled(id, &original));
                core.settle(id);
            }
        }
    }

    fn fail(self, logic: &Arc<RegisteredLogic<S>>, invocation: &Arc<Invocation>, action: &Action, err: &ExecutionError) {
        warn!(chain = %self.id, error = %err, "chain terminated");
        self.core
            .monitor
            .emit(MonitorEvent::error(self.id, action, Some(&*logic.name), err));
        self.end(logic, invocation, action, false);
        self.unwind();
    }

    fn end(&self, logic: &RegisteredLogic<S>, invocation: &Arc<Invocation>, action: &Action, cancelled: bool) {
        self.core
            .monitor
            .emit(MonitorEvent::end(self.id, action, &logic.name, cancelled));
        logic.release(invocation);
    }

    /// Ends every descriptor that allowed, latest first, without running
    /// process phases.
    fn unwind_quietly(mut self) {
        while let Some(p) = self.passed.pop() {
            let cancelled = p.invocation.is_cancelled();
            self.end(&p.logic, &p.invocation, &p.action, cancelled);
        }
    }

    fn unwind(self) {
        let (id, core) = (self.id, Arc::clone(&self.core));
        self.unwind_quietly();
        core.settle(id);
    }

    fn bottom(self, action: Action) {
        self.core.monitor.emit(MonitorEvent::bottom(self.id, &action));
        self.core.forward(action);

        if self.passed.is_empty() {
            self.core.settle(self.id);
            return;
        }

        let tail = Tail {
            id: self.id,
            core: Arc::clone(&self.core),
            depth: self.depth,
            passed: self.passed,
        };
        self.core.scheduler.defer(Box::new(move || tail.run()));
    }
}

/// Process phases and `end`s of a forwarded chain, run on a later turn.
struct Tail<S> {
    id: ChainId,
    core: Arc<Core<S>>,
    depth: usize,
    passed: Vec<Passed<S>>,
}

impl<S: 'static> Tail<S> {
    fn run(mut self) {
        loop {
            let Some(p) = self.passed.pop() else {
                self.core.settle(self.id);
                return;
            };
            if p.invocation.is_cancelled() {
                self.end(&p, true);
                continue;
            }

            let core = Arc::clone(&self.core);
            let (logic, invocation) = (Arc::clone(&p.logic), Arc::clone(&p.invocation));
            let run = PhaseRun {
                monitor: &core.monitor,
                store: core.store(),
                name: &logic.name,
                kind: PhaseKind::Process,
                function: logic.logic.phase(PhaseKind::Process),
                invocation: &invocation,
                action: p.forwarded.clone(),
            };
            run.run(move |resolution| self.processed(p, resolution));
            return;
        }
    }

    fn processed(self, p: Passed<S>, resolution: Resolution) {
        let monitor = &self.core.monitor;
        match resolution {
            Resolution::Allow(_) => self.end(&p, false),
            Resolution::Reject(substitute) => {
                monitor.emit(MonitorEvent::dispatch(self.id, &p.forwarded, &substitute));
                start(&self.core, substitute, self.depth + 1);
                self.end(&p, false);
            }
            Resolution::Failed(message) => {
                let err = ExecutionError::PhaseFailed {
                    logic: p.logic.name.to_string(),
                    phase: PhaseKind::Process.to_string(),
                    message,
                };
                self.report(&p, &err);
            }
            Resolution::Abandoned => {
                let err = ExecutionError::ContractViolation {
                    logic: p.logic.name.to_string(),
                    phase: PhaseKind::Process.to_string(),
                    detail: DROPPED_DECISION.to_string(),
                };
                self.report(&p, &err);
            }
            Resolution::Cancelled => self.end(&p, true),
        }
        self.run();
    }

    /// A process failure ends its descriptor; the rest of the tail still runs.
    fn report(&self, p: &Passed<S>, err: &ExecutionError) {
        warn!(chain = %self.id, error = %err, "process phase failed");
        self.core
            .monitor
            .emit(MonitorEvent::error(self.id, &p.forwarded, Some(&*p.logic.name), err));
        self.end(p, false);
    }

    fn end(&self, p: &Passed<S>, cancelled: bool) {
        self.core
            .monitor
            .emit(MonitorEvent::end(self.id, &p.action, &p.logic.name, cancelled));
        p.logic.release(&p.invocation);
    }
}
