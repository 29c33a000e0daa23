//! Logic descriptors: a type pattern plus up to three phase functions.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{BoxError, KyroResult};
use crate::pipeline::phase::{Decision, PhaseContext};

use super::pattern::TypeMatcher;

/// Signature shared by validate, transform and process functions.
///
/// The function must eventually complete the [`Decision`] exactly once,
/// either before returning or later from another thread or task. Returning
/// `Err` terminates the chain with an `error` monitor event.
pub type PhaseFn<S> = Arc<dyn Fn(&PhaseContext<S>, Decision) -> Result<(), BoxError> + Send + Sync>;

/// The three phases a descriptor can hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    /// Gatekeeping before the action reaches the store.
    Validate,
    /// Replaces the action before it reaches the store.
    Transform,
    /// Runs after the action reached the store.
    Process,
}

impl PhaseKind {
    /// Lowercase name used in logs and errors.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Transform => "transform",
            Self::Process => "process",
        }
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable processing unit registered with a pipeline.
///
/// Build one with [`Logic::for_type`] or [`Logic::builder`]. A descriptor
/// without any phase function is a pass-through that still shows up in the
/// monitor trace.
pub struct Logic<S> {
    pattern: TypeMatcher,
    cancel_on: Option<TypeMatcher>,
    latest: bool,
    validate: Option<PhaseFn<S>>,
    transform: Option<PhaseFn<S>>,
    process: Option<PhaseFn<S>>,
}

impl<S> Logic<S> {
    /// Starts a descriptor for any [`TypeMatcher`].
    #[must_use]
    pub fn builder(pattern: impl Into<TypeMatcher>) -> LogicBuilder<S> {
        LogicBuilder::new(pattern.into())
    }

    /// Starts a descriptor for one type label, or `"*"` for every action.
    #[must_use]
    pub fn for_type(action_type: &str) -> LogicBuilder<S> {
        LogicBuilder::new(TypeMatcher::from(action_type))
    }

    /// The pattern selecting actions for this descriptor.
    #[must_use]
    pub const fn pattern(&self) -> &TypeMatcher {
        &self.pattern
    }

    /// Pattern whose actions cancel in-flight invocations, if any.
    #[must_use]
    pub const fn cancel_on(&self) -> Option<&TypeMatcher> {
        self.cancel_on.as_ref()
    }

    /// True when only the most recent invocation may stay in flight.
    #[must_use]
    pub const fn is_latest(&self) -> bool {
        self.latest
    }

    /// The function registered for `kind`, if any.
    #[must_use]
    pub fn phase(&self, kind: PhaseKind) -> Option<&PhaseFn<S>> {
        match kind {
            PhaseKind::Validate => self.validate.as_ref(),
            PhaseKind::Transform => self.transform.as_ref(),
            PhaseKind::Process => self.process.as_ref(),
        }
    }
}

impl<S> Clone for Logic<S> {
    fn clone(&self) -> Self {
        Self {
            pattern: self.pattern.clone(),
            cancel_on: self.cancel_on.clone(),
            latest: self.latest,
            validate: self.validate.clone(),
            transform: self.transform.clone(),
            process: self.process.clone(),
        }
    }
}

impl<S> fmt::Debug for Logic<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logic")
            .field("pattern", &self.pattern)
            .field("cancel_on", &self.cancel_on)
            .field("latest", &self.latest)
            .field("validate", &self.validate.is_some())
            .field("transform", &self.transform.is_some())
            .field("process", &self.process.is_some())
            .finish()
    }
}

/// Builder for [`Logic`].
///
/// # Examples
///
/// ```
/// use kyrologic::{Action, Logic};
///
/// let logic: Logic<i64> = Logic::for_type("DEC")
///     .validate(|ctx, decision| {
///         if ctx.get_state() > 0 {
///             decision.allow(ctx.action().clone());
///         } else {
///             decision.reject(Action::new("NOOP"));
///         }
///         Ok(())
///     })
///     .build()
///     .unwrap();
/// assert!(logic.pattern().matches("DEC"));
/// ```
#[must_use]
pub struct LogicBuilder<S> {
    logic: Logic<S>,
}

impl<S> LogicBuilder<S> {
    fn new(pattern: TypeMatcher) -> Self {
        Self {
            logic: Logic {
                pattern,
                cancel_on: None,
                latest: false,
                validate: None,
                transform: None,
                process: None,
            },
        }
    }

    /// Sets the validate phase.
    pub fn validate<F>(mut self, f: F) -> Self
    where
        F: Fn(&PhaseContext<S>, Decision) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.logic.validate = Some(Arc::new(f));
        self
    }

    /// Sets the transform phase.
    pub fn transform<F>(mut self, f: F) -> Self
    where
        F: Fn(&PhaseContext<S>, Decision) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.logic.transform = Some(Arc::new(f));
        self
    }

    /// Sets the process phase.
    pub fn process<F>(mut self, f: F) -> Self
    where
        F: Fn(&PhaseContext<S>, Decision) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.logic.process = Some(Arc::new(f));
        self
    }

    /// Cancels earlier in-flight invocations when a new one begins.
    pub fn latest(mut self) -> Self {
        self.logic.latest = true;
        self
    }

    /// Cancels in-flight invocations whenever an action matching `pattern`
    /// is dispatched.
    pub fn cancel_on(mut self, pattern: impl Into<TypeMatcher>) -> Self {
        self.logic.cancel_on = Some(pattern.into());
        self
    }

    /// Validates the patterns and returns the descriptor.
    pub fn build(self) -> KyroResult<Logic<S>> {
        self.logic.pattern.validate()?;
        if let Some(cancel_on) = &self.logic.cancel_on {
            cancel_on.validate()?;
        }
        Ok(self.logic)
    }
}
