//! # KyroLogic - Interception Pipeline for Action Streams
//!
//! KyroLogic sits between the code that dispatches actions and the store
//! that reduces them. Each action is matched against an ordered list of
//! logic descriptors, threaded through their validate and transform phases,
//! and then either forwarded to the store, replaced by a substitute action
//! that re-enters the pipeline, or dropped. Every lifecycle transition is
//! published on a monitor stream.
//!
//! ## Core Concepts
//!
//! - **Action**: a type label plus an arbitrary JSON payload
//! - **Logic**: a type pattern with up to three phase functions (validate, transform, process)
//! - **Decision**: the move-only handle a phase completes with `allow`, `reject` or `fail`
//! - **Pipeline**: the coordinator, with one monitor emitter and one concurrency tracker
//! - **Scheduler**: where deferred work (process phases, idle callbacks) runs
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use kyrologic::{Action, Logic, ManualScheduler, Pipeline};
//!
//! let validate_dec = Logic::for_type("DEC")
//!     .validate(|ctx, decision| {
//!         if ctx.get_state() > 0 {
//!             decision.allow(ctx.action().clone());
//!         } else {
//!             decision.reject(Action::new("NOOP"));
//!         }
//!         Ok(())
//!     })
//!     .build()?;
//!
//! let scheduler = Arc::new(ManualScheduler::new());
//! let pipeline = Pipeline::new(vec![validate_dec], scheduler.clone())?
//!     .middleware()
//!     .apply(&store)
//!     .next(reducer)?;
//!
//! let _sub = pipeline.monitor().subscribe(|event| println!("{}", event.to_trace()));
//! pipeline.dispatch(Action::new("DEC"))?;
//! scheduler.run_until_idle();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod action;
pub mod error;
pub mod store;

// Descriptors and matching
pub mod logic;

// Engine
pub mod monitor;
pub mod pipeline;

// Re-export primary types at crate root for convenience
pub use action::Action;
pub use error::{BoxError, ExecutionError, KyroError, KyroResult, ValidationError};
pub use logic::{match_logic, Logic, LogicBuilder, PhaseFn, PhaseKind, TypeMatcher, WILDCARD};
pub use monitor::{ChainId, MonitorEmitter, MonitorEvent, MonitorOp, MonitorStream, Subscription, SubscriptionId};
pub use pipeline::{
    Apply, CancellationToken, ConcurrencyTracker, Decision, Job, ManualScheduler, Middleware, PhaseContext, Pipeline,
    PipelineConfig, Scheduler, ThreadScheduler,
};
#[cfg(feature = "tokio-runtime")]
pub use pipeline::TokioScheduler;
pub use store::{Next, StoreApi};
