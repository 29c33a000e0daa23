//! Deferred work: the pipeline's notion of "the next scheduling turn".
//!
//! Process tails and idle drain callbacks are handed to a [`Scheduler`]
//! instead of running on the dispatching call stack. Every implementation
//! runs jobs in FIFO order.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Sender};
use tracing::{error, warn};

use crate::error::{ExecutionError, KyroResult};

use super::phase::panic_message;

/// A unit of deferred work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs jobs after the current call stack has unwound.
pub trait Scheduler: Send + Sync {
    /// Queues `job` for a later turn.
    fn defer(&self, job: Job);
}

/// Queue drained explicitly by the owner.
///
/// Nothing runs until [`ManualScheduler::run_until_idle`] is called, which
/// makes traces fully deterministic.
#[derive(Default)]
pub struct ManualScheduler {
    queue: Mutex<VecDeque<Job>>,
}

impl ManualScheduler {
    /// Creates an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs queued jobs, including jobs queued by those jobs, until the
    /// queue is empty. Returns the number of jobs run.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        loop {
            let job = self.queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
            let Some(job) = job else {
                return ran;
            };
            job();
            ran += 1;
        }
    }

    /// Number of queued jobs.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Scheduler for ManualScheduler {
    fn defer(&self, job: Job) {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).push_back(job);
    }
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualScheduler").field("queued", &self.queued()).finish()
    }
}

/// Runs jobs on a dedicated worker thread.
pub struct ThreadScheduler {
    tx: Sender<Job>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadScheduler {
    /// Spawns the worker thread.
    pub fn start(name: &str) -> KyroResult<Self> {
        let (tx, rx) = unbounded::<Job>();
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    // One failing job must not take the worker down with it.
                    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                        error!(panic = %panic_message(payload.as_ref()), "deferred job panicked");
                    }
                }
            })
            .map_err(|e| ExecutionError::SchedulerUnavailable {
                reason: format!("failed to spawn scheduler thread: {e}"),
            })?;

        Ok(Self {
            tx,
            join: Mutex::new(Some(join)),
        })
    }
}

impl Scheduler for ThreadScheduler {
    fn defer(&self, job: Job) {
        if self.tx.send(job).is_err() {
            warn!("scheduler thread is gone; dropping deferred job");
        }
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        // Detach rather than join: the last handle may be dropped by a job
        // running on the worker itself. The worker exits once `tx` is gone.
        if let Ok(mut guard) = self.join.lock() {
            drop(guard.take());
        }
    }
}

impl std::fmt::Debug for ThreadScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadScheduler").field("queued", &self.tx.len()).finish()
    }
}

/// Spawns jobs onto a tokio runtime.
#[cfg(feature = "tokio-runtime")]
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: tokio::runtime::Handle,
}

#[cfg(feature = "tokio-runtime")]
impl TokioScheduler {
    /// Uses the given runtime handle.
    #[must_use]
    pub const fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Uses the runtime the caller is running on.
    pub fn current() -> KyroResult<Self> {
        tokio::runtime::Handle::try_current().map(Self::new).map_err(|e| {
            ExecutionError::SchedulerUnavailable {
                reason: e.to_string(),
            }
            .into()
        })
    }
}

#[cfg(feature = "tokio-runtime")]
impl Scheduler for TokioScheduler {
    fn defer(&self, job: Job) {
        self.handle.spawn(async move { job() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn manual_scheduler_runs_fifo_including_nested_jobs() {
        let sched = Arc::new(ManualScheduler::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let log = Arc::clone(&log);
            let inner_sched = Arc::clone(&sched);
            sched.defer(Box::new(move || {
                log.lock().unwrap().push(i);
                if i == 0 {
                    let log = Arc::clone(&log);
                    inner_sched.defer(Box::new(move || log.lock().unwrap().push(10)));
                }
            }));
        }

        assert_eq!(sched.queued(), 3);
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(sched.run_until_idle(), 4);
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 10]);
        assert_eq!(sched.run_until_idle(), 0);
    }

    #[test]
    fn thread_scheduler_runs_jobs_in_order() {
        let sched = ThreadScheduler::start("kyrologic-test-scheduler").unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        for i in 0..5 {
            let tx = tx.clone();
            sched.defer(Box::new(move || {
                let _ = tx.send((i, thread::current().name().map(str::to_string)));
            }));
        }

        for expected in 0..5 {
            let (i, name) = rx.recv_timeout(Duration::from_secs(1)).unwrap();
            assert_eq!(i, expected);
            assert_eq!(name.as_deref(), Some("kyrologic-test-scheduler"));
        }
    }

    #[test]
    fn thread_scheduler_survives_a_panicking_job() {
        let sched = ThreadScheduler::start("kyrologic-test-panic").unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        sched.defer(Box::new(|| panic!("bad job")));
        sched.defer(Box::new(move || {
            let _ = tx.send("still running");
        }));

        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "still running");
    }
}
