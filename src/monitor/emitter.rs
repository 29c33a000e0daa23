//! Monitor event emitter.
//!
//! One emitter belongs to one pipeline. Every event from every chain goes
//! through [`MonitorEmitter::emit`], which stamps a sequence number and a
//! timestamp and delivers to all current subscribers. One thread at a time
//! owns delivery, so every subscriber observes the same total order. With no
//! subscribers the event is discarded.
//!
//! Callbacks run without the subscriber list locked. A callback may
//! unsubscribe or dispatch into the pipeline; events emitted from inside a
//! callback are queued and delivered once the current event has reached
//! every subscriber.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, ThreadId};

use chrono::Utc;
use crossbeam_channel::{bounded, unbounded, Sender, TrySendError};
use tracing::trace;

use super::event::{MonitorEvent, SubscriptionId};
use super::stream::MonitorStream;

type Callback = Arc<dyn Fn(&MonitorEvent) + Send + Sync>;

#[derive(Clone)]
enum Sink {
    Callback(Callback),
    Channel(Sender<MonitorEvent>),
}

#[derive(Clone)]
struct Subscriber {
    id: SubscriptionId,
    sink: Sink,
}

/// Events stamped but not yet delivered, and the thread delivering them.
#[derive(Default)]
struct Delivery {
    owner: Option<ThreadId>,
    next_seq: u64,
    queue: VecDeque<MonitorEvent>,
}

pub(crate) struct EmitterInner {
    subscribers: Mutex<Vec<Subscriber>>,
    delivery: Mutex<Delivery>,
    released: Condvar,
    stream_capacity: Option<usize>,
    trace_events: bool,
    dropped_events: AtomicU64,
}

impl EmitterInner {
    fn subscribers(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn delivery(&self) -> MutexGuard<'_, Delivery> {
        self.delivery.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn remove(&self, id: SubscriptionId) {
        self.subscribers().retain(|s| s.id != id);
    }

    fn deliver(&self, event: &MonitorEvent) {
        if self.trace_events {
            trace!(seq = event.seq, op = ?event.op, name = ?event.name, "monitor event");
        }

        let snapshot = self.subscribers().clone();
        let mut disconnected = Vec::new();
        for sub in &snapshot {
            match &sub.sink {
                Sink::Callback(cb) => cb(event),
                Sink::Channel(tx) => match tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        self.dropped_events.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(TrySendError::Disconnected(_)) => disconnected.push(sub.id),
                },
            }
        }

        if !disconnected.is_empty() {
            self.subscribers().retain(|s| !disconnected.contains(&s.id));
        }
    }
}

/// Gives up delivery ownership, also when a callback panics.
struct OwnerGuard<'a> {
    inner: &'a EmitterInner,
}

impl Drop for OwnerGuard<'_> {
    fn drop(&mut self) {
        self.inner.delivery().owner = None;
        self.inner.released.notify_all();
    }
}

/// Multicast source of [`MonitorEvent`]s.
///
/// Cloning yields another handle to the same emitter.
#[derive(Clone)]
pub struct MonitorEmitter {
    inner: Arc<EmitterInner>,
}

impl MonitorEmitter {
    /// Creates an emitter. `stream_capacity` bounds channel-backed streams
    /// (`None` means unbounded).
    #[must_use]
    pub fn new(stream_capacity: Option<usize>, trace_events: bool) -> Self {
        Self {
            inner: Arc::new(EmitterInner {
                subscribers: Mutex::new(Vec::new()),
                delivery: Mutex::new(Delivery::default()),
                released: Condvar::new(),
                stream_capacity,
                trace_events,
                dropped_events: AtomicU64::new(0),
            }),
        }
    }

    /// Registers a callback receiving every event emitted from now on.
    ///
    /// The returned handle unsubscribes when dropped.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&MonitorEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId::new();
        self.inner.subscribers().push(Subscriber {
            id,
            sink: Sink::Callback(Arc::new(callback)),
        });
        Subscription {
            id,
            emitter: Arc::downgrade(&self.inner),
            active: AtomicBool::new(true),
        }
    }

    /// Opens a channel-backed stream receiving every event emitted from now on.
    #[must_use]
    pub fn stream(&self) -> MonitorStream {
        let id = SubscriptionId::new();
        let (tx, rx) = match self.inner.stream_capacity {
            Some(cap) => bounded(cap.max(1)),
            None => unbounded(),
        };
        self.inner.subscribers().push(Subscriber {
            id,
            sink: Sink::Channel(tx),
        });
        MonitorStream::new(id, rx, Arc::downgrade(&self.inner))
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers().len()
    }

    /// Events a full bounded stream could not accept.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.inner.dropped_events.load(Ordering::Relaxed)
    }

    pub(crate) fn emit(&self, mut event: MonitorEvent) {
        let inner = &*self.inner;
        let me = thread::current().id();
        let mut delivery = inner.delivery();

        let reentrant = delivery.owner == Some(me);
        if !reentrant {
            while delivery.owner.is_some() {
                delivery = inner.released.wait(delivery).unwrap_or_else(PoisonError::into_inner);
            }
        }

        event.seq = delivery.next_seq;
        event.at = Utc::now();
        delivery.next_seq += 1;
        delivery.queue.push_back(event);
        if reentrant {
            // The outer emit on this thread delivers it next.
            return;
        }

        delivery.owner = Some(me);
        let _owner = OwnerGuard { inner };
        loop {
            let Some(event) = delivery.queue.pop_front() else {
                drop(delivery);
                return;
            };
            drop(delivery);
            inner.deliver(&event);
            delivery = inner.delivery();
        }
    }
}

impl Default for MonitorEmitter {
    fn default() -> Self {
        Self::new(None, true)
    }
}

impl std::fmt::Debug for MonitorEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorEmitter")
            .field("subscribers", &self.subscriber_count())
            .field("dropped_events", &self.dropped_events())
            .finish()
    }
}

/// Handle for a callback subscription.
///
/// Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes it"]
pub struct Subscription {
    id: SubscriptionId,
    emitter: Weak<EmitterInner>,
    active: AtomicBool,
}

impl Subscription {
    /// The subscription id.
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Stops delivery. Idempotent.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(inner) = self.emitter.upgrade() {
            inner.remove(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
