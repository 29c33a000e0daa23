#![allow(dead_code)]

use std::sync::{Arc, Mutex, OnceLock};

use serde_json::{json, Value};

use kyrologic::{Action, Logic, MonitorStream, Pipeline, Scheduler, StoreApi};

/// Minimal state container: a counter decremented by `DEC`.
pub struct CounterStore {
    count: Mutex<i64>,
    updates: Mutex<Vec<i64>>,
    reduced: Mutex<Vec<Action>>,
    pipeline: OnceLock<Pipeline<i64>>,
}

impl CounterStore {
    pub fn new(initial: i64) -> Arc<Self> {
        Arc::new(Self {
            count: Mutex::new(initial),
            updates: Mutex::new(Vec::new()),
            reduced: Mutex::new(Vec::new()),
            pipeline: OnceLock::new(),
        })
    }

    fn reduce(&self, action: Action) {
        let mut count = self.count.lock().unwrap();
        if action.action_type() == "DEC" {
            *count -= 1;
        }
        self.updates.lock().unwrap().push(*count);
        self.reduced.lock().unwrap().push(action);
    }

    /// State after every reduction, in order.
    pub fn updates(&self) -> Vec<i64> {
        self.updates.lock().unwrap().clone()
    }

    /// Every action that reached the reducer.
    pub fn reduced(&self) -> Vec<Action> {
        self.reduced.lock().unwrap().clone()
    }
}

impl StoreApi<i64> for CounterStore {
    fn get_state(&self) -> i64 {
        *self.count.lock().unwrap()
    }

    fn dispatch(&self, action: Action) {
        if let Some(pipeline) = self.pipeline.get() {
            pipeline.dispatch(action).unwrap();
        }
    }
}

/// Builds a pipeline and binds it to a fresh store with `count: 1`.
pub fn wire(logics: Vec<Logic<i64>>, scheduler: Arc<dyn Scheduler>) -> (Arc<CounterStore>, Pipeline<i64>) {
    let store = CounterStore::new(1);
    let weak = Arc::downgrade(&store);
    let pipeline = Pipeline::new(logics, scheduler)
        .unwrap()
        .middleware()
        .apply(&store)
        .next(Arc::new(move |action: Action| {
            if let Some(store) = weak.upgrade() {
                store.reduce(action);
            }
        }))
        .unwrap();
    store.pipeline.set(pipeline.clone()).unwrap();
    (store, pipeline)
}

/// Allows `DEC` while the count is positive, otherwise swaps in `NOOP`.
pub fn validate_dec() -> Logic<i64> {
    Logic::for_type("DEC")
        .validate(|ctx, decision| {
            if ctx.get_state() > 0 {
                decision.allow(ctx.action().clone());
            } else {
                decision.reject(Action::new("NOOP"));
            }
            Ok(())
        })
        .build()
        .unwrap()
}

/// Wildcard transform that passes every action through unchanged.
pub fn pass_all() -> Logic<i64> {
    Logic::for_type("*")
        .transform(|ctx, decision| {
            decision.allow(ctx.action().clone());
            Ok(())
        })
        .build()
        .unwrap()
}

pub fn trace(stream: &MonitorStream) -> Vec<Value> {
    stream.drain().iter().map(kyrologic::MonitorEvent::to_trace).collect()
}

pub fn ops(trace: &[Value]) -> Vec<String> {
    trace.iter().map(|e| e["op"].as_str().unwrap().to_string()).collect()
}

pub fn top(t: &str) -> Value {
    json!({"action": {"type": t}, "op": "top"})
}

pub fn begin(t: &str, name: &str) -> Value {
    json!({"action": {"type": t}, "name": name, "op": "begin"})
}

pub fn next(t: &str, name: &str) -> Value {
    json!({"action": {"type": t}, "nextAction": {"type": t}, "name": name, "shouldProcess": true, "op": "next"})
}

pub fn next_disp(t: &str, disp: &str, name: &str) -> Value {
    json!({"action": {"type": t}, "dispAction": {"type": disp}, "name": name, "shouldProcess": false, "op": "nextDisp"})
}

pub fn dispatch(t: &str, disp: &str) -> Value {
    json!({"action": {"type": t}, "dispAction": {"type": disp}, "op": "dispatch"})
}

pub fn bottom(t: &str) -> Value {
    json!({"nextAction": {"type": t}, "op": "bottom"})
}

pub fn end(t: &str, name: &str) -> Value {
    json!({"action": {"type": t}, "name": name, "op": "end"})
}
