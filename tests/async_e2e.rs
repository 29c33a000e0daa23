mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use kyrologic::{Action, ChainId, Decision, ExecutionError, KyroError, Logic, MonitorOp, ThreadScheduler};

use common::wire;

fn scheduler() -> Arc<ThreadScheduler> {
    Arc::new(ThreadScheduler::start("kyrologic-async-e2e").unwrap())
}

/// Allows after sleeping for the action's `delay` field (milliseconds).
fn delayed_fetch() -> Logic<i64> {
    Logic::for_type("FETCH")
        .validate(|ctx, decision| {
            let action = ctx.action().clone();
            let delay = action.field("delay").and_then(serde_json::Value::as_u64).unwrap_or(5);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(delay));
                decision.allow(action);
            });
            Ok(())
        })
        .build()
        .unwrap()
}

fn fetch(id: u64, delay: u64) -> Action {
    Action::new("FETCH").with_field("id", id).with_field("delay", delay)
}

#[test]
fn async_phases_complete_and_drain() {
    let (store, pipeline) = wire(vec![delayed_fetch()], scheduler());
    let stream = pipeline.monitor().stream();

    for id in 0..3 {
        pipeline.dispatch(fetch(id, 5)).unwrap();
    }
    pipeline.wait_idle(Duration::from_secs(5)).unwrap();

    assert_eq!(store.reduced().len(), 3);
    assert_eq!(pipeline.pending(), 0);

    let mut per_chain: HashMap<ChainId, Vec<MonitorOp>> = HashMap::new();
    for event in stream.drain() {
        per_chain.entry(event.chain.unwrap()).or_default().push(event.op);
    }
    assert_eq!(per_chain.len(), 3);
    for ops in per_chain.values() {
        assert_eq!(ops, &[MonitorOp::Top, MonitorOp::Begin, MonitorOp::Next, MonitorOp::Bottom, MonitorOp::End]);
    }
}

#[test]
fn slow_chain_does_not_block_a_fast_one() {
    let (store, pipeline) = wire(vec![delayed_fetch()], scheduler());

    pipeline.dispatch(fetch(1, 200)).unwrap();
    pipeline.dispatch(fetch(2, 5)).unwrap();

    pipeline.wait_idle(Duration::from_secs(5)).unwrap();
    let ids: Vec<_> = store.reduced().iter().map(|a| a.field("id").cloned().unwrap()).collect();
    assert_eq!(ids, vec![serde_json::json!(2), serde_json::json!(1)]);
}

#[test]
fn asynchronous_reject_redispatches_from_the_completing_thread() {
    let guard: Logic<i64> = Logic::for_type("DEC")
        .validate(|ctx, decision| {
            let positive = ctx.get_state() > 0;
            let action = ctx.action().clone();
            thread::spawn(move || {
                if positive {
                    decision.allow(action);
                } else {
                    decision.reject(Action::new("NOOP"));
                }
            });
            Ok(())
        })
        .build()
        .unwrap();
    let (store, pipeline) = wire(vec![guard], scheduler());

    pipeline.dispatch(Action::new("DEC")).unwrap();
    pipeline.wait_idle(Duration::from_secs(5)).unwrap();
    pipeline.dispatch(Action::new("DEC")).unwrap();
    pipeline.wait_idle(Duration::from_secs(5)).unwrap();

    assert_eq!(store.updates(), vec![0, 0]);
    assert_eq!(store.reduced(), vec![Action::new("DEC"), Action::new("NOOP")]);
}

#[test]
fn wait_idle_times_out_while_a_phase_is_suspended() {
    let parked: Arc<Mutex<Vec<Decision>>> = Arc::new(Mutex::new(Vec::new()));
    let slot = Arc::clone(&parked);
    let hold: Logic<i64> = Logic::for_type("HOLD")
        .validate(move |_, decision| {
            slot.lock().unwrap().push(decision);
            Ok(())
        })
        .build()
        .unwrap();
    let (store, pipeline) = wire(vec![hold], scheduler());

    pipeline.dispatch(Action::new("HOLD")).unwrap();
    let err = pipeline.wait_idle(Duration::from_millis(50)).unwrap_err();
    assert!(matches!(err, KyroError::Execution(ExecutionError::Timeout { duration_ms: 50 })));
    assert!(err.is_retryable());
    assert_eq!(pipeline.pending_chains().len(), 1);

    let decision = parked.lock().unwrap().pop().unwrap();
    decision.allow(Action::new("HOLD"));
    pipeline.wait_idle(Duration::from_secs(5)).unwrap();
    assert_eq!(store.reduced(), vec![Action::new("HOLD")]);
}

#[test]
fn panicking_process_phase_does_not_stall_the_scheduler() {
    let good_runs = Arc::new(AtomicUsize::new(0));
    let runs = Arc::clone(&good_runs);
    let audit: Logic<i64> = Logic::for_type("*")
        .process(move |ctx, decision| {
            if ctx.action().action_type() == "BAD" {
                panic!("audit rejected BAD");
            }
            runs.fetch_add(1, Ordering::SeqCst);
            decision.allow(ctx.action().clone());
            Ok(())
        })
        .build()
        .unwrap();
    let (store, pipeline) = wire(vec![audit], scheduler());
    let stream = pipeline.monitor().stream();

    pipeline.dispatch(Action::new("BAD")).unwrap();
    pipeline.dispatch(Action::new("GOOD")).unwrap();
    pipeline.wait_idle(Duration::from_secs(5)).unwrap();

    assert_eq!(good_runs.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.pending(), 0);
    assert_eq!(store.reduced(), vec![Action::new("BAD"), Action::new("GOOD")]);

    let errors: Vec<_> = stream.drain().into_iter().filter(|e| e.op == MonitorOp::Error).collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].action.as_ref().unwrap().action_type(), "BAD");
    assert!(errors[0].error.as_deref().unwrap().contains("panicked: audit rejected BAD"));
}

#[cfg(feature = "tokio-runtime")]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn drained_resolves_on_tokio() {
    use kyrologic::TokioScheduler;

    let sleepy: Logic<i64> = Logic::for_type("FETCH")
        .validate(|ctx, decision| {
            let action = ctx.action().clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                decision.allow(action);
            });
            Ok(())
        })
        .build()
        .unwrap();
    let (store, pipeline) = wire(vec![sleepy], Arc::new(TokioScheduler::current().unwrap()));

    pipeline.dispatch(fetch(1, 0)).unwrap();
    pipeline.dispatch(fetch(2, 0)).unwrap();
    tokio::time::timeout(Duration::from_secs(5), pipeline.drained()).await.unwrap();

    assert_eq!(store.reduced().len(), 2);
    assert_eq!(pipeline.pending(), 0);
}
