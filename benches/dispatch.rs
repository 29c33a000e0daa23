use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use kyrologic::{Action, Logic, ManualScheduler, Pipeline, StoreApi};

struct BenchStore {
    count: AtomicI64,
}

impl StoreApi<i64> for BenchStore {
    fn get_state(&self) -> i64 {
        self.count.load(Ordering::Relaxed)
    }

    fn dispatch(&self, _action: Action) {}
}

fn make_pipeline(logics: Vec<Logic<i64>>) -> (Arc<ManualScheduler>, Arc<BenchStore>, Pipeline<i64>) {
    let sched = Arc::new(ManualScheduler::new());
    let store = Arc::new(BenchStore {
        count: AtomicI64::new(1),
    });
    let pipeline = Pipeline::new(logics, sched.clone()).unwrap();
    let reducer_store = Arc::clone(&store);
    pipeline
        .connect(
            &store,
            Arc::new(move |action: Action| {
                if action.action_type() == "INC" {
                    reducer_store.count.fetch_add(1, Ordering::Relaxed);
                }
            }),
        )
        .unwrap();
    (sched, store, pipeline)
}

fn passthrough(pattern: &str) -> Logic<i64> {
    Logic::for_type(pattern)
        .validate(|ctx, decision| {
            decision.allow(ctx.action().clone());
            Ok(())
        })
        .build()
        .unwrap()
}

fn bench_unmatched(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    group.throughput(Throughput::Elements(1));

    let (sched, _store, pipeline) = make_pipeline(vec![passthrough("OTHER")]);
    group.bench_function("unmatched", |b| {
        b.iter(|| {
            pipeline.dispatch(black_box(Action::new("INC"))).unwrap();
            sched.run_until_idle();
        });
    });

    group.finish();
}

fn bench_matched(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    group.throughput(Throughput::Elements(1));

    for depth in [1usize, 4, 16] {
        let logics = (0..depth).map(|_| passthrough("*")).collect();
        let (sched, _store, pipeline) = make_pipeline(logics);
        let stream = pipeline.monitor().stream();
        group.bench_function(format!("matched_{depth}"), |b| {
            b.iter(|| {
                pipeline.dispatch(black_box(Action::new("INC"))).unwrap();
                sched.run_until_idle();
                black_box(stream.drain().len());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_unmatched, bench_matched);
criterion_main!(benches);
