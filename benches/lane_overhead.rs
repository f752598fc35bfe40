use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::time::{Duration, Instant};

use tickrt::prelude::{
    CycleCtx, ManagerConfig, PriorityLevel, StopOutcome, ThreadBase, ThreadDescriptor,
    ThreadManager,
};

struct Noop;

impl ThreadBase for Noop {
    #[inline(always)]
    fn run_cycle(&mut self, ctx: &CycleCtx<'_>) -> anyhow::Result<()> {
        black_box(ctx.tick());
        Ok(())
    }
}

fn bench_config() -> ManagerConfig {
    let mut cfg = ManagerConfig::default();
    cfg.high.cadence_ms = 1;
    cfg.high.high_resolution_timer = false;
    cfg
}

/// register -> start -> stop for `lanes` descriptors at once.
fn run_lifecycle(lanes: usize) -> Duration {
    let mgr = ThreadManager::new(bench_config());
    let start = Instant::now();

    for i in 0..lanes {
        let desc = ThreadDescriptor::new(Noop).with_priority(PriorityLevel::High);
        mgr.register(&format!("lane-{i}"), desc).unwrap();
    }
    assert!(mgr.start_all().is_ok());
    let report = mgr.stop_all();
    let elapsed = start.elapsed();

    assert!(
        report
            .outcomes
            .iter()
            .all(|(_, o)| *o == StopOutcome::Stopped)
    );
    elapsed
}

pub fn bench_lifecycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("lane_lifecycle");

    for &lanes in &[1_usize, 8, 32] {
        group.bench_function(BenchmarkId::from_parameter(lanes), |b| {
            b.iter_custom(|n| {
                let mut total = Duration::ZERO;
                for _ in 0..n {
                    total += run_lifecycle(lanes);
                }
                total
            });
        });
    }

    group.finish();
}

pub fn bench_lookup(c: &mut Criterion) {
    let mgr = ThreadManager::new(bench_config());
    for i in 0..64 {
        let desc = ThreadDescriptor::new(Noop).with_priority(PriorityLevel::High);
        mgr.register(&format!("lane-{i}"), desc).unwrap();
    }
    for i in 0..8 {
        mgr.start(&format!("lane-{i}")).unwrap();
    }

    c.bench_function("lookup_while_running", |b| {
        b.iter(|| black_box(mgr.lookup(black_box("lane-3")).unwrap()))
    });
    c.bench_function("count_running_at", |b| {
        b.iter(|| black_box(mgr.count_running_at(PriorityLevel::High)))
    });

    mgr.shutdown();
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .warm_up_time(Duration::from_millis(500))
        .measurement_time(Duration::from_secs(3))
        .sample_size(12);
    targets = bench_lifecycle, bench_lookup
}
criterion_main!(benches);
