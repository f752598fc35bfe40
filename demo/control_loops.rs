//! Three control loops at different priorities plus a virtual heartbeat.
//!
//! ```text
//! cargo run --example control_loops
//! TICKRT__HIGH__CADENCE_MS=5 DEMO_SECONDS=10 cargo run --example control_loops
//! ```
//! Ctrl-C drains every lane.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tickrt::prelude::*;

struct AxisLoop {
    position: f64,
    target: f64,
}

impl ThreadBase for AxisLoop {
    fn run_cycle(&mut self, ctx: &CycleCtx<'_>) -> anyhow::Result<()> {
        let error = self.target - self.position;
        self.position += error * 0.2;
        if error.abs() < 0.01 {
            self.target = -self.target;
            ctx.debug(&format!("axis reversing at {:.3}", self.position));
        }
        Ok(())
    }
}

impl ThreadKind for AxisLoop {
    const KIND: &'static str = "axis";
    const DEFAULT_PRIORITY: PriorityLevel = PriorityLevel::High;

    fn build() -> anyhow::Result<Self> {
        Ok(Self {
            position: 0.0,
            target: 1.0,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Load,
    Clamp,
    Press,
    Release,
}

struct Sequencer {
    step: Step,
}

impl ThreadBase for Sequencer {
    fn run_cycle(&mut self, ctx: &CycleCtx<'_>) -> anyhow::Result<()> {
        if ctx.tick() % 25 != 0 {
            return Ok(());
        }
        self.step = match self.step {
            Step::Load => Step::Clamp,
            Step::Clamp => Step::Press,
            Step::Press => Step::Release,
            Step::Release => Step::Load,
        };
        ctx.info(&format!("sequencer -> {:?}", self.step));
        Ok(())
    }
}

impl ThreadKind for Sequencer {
    const KIND: &'static str = "sequencer";

    fn build() -> anyhow::Result<Self> {
        Ok(Self { step: Step::Load })
    }
}

struct Telemetry;

impl ThreadBase for Telemetry {
    fn run_cycle(&mut self, ctx: &CycleCtx<'_>) -> anyhow::Result<()> {
        if ctx.tick() % 7 == 0 {
            anyhow::bail!("telemetry uplink busy");
        }
        Ok(())
    }
}

impl ThreadKind for Telemetry {
    const KIND: &'static str = "telemetry";
    const DEFAULT_PRIORITY: PriorityLevel = PriorityLevel::Low;

    fn build() -> anyhow::Result<Self> {
        Ok(Telemetry)
    }
}

pub fn main() -> anyhow::Result<()> {
    let _guard = LoggerConfig::from_env().init()?;

    let mut cfg = ManagerConfig::load(["tickrt.toml"], Some("TICKRT"))?;
    cfg.handle_term_signals = true;

    let manager = Arc::new(ThreadManager::new(cfg));
    let catalog = KindCatalog::new()
        .with_kind::<AxisLoop>()
        .with_kind::<Sequencer>()
        .with_kind::<Telemetry>();
    let factory = ThreadFactory::new(manager.clone(), catalog);

    let discovery = factory.auto_register();
    for (kind, err) in &discovery.failed {
        tracing::warn!("kind {} not registered: {}", kind, err);
    }
    factory.create_virtual_at(
        "heartbeat",
        PriorityLevel::Low,
        Some(Duration::from_millis(50)),
        None,
        |n, ctx| {
            if n % 20 == 0 {
                ctx.info(&format!("alive, loop {n}"));
            }
            Ok(())
        },
    )?;

    let started = manager.start_all();
    for (name, err) in &started.failed {
        tracing::error!("{} did not start: {}", name, err);
    }

    let run_for = std::env::var("DEMO_SECONDS")
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(3));
    let deadline = Instant::now() + run_for;
    while Instant::now() < deadline && !manager.termination_requested() {
        std::thread::sleep(Duration::from_millis(100));
    }

    for snap in manager.snapshots() {
        tracing::info!(
            "{:<10} {:<6} {:<8} ticks={} failures={} overruns={} max_cycle={:?}",
            snap.name,
            snap.priority,
            snap.status,
            snap.ticks,
            snap.failures,
            snap.overruns,
            snap.max_cycle
        );
    }

    let report = manager.shutdown();
    for name in report.timed_out() {
        tracing::warn!("{} missed its grace timeout", name);
    }
    Ok(())
}
