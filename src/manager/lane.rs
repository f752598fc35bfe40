use crate::config::PriorityProfile;
use crate::model::{CycleCtx, FailureAction, PriorityLevel, ThreadBase, ThreadStatus};
use crate::utils::affinity::pin_current;
use crate::utils::logger::{LogLevel, LogSink, Throttle};
use crate::utils::timer::begin_high_resolution_timing;
use crate::utils::{CancelToken, HealthFlag, StatusCell};
use anyhow::anyhow;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Idle time before the next tick: whatever is left of the cadence.
/// An overrun gives zero, never a negative catch-up.
#[inline]
pub fn next_sleep(cadence: Duration, last_cycle: Duration) -> Duration {
    cadence.saturating_sub(last_cycle)
}

/// Counters written by one lane and read by snapshots.
#[derive(Debug)]
pub(crate) struct LaneStats {
    pub ticks: AtomicU64,
    pub failures: AtomicU64,
    pub overruns: AtomicU64,
    pub last_cycle_ns: AtomicU64,
    pub max_cycle_ns: AtomicU64,
    pub alive: HealthFlag,
}

impl LaneStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            ticks: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            last_cycle_ns: AtomicU64::new(0),
            max_cycle_ns: AtomicU64::new(0),
            alive: HealthFlag::new(false),
        })
    }

    #[inline]
    fn record_cycle(&self, elapsed: Duration) {
        let ns = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.last_cycle_ns.store(ns, Ordering::Relaxed);
        self.max_cycle_ns.fetch_max(ns, Ordering::Relaxed);
    }
}

/// Scheduling parameters a lane is started with.
#[derive(Debug, Clone)]
pub(crate) struct LaneSpec {
    pub name: String,
    pub priority: PriorityLevel,
    pub profile: PriorityProfile,
    pub cadence: Duration,
    pub log_context: String,
    pub overrun_log_interval: Duration,
}

/// Everything one lane thread owns.
pub(crate) struct Lane {
    pub spec: LaneSpec,
    pub body: Box<dyn ThreadBase>,
    pub status: StatusCell,
    pub stats: Arc<LaneStats>,
    pub sink: Arc<dyn LogSink>,
    pub cancel: CancelToken,
    pub term: Arc<AtomicBool>,
}

impl Lane {
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        let thread_name = self.spec.name.replace('\0', "_");
        thread::Builder::new()
            .name(thread_name)
            .spawn(move || self.run())
    }

    fn log(&self, level: LogLevel, message: &str) {
        self.sink.write(message, level, &self.spec.log_context);
    }

    fn run(self) {
        self.stats.alive.up();
        let name = self.spec.name.as_str();

        if let Some(mask) = self.spec.profile.core_mask {
            match pin_current(mask) {
                Ok(cores) => self.log(
                    LogLevel::Debug,
                    &format!("[{name}] pinned to cores {cores:?}"),
                ),
                Err(e) => self.log(
                    LogLevel::Warn,
                    &format!("[{name}] running unpinned ({}): {e}", e.kind()),
                ),
            }
        }

        let timing = if self.spec.profile.high_resolution_timer {
            match begin_high_resolution_timing() {
                Ok(guard) => Some(guard),
                Err(e) => {
                    self.log(
                        LogLevel::Warn,
                        &format!("[{name}] high resolution timing unavailable: {e:#}"),
                    );
                    None
                }
            }
        } else {
            None
        };

        let Lane {
            spec,
            mut body,
            status,
            stats,
            sink,
            cancel,
            term,
        } = self;
        let sink = sink.as_ref();
        let ctx_at = |tick: u64| {
            CycleCtx::new(
                &spec.name,
                spec.priority,
                &spec.log_context,
                tick,
                sink,
                &cancel,
            )
        };
        let log = |level: LogLevel, message: String| sink.write(&message, level, &spec.log_context);

        let mut faulted = false;
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| body.on_started(&ctx_at(0)))) {
            log(
                LogLevel::Error,
                format!(
                    "[{}] on_started panicked: {}",
                    spec.name,
                    panic_message(&*payload)
                ),
            );
            faulted = escalate(&status);
        }

        let cadence = spec.cadence;
        let throttle = Throttle::new(spec.overrun_log_interval);
        let mut tick = 0u64;

        while !faulted {
            if status.get() != ThreadStatus::Running
                || cancel.is_cancelled()
                || term.load(Ordering::Relaxed)
            {
                break;
            }

            tick += 1;
            let ctx = ctx_at(tick);
            let started = Instant::now();
            stats.ticks.fetch_add(1, Ordering::Relaxed);

            let result = match catch_unwind(AssertUnwindSafe(|| body.run_cycle(&ctx))) {
                Ok(result) => result,
                Err(payload) => Err(anyhow!("run_cycle panicked: {}", panic_message(&*payload))),
            };

            if let Err(err) = result {
                stats.failures.fetch_add(1, Ordering::Relaxed);
                let action = catch_unwind(AssertUnwindSafe(|| body.on_failure(&err, &ctx)))
                    .unwrap_or_else(|payload| {
                        log(
                            LogLevel::Error,
                            format!(
                                "[{}] on_failure panicked: {}",
                                spec.name,
                                panic_message(&*payload)
                            ),
                        );
                        FailureAction::Fault
                    });
                if action == FailureAction::Fault {
                    faulted = escalate(&status);
                    log(
                        LogLevel::Error,
                        format!(
                            "[{}] faulted at tick {}: {:#} (status={})",
                            spec.name,
                            tick,
                            err,
                            status.get()
                        ),
                    );
                    break;
                }
            }

            let elapsed = started.elapsed();
            stats.record_cycle(elapsed);
            if elapsed > cadence {
                stats.overruns.fetch_add(1, Ordering::Relaxed);
                if let Some(suppressed) = throttle.poll() {
                    log(
                        LogLevel::Warn,
                        format!(
                            "[{}] tick {} took {:?}, cadence {:?} ({} earlier overruns suppressed)",
                            spec.name, tick, elapsed, cadence, suppressed
                        ),
                    );
                }
            }

            cancel.sleep_cancellable(next_sleep(cadence, elapsed));
        }

        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| body.on_stopped(&ctx_at(tick)))) {
            log(
                LogLevel::Error,
                format!(
                    "[{}] on_stopped panicked: {}",
                    spec.name,
                    panic_message(&*payload)
                ),
            );
        }
        drop(timing);

        if !faulted {
            // termination signal or manager teardown can end the loop while still Running
            if status
                .transition(ThreadStatus::Running, ThreadStatus::Stopping)
                .is_ok()
            {
                log(
                    LogLevel::Info,
                    format!("[{}] leaving on termination request", spec.name),
                );
            }
            match status.transition(ThreadStatus::Stopping, ThreadStatus::Stopped) {
                Ok(()) => log(
                    LogLevel::Info,
                    format!("[{}] stopped after {} ticks", spec.name, tick),
                ),
                Err(ThreadStatus::Faulted) => log(
                    LogLevel::Warn,
                    format!(
                        "[{}] lane exited after its stop timeout, status stays Faulted",
                        spec.name
                    ),
                ),
                Err(other) => log(
                    LogLevel::Debug,
                    format!("[{}] lane exited with status {}", spec.name, other),
                ),
            }
        }

        stats.alive.down();
    }
}

/// Running or Stopping -> Faulted. Returns true once the status is Faulted.
fn escalate(status: &StatusCell) -> bool {
    status
        .transition(ThreadStatus::Running, ThreadStatus::Faulted)
        .or_else(|_| status.transition(ThreadStatus::Stopping, ThreadStatus::Faulted))
        .is_ok()
        || status.get() == ThreadStatus::Faulted
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_fills_the_rest_of_the_cadence() {
        let cadence = Duration::from_millis(10);
        assert_eq!(
            next_sleep(cadence, Duration::from_millis(3)),
            Duration::from_millis(7)
        );
        assert_eq!(next_sleep(cadence, Duration::ZERO), cadence);
    }

    #[test]
    fn overrun_never_sleeps_negative() {
        let cadence = Duration::from_millis(10);
        assert_eq!(next_sleep(cadence, cadence), Duration::ZERO);
        assert_eq!(
            next_sleep(cadence, Duration::from_millis(35)),
            Duration::ZERO
        );
    }

    #[test]
    fn escalate_reaches_faulted_from_running_and_stopping() {
        let running = StatusCell::new(ThreadStatus::Created);
        running
            .transition(ThreadStatus::Created, ThreadStatus::Running)
            .unwrap();
        assert!(escalate(&running));
        assert_eq!(running.get(), ThreadStatus::Faulted);

        let stopping = StatusCell::new(ThreadStatus::Created);
        stopping
            .transition(ThreadStatus::Created, ThreadStatus::Running)
            .unwrap();
        stopping
            .transition(ThreadStatus::Running, ThreadStatus::Stopping)
            .unwrap();
        assert!(escalate(&stopping));
        assert_eq!(stopping.last(), ThreadStatus::Stopping);
    }

    #[test]
    fn panic_payloads_become_messages() {
        let payload = catch_unwind(|| panic!("axis {} lost", 3)).unwrap_err();
        assert_eq!(panic_message(&*payload), "axis 3 lost");
        let payload = catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(&*payload), "static");
    }
}
