//! Registry and lifecycle controller.
//!
//! [`ThreadManager`] owns every registered descriptor and drives each started
//! one on its own OS thread (a lane). All methods take `&self`, so the
//! manager is shared as `Arc<ThreadManager>`; the factory only ever sees it
//! through [`ThreadRegistrar`].

mod lane;
mod registry;
mod report;

pub use lane::next_sleep;
pub use report::{StartReport, StopOutcome, StopReport, ThreadSnapshot};

use crate::config::ManagerConfig;
use crate::descriptor::ThreadDescriptor;
use crate::error::{ThreadError, ThreadResult};
use crate::factory::ThreadRegistrar;
use crate::model::{PriorityLevel, ThreadStatus};
use crate::utils::logger::{LogLevel, LogSink, TracingSink};
use crate::utils::{CancelToken, StatusCell};
use lane::{Lane, LaneSpec};
use parking_lot::Mutex;
use registry::{LaneHandle, Registry};
use signal_hook::SigId;
use signal_hook::consts::TERM_SIGNALS;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Poll period of `stop` while waiting for a lane to leave.
const STOP_POLL: Duration = Duration::from_millis(1);

enum StopRequest {
    Done(StopOutcome),
    Pending {
        status: StatusCell,
        deadline: Instant,
        grace: Duration,
    },
}

pub struct ThreadManager {
    config: ManagerConfig,
    registry: Registry,
    sink: Arc<dyn LogSink>,
    root: CancelToken,
    term_flag: Arc<AtomicBool>,
    signal_ids: Mutex<Vec<SigId>>,
}

impl ThreadManager {
    /// Manager logging through `tracing`.
    pub fn new(config: ManagerConfig) -> Self {
        Self::with_sink(config, Arc::new(TracingSink))
    }

    pub fn with_sink(config: ManagerConfig, sink: Arc<dyn LogSink>) -> Self {
        let term_flag = Arc::new(AtomicBool::new(false));
        let mut signal_ids = Vec::new();
        if config.handle_term_signals {
            for sig in TERM_SIGNALS {
                match signal_hook::flag::register(*sig, term_flag.clone()) {
                    Ok(id) => signal_ids.push(id),
                    Err(e) => sink.write(
                        &format!("[ThreadManager] cannot watch signal {sig}: {e}"),
                        LogLevel::Warn,
                        &config.default_log_context,
                    ),
                }
            }
        }

        Self {
            config,
            registry: Registry::default(),
            sink,
            root: CancelToken::new_root(),
            term_flag,
            signal_ids: Mutex::new(signal_ids),
        }
    }

    #[inline]
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    #[inline]
    pub fn sink(&self) -> &Arc<dyn LogSink> {
        &self.sink
    }

    /// True once SIGINT/SIGTERM arrived (only watched with `handle_term_signals`).
    #[inline]
    pub fn termination_requested(&self) -> bool {
        self.term_flag.load(Ordering::Relaxed)
    }

    fn log(&self, level: LogLevel, message: &str) {
        self.sink
            .write(message, level, &self.config.default_log_context);
    }

    fn logged<T>(&self, op: &str, name: &str, res: ThreadResult<T>) -> ThreadResult<T> {
        if let Err(ref e) = res {
            let level = if e.is_advisory() {
                LogLevel::Warn
            } else {
                LogLevel::Error
            };
            self.log(
                level,
                &format!("[ThreadManager] {op} <{name}> failed ({}): {e}", e.kind()),
            );
        }
        res
    }

    /// Adds a descriptor under `name`. Names are unique for the manager's lifetime
    /// or until the entry is unregistered.
    pub fn register(&self, name: &str, descriptor: ThreadDescriptor) -> ThreadResult<()> {
        let res = self.registry.insert(name, descriptor);
        if res.is_ok() {
            self.log(LogLevel::Debug, &format!("[ThreadManager] registered <{name}>"));
        }
        self.logged("register", name, res)
    }

    /// Changes priority and logging context of a descriptor that has not started yet.
    pub fn configure(
        &self,
        name: &str,
        priority: PriorityLevel,
        log_path: Option<String>,
    ) -> ThreadResult<()> {
        let res = self.registry.write(name, |entry| {
            let status = entry.status.get();
            if status != ThreadStatus::Created {
                return Err(ThreadError::invalid_state(name, status, "configure"));
            }
            entry.priority = priority;
            entry.log_context = log_path.filter(|p| !p.trim().is_empty());
            Ok(())
        });
        self.logged("configure", name, res)
    }

    /// Created -> Running, then spawns the lane.
    pub fn start(&self, name: &str) -> ThreadResult<()> {
        let res = self.registry.write(name, |entry| {
            let status = entry.status.get();
            if status != ThreadStatus::Created {
                return Err(ThreadError::invalid_state(name, status, "start"));
            }
            let body = entry
                .body
                .get_mut()
                .take()
                .ok_or_else(|| ThreadError::invalid_state(name, status, "start"))?;
            entry
                .status
                .transition(ThreadStatus::Created, ThreadStatus::Running)
                .map_err(|actual| ThreadError::invalid_state(name, actual, "start"))?;

            let cancel = self.root.new_child();
            let profile = *self.config.profile(entry.priority);
            let lane = Lane {
                spec: LaneSpec {
                    name: name.to_string(),
                    priority: entry.priority,
                    profile,
                    cadence: entry.cadence.unwrap_or_else(|| profile.cadence()),
                    log_context: entry
                        .log_context
                        .clone()
                        .unwrap_or_else(|| self.config.default_log_context.clone()),
                    overrun_log_interval: self.config.overrun_log_interval(),
                },
                body,
                status: entry.status.clone(),
                stats: entry.stats.clone(),
                sink: self.sink.clone(),
                cancel: cancel.clone(),
                term: self.term_flag.clone(),
            };

            match lane.spawn() {
                Ok(join) => {
                    entry.lane = Some(LaneHandle {
                        cancel,
                        join: Some(join),
                    });
                    Ok(())
                }
                Err(e) => {
                    let _ = entry
                        .status
                        .transition(ThreadStatus::Running, ThreadStatus::Faulted);
                    Err(ThreadError::SpawnFailed {
                        name: name.to_string(),
                        reason: e.to_string(),
                    })
                }
            }
        });

        if res.is_ok() {
            self.log(LogLevel::Info, &format!("[ThreadManager] started <{name}>"));
        }
        self.logged("start", name, res)
    }

    /// Starts every Created descriptor. Failures are collected, never fail-fast.
    pub fn start_all(&self) -> StartReport {
        let mut report = StartReport::default();
        for name in self.registry.names_where(|_| true) {
            let status = match self.registry.read(&name, |e| e.status.get()) {
                Ok(status) => status,
                Err(e) => {
                    report.failed.push((name, e));
                    continue;
                }
            };
            if status != ThreadStatus::Created {
                report.skipped.push((name, status));
                continue;
            }
            match self.start(&name) {
                Ok(()) => report.started.push(name),
                Err(e) => report.failed.push((name, e)),
            }
        }

        if !report.is_ok() {
            self.log(
                LogLevel::Warn,
                &format!(
                    "[ThreadManager] start_all: {} started, {} failed",
                    report.started.len(),
                    report.failed.len()
                ),
            );
        }
        report
    }

    /// Requests a graceful stop and waits for the lane, bounded by the grace
    /// timeout of the descriptor's cadence. Stopping a Stopped or Faulted
    /// descriptor is a no-op.
    pub fn stop(&self, name: &str) -> ThreadResult<StopOutcome> {
        let res = self
            .request_stop(name)
            .map(|req| self.await_stop(name, req));
        self.logged("stop", name, res)
    }

    /// Stops every started descriptor. Lanes are signalled together and then
    /// awaited, each against its own deadline.
    pub fn stop_all(&self) -> StopReport {
        let mut report = StopReport::default();
        let mut pending = Vec::new();

        for name in self.registry.names_where(|_| true) {
            match self.request_stop(&name) {
                Ok(req) => pending.push((name, req)),
                Err(ThreadError::InvalidState {
                    status: ThreadStatus::Created,
                    ..
                }) => report.skipped.push(name),
                Err(e) => report.failed.push((name, e)),
            }
        }

        for (name, req) in pending {
            let outcome = self.await_stop(&name, req);
            report.outcomes.push((name, outcome));
        }

        let timed_out: Vec<&str> = report.timed_out().collect();
        if !timed_out.is_empty() {
            self.log(
                LogLevel::Warn,
                &format!("[ThreadManager] stop_all: lanes missed their grace timeout: {timed_out:?}"),
            );
        }
        report
    }

    fn request_stop(&self, name: &str) -> ThreadResult<StopRequest> {
        let (status, cancel, cadence) = self.registry.read(name, |e| {
            (
                e.status.clone(),
                e.lane.as_ref().map(|l| l.cancel.clone()),
                e.cadence
                    .unwrap_or_else(|| self.config.cadence(e.priority)),
            )
        })?;

        loop {
            match status.get() {
                ThreadStatus::Created => {
                    return Err(ThreadError::invalid_state(
                        name,
                        ThreadStatus::Created,
                        "stop",
                    ));
                }
                ThreadStatus::Stopped => return Ok(StopRequest::Done(StopOutcome::AlreadyStopped)),
                ThreadStatus::Faulted => return Ok(StopRequest::Done(StopOutcome::AlreadyFaulted)),
                ThreadStatus::Stopping => break,
                ThreadStatus::Running => {
                    if status
                        .transition(ThreadStatus::Running, ThreadStatus::Stopping)
                        .is_ok()
                    {
                        break;
                    }
                }
            }
        }

        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        let grace = self.config.grace_for(cadence);
        Ok(StopRequest::Pending {
            status,
            deadline: Instant::now() + grace,
            grace,
        })
    }

    fn await_stop(&self, name: &str, req: StopRequest) -> StopOutcome {
        let (status, deadline, grace) = match req {
            StopRequest::Done(outcome) => return outcome,
            StopRequest::Pending {
                status,
                deadline,
                grace,
            } => (status, deadline, grace),
        };

        loop {
            match status.get() {
                ThreadStatus::Stopped => {
                    self.reap(name, true);
                    return StopOutcome::Stopped;
                }
                ThreadStatus::Faulted => {
                    self.reap(name, false);
                    return StopOutcome::Faulted;
                }
                _ => {}
            }

            if Instant::now() >= deadline
                && status
                    .transition(ThreadStatus::Stopping, ThreadStatus::Faulted)
                    .is_ok()
            {
                self.log(
                    LogLevel::Error,
                    &format!(
                        "[ThreadManager] <{name}> did not stop within {grace:?}, status={} (stop_timeout)",
                        ThreadStatus::Faulted
                    ),
                );
                return StopOutcome::TimedOut;
            }

            thread::sleep(STOP_POLL);
        }
    }

    /// Joins a lane that has left its loop. With `wait` false the handle is
    /// only taken if the thread already finished.
    fn reap(&self, name: &str, wait: bool) {
        let join = self
            .registry
            .write(name, |e| {
                Ok(e.lane.as_mut().and_then(|lane| {
                    let ready = lane
                        .join
                        .as_ref()
                        .is_some_and(|j| wait || j.is_finished());
                    if ready { lane.join.take() } else { None }
                }))
            })
            .ok()
            .flatten();

        if let Some(join) = join
            && join.join().is_err()
        {
            self.log(
                LogLevel::Error,
                &format!("[ThreadManager] lane <{name}> terminated abnormally"),
            );
        }
    }

    /// Removes a Stopped or Faulted descriptor.
    pub fn unregister(&self, name: &str) -> ThreadResult<()> {
        let res = self
            .registry
            .remove_if(name, ThreadStatus::is_terminal)
            .map(|entry| {
                // a timed out lane is detached, it exits on its own once its tick returns
                if let Some(lane) = entry.lane {
                    lane.cancel.cancel();
                }
            });
        if res.is_ok() {
            self.log(LogLevel::Debug, &format!("[ThreadManager] unregistered <{name}>"));
        }
        self.logged("unregister", name, res)
    }

    /// Status, priority and lane statistics of one descriptor.
    pub fn lookup(&self, name: &str) -> ThreadResult<ThreadSnapshot> {
        self.registry
            .read(name, |e| e.snapshot(name, &self.config.default_log_context))
    }

    pub fn status(&self, name: &str) -> ThreadResult<ThreadStatus> {
        self.registry.read(name, |e| e.status.get())
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.registry.read(name, |_| ()).is_ok()
    }

    pub fn names(&self) -> Vec<String> {
        self.registry.names_where(|_| true)
    }

    pub fn names_at(&self, priority: PriorityLevel) -> Vec<String> {
        self.registry.names_where(|e| e.priority == priority)
    }

    pub fn snapshots(&self) -> Vec<ThreadSnapshot> {
        self.registry.snapshots(&self.config.default_log_context)
    }

    /// Descriptors that are Running with a live lane.
    pub fn count_running(&self) -> usize {
        self.registry.count_where(|e| e.is_running())
    }

    pub fn count_running_at(&self, priority: PriorityLevel) -> usize {
        self.registry
            .count_where(|e| e.priority == priority && e.is_running())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stops every lane, clears the registry and stops watching signals.
    /// The manager accepts new registrations afterwards, but lanes started
    /// from it leave their loop immediately.
    pub fn shutdown(&self) -> StopReport {
        let report = self.stop_all();
        self.root.cancel();

        for (name, entry) in self.registry.drain() {
            let Some(mut lane) = entry.lane else {
                continue;
            };
            match lane.join.take() {
                Some(join) if join.is_finished() => {
                    if join.join().is_err() {
                        self.log(
                            LogLevel::Error,
                            &format!("[ThreadManager] lane <{name}> terminated abnormally"),
                        );
                    }
                }
                Some(_) => self.log(
                    LogLevel::Warn,
                    &format!("[ThreadManager] lane <{name}> still busy, detached"),
                ),
                None => {}
            }
        }

        self.unwatch_signals();

        self.log(
            LogLevel::Info,
            &format!(
                "[ThreadManager] shutdown: {} stopped, {} timed out",
                report.outcomes.len(),
                report.timed_out().count()
            ),
        );
        report
    }

    fn unwatch_signals(&self) {
        for id in self.signal_ids.lock().drain(..) {
            signal_hook::low_level::unregister(id);
        }
    }
}

impl Default for ThreadManager {
    fn default() -> Self {
        Self::new(ManagerConfig::default())
    }
}

impl ThreadRegistrar for ThreadManager {
    fn register(&self, name: &str, descriptor: ThreadDescriptor) -> ThreadResult<()> {
        ThreadManager::register(self, name, descriptor)
    }
}

impl Drop for ThreadManager {
    fn drop(&mut self) {
        if self.is_empty() {
            self.unwatch_signals();
        } else {
            self.shutdown();
        }
    }
}
