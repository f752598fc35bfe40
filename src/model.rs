use crate::utils::CancelToken;
use crate::utils::logger::{LogLevel, LogSink};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scheduling class of a descriptor. Selects its cadence, optional core
/// mask and whether its lane holds high resolution timing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityLevel {
    /// Real-time work: motion boards, digital/analog I/O.
    High,
    /// Sequencing and FSM logic.
    #[default]
    Medium,
    /// Communication and monitoring, no real-time guarantee.
    Low,
}

impl PriorityLevel {
    pub const ALL: [PriorityLevel; 3] = [
        PriorityLevel::High,
        PriorityLevel::Medium,
        PriorityLevel::Low,
    ];

    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityLevel::High => "high",
            PriorityLevel::Medium => "medium",
            PriorityLevel::Low => "low",
        }
    }
}

impl fmt::Display for PriorityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a registered descriptor.
///
/// Legal transitions: `Created -> Running -> Stopping -> Stopped`, and
/// `Running | Stopping -> Faulted`. Stopped and Faulted are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ThreadStatus {
    Created = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
    Faulted = 4,
}

impl ThreadStatus {
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    #[inline]
    pub const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ThreadStatus::Created,
            1 => ThreadStatus::Running,
            2 => ThreadStatus::Stopping,
            3 => ThreadStatus::Stopped,
            _ => ThreadStatus::Faulted,
        }
    }

    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, ThreadStatus::Stopped | ThreadStatus::Faulted)
    }

    pub fn can_transition_to(self, next: ThreadStatus) -> bool {
        use ThreadStatus::*;
        matches!(
            (self, next),
            (Created, Running)
                | (Running, Stopping)
                | (Stopping, Stopped)
                | (Running, Faulted)
                | (Stopping, Faulted)
        )
    }
}

impl fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Decision returned by [`ThreadBase::on_failure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Keep ticking; the failed tick is forgotten.
    Continue,
    /// Mark the descriptor Faulted and leave the lane.
    Fault,
}

/// Per-tick view handed to a cycle body.
///
/// Carries the descriptor identity, the 1-based tick number and the
/// logging capability already bound to the descriptor's context.
pub struct CycleCtx<'a> {
    name: &'a str,
    priority: PriorityLevel,
    log_context: &'a str,
    tick: u64,
    sink: &'a dyn LogSink,
    cancel: &'a CancelToken,
}

impl<'a> CycleCtx<'a> {
    #[inline]
    pub(crate) fn new(
        name: &'a str,
        priority: PriorityLevel,
        log_context: &'a str,
        tick: u64,
        sink: &'a dyn LogSink,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            name,
            priority,
            log_context,
            tick,
            sink,
            cancel,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        self.name
    }

    #[inline]
    pub fn priority(&self) -> PriorityLevel {
        self.priority
    }

    #[inline]
    pub fn log_context(&self) -> &str {
        self.log_context
    }

    /// Number of the current tick, starting at 1. Zero inside `on_started`.
    #[inline]
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// True once the manager asked this lane to stop. Long cycle bodies
    /// may poll it to finish early; the lane exits at the next boundary anyway.
    #[inline]
    pub fn is_stop_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    #[inline]
    pub fn log(&self, level: LogLevel, message: &str) {
        self.sink.write(message, level, self.log_context);
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }
}

/// Contract for a unit of periodic work driven by a lane.
///
/// `run_cycle` is invoked once per tick while the descriptor is Running and
/// should return within its priority's cadence; this is not enforced.
pub trait ThreadBase: Send + 'static {
    /// One tick of work.
    fn run_cycle(&mut self, ctx: &CycleCtx<'_>) -> anyhow::Result<()>;

    /// Called with the error of a failed tick (panics are converted to errors).
    /// The default logs and keeps the lane running.
    fn on_failure(&mut self, err: &anyhow::Error, ctx: &CycleCtx<'_>) -> FailureAction {
        ctx.error(&format!(
            "[{}] tick {} failed: {:#}",
            ctx.name(),
            ctx.tick(),
            err
        ));
        FailureAction::Continue
    }

    /// Called on the lane before the first tick.
    fn on_started(&mut self, ctx: &CycleCtx<'_>) {
        let _ = ctx;
    }

    /// Called on the lane after the last tick.
    fn on_stopped(&mut self, ctx: &CycleCtx<'_>) {
        let _ = ctx;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_u8() {
        for status in [
            ThreadStatus::Created,
            ThreadStatus::Running,
            ThreadStatus::Stopping,
            ThreadStatus::Stopped,
            ThreadStatus::Faulted,
        ] {
            assert_eq!(ThreadStatus::from_u8(status.as_u8()), status);
        }
    }

    #[test]
    fn graceful_stop_cannot_skip_stopping() {
        assert!(ThreadStatus::Created.can_transition_to(ThreadStatus::Running));
        assert!(ThreadStatus::Running.can_transition_to(ThreadStatus::Stopping));
        assert!(ThreadStatus::Stopping.can_transition_to(ThreadStatus::Stopped));
        assert!(!ThreadStatus::Running.can_transition_to(ThreadStatus::Stopped));
        assert!(!ThreadStatus::Created.can_transition_to(ThreadStatus::Stopping));
        assert!(!ThreadStatus::Stopped.can_transition_to(ThreadStatus::Running));
        assert!(!ThreadStatus::Faulted.can_transition_to(ThreadStatus::Running));
    }

    #[test]
    fn priority_serializes_lowercase() {
        let json = serde_json::to_string(&PriorityLevel::High).unwrap();
        assert_eq!(json, "\"high\"");
        let back: PriorityLevel = serde_json::from_str("\"low\"").unwrap();
        assert_eq!(back, PriorityLevel::Low);
    }
}
