use crate::error::ThreadError;
use crate::model::{PriorityLevel, ThreadStatus};
use serde::Serialize;
use std::time::Duration;

/// Read-only view of one registered descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadSnapshot {
    pub name: String,
    pub priority: PriorityLevel,
    pub status: ThreadStatus,
    pub last_status: ThreadStatus,
    /// Effective logging context (the manager default if none was set).
    pub log_context: String,
    pub ticks: u64,
    pub failures: u64,
    pub overruns: u64,
    pub last_cycle: Duration,
    pub max_cycle: Duration,
    pub lane_alive: bool,
}

/// Result of a single `stop` call. None of these is an error for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopOutcome {
    /// The lane left its loop within the grace timeout.
    Stopped,
    /// Already Stopped; nothing was done.
    AlreadyStopped,
    /// Already Faulted; nothing was done.
    AlreadyFaulted,
    /// The cycle body escalated to Faulted while the lane was stopping.
    Faulted,
    /// The lane missed the grace timeout and the descriptor is now Faulted.
    TimedOut,
}

/// Aggregated result of `start_all`.
#[derive(Debug, Default)]
pub struct StartReport {
    pub started: Vec<String>,
    /// Entries that were not Created and were left alone.
    pub skipped: Vec<(String, ThreadStatus)>,
    pub failed: Vec<(String, ThreadError)>,
}

impl StartReport {
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Aggregated result of `stop_all`.
#[derive(Debug, Default)]
pub struct StopReport {
    pub outcomes: Vec<(String, StopOutcome)>,
    /// Entries that were never started.
    pub skipped: Vec<String>,
    pub failed: Vec<(String, ThreadError)>,
}

impl StopReport {
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.failed.is_empty() && self.timed_out().next().is_none()
    }

    pub fn timed_out(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| *o == StopOutcome::TimedOut)
            .map(|(n, _)| n.as_str())
    }
}
