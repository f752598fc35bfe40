use crate::error::{ThreadError, ThreadResult};
use crate::model::{PriorityLevel, ThreadBase, ThreadStatus};
use crate::utils::StatusCell;
use std::fmt;
use std::time::Duration;

/// A unit of periodic work waiting to be registered.
///
/// Holds the cycle body together with its scheduling parameters. Once handed
/// to [`ThreadManager::register`](crate::manager::ThreadManager::register) the
/// registry owns it and is the only writer of its status.
pub struct ThreadDescriptor {
    pub(crate) priority: PriorityLevel,
    pub(crate) log_context: Option<String>,
    pub(crate) cadence: Option<Duration>,
    pub(crate) status: StatusCell,
    pub(crate) body: Box<dyn ThreadBase>,
}

impl ThreadDescriptor {
    /// New descriptor with Medium priority and no logging context.
    pub fn new(body: impl ThreadBase) -> Self {
        Self::from_boxed(Box::new(body))
    }

    pub fn from_boxed(body: Box<dyn ThreadBase>) -> Self {
        Self {
            priority: PriorityLevel::default(),
            log_context: None,
            cadence: None,
            status: StatusCell::new(ThreadStatus::Created),
            body,
        }
    }

    pub fn with_priority(mut self, priority: PriorityLevel) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_log_context(mut self, context: impl Into<String>) -> Self {
        self.log_context = Some(context.into());
        self
    }

    /// Ticks every `cadence` instead of the cadence of the priority.
    /// A zero interval is ignored.
    pub fn with_cadence(mut self, cadence: Duration) -> Self {
        self.cadence = (!cadence.is_zero()).then_some(cadence);
        self
    }

    /// Sets the scheduling parameters. Only legal before the descriptor starts.
    pub fn configure(
        &mut self,
        priority: PriorityLevel,
        log_path: Option<String>,
    ) -> ThreadResult<()> {
        let status = self.status.get();
        if status != ThreadStatus::Created {
            return Err(ThreadError::invalid_state("<unregistered>", status, "configure"));
        }
        self.priority = priority;
        self.log_context = log_path.filter(|p| !p.trim().is_empty());
        Ok(())
    }

    #[inline]
    pub fn priority(&self) -> PriorityLevel {
        self.priority
    }

    #[inline]
    pub fn log_context(&self) -> Option<&str> {
        self.log_context.as_deref()
    }

    /// Cadence override, if any.
    #[inline]
    pub fn cadence(&self) -> Option<Duration> {
        self.cadence
    }

    #[inline]
    pub fn status(&self) -> ThreadStatus {
        self.status.get()
    }
}

impl fmt::Debug for ThreadDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadDescriptor")
            .field("priority", &self.priority)
            .field("log_context", &self.log_context)
            .field("cadence", &self.cadence)
            .field("status", &self.status.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CycleCtx;

    struct Idle;

    impl ThreadBase for Idle {
        fn run_cycle(&mut self, _ctx: &CycleCtx<'_>) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn configure_applies_while_created() {
        let mut desc = ThreadDescriptor::new(Idle);
        assert_eq!(desc.priority(), PriorityLevel::Medium);
        desc.configure(PriorityLevel::High, Some("io/dio".into()))
            .unwrap();
        assert_eq!(desc.priority(), PriorityLevel::High);
        assert_eq!(desc.log_context(), Some("io/dio"));
    }

    #[test]
    fn blank_log_path_means_default_context() {
        let mut desc = ThreadDescriptor::new(Idle).with_log_context("x");
        desc.configure(PriorityLevel::Low, Some("  ".into())).unwrap();
        assert_eq!(desc.log_context(), None);
    }

    #[test]
    fn configure_after_start_is_rejected() {
        let mut desc = ThreadDescriptor::new(Idle);
        desc.status
            .transition(ThreadStatus::Created, ThreadStatus::Running)
            .unwrap();
        let err = desc.configure(PriorityLevel::High, None).unwrap_err();
        assert!(matches!(
            err,
            ThreadError::InvalidState {
                status: ThreadStatus::Running,
                op: "configure",
                ..
            }
        ));
        assert_eq!(desc.priority(), PriorityLevel::Medium);
    }

    #[test]
    fn cadence_override_ignores_zero() {
        let desc = ThreadDescriptor::new(Idle).with_cadence(Duration::from_millis(40));
        assert_eq!(desc.cadence(), Some(Duration::from_millis(40)));
        let desc = desc.with_cadence(Duration::ZERO);
        assert_eq!(desc.cadence(), None);
    }
}
