//! Scoped high resolution timing for lanes with tight cadences.
//!
//! Windows: `timeBeginPeriod(1)` / `timeEndPeriod(1)`; the OS counts the
//! requests, so every guard issues its own pair.
//! Linux: the timer slack of the calling thread is tightened and the previous
//! value restored on release. Sleeps on Linux are already sub-millisecond;
//! slack is what makes them late.
//!
//! The guard is bound to the acquiring thread and released on drop, which
//! also covers unwinding out of a lane.

use anyhow::Result;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Resolution requested from the platform timer.
pub const TARGET_RESOLUTION: Duration = Duration::from_millis(1);

static ACTIVE_GUARDS: AtomicUsize = AtomicUsize::new(0);

/// Number of live [`HighResolutionTiming`] guards in the process.
pub fn active_guards() -> usize {
    ACTIVE_GUARDS.load(Ordering::Acquire)
}

/// Live request for high resolution timing. Restores the previous setting when dropped.
#[must_use = "timing resolution is restored as soon as the guard is dropped"]
pub struct HighResolutionTiming {
    restore: sys::Restore,
    // released on the thread that acquired it
    _thread_bound: PhantomData<*const ()>,
}

impl HighResolutionTiming {
    /// Explicit release; same as dropping the guard.
    pub fn end(self) {}
}

impl Drop for HighResolutionTiming {
    fn drop(&mut self) {
        sys::release(&self.restore);
        ACTIVE_GUARDS.fetch_sub(1, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for HighResolutionTiming {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HighResolutionTiming")
            .field("restore", &self.restore)
            .finish()
    }
}

/// Raises the timer resolution to about [`TARGET_RESOLUTION`] until the guard is dropped.
pub fn begin_high_resolution_timing() -> Result<HighResolutionTiming> {
    let restore = sys::acquire()?;
    ACTIVE_GUARDS.fetch_add(1, Ordering::AcqRel);
    Ok(HighResolutionTiming {
        restore,
        _thread_bound: PhantomData,
    })
}

#[cfg(target_os = "linux")]
mod sys {
    use anyhow::{Result, bail};

    /// Slack applied while the guard is held.
    const TIGHT_SLACK_NS: libc::c_ulong = 1_000;

    #[derive(Debug)]
    pub(super) struct Restore {
        pub(super) previous_slack_ns: libc::c_ulong,
    }

    pub(super) fn current_slack_ns() -> Result<libc::c_ulong> {
        // SAFETY: PR_GET_TIMERSLACK takes no pointer arguments.
        let rc = unsafe { libc::prctl(libc::PR_GET_TIMERSLACK) };
        if rc < 0 {
            bail!(
                "PR_GET_TIMERSLACK failed: {}",
                std::io::Error::last_os_error()
            );
        }
        Ok(rc as libc::c_ulong)
    }

    fn set_slack_ns(ns: libc::c_ulong) -> Result<()> {
        // SAFETY: PR_SET_TIMERSLACK takes a plain integer argument.
        let rc = unsafe { libc::prctl(libc::PR_SET_TIMERSLACK, ns) };
        if rc < 0 {
            bail!(
                "PR_SET_TIMERSLACK failed: {}",
                std::io::Error::last_os_error()
            );
        }
        Ok(())
    }

    pub(super) fn acquire() -> Result<Restore> {
        let previous_slack_ns = current_slack_ns()?;
        set_slack_ns(TIGHT_SLACK_NS.min(previous_slack_ns.max(1)))?;
        Ok(Restore { previous_slack_ns })
    }

    pub(super) fn release(restore: &Restore) {
        if let Err(e) = set_slack_ns(restore.previous_slack_ns) {
            tracing::warn!("failed to restore timer slack: {e}");
        }
    }
}

#[cfg(windows)]
mod sys {
    use anyhow::{Result, bail};

    const PERIOD_MS: u32 = 1;
    const TIMERR_NOERROR: u32 = 0;

    #[link(name = "winmm")]
    unsafe extern "system" {
        fn timeBeginPeriod(u_period: u32) -> u32;
        fn timeEndPeriod(u_period: u32) -> u32;
    }

    #[derive(Debug)]
    pub(super) struct Restore;

    pub(super) fn acquire() -> Result<Restore> {
        // SAFETY: winmm call with a constant period, no pointers.
        let rc = unsafe { timeBeginPeriod(PERIOD_MS) };
        if rc != TIMERR_NOERROR {
            bail!("timeBeginPeriod({PERIOD_MS}) failed with code {rc}");
        }
        Ok(Restore)
    }

    pub(super) fn release(_restore: &Restore) {
        // SAFETY: paired with the successful timeBeginPeriod in `acquire`.
        let rc = unsafe { timeEndPeriod(PERIOD_MS) };
        if rc != TIMERR_NOERROR {
            tracing::warn!("timeEndPeriod({PERIOD_MS}) failed with code {rc}");
        }
    }
}

#[cfg(not(any(target_os = "linux", windows)))]
mod sys {
    use anyhow::{Result, bail};

    #[derive(Debug)]
    pub(super) struct Restore;

    pub(super) fn acquire() -> Result<Restore> {
        bail!("high resolution timing is not supported on this platform")
    }

    pub(super) fn release(_restore: &Restore) {}
}
