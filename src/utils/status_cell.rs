use crate::model::ThreadStatus;
use crossbeam::utils::CachePadded;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};

/// Shared, lock-free status of one descriptor.
///
/// The current status sits in the low byte and the previous one in the high
/// byte, so a transition updates both with a single compare-and-swap.
#[derive(Clone)]
#[repr(transparent)]
pub struct StatusCell(Arc<CachePadded<AtomicU16>>);

#[inline(always)]
fn pack(current: ThreadStatus, last: ThreadStatus) -> u16 {
    ((last.as_u8() as u16) << 8) | current.as_u8() as u16
}

#[inline(always)]
fn current_of(raw: u16) -> ThreadStatus {
    ThreadStatus::from_u8((raw & 0xff) as u8)
}

#[inline(always)]
fn last_of(raw: u16) -> ThreadStatus {
    ThreadStatus::from_u8((raw >> 8) as u8)
}

impl StatusCell {
    pub fn new(initial: ThreadStatus) -> Self {
        Self(Arc::new(CachePadded::new(AtomicU16::new(pack(
            initial, initial,
        )))))
    }

    #[inline(always)]
    pub fn get(&self) -> ThreadStatus {
        current_of(self.0.load(Ordering::Acquire))
    }

    /// Status held right before the current one.
    #[inline]
    pub fn last(&self) -> ThreadStatus {
        last_of(self.0.load(Ordering::Acquire))
    }

    /// Move `from -> to` atomically. On mismatch returns the status actually held.
    pub fn transition(&self, from: ThreadStatus, to: ThreadStatus) -> Result<(), ThreadStatus> {
        debug_assert!(
            from.can_transition_to(to),
            "illegal status transition {from} -> {to}"
        );
        let mut raw = self.0.load(Ordering::Acquire);
        loop {
            let current = current_of(raw);
            if current != from {
                return Err(current);
            }
            match self.0.compare_exchange_weak(
                raw,
                pack(to, current),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => raw = actual,
            }
        }
    }
}

impl fmt::Debug for StatusCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusCell")
            .field("status", &self.get())
            .field("last", &self.last())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_tracks_last_status() {
        let cell = StatusCell::new(ThreadStatus::Created);
        assert_eq!(cell.last(), ThreadStatus::Created);

        cell.transition(ThreadStatus::Created, ThreadStatus::Running)
            .unwrap();
        cell.transition(ThreadStatus::Running, ThreadStatus::Stopping)
            .unwrap();
        assert_eq!(cell.get(), ThreadStatus::Stopping);
        assert_eq!(cell.last(), ThreadStatus::Running);
    }

    #[test]
    fn transition_from_wrong_status_reports_actual() {
        let cell = StatusCell::new(ThreadStatus::Created);
        let err = cell
            .transition(ThreadStatus::Running, ThreadStatus::Stopping)
            .unwrap_err();
        assert_eq!(err, ThreadStatus::Created);
        assert_eq!(cell.get(), ThreadStatus::Created);
    }

    #[test]
    fn clones_share_state() {
        let cell = StatusCell::new(ThreadStatus::Created);
        let other = cell.clone();
        cell.transition(ThreadStatus::Created, ThreadStatus::Running)
            .unwrap();
        assert_eq!(other.get(), ThreadStatus::Running);
    }
}
