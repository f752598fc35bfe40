use std::fmt;
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Longest uninterrupted sleep slice inside [`CancelToken::sleep_cancellable`].
const SLEEP_SLICE: Duration = Duration::from_millis(5);

/// Internal cancellation state, shared via [`Arc`].
/// Cancelling a parent state cancels every descendant.
struct CancelState {
    cancelled: AtomicBool,
    parent: Option<Arc<CancelState>>,
}

impl CancelState {
    #[inline]
    fn new_root() -> Arc<Self> {
        Arc::new(Self {
            cancelled: AtomicBool::new(false),
            parent: None,
        })
    }

    #[inline]
    fn child_of(parent: Arc<CancelState>) -> Arc<Self> {
        Arc::new(Self {
            cancelled: AtomicBool::new(false),
            parent: Some(parent),
        })
    }

    #[inline]
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[inline]
    fn is_cancelled(&self) -> bool {
        if self.cancelled.load(Ordering::Acquire) {
            return true;
        }
        match self.parent {
            Some(ref p) => p.is_cancelled(),
            None => false,
        }
    }
}

/// Hierarchical cancellation token.
///
/// The manager owns the root; every lane gets a child so it can be
/// signalled alone, while cancelling the root reaches all lanes.
#[derive(Clone)]
pub struct CancelToken {
    state: Arc<CancelState>,
}

impl Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("is_cancelled", &self.is_cancelled())
            .finish()
    }
}

impl CancelToken {
    #[inline]
    pub fn new_root() -> Self {
        Self {
            state: CancelState::new_root(),
        }
    }

    #[inline]
    pub fn cancel(&self) {
        self.state.cancel();
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }

    #[inline]
    pub fn new_child(&self) -> Self {
        Self {
            state: CancelState::child_of(self.state.clone()),
        }
    }

    /// Sleep for `total` or until the token is cancelled, whichever comes first.
    /// Returns false if the sleep was cut short by cancellation.
    pub fn sleep_cancellable(&self, total: Duration) -> bool {
        let deadline = Instant::now() + total;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}
