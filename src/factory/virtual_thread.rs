use crate::model::{CycleCtx, ThreadBase};

/// Logging context used when a virtual thread is created without one.
pub fn default_context(name: &str) -> String {
    format!("threading/{name}")
}

/// Cycle body supplied as a closure instead of a `ThreadBase` impl.
///
/// The closure gets the number of the current loop (starting at 1) next to
/// the usual tick context.
pub struct VirtualThread<F> {
    body: F,
    loops: u64,
}

impl<F> VirtualThread<F>
where
    F: FnMut(u64, &CycleCtx<'_>) -> anyhow::Result<()> + Send + 'static,
{
    pub fn new(body: F) -> Self {
        Self { body, loops: 0 }
    }

    /// Loops run so far, failed ones included.
    #[inline]
    pub fn loops(&self) -> u64 {
        self.loops
    }
}

impl<F> ThreadBase for VirtualThread<F>
where
    F: FnMut(u64, &CycleCtx<'_>) -> anyhow::Result<()> + Send + 'static,
{
    fn run_cycle(&mut self, ctx: &CycleCtx<'_>) -> anyhow::Result<()> {
        self.loops += 1;
        (self.body)(self.loops, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PriorityLevel;
    use crate::utils::CancelToken;
    use crate::utils::logger::TracingSink;

    #[test]
    fn counter_advances_on_every_loop() {
        let mut seen = Vec::new();
        let mut thread = VirtualThread::new(|n, _ctx: &CycleCtx<'_>| {
            if n == 2 {
                anyhow::bail!("second loop fails");
            }
            Ok(())
        });
        let sink = TracingSink;
        let cancel = CancelToken::new_root();
        for tick in 1..=3 {
            let ctx = CycleCtx::new("v", PriorityLevel::Low, "threading/v", tick, &sink, &cancel);
            seen.push(thread.run_cycle(&ctx).is_ok());
        }
        assert_eq!(seen, vec![true, false, true]);
        assert_eq!(thread.loops(), 3);
    }

    #[test]
    fn default_context_nests_under_threading() {
        assert_eq!(default_context("gauge"), "threading/gauge");
    }
}
