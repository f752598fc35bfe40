use crate::descriptor::ThreadDescriptor;
use crate::error::{ThreadError, ThreadResult};
use crate::manager::lane::LaneStats;
use crate::manager::report::ThreadSnapshot;
use crate::model::{PriorityLevel, ThreadBase, ThreadStatus};
use crate::utils::{CancelToken, StatusCell};
use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;
use std::time::Duration;

/// Handle to a started lane.
pub(crate) struct LaneHandle {
    pub cancel: CancelToken,
    pub join: Option<JoinHandle<()>>,
}

/// Registry record of one descriptor.
pub(crate) struct Entry {
    pub priority: PriorityLevel,
    pub log_context: Option<String>,
    pub cadence: Option<Duration>,
    pub status: StatusCell,
    /// Present until the lane takes ownership on start. Behind a mutex only
    /// so the registry stays `Sync` for bodies that are merely `Send`.
    pub body: Mutex<Option<Box<dyn ThreadBase>>>,
    pub lane: Option<LaneHandle>,
    pub stats: Arc<LaneStats>,
}

impl Entry {
    fn from_descriptor(desc: ThreadDescriptor) -> Self {
        Self {
            priority: desc.priority,
            log_context: desc.log_context,
            cadence: desc.cadence,
            status: desc.status,
            body: Mutex::new(Some(desc.body)),
            lane: None,
            stats: LaneStats::new(),
        }
    }

    pub fn snapshot(&self, name: &str, default_context: &str) -> ThreadSnapshot {
        let stats = &self.stats;
        ThreadSnapshot {
            name: name.to_string(),
            priority: self.priority,
            status: self.status.get(),
            last_status: self.status.last(),
            log_context: self
                .log_context
                .clone()
                .unwrap_or_else(|| default_context.to_string()),
            ticks: stats.ticks.load(Ordering::Relaxed),
            failures: stats.failures.load(Ordering::Relaxed),
            overruns: stats.overruns.load(Ordering::Relaxed),
            last_cycle: Duration::from_nanos(stats.last_cycle_ns.load(Ordering::Relaxed)),
            max_cycle: Duration::from_nanos(stats.max_cycle_ns.load(Ordering::Relaxed)),
            lane_alive: stats.alive.get(),
        }
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.status.get() == ThreadStatus::Running && self.stats.alive.get()
    }
}

/// Name -> entry map. Every mutation takes the write lock; lookups share
/// the read lock and never block a lane's tick.
#[derive(Default)]
pub(crate) struct Registry {
    entries: RwLock<AHashMap<String, Entry>>,
}

impl Registry {
    pub fn insert(&self, name: &str, desc: ThreadDescriptor) -> ThreadResult<()> {
        let mut entries = self.entries.write();
        if entries.contains_key(name) {
            return Err(ThreadError::DuplicateName(name.to_string()));
        }
        entries.insert(name.to_string(), Entry::from_descriptor(desc));
        Ok(())
    }

    /// Runs `f` on the entry under the read lock.
    pub fn read<R>(&self, name: &str, f: impl FnOnce(&Entry) -> R) -> ThreadResult<R> {
        let entries = self.entries.read();
        entries
            .get(name)
            .map(f)
            .ok_or_else(|| ThreadError::NotFound(name.to_string()))
    }

    /// Runs `f` on the entry under the write lock.
    pub fn write<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Entry) -> ThreadResult<R>,
    ) -> ThreadResult<R> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(name)
            .ok_or_else(|| ThreadError::NotFound(name.to_string()))?;
        f(entry)
    }

    /// Removes the entry if `allow` accepts its current status.
    pub fn remove_if(
        &self,
        name: &str,
        allow: impl FnOnce(ThreadStatus) -> bool,
    ) -> ThreadResult<Entry> {
        let mut entries = self.entries.write();
        let status = entries
            .get(name)
            .map(|e| e.status.get())
            .ok_or_else(|| ThreadError::NotFound(name.to_string()))?;
        if !allow(status) {
            return Err(ThreadError::invalid_state(name, status, "unregister"));
        }
        entries
            .remove(name)
            .ok_or_else(|| ThreadError::NotFound(name.to_string()))
    }

    pub fn names_where(&self, pred: impl Fn(&Entry) -> bool) -> Vec<String> {
        self.entries
            .read()
            .iter()
            .filter(|(_, e)| pred(e))
            .map(|(n, _)| n.clone())
            .collect()
    }

    pub fn count_where(&self, pred: impl Fn(&Entry) -> bool) -> usize {
        self.entries.read().values().filter(|e| pred(e)).count()
    }

    pub fn snapshots(&self, default_context: &str) -> Vec<ThreadSnapshot> {
        self.entries
            .read()
            .iter()
            .map(|(n, e)| e.snapshot(n, default_context))
            .collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Empties the registry, handing the removed entries back.
    pub fn drain(&self) -> Vec<(String, Entry)> {
        self.entries.write().drain().collect()
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
    fn duplicate_insert_keeps_the_first_entry() {
        let registry = Registry::default();
        registry
            .insert("x", ThreadDescriptor::new(Idle).with_priority(PriorityLevel::High))
            .unwrap();
        let err = registry
            .insert("x", ThreadDescriptor::new(Idle).with_priority(PriorityLevel::Low))
            .unwrap_err();
        assert_eq!(err, ThreadError::DuplicateName("x".into()));
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.read("x", |e| e.priority).unwrap(),
            PriorityLevel::High
        );
    }

    #[test]
    fn remove_respects_status_guard() {
        let registry = Registry::default();
        registry.insert("x", ThreadDescriptor::new(Idle)).unwrap();
        let err = registry.remove_if("x", ThreadStatus::is_terminal).err();
        assert!(matches!(
            err,
            Some(ThreadError::InvalidState {
                status: ThreadStatus::Created,
                ..
            })
        ));
        assert!(registry.remove_if("x", |_| true).is_ok());
        assert!(matches!(
            registry.remove_if("x", |_| true).err(),
            Some(ThreadError::NotFound(_))
        ));
    }

    #[test]
    fn snapshot_falls_back_to_default_context() {
        let registry = Registry::default();
        registry.insert("a", ThreadDescriptor::new(Idle)).unwrap();
        registry
            .insert("b", ThreadDescriptor::new(Idle).with_log_context("cell/b"))
            .unwrap();
        let mut snaps = registry.snapshots("threading");
        snaps.sort_by(|l, r| l.name.cmp(&r.name));
        assert_eq!(snaps[0].log_context, "threading");
        assert_eq!(snaps[1].log_context, "cell/b");
        assert_eq!(snaps[0].status, ThreadStatus::Created);
        assert!(!snaps[0].lane_alive);
    }
}
