use crate::error::{ThreadError, ThreadResult};
use crate::model::{PriorityLevel, ThreadBase};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

type Constructor = Box<dyn Fn() -> anyhow::Result<Box<dyn ThreadBase>> + Send + Sync>;

/// A descriptor kind that can be built by name.
///
/// ```ignore
/// struct AxisLoop { .. }
///
/// impl ThreadKind for AxisLoop {
///     const KIND: &'static str = "axis";
///     const DEFAULT_PRIORITY: PriorityLevel = PriorityLevel::High;
///     fn build() -> anyhow::Result<Self> { .. }
/// }
///
/// let catalog = KindCatalog::new().with_kind::<AxisLoop>();
/// ```
pub trait ThreadKind: ThreadBase + Sized {
    const KIND: &'static str;
    const DEFAULT_PRIORITY: PriorityLevel = PriorityLevel::Medium;

    fn build() -> anyhow::Result<Self>;
}

struct KindEntry {
    kind: String,
    priority: PriorityLevel,
    ctor: Constructor,
}

/// Named constructors, populated at startup and iterated by auto-discovery
/// in insertion order.
#[derive(Default)]
pub struct KindCatalog {
    entries: Vec<KindEntry>,
}

impl KindCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kind<K: ThreadKind>(mut self) -> Self {
        self.add::<K>();
        self
    }

    pub fn add<K: ThreadKind>(&mut self) -> &mut Self {
        self.add_fn(K::KIND, K::DEFAULT_PRIORITY, || {
            K::build().map(|body| Box::new(body) as Box<dyn ThreadBase>)
        })
    }

    /// Adds (or replaces) a constructor under `kind`.
    pub fn add_fn<F>(&mut self, kind: &str, priority: PriorityLevel, ctor: F) -> &mut Self
    where
        F: Fn() -> anyhow::Result<Box<dyn ThreadBase>> + Send + Sync + 'static,
    {
        let entry = KindEntry {
            kind: kind.to_string(),
            priority,
            ctor: Box::new(ctor),
        };
        match self.entries.iter_mut().find(|e| e.kind == kind) {
            Some(slot) => *slot = entry,
            None => self.entries.push(entry),
        }
        self
    }

    #[inline]
    pub fn contains(&self, kind: &str) -> bool {
        self.entries.iter().any(|e| e.kind == kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.kind.as_str())
    }

    pub fn default_priority(&self, kind: &str) -> Option<PriorityLevel> {
        self.entries
            .iter()
            .find(|e| e.kind == kind)
            .map(|e| e.priority)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs the constructor of `kind`. Errors and panics of the constructor
    /// both come back as [`ThreadError::ConstructionFailed`].
    pub fn build(&self, kind: &str) -> ThreadResult<Box<dyn ThreadBase>> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.kind == kind)
            .ok_or_else(|| ThreadError::UnknownKind(kind.to_string()))?;

        let failed = |reason: String| ThreadError::ConstructionFailed {
            kind: kind.to_string(),
            reason,
        };
        match catch_unwind(AssertUnwindSafe(|| (entry.ctor)())) {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(e)) => Err(failed(format!("{e:#}"))),
            Err(_) => Err(failed("constructor panicked".to_string())),
        }
    }
}

impl fmt::Debug for KindCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| (&e.kind, e.priority)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CycleCtx;

    struct Conveyor;

    impl ThreadBase for Conveyor {
        fn run_cycle(&mut self, _ctx: &CycleCtx<'_>) -> anyhow::Result<()> {
            Ok(())
        }
    }

    impl ThreadKind for Conveyor {
        const KIND: &'static str = "conveyor";
        const DEFAULT_PRIORITY: PriorityLevel = PriorityLevel::Low;

        fn build() -> anyhow::Result<Self> {
            Ok(Conveyor)
        }
    }

    #[test]
    fn typed_kinds_register_under_their_name() {
        let catalog = KindCatalog::new().with_kind::<Conveyor>();
        assert!(catalog.contains("conveyor"));
        assert_eq!(catalog.default_priority("conveyor"), Some(PriorityLevel::Low));
        assert!(catalog.build("conveyor").is_ok());
    }

    #[test]
    fn unknown_kind_is_reported() {
        let catalog = KindCatalog::new();
        assert_eq!(
            catalog.build("press").err(),
            Some(ThreadError::UnknownKind("press".into()))
        );
    }

    #[test]
    fn failing_and_panicking_constructors_are_contained() {
        let mut catalog = KindCatalog::new();
        catalog
            .add_fn("broken", PriorityLevel::Medium, || {
                anyhow::bail!("fieldbus not configured")
            })
            .add_fn("panicky", PriorityLevel::Medium, || panic!("boom"));

        match catalog.build("broken").err() {
            Some(ThreadError::ConstructionFailed { kind, reason }) => {
                assert_eq!(kind, "broken");
                assert!(reason.contains("fieldbus"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            catalog.build("panicky").err(),
            Some(ThreadError::ConstructionFailed { .. })
        ));
    }

    #[test]
    fn re_adding_a_kind_replaces_it_in_place() {
        let mut catalog = KindCatalog::new();
        catalog
            .add_fn("a", PriorityLevel::High, || Ok(Box::new(Conveyor)))
            .add_fn("b", PriorityLevel::High, || Ok(Box::new(Conveyor)))
            .add_fn("a", PriorityLevel::Low, || Ok(Box::new(Conveyor)));
        assert_eq!(catalog.kinds().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(catalog.default_priority("a"), Some(PriorityLevel::Low));
    }
}
