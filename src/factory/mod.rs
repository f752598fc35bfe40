//! Descriptor construction and registration.

mod catalog;
mod virtual_thread;

pub use catalog::{KindCatalog, ThreadKind};
pub use virtual_thread::VirtualThread;

use crate::descriptor::ThreadDescriptor;
use crate::error::{ThreadError, ThreadResult};
use crate::model::{CycleCtx, PriorityLevel};
use crate::utils::logger::{LogLevel, LogSink, TracingSink};
use std::sync::Arc;
use std::time::Duration;

/// Logging context of factory diagnostics.
const FACTORY_CONTEXT: &str = "threading/factory";

/// The one manager capability the factory depends on.
pub trait ThreadRegistrar: Send + Sync {
    fn register(&self, name: &str, descriptor: ThreadDescriptor) -> ThreadResult<()>;
}

/// Outcome of [`ThreadFactory::auto_register`].
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    /// Registered names (each equals its kind).
    pub registered: Vec<String>,
    pub failed: Vec<(String, ThreadError)>,
}

impl DiscoveryReport {
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct ThreadFactory {
    registrar: Arc<dyn ThreadRegistrar>,
    catalog: KindCatalog,
    sink: Arc<dyn LogSink>,
}

impl ThreadFactory {
    /// Factory logging through `tracing`.
    pub fn new(registrar: Arc<dyn ThreadRegistrar>, catalog: KindCatalog) -> Self {
        Self::with_sink(registrar, catalog, Arc::new(TracingSink))
    }

    pub fn with_sink(
        registrar: Arc<dyn ThreadRegistrar>,
        catalog: KindCatalog,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            registrar,
            catalog,
            sink,
        }
    }

    #[inline]
    pub fn catalog(&self) -> &KindCatalog {
        &self.catalog
    }

    #[inline]
    pub fn catalog_mut(&mut self) -> &mut KindCatalog {
        &mut self.catalog
    }

    /// Builds a descriptor of `kind` and registers it as `name`.
    /// `DuplicateName` from the registrar is passed through unchanged.
    pub fn create(
        &self,
        kind: &str,
        name: &str,
        priority: PriorityLevel,
        log_path: Option<String>,
    ) -> ThreadResult<()> {
        let mut descriptor = ThreadDescriptor::from_boxed(self.catalog.build(kind)?);
        descriptor.configure(priority, log_path)?;
        self.registrar.register(name, descriptor)
    }

    /// Registers a High priority descriptor driven by `body`, ticking at
    /// the High cadence.
    pub fn create_virtual<F>(&self, name: &str, log_path: Option<String>, body: F) -> ThreadResult<()>
    where
        F: FnMut(u64, &CycleCtx<'_>) -> anyhow::Result<()> + Send + 'static,
    {
        self.create_virtual_at(name, PriorityLevel::High, None, log_path, body)
    }

    /// Registers a descriptor driven by `body`. `interval` replaces the
    /// cadence of `priority` for this descriptor only.
    pub fn create_virtual_at<F>(
        &self,
        name: &str,
        priority: PriorityLevel,
        interval: Option<Duration>,
        log_path: Option<String>,
        body: F,
    ) -> ThreadResult<()>
    where
        F: FnMut(u64, &CycleCtx<'_>) -> anyhow::Result<()> + Send + 'static,
    {
        let log_path = log_path
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| virtual_thread::default_context(name));
        let mut descriptor = ThreadDescriptor::new(VirtualThread::new(body))
            .with_priority(priority)
            .with_log_context(log_path);
        if let Some(interval) = interval {
            descriptor = descriptor.with_cadence(interval);
        }
        self.registrar.register(name, descriptor)
    }

    /// Builds and registers one descriptor per catalog kind, named after the
    /// kind, at the kind's default priority. A failing kind is recorded and
    /// the rest of the batch goes on.
    pub fn auto_register(&self) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();
        for kind in self.catalog.kinds() {
            let priority = self.catalog.default_priority(kind).unwrap_or_default();
            match self.create(kind, kind, priority, None) {
                Ok(()) => report.registered.push(kind.to_string()),
                Err(e) => {
                    self.sink.write(
                        &format!("[ThreadFactory] skipping kind <{}> ({}): {}", kind, e.kind(), e),
                        LogLevel::Warn,
                        FACTORY_CONTEXT,
                    );
                    report.failed.push((kind.to_string(), e));
                }
            }
        }
        report
    }
}
