pub use crate::config::{ManagerConfig, PriorityProfile, SettingsProvider};
pub use crate::descriptor::ThreadDescriptor;
pub use crate::error::{ThreadError, ThreadResult};
pub use crate::factory::{DiscoveryReport, KindCatalog, ThreadFactory, ThreadKind, ThreadRegistrar};
pub use crate::manager::{StartReport, StopOutcome, StopReport, ThreadManager, ThreadSnapshot};
pub use crate::model::{CycleCtx, FailureAction, PriorityLevel, ThreadBase, ThreadStatus};
pub use crate::utils::affinity::CoreMask;
pub use crate::utils::logger::{LogLevel, LogSink, LoggerConfig, TracingSink};
pub use crate::utils::timer::{HighResolutionTiming, begin_high_resolution_timing};
