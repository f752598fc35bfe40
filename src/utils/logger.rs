use anyhow::Context;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggerConfig {
    pub level: String,
    pub file_dir: Option<String>,
    pub file_prefix: Option<String>,
    pub rolling: Option<String>,
    #[serde(default)]
    pub max_files: usize,
}

impl LoggerConfig {
    /// Loads logging configuration from environment variables, with defaults
    /// for anything unset: LOG_LEVEL, LOG_FILE_DIR, LOG_FILE_PREFIX, LOG_ROLLING.
    pub fn from_env() -> Self {
        let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let file_dir = std::env::var("LOG_FILE_DIR").ok();
        let file_prefix = std::env::var("LOG_FILE_PREFIX").ok();
        let rolling = std::env::var("LOG_ROLLING").ok();

        Self {
            level,
            file_dir,
            file_prefix,
            rolling,
            max_files: 2,
        }
    }

    /// Installs the global subscriber. Keep the returned guard alive for the
    /// whole process when logging to files, or buffered records are lost.
    pub fn init(&self) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
        let level = Level::from_str(&self.level).unwrap_or(Level::INFO);

        if let Some(dir_str) = self.file_dir.as_deref() {
            let prefix = self.file_prefix.as_deref().unwrap_or("tickrt");

            let rotation = match self.rolling.as_deref() {
                Some("hourly") => Rotation::HOURLY,
                Some("minutely") => Rotation::MINUTELY,
                _ => Rotation::DAILY,
            };

            let appender: RollingFileAppender = RollingFileAppender::builder()
                .rotation(rotation)
                .max_log_files(self.max_files.max(1))
                .filename_prefix(prefix)
                .build(dir_str)
                .with_context(|| format!("failed to create rolling appender in {}", dir_str))?;

            let (nb, guard) = tracing_appender::non_blocking(appender);

            let _ = tracing_subscriber::fmt()
                .with_max_level(level)
                .with_thread_names(true)
                .with_writer(nb)
                .try_init();

            tracing::info!(
                "logging to dir: {}, prefix: {}, rotation: {:?}",
                dir_str,
                prefix,
                self.rolling
            );
            Ok(Some(guard))
        } else {
            let _ = tracing_subscriber::fmt()
                .with_max_level(level)
                .with_thread_names(true)
                .try_init();
            tracing::info!("logging to stdout (no file_dir)");
            Ok(None)
        }
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_dir: None,
            file_prefix: None,
            rolling: Some("daily".to_string()),
            max_files: 2,
        }
    }
}

/// Severity of a record written through a [`LogSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

/// Logging capability consumed by the manager and by cycle bodies.
///
/// `context` is the descriptor's logging-context path, or the manager-wide
/// default. Implementations are shared by every lane and must be thread safe.
pub trait LogSink: Send + Sync + 'static {
    fn write(&self, message: &str, level: LogLevel, context: &str);
}

/// Default sink: forwards every record to `tracing` with a `context` field.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn write(&self, message: &str, level: LogLevel, context: &str) {
        match level {
            LogLevel::Debug => tracing::debug!(context = %context, "{message}"),
            LogLevel::Info => tracing::info!(context = %context, "{message}"),
            LogLevel::Warn => tracing::warn!(context = %context, "{message}"),
            LogLevel::Error => tracing::error!(context = %context, "{message}"),
        }
    }
}

/// Throttle for repeated log messages.
///
/// `poll` lets one message through per interval and counts the ones it
/// swallowed in between, so the next emitted record can report them.
pub struct Throttle {
    last: Mutex<Instant>,
    suppressed: AtomicU64,
    interval: Duration,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self {
        // start in the past so the first poll emits
        let start = Instant::now()
            .checked_sub(interval)
            .unwrap_or_else(Instant::now);
        Self {
            last: Mutex::new(start),
            suppressed: AtomicU64::new(0),
            interval,
        }
    }

    /// `Some(suppressed)` when a message may be emitted now.
    #[inline]
    pub fn poll(&self) -> Option<u64> {
        if self.interval.is_zero() {
            return Some(self.suppressed.swap(0, Ordering::Relaxed));
        }

        let mut last = self.last.lock();
        if last.elapsed() >= self.interval {
            *last = Instant::now();
            Some(self.suppressed.swap(0, Ordering::Relaxed))
        } else {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_emits_first_then_counts_suppressed() {
        let throttle = Throttle::new(Duration::from_secs(3600));
        assert_eq!(throttle.poll(), Some(0));
        assert_eq!(throttle.poll(), None);
        assert_eq!(throttle.poll(), None);
        assert_eq!(throttle.suppressed.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn zero_interval_never_suppresses() {
        let throttle = Throttle::new(Duration::ZERO);
        for _ in 0..4 {
            assert_eq!(throttle.poll(), Some(0));
        }
    }

    #[test]
    fn level_order_follows_severity() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Warn < LogLevel::Error);
        assert_eq!(LogLevel::Warn.to_string(), "warn");
    }
}
