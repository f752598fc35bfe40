use crate::model::PriorityLevel;
use crate::utils::affinity::CoreMask;
use crate::utils::params_io::load_cfg_merge;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Key prefix used by [`ManagerConfig::from_settings`].
pub const SETTINGS_PREFIX: &str = "threading";

/// Scheduling parameters shared by every descriptor of one priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct PriorityProfile {
    /// Target interval between tick starts.
    pub cadence_ms: u64,
    /// Cores the lane is pinned to; `None` leaves placement to the OS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core_mask: Option<CoreMask>,
    /// Whether the lane holds high resolution timing while it runs.
    #[serde(default)]
    pub high_resolution_timer: bool,
}

impl PriorityProfile {
    pub const fn new(cadence_ms: u64) -> Self {
        Self {
            cadence_ms,
            core_mask: None,
            high_resolution_timer: false,
        }
    }

    #[inline]
    pub fn cadence(&self) -> Duration {
        Duration::from_millis(self.cadence_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub high: PriorityProfile,
    pub medium: PriorityProfile,
    pub low: PriorityProfile,
    /// Stop grace timeout as a multiple of the lane's cadence.
    pub grace_multiplier: u32,
    /// Lower bound of the stop grace timeout.
    pub grace_floor_ms: u64,
    /// Logging context for descriptors registered without one.
    pub default_log_context: String,
    /// Minimum interval between two overrun warnings of one lane.
    pub overrun_log_interval_ms: u64,
    /// Stop every lane on SIGINT/SIGTERM.
    pub handle_term_signals: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            high: PriorityProfile {
                cadence_ms: 10,
                core_mask: None,
                high_resolution_timer: true,
            },
            medium: PriorityProfile::new(20),
            low: PriorityProfile::new(20),
            grace_multiplier: 5,
            grace_floor_ms: 100,
            default_log_context: "threading".to_string(),
            overrun_log_interval_ms: 5_000,
            handle_term_signals: false,
        }
    }
}

impl ManagerConfig {
    #[inline]
    pub fn profile(&self, priority: PriorityLevel) -> &PriorityProfile {
        match priority {
            PriorityLevel::High => &self.high,
            PriorityLevel::Medium => &self.medium,
            PriorityLevel::Low => &self.low,
        }
    }

    #[inline]
    pub fn profile_mut(&mut self, priority: PriorityLevel) -> &mut PriorityProfile {
        match priority {
            PriorityLevel::High => &mut self.high,
            PriorityLevel::Medium => &mut self.medium,
            PriorityLevel::Low => &mut self.low,
        }
    }

    #[inline]
    pub fn cadence(&self, priority: PriorityLevel) -> Duration {
        self.profile(priority).cadence()
    }

    /// How long `stop` waits for a lane of this priority before marking it Faulted.
    pub fn grace_timeout(&self, priority: PriorityLevel) -> Duration {
        self.grace_for(self.cadence(priority))
    }

    /// Grace timeout of a lane ticking every `cadence`.
    pub fn grace_for(&self, cadence: Duration) -> Duration {
        let scaled = cadence * self.grace_multiplier;
        scaled.max(Duration::from_millis(self.grace_floor_ms))
    }

    #[inline]
    pub fn overrun_log_interval(&self) -> Duration {
        Duration::from_millis(self.overrun_log_interval_ms)
    }

    /// Layer config files and environment variables over the defaults.
    /// A layer that names some keys of a priority keeps the rest of that
    /// priority's defaults.
    pub fn load<P: AsRef<Path>>(
        paths: impl IntoIterator<Item = P>,
        env_prefix: Option<&str>,
    ) -> anyhow::Result<Self> {
        load_cfg_merge(&Self::default(), paths, env_prefix)
    }

    /// Build from a key/value settings store. Missing keys keep their
    /// defaults; unparsable ones are logged and ignored.
    pub fn from_settings(settings: &dyn SettingsProvider) -> Self {
        let mut cfg = Self::default();

        for priority in PriorityLevel::ALL {
            let level = priority.as_str();
            let profile = cfg.profile_mut(priority);

            if let Some(v) = read(settings, &format!("{level}.cadence_ms")) {
                profile.cadence_ms = v;
            }
            if let Some(v) = read::<CoreMask>(settings, &format!("{level}.core_mask")) {
                profile.core_mask = (!v.is_empty()).then_some(v);
            }
            if let Some(v) = read(settings, &format!("{level}.high_resolution_timer")) {
                profile.high_resolution_timer = v;
            }
        }

        if let Some(v) = read(settings, "grace_multiplier") {
            cfg.grace_multiplier = v;
        }
        if let Some(v) = read(settings, "grace_floor_ms") {
            cfg.grace_floor_ms = v;
        }
        if let Some(v) = read(settings, "overrun_log_interval_ms") {
            cfg.overrun_log_interval_ms = v;
        }
        if let Some(v) = read(settings, "handle_term_signals") {
            cfg.handle_term_signals = v;
        }
        if let Some(v) = settings.get(&format!("{SETTINGS_PREFIX}.default_log_context"))
            && !v.trim().is_empty()
        {
            cfg.default_log_context = v.trim().to_string();
        }

        cfg
    }
}

fn read<T>(settings: &dyn SettingsProvider, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: Display,
{
    let full_key = format!("{SETTINGS_PREFIX}.{key}");
    let raw = settings.get(&full_key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(
                "[ManagerConfig] ignoring setting {}=<{}>: {}",
                full_key,
                raw,
                e
            );
            None
        }
    }
}

/// Read-only key/value settings store consulted at manager construction.
pub trait SettingsProvider {
    fn get(&self, key: &str) -> Option<String>;
}

impl SettingsProvider for config::Config {
    fn get(&self, key: &str) -> Option<String> {
        self.get_string(key).ok()
    }
}

impl SettingsProvider for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

impl SettingsProvider for AHashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_follow_priority_order() {
        let cfg = ManagerConfig::default();
        assert!(cfg.cadence(PriorityLevel::High) <= cfg.cadence(PriorityLevel::Medium));
        assert!(cfg.cadence(PriorityLevel::Medium) <= cfg.cadence(PriorityLevel::Low));
        assert!(cfg.high.high_resolution_timer);
        assert!(!cfg.low.high_resolution_timer);
    }

    #[test]
    fn grace_timeout_has_a_floor() {
        let mut cfg = ManagerConfig::default();
        assert_eq!(
            cfg.grace_timeout(PriorityLevel::High),
            Duration::from_millis(100)
        );
        cfg.grace_multiplier = 20;
        assert_eq!(
            cfg.grace_timeout(PriorityLevel::Low),
            Duration::from_millis(400)
        );
    }

    #[test]
    fn settings_override_defaults() {
        let s = settings(&[
            ("threading.high.cadence_ms", "8"),
            ("threading.high.core_mask", "0x3"),
            ("threading.low.high_resolution_timer", "true"),
            ("threading.grace_floor_ms", "250"),
            ("threading.default_log_context", "plant/threads"),
        ]);
        let cfg = ManagerConfig::from_settings(&s);
        assert_eq!(cfg.high.cadence_ms, 8);
        assert_eq!(cfg.high.core_mask, Some(CoreMask::from_cores([0, 1])));
        assert!(cfg.low.high_resolution_timer);
        assert_eq!(cfg.grace_floor_ms, 250);
        assert_eq!(cfg.default_log_context, "plant/threads");
        assert_eq!(cfg.medium, ManagerConfig::default().medium);
    }

    #[test]
    fn unparsable_settings_fall_back() {
        let s = settings(&[
            ("threading.medium.cadence_ms", "fast"),
            ("threading.grace_multiplier", "-1"),
        ]);
        let cfg = ManagerConfig::from_settings(&s);
        assert_eq!(cfg, ManagerConfig::default());
    }

    #[test]
    fn empty_settings_give_defaults() {
        let cfg = ManagerConfig::from_settings(&HashMap::new());
        assert_eq!(cfg, ManagerConfig::default());
    }

    #[test]
    fn config_crate_source_is_a_settings_provider() {
        let source = config::Config::builder()
            .add_source(config::File::from_str(
                r#"{"threading": {"low": {"cadence_ms": 50}}}"#,
                config::FileFormat::Json,
            ))
            .build()
            .unwrap();
        let cfg = ManagerConfig::from_settings(&source);
        assert_eq!(cfg.low.cadence_ms, 50);
    }

    #[test]
    fn load_layers_files_over_defaults() {
        let path = std::env::temp_dir().join(format!(
            "tickrt-manager-config-{}.json",
            std::process::id()
        ));
        std::fs::write(
            &path,
            r#"{"medium": {"cadence_ms": 15}, "grace_multiplier": 3}"#,
        )
        .unwrap();

        let missing = std::env::temp_dir().join("tickrt-does-not-exist.toml");
        let cfg = ManagerConfig::load([missing, path.clone()], Some("TICKRT_TEST_UNSET"))
            .unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(cfg.medium.cadence_ms, 15);
        assert_eq!(cfg.grace_multiplier, 3);
        assert_eq!(cfg.high, ManagerConfig::default().high);
    }

    fn load_json(tag: &str, body: &str) -> anyhow::Result<ManagerConfig> {
        let path = std::env::temp_dir().join(format!(
            "tickrt-{tag}-{}.json",
            std::process::id()
        ));
        std::fs::write(&path, body).unwrap();
        let cfg = ManagerConfig::load([path.clone()], Some("TICKRT_TEST_UNSET"));
        std::fs::remove_file(&path).ok();
        cfg
    }

    #[test]
    fn partial_profile_keeps_the_priority_defaults() {
        let cfg = load_json("partial-cadence", r#"{"high": {"cadence_ms": 5}}"#).unwrap();
        assert_eq!(cfg.high.cadence_ms, 5);
        assert!(cfg.high.high_resolution_timer);
        assert_eq!(cfg.high.core_mask, None);
        assert_eq!(cfg.low, ManagerConfig::default().low);

        let cfg = load_json("partial-mask", r#"{"high": {"core_mask": 3}}"#).unwrap();
        assert_eq!(cfg.high.core_mask, Some(CoreMask::from_cores([0, 1])));
        assert_eq!(cfg.high.cadence_ms, 10);
        assert!(cfg.high.high_resolution_timer);
    }

    #[test]
    fn environment_overrides_one_key_of_a_profile() {
        // SAFETY: the prefix is unique to this test.
        unsafe { std::env::set_var("TICKRT_PARTIAL__HIGH__CADENCE_MS", "7") };
        let cfg = ManagerConfig::load(Vec::<std::path::PathBuf>::new(), Some("TICKRT_PARTIAL"));
        unsafe { std::env::remove_var("TICKRT_PARTIAL__HIGH__CADENCE_MS") };

        let cfg = cfg.unwrap();
        assert_eq!(cfg.high.cadence_ms, 7);
        assert!(cfg.high.high_resolution_timer);
        assert_eq!(cfg.grace_multiplier, 5);
    }
}
