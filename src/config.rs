use crate::unit::MemoryUnit;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which side of the warning threshold clears the consecutive-tick counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CounterReset {
    /// Reset while memory is above the warning limit (but not critical).
    /// Quiet ticks accumulate until `cycle` forces a trigger.
    #[default]
    OnWarningBreach,
    /// Reset while memory is at or below the warning limit, so only
    /// `cycle` consecutive ticks above it escalate.
    BelowWarning,
}

/// Settings for a memory watcher.
///
/// Zero-valued fields are placeholders: [`WatchConfig::merge_with_defaults`]
/// replaces each of them with the corresponding default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchConfig {
    /// Memory above this feeds the counter-reset policy.
    pub warning_limit: MemoryUnit,
    /// Memory above this triggers immediately.
    pub critical_limit: MemoryUnit,
    /// Consecutive ticks after which the watcher triggers.
    pub cycle: u32,
    /// Time between memory samples.
    pub interval: Duration,
    /// Grace period between the trigger and termination.
    pub exit_time: Duration,
    /// Exit code handed to the termination policy.
    pub exit_code: i32,
    pub counter_reset: CounterReset,
}

pub const DEFAULT_WATCH_CONFIG: WatchConfig = WatchConfig {
    warning_limit: MemoryUnit::megabytes(512),
    critical_limit: MemoryUnit::megabytes(768),
    cycle: 10,
    interval: Duration::from_secs(5),
    exit_time: Duration::from_secs(10),
    exit_code: 101,
    counter_reset: CounterReset::OnWarningBreach,
};

impl WatchConfig {
    /// Fill every zero-valued field from `defaults`. No range validation is
    /// done; inverted or equal limits are accepted as given.
    pub fn merge_with_defaults(self, defaults: &WatchConfig) -> WatchConfig {
        WatchConfig {
            warning_limit: if self.warning_limit.is_zero() {
                defaults.warning_limit
            } else {
                self.warning_limit
            },
            critical_limit: if self.critical_limit.is_zero() {
                defaults.critical_limit
            } else {
                self.critical_limit
            },
            cycle: if self.cycle == 0 {
                defaults.cycle
            } else {
                self.cycle
            },
            interval: if self.interval.is_zero() {
                defaults.interval
            } else {
                self.interval
            },
            exit_time: if self.exit_time.is_zero() {
                defaults.exit_time
            } else {
                self.exit_time
            },
            exit_code: if self.exit_code == 0 {
                defaults.exit_code
            } else {
                self.exit_code
            },
            counter_reset: self.counter_reset,
        }
    }

    /// Strictly above the critical limit.
    pub fn reaches_critical(&self, total: MemoryUnit) -> bool {
        total > self.critical_limit
    }

    /// Strictly above the warning limit.
    pub fn reaches_warning(&self, total: MemoryUnit) -> bool {
        total > self.warning_limit
    }
}

/// Top-level configuration loaded from memwatch.toml.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub watch: WatchSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WatchSection {
    pub warning_limit: MemoryUnit,
    pub critical_limit: MemoryUnit,
    pub cycle: u32,
    pub interval_ms: u64,
    pub exit_time_ms: u64,
    pub exit_code: i32,
    pub counter_reset: CounterReset,
}

impl FileConfig {
    /// The partial watch config described by the file. Missing values stay
    /// zero and are filled in by the merge.
    pub fn into_watch_config(self) -> WatchConfig {
        let watch = self.watch;
        WatchConfig {
            warning_limit: watch.warning_limit,
            critical_limit: watch.critical_limit,
            cycle: watch.cycle,
            interval: Duration::from_millis(watch.interval_ms),
            exit_time: Duration::from_millis(watch.exit_time_ms),
            exit_code: watch.exit_code,
            counter_reset: watch.counter_reset,
        }
    }
}

/// Errors that can occur while loading a config file.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

/// Load a config file. A missing file yields the empty (all-default) config.
pub fn load_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(FileConfig::default());
        }
        Err(e) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::{KILOBYTE, MEGABYTE};

    fn merged(base: WatchConfig) -> WatchConfig {
        base.merge_with_defaults(&DEFAULT_WATCH_CONFIG)
    }

    #[test]
    fn test_defaults() {
        assert_eq!(DEFAULT_WATCH_CONFIG.warning_limit, 512 * MEGABYTE);
        assert_eq!(DEFAULT_WATCH_CONFIG.critical_limit, 768 * MEGABYTE);
        assert_eq!(DEFAULT_WATCH_CONFIG.cycle, 10);
        assert_eq!(DEFAULT_WATCH_CONFIG.interval, Duration::from_secs(5));
        assert_eq!(DEFAULT_WATCH_CONFIG.exit_time, Duration::from_secs(10));
        assert_eq!(DEFAULT_WATCH_CONFIG.exit_code, 101);
        assert_eq!(
            DEFAULT_WATCH_CONFIG.counter_reset,
            CounterReset::OnWarningBreach
        );
    }

    #[test]
    fn test_merge_empty_yields_defaults() {
        assert_eq!(merged(WatchConfig::default()), DEFAULT_WATCH_CONFIG);
    }

    #[test]
    fn test_merge_warning_limit_only() {
        let cfg = merged(WatchConfig {
            warning_limit: 256 * MEGABYTE,
            ..Default::default()
        });
        assert_eq!(cfg.warning_limit, 256 * MEGABYTE);
        assert_eq!(cfg.critical_limit, DEFAULT_WATCH_CONFIG.critical_limit);
    }

    #[test]
    fn test_merge_critical_limit_only() {
        let cfg = merged(WatchConfig {
            critical_limit: 1024 * MEGABYTE,
            ..Default::default()
        });
        assert_eq!(cfg.critical_limit, 1024 * MEGABYTE);
        assert_eq!(cfg.warning_limit, DEFAULT_WATCH_CONFIG.warning_limit);
    }

    #[test]
    fn test_merge_cycle_only() {
        let cfg = merged(WatchConfig {
            cycle: 3,
            ..Default::default()
        });
        assert_eq!(cfg.cycle, 3);
        assert_eq!(cfg.interval, DEFAULT_WATCH_CONFIG.interval);
    }

    #[test]
    fn test_merge_interval_only() {
        let cfg = merged(WatchConfig {
            interval: Duration::from_millis(100),
            ..Default::default()
        });
        assert_eq!(cfg.interval, Duration::from_millis(100));
        assert_eq!(cfg.cycle, DEFAULT_WATCH_CONFIG.cycle);
    }

    #[test]
    fn test_merge_exit_time_only() {
        let cfg = merged(WatchConfig {
            exit_time: Duration::from_secs(2),
            ..Default::default()
        });
        assert_eq!(cfg.exit_time, Duration::from_secs(2));
        assert_eq!(cfg.exit_code, DEFAULT_WATCH_CONFIG.exit_code);
    }

    #[test]
    fn test_merge_exit_code_only() {
        let cfg = merged(WatchConfig {
            exit_code: 7,
            ..Default::default()
        });
        assert_eq!(cfg.exit_code, 7);
        assert_eq!(cfg.exit_time, DEFAULT_WATCH_CONFIG.exit_time);
    }

    #[test]
    fn test_merge_counter_reset_kept() {
        let cfg = merged(WatchConfig {
            counter_reset: CounterReset::BelowWarning,
            ..Default::default()
        });
        assert_eq!(cfg.counter_reset, CounterReset::BelowWarning);
    }

    #[test]
    fn test_merge_all_fields_set_keeps_caller_values() {
        let base = WatchConfig {
            warning_limit: 300 * KILOBYTE,
            critical_limit: 300 * KILOBYTE,
            cycle: 1,
            interval: Duration::from_millis(100),
            exit_time: Duration::from_secs(2),
            exit_code: 3,
            counter_reset: CounterReset::BelowWarning,
        };
        assert_eq!(merged(base), base);
    }

    #[test]
    fn test_merge_accepts_inverted_limits() {
        let cfg = merged(WatchConfig {
            warning_limit: 900 * MEGABYTE,
            critical_limit: 100 * MEGABYTE,
            ..Default::default()
        });
        assert_eq!(cfg.warning_limit, 900 * MEGABYTE);
        assert_eq!(cfg.critical_limit, 100 * MEGABYTE);
    }

    #[test]
    fn test_merge_uses_supplied_defaults() {
        let defaults = WatchConfig {
            cycle: 4,
            ..DEFAULT_WATCH_CONFIG
        };
        let cfg = WatchConfig::default().merge_with_defaults(&defaults);
        assert_eq!(cfg.cycle, 4);
    }

    #[test]
    fn test_reaches_critical_is_strict() {
        let cfg = merged(WatchConfig {
            critical_limit: 512 * MEGABYTE,
            ..Default::default()
        });
        assert!(!cfg.reaches_critical(512 * MEGABYTE));
        assert!(cfg.reaches_critical(513 * MEGABYTE));
        assert!(cfg.reaches_critical(512 * MEGABYTE + crate::unit::BYTE));
    }

    #[test]
    fn test_reaches_warning_is_strict() {
        let cfg = merged(WatchConfig {
            warning_limit: 256 * MEGABYTE,
            ..Default::default()
        });
        assert!(!cfg.reaches_warning(256 * MEGABYTE));
        assert!(cfg.reaches_warning(257 * MEGABYTE));
    }

    #[test]
    fn test_parse_full_file() {
        let toml_str = r#"
[watch]
warning_limit = "300KB"
critical_limit = 307200
cycle = 5
interval_ms = 100
exit_time_ms = 2000
exit_code = 9
counter_reset = "below-warning"
"#;
        let file: FileConfig = toml::from_str(toml_str).unwrap();
        let cfg = file.into_watch_config();
        assert_eq!(cfg.warning_limit, 300 * KILOBYTE);
        assert_eq!(cfg.critical_limit, 300 * KILOBYTE);
        assert_eq!(cfg.cycle, 5);
        assert_eq!(cfg.interval, Duration::from_millis(100));
        assert_eq!(cfg.exit_time, Duration::from_secs(2));
        assert_eq!(cfg.exit_code, 9);
        assert_eq!(cfg.counter_reset, CounterReset::BelowWarning);
    }

    #[test]
    fn test_parse_partial_file_merges_to_defaults() {
        let file: FileConfig = toml::from_str("[watch]\ncycle = 3\n").unwrap();
        let cfg = merged(file.into_watch_config());
        assert_eq!(cfg.cycle, 3);
        assert_eq!(cfg.warning_limit, DEFAULT_WATCH_CONFIG.warning_limit);
        assert_eq!(cfg.interval, DEFAULT_WATCH_CONFIG.interval);
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let file = load_config(&dir.path().join("memwatch.toml")).unwrap();
        assert_eq!(merged(file.into_watch_config()), DEFAULT_WATCH_CONFIG);
    }

    #[test]
    fn test_load_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memwatch.toml");
        std::fs::write(&path, "[watch]\ncritical_limit = \"1GB\"\n").unwrap();
        let cfg = load_config(&path).unwrap().into_watch_config();
        assert_eq!(cfg.critical_limit, 1024 * MEGABYTE);
    }

    #[test]
    fn test_load_invalid_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memwatch.toml");
        std::fs::write(&path, "[watch]\nwarning_limit = \"lots\"\n").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("failed to parse config"));
    }
}
