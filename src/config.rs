use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::memory::MemoryThresholds;
use crate::operators::Mode;
use crate::pool::PoolConfig;
use crate::toolchain::Toolchain;

pub const CONFIG_FILE_NAME: &str = "mutarun.toml";

/// Run configuration. Every field has a default, so a config file only
/// needs the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Project root. Scratch directories are created under it.
    #[serde(default = "default_working_directory")]
    pub working_directory: PathBuf,

    /// Source globs, relative to the working directory. Empty means
    /// discover by walking the project.
    #[serde(default)]
    pub source: Vec<String>,

    #[serde(default)]
    pub test: Vec<String>,

    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Per-mutation timeout.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Scale applied to the slowest baseline test run. 0 disables the
    /// dynamic timeout.
    #[serde(default = "default_timeout_multiplier")]
    pub timeout_multiplier: f64,

    /// Whole-run deadline. 0 disables it.
    #[serde(default)]
    pub global_timeout_ms: u64,

    #[serde(default)]
    pub exhaustive: bool,

    #[serde(default)]
    pub no_check: bool,

    #[serde(default = "default_max_tasks_per_worker")]
    pub max_tasks_per_worker: u64,

    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,

    #[serde(default = "default_stale_idle_ms")]
    pub stale_idle_ms: u64,

    #[serde(default = "default_max_consecutive_faults")]
    pub max_consecutive_faults: u32,

    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub toolchain: Toolchain,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_warning_mb")]
    pub warning_mb: u64,

    #[serde(default = "default_critical_mb")]
    pub critical_mb: u64,

    #[serde(default = "default_emergency_mb")]
    pub emergency_mb: u64,

    #[serde(default = "default_recovery_mb")]
    pub recovery_mb: u64,

    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
}

impl MemoryConfig {
    pub fn thresholds(&self) -> MemoryThresholds {
        MemoryThresholds {
            warning_mb: self.warning_mb,
            critical_mb: self.critical_mb,
            emergency_mb: self.emergency_mb,
            recovery_mb: self.recovery_mb,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        MemoryConfig {
            enabled: default_enabled(),
            warning_mb: default_warning_mb(),
            critical_mb: default_critical_mb(),
            emergency_mb: default_emergency_mb(),
            recovery_mb: default_recovery_mb(),
            sample_interval_ms: default_sample_interval_ms(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            working_directory: default_working_directory(),
            source: Vec::new(),
            test: Vec::new(),
            workers: default_workers(),
            timeout_ms: default_timeout_ms(),
            timeout_multiplier: default_timeout_multiplier(),
            global_timeout_ms: 0,
            exhaustive: false,
            no_check: false,
            max_tasks_per_worker: default_max_tasks_per_worker(),
            health_check_interval_ms: default_health_check_interval_ms(),
            stale_idle_ms: default_stale_idle_ms(),
            max_consecutive_faults: default_max_consecutive_faults(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            memory: MemoryConfig::default(),
            toolchain: Toolchain::default(),
        }
    }
}

fn default_working_directory() -> PathBuf {
    PathBuf::from(".")
}

fn default_workers() -> usize {
    8
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_timeout_multiplier() -> f64 {
    3.0
}

fn default_max_tasks_per_worker() -> u64 {
    100
}

fn default_health_check_interval_ms() -> u64 {
    30_000
}

fn default_stale_idle_ms() -> u64 {
    120_000
}

fn default_max_consecutive_faults() -> u32 {
    5
}

fn default_shutdown_grace_ms() -> u64 {
    1_500
}

fn default_enabled() -> bool {
    true
}

fn default_warning_mb() -> u64 {
    500
}

fn default_critical_mb() -> u64 {
    800
}

fn default_emergency_mb() -> u64 {
    1200
}

fn default_recovery_mb() -> u64 {
    450
}

fn default_sample_interval_ms() -> u64 {
    5_000
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::parse(&text, path)
    }

    pub fn parse(text: &str, origin: &Path) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::ConfigFile {
            path: origin.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Load `mutarun.toml` from `dir` if present, otherwise the defaults.
    /// The working directory defaults to `dir` in both cases.
    pub fn discover(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE_NAME);
        let mut config = if path.is_file() {
            tracing::debug!("loading config from {}", path.display());
            Self::load(&path)?
        } else {
            Config::default()
        };
        if config.working_directory.is_relative() {
            config.working_directory = dir.join(&config.working_directory);
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".to_string()));
        }
        if self.timeout_ms == 0 {
            return Err(Error::Config("timeout_ms must be greater than 0".to_string()));
        }
        if !self.timeout_multiplier.is_finite() || self.timeout_multiplier < 0.0 {
            return Err(Error::Config(format!(
                "timeout_multiplier must be a non-negative number, got {}",
                self.timeout_multiplier
            )));
        }
        if self.max_tasks_per_worker == 0 {
            return Err(Error::Config("max_tasks_per_worker must be at least 1".to_string()));
        }
        if self.health_check_interval_ms == 0 {
            return Err(Error::Config("health_check_interval_ms must be greater than 0".to_string()));
        }
        if self.memory.enabled {
            if !self.memory.thresholds().is_ordered() {
                return Err(Error::Config(
                    "memory thresholds must satisfy recovery <= warning < critical <= emergency".to_string(),
                ));
            }
            if self.memory.sample_interval_ms == 0 {
                return Err(Error::Config("memory.sample_interval_ms must be greater than 0".to_string()));
            }
        }
        if self.toolchain.program.trim().is_empty() {
            return Err(Error::Config("toolchain.program must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn mode(&self) -> Mode {
        Mode::from_exhaustive(self.exhaustive)
    }

    /// Pool settings for a run whose per-mutation timeout is `timeout_ms`.
    pub fn pool_config(&self, timeout_ms: u64) -> PoolConfig {
        PoolConfig {
            max_workers: self.workers,
            task_timeout: Duration::from_millis(timeout_ms),
            max_tasks_per_worker: self.max_tasks_per_worker,
            health_check_interval: Duration::from_millis(self.health_check_interval_ms),
            stale_idle_threshold: Duration::from_millis(self.stale_idle_ms),
            max_consecutive_faults: self.max_consecutive_faults,
            shutdown_grace: Duration::from_millis(self.shutdown_grace_ms),
        }
    }
}
