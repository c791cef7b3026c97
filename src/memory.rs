//! Memory sampling and the throttling factor the worker pool dispatches by.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::watch;
use tokio::task::JoinHandle;

const BYTES_PER_MB: u64 = 1024 * 1024;
/// Samples further apart than this (in MB) count as movement.
const TREND_TOLERANCE_MB: i64 = 5;
pub const DEFAULT_HISTORY: usize = 20;
const MAX_TREE_DEPTH: usize = 64;

pub const MIN_THROTTLING_FACTOR: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryThresholds {
    pub warning_mb: u64,
    pub critical_mb: u64,
    pub emergency_mb: u64,
    pub recovery_mb: u64,
}

impl Default for MemoryThresholds {
    fn default() -> Self {
        MemoryThresholds {
            warning_mb: 500,
            critical_mb: 800,
            emergency_mb: 1200,
            recovery_mb: 450,
        }
    }
}

impl MemoryThresholds {
    pub fn is_ordered(&self) -> bool {
        self.recovery_mb <= self.warning_mb
            && self.warning_mb < self.critical_mb
            && self.critical_mb <= self.emergency_mb
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Normal,
    Warning,
    Critical,
    Emergency,
}

pub fn alert_level(rss_mb: u64, thresholds: &MemoryThresholds) -> AlertLevel {
    if rss_mb >= thresholds.emergency_mb {
        AlertLevel::Emergency
    } else if rss_mb >= thresholds.critical_mb {
        AlertLevel::Critical
    } else if rss_mb >= thresholds.warning_mb {
        AlertLevel::Warning
    } else {
        AlertLevel::Normal
    }
}

/// Dispatch factor in `[0.2, 1.0]`.
///
/// Full speed below 70% of the warning threshold, easing to 0.8 at the
/// warning threshold, then linearly down to 0.3 at critical, and 0.2 above.
pub fn throttling_factor(rss_mb: u64, thresholds: &MemoryThresholds) -> f64 {
    let rss = rss_mb as f64;
    let warning = thresholds.warning_mb as f64;
    let critical = thresholds.critical_mb as f64;

    if rss < warning * 0.7 {
        1.0
    } else if rss < warning {
        let approach = warning * 0.3;
        let excess = rss - warning * 0.7;
        (1.0 - (excess / approach) * 0.2).max(0.8)
    } else if rss < critical {
        let range = critical - warning;
        let excess = rss - warning;
        (1.0 - (excess / range) * 0.7).max(0.3)
    } else {
        MIN_THROTTLING_FACTOR
    }
}

/// Workers admitted at once under `factor`; never below one.
pub fn effective_concurrency(max_workers: usize, factor: f64) -> usize {
    let factor = factor.clamp(MIN_THROTTLING_FACTOR, 1.0);
    ((max_workers as f64 * factor).floor() as usize).max(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemorySample {
    pub at: Instant,
    pub rss_mb: u64,
    pub trend: Trend,
    /// MB per minute since the oldest retained sample.
    pub growth_rate: f64,
}

#[derive(Debug, Clone)]
pub struct MemoryHistory {
    samples: VecDeque<MemorySample>,
    capacity: usize,
}

impl MemoryHistory {
    pub fn new(capacity: usize) -> Self {
        MemoryHistory {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Append a reading, deriving its trend and growth rate from what is
    /// already retained. Trend needs at least three earlier samples.
    pub fn record(&mut self, rss_mb: u64, at: Instant) -> MemorySample {
        let mut sample = MemorySample {
            at,
            rss_mb,
            trend: Trend::Unknown,
            growth_rate: 0.0,
        };

        if self.samples.len() > 2 {
            if let (Some(oldest), Some(previous)) = (self.samples.front(), self.samples.back()) {
                let delta = rss_mb as i64 - previous.rss_mb as i64;
                sample.trend = if delta > TREND_TOLERANCE_MB {
                    Trend::Increasing
                } else if delta < -TREND_TOLERANCE_MB {
                    Trend::Decreasing
                } else {
                    Trend::Stable
                };
                let minutes = at.saturating_duration_since(oldest.at).as_secs_f64() / 60.0;
                if minutes > 0.0 {
                    sample.growth_rate = (rss_mb as f64 - oldest.rss_mb as f64) / minutes;
                }
            }
        }

        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
        sample
    }

    pub fn latest(&self) -> Option<&MemorySample> {
        self.samples.back()
    }

    pub fn samples(&self) -> impl Iterator<Item = &MemorySample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

pub trait MemorySampler: Send + 'static {
    /// Current resident memory in bytes, or `None` if it cannot be read.
    fn resident_bytes(&mut self) -> Option<u64>;
}

/// Resident memory of this process plus every descendant (the type-check
/// and test subprocesses).
pub struct ProcessTreeSampler {
    system: System,
    root: Option<Pid>,
}

impl ProcessTreeSampler {
    pub fn new() -> Self {
        ProcessTreeSampler {
            system: System::new(),
            root: sysinfo::get_current_pid().ok(),
        }
    }
}

impl Default for ProcessTreeSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler for ProcessTreeSampler {
    fn resident_bytes(&mut self) -> Option<u64> {
        let root = self.root?;
        self.system.refresh_processes(ProcessesToUpdate::All, true);
        let processes = self.system.processes();
        processes.get(&root)?;

        let mut total = 0;
        for (pid, process) in processes {
            let mut cursor = Some(*pid);
            for _ in 0..MAX_TREE_DEPTH {
                let Some(current) = cursor else { break };
                if current == root {
                    total += process.memory();
                    break;
                }
                cursor = processes.get(&current).and_then(|p| p.parent());
            }
        }
        Some(total)
    }
}

/// There is no collector to ask; log and report that nothing was reclaimed.
pub fn reclaim_memory() -> bool {
    tracing::warn!("memory reclamation requested but the runtime offers none");
    false
}

pub struct MemoryMonitor {
    thresholds: MemoryThresholds,
    interval: Duration,
    history: MemoryHistory,
    level: AlertLevel,
    factor: f64,
    sampler: Box<dyn MemorySampler>,
}

impl MemoryMonitor {
    pub fn new(thresholds: MemoryThresholds, interval: Duration, sampler: Box<dyn MemorySampler>) -> Self {
        MemoryMonitor {
            thresholds,
            interval,
            history: MemoryHistory::new(DEFAULT_HISTORY),
            level: AlertLevel::Normal,
            factor: 1.0,
            sampler,
        }
    }

    pub fn throttling_factor(&self) -> f64 {
        self.factor
    }

    pub fn alert_level(&self) -> AlertLevel {
        self.level
    }

    pub fn history(&self) -> &MemoryHistory {
        &self.history
    }

    /// Take one reading from the sampler. Returns `None` when it could not
    /// be read; the previous factor then stays in effect.
    pub fn check(&mut self) -> Option<MemorySample> {
        let bytes = self.sampler.resident_bytes()?;
        Some(self.observe(bytes.div_ceil(BYTES_PER_MB), Instant::now()))
    }

    pub fn observe(&mut self, rss_mb: u64, at: Instant) -> MemorySample {
        let sample = self.history.record(rss_mb, at);
        self.factor = throttling_factor(rss_mb, &self.thresholds);

        let level = alert_level(rss_mb, &self.thresholds);
        if level == AlertLevel::Normal && self.level != AlertLevel::Normal && rss_mb <= self.thresholds.recovery_mb {
            tracing::info!(rss_mb, "memory usage recovered");
        }
        if level != self.level {
            match level {
                AlertLevel::Normal => {}
                AlertLevel::Warning => tracing::warn!(rss_mb, "memory usage high"),
                AlertLevel::Critical => tracing::error!(rss_mb, factor = self.factor, "memory usage very high"),
                AlertLevel::Emergency => {
                    tracing::error!(rss_mb, "memory usage critical");
                    reclaim_memory();
                }
            }
            self.level = level;
        } else if level == AlertLevel::Normal && self.history.len() % 5 == 0 {
            tracing::debug!(
                rss_mb,
                trend = ?sample.trend,
                growth_mb_per_min = sample.growth_rate,
                "memory usage"
            );
        }
        sample
    }

    /// Sample on a fixed interval, publishing the throttling factor until
    /// every receiver is gone.
    pub fn spawn(mut self, factor_tx: watch::Sender<f64>) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::debug!(interval_ms = self.interval.as_millis() as u64, "memory monitor started");
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if factor_tx.is_closed() {
                    break;
                }
                if self.check().is_some() {
                    let factor = self.factor;
                    factor_tx.send_if_modified(|current| {
                        let changed = (*current - factor).abs() > f64::EPSILON;
                        *current = factor;
                        changed
                    });
                }
            }
            tracing::debug!("memory monitor stopped");
        })
    }
}
