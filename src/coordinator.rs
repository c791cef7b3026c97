//! Run Coordinator: coverage, generation, submission and the global
//! deadline, ending in one aggregated [`RunResult`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::config::Config;
use crate::coverage::{self, CoverageMap, TestMappingError};
use crate::error::{Error, Result};
use crate::files::{self, SourceFile, TestFile};
use crate::memory::{MemoryMonitor, ProcessTreeSampler};
use crate::mutants::{Mutation, MutationStatus};
use crate::parser;
use crate::pool::{PoolError, ToolchainExecutor, WorkerPool};
use crate::runner::{TestResult, WorkerTask};

/// Parent of every run's scratch directory, relative to the working
/// directory. Removed again when no run is using it.
pub const SCRATCH_DIR: &str = ".mutarun";

const SCRATCH_REMOVE_ATTEMPTS: u32 = 10;
const SCRATCH_REMOVE_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Default)]
pub struct RunResult {
    pub total: usize,
    pub killed: usize,
    pub survived: usize,
    pub timed_out: usize,
    pub erroneous: usize,
    pub type_errors: usize,
    pub incomplete: usize,
    pub mutations: Vec<Mutation>,
    pub coverage: CoverageMap,
    pub coverage_errors: Vec<TestMappingError>,
    pub global_timeout_hit: bool,
    /// Per-mutation timeout actually used, after scaling by the baseline.
    pub timeout_ms: u64,
    pub total_time_ms: u64,
}

impl RunResult {
    fn aggregate(mutations: Vec<Mutation>) -> Self {
        let mut result = RunResult {
            total: mutations.len(),
            ..RunResult::default()
        };
        for mutation in &mutations {
            match mutation.status() {
                MutationStatus::Killed => result.killed += 1,
                MutationStatus::Survived => result.survived += 1,
                MutationStatus::TimedOut => result.timed_out += 1,
                MutationStatus::Error => result.erroneous += 1,
                MutationStatus::TypeError => result.type_errors += 1,
                MutationStatus::Incomplete => result.incomplete += 1,
                MutationStatus::Waiting => {}
            }
        }
        result.mutations = mutations;
        result
    }

    /// `(killed + type errors) / total * 100`, or `None` for an empty run.
    pub fn score(&self) -> Option<f64> {
        (self.total > 0).then(|| (self.killed + self.type_errors) as f64 / self.total as f64 * 100.0)
    }
}

/// Resolve files from the config and run.
pub async fn run(config: &Config) -> Result<RunResult> {
    config.validate()?;
    let root = config
        .working_directory
        .canonicalize()
        .map_err(|e| Error::io(&config.working_directory, e))?;

    let (sources, tests) = if config.source.is_empty() && config.test.is_empty() {
        files::discover(&root)?
    } else {
        files::from_globs(&config.source, &config.test, &root)?
    };
    if sources.is_empty() {
        return Err(Error::NoSourceFiles(root));
    }
    tracing::info!(sources = sources.len(), tests = tests.len(), "resolved project files");

    run_with_files(config, &root, sources, tests).await
}

/// Run against files already loaded. `root` must be the directory the
/// files' relative paths are relative to.
pub async fn run_with_files(
    config: &Config,
    root: &Path,
    sources: Vec<SourceFile>,
    tests: Vec<TestFile>,
) -> Result<RunResult> {
    config.validate()?;
    let started = Instant::now();
    let deadline = (config.global_timeout_ms > 0)
        .then(|| tokio::time::Instant::now() + Duration::from_millis(config.global_timeout_ms));

    let scratch_parent = root.join(SCRATCH_DIR);
    std::fs::create_dir_all(&scratch_parent).map_err(|e| Error::io(&scratch_parent, e))?;
    let scratch = tempfile::Builder::new()
        .prefix("run-")
        .tempdir_in(&scratch_parent)
        .map_err(|e| Error::io(&scratch_parent, e))?;

    let outcome = execute(config, scratch.path(), sources, tests, deadline).await;

    remove_scratch(scratch.path()).await;
    drop(scratch);
    // Only succeeds when no other run is using it.
    let _ = std::fs::remove_dir(&scratch_parent);

    let mut result = outcome?;
    result.total_time_ms = started.elapsed().as_millis() as u64;
    tracing::info!(
        total = result.total,
        killed = result.killed,
        survived = result.survived,
        timed_out = result.timed_out,
        errors = result.erroneous,
        type_errors = result.type_errors,
        incomplete = result.incomplete,
        elapsed_ms = result.total_time_ms,
        "run finished"
    );
    Ok(result)
}

/// Remove the run's scratch tree. Killed toolchain processes may still be
/// exiting when the pool returns, so a failed attempt is retried briefly.
async fn remove_scratch(path: &Path) {
    let mut attempt = 1;
    loop {
        match std::fs::remove_dir_all(path) {
            Ok(()) => return,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) if attempt >= SCRATCH_REMOVE_ATTEMPTS => {
                tracing::warn!("failed to remove scratch directory {}: {e}", path.display());
                return;
            }
            Err(e) => {
                tracing::debug!(attempt, "retrying scratch removal: {e}");
                attempt += 1;
                tokio::time::sleep(SCRATCH_REMOVE_BACKOFF).await;
            }
        }
    }
}

/// One mutation per candidate, for every source file some test covers.
/// Files that fail to parse are skipped.
pub fn build_mutations(sources: &[SourceFile], coverage: &CoverageMap, config: &Config) -> Vec<Mutation> {
    let mode = config.mode();
    let mut mutations = Vec::new();

    for source in sources {
        let tests = coverage.tests_for(&source.relative_path);
        if tests.is_empty() {
            tracing::debug!(file = %source.relative_path, "no covering tests, skipping");
            continue;
        }
        let candidates = match parser::generate_mutations(&source.content, &source.path, mode) {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(file = %source.relative_path, "skipping file: {e}");
                continue;
            }
        };
        let shared = Arc::new(source.clone());
        for candidate in candidates {
            let id = mutations.len();
            mutations.push(Mutation::new(id, Arc::clone(&shared), candidate, tests.clone()));
        }
    }
    mutations
}

enum Next {
    Joined(Option<std::result::Result<(usize, std::result::Result<TestResult, PoolError>), tokio::task::JoinError>>),
    Deadline,
}

async fn execute(
    config: &Config,
    scratch: &Path,
    sources: Vec<SourceFile>,
    tests: Vec<TestFile>,
    deadline: Option<tokio::time::Instant>,
) -> Result<RunResult> {
    let mapping = coverage::map_coverage(&sources, &tests, scratch, &config.toolchain);
    let report = match deadline {
        Some(deadline) => match tokio::time::timeout_at(deadline, mapping).await {
            Ok(report) => report?,
            Err(_) => {
                tracing::warn!("global timeout reached during coverage mapping, no mutations generated");
                return Ok(RunResult {
                    global_timeout_hit: true,
                    timeout_ms: config.timeout_ms,
                    ..RunResult::default()
                });
            }
        },
        None => mapping.await?,
    };
    let timeout_ms = coverage::dynamic_timeout(config.timeout_ms, report.slowest_ms(), config.timeout_multiplier);
    if timeout_ms != config.timeout_ms {
        tracing::info!(timeout_ms, slowest_test_ms = report.slowest_ms(), "using dynamic timeout");
    }

    let mut mutations = build_mutations(&sources, &report.map, config);
    tracing::info!(mutations = mutations.len(), "generated mutations");

    let global_timeout_hit = if mutations.is_empty() {
        false
    } else {
        evaluate(config, scratch, timeout_ms, &mut mutations, sources, tests, deadline).await?
    };

    let mut result = RunResult::aggregate(mutations);
    result.coverage = report.map;
    result.coverage_errors = report.errors;
    result.global_timeout_hit = global_timeout_hit;
    result.timeout_ms = timeout_ms;
    Ok(result)
}

/// Submit every mutation to the pool and resolve them from its results.
/// Returns whether the global deadline cut the run short.
async fn evaluate(
    config: &Config,
    scratch: &Path,
    timeout_ms: u64,
    mutations: &mut [Mutation],
    sources: Vec<SourceFile>,
    tests: Vec<TestFile>,
    deadline: Option<tokio::time::Instant>,
) -> Result<bool> {
    let (factor_tx, factor_rx) = watch::channel(1.0);
    let monitor = config.memory.enabled.then(|| {
        MemoryMonitor::new(
            config.memory.thresholds(),
            Duration::from_millis(config.memory.sample_interval_ms),
            Box::new(ProcessTreeSampler::new()),
        )
        .spawn(factor_tx)
    });

    let pool = WorkerPool::new(
        config.pool_config(timeout_ms),
        ToolchainExecutor::new(config.toolchain.clone()),
        factor_rx,
    );

    let source_files: Arc<[SourceFile]> = sources.into();
    let test_files: Arc<[TestFile]> = tests.into();
    let tasks_dir: PathBuf = scratch.join("tasks");

    let mut pending = JoinSet::new();
    for (index, mutation) in mutations.iter().enumerate() {
        let handle = pool.submit(WorkerTask {
            mutation: mutation.clone(),
            source_files: Arc::clone(&source_files),
            test_files: Arc::clone(&test_files),
            working_directory: tasks_dir.clone(),
            no_check: config.no_check,
        });
        pending.spawn(async move { (index, handle.await) });
    }

    let grace = Duration::from_millis(config.shutdown_grace_ms);
    let mut failure = None;
    let mut global_timeout_hit = false;

    loop {
        let next = match deadline {
            Some(deadline) => tokio::select! {
                joined = pending.join_next() => Next::Joined(joined),
                _ = tokio::time::sleep_until(deadline) => Next::Deadline,
            },
            None => Next::Joined(pending.join_next().await),
        };
        match next {
            Next::Joined(Some(joined)) => {
                if let Some(error) = record(mutations, joined) {
                    failure = Some(error);
                    pool.signal_shutdown();
                    break;
                }
            }
            Next::Joined(None) => break,
            Next::Deadline => {
                tracing::warn!(
                    global_timeout_ms = config.global_timeout_ms,
                    "global timeout reached, stopping run"
                );
                global_timeout_hit = true;
                pool.signal_shutdown();
                break;
            }
        }
    }

    if global_timeout_hit || failure.is_some() {
        // Let tasks already running report within the grace window.
        let grace_deadline = tokio::time::Instant::now() + grace;
        while let Ok(Some(joined)) = tokio::time::timeout_at(grace_deadline, pending.join_next()).await {
            record(mutations, joined);
        }
        pending.abort_all();
    }

    pool.shutdown().await;
    if let Some(handle) = monitor {
        handle.abort();
    }

    if let Some(error) = failure {
        return Err(error.into());
    }

    let mut incomplete = 0;
    for mutation in mutations.iter_mut().filter(|m| m.status() == MutationStatus::Waiting) {
        mutation.resolve(MutationStatus::Incomplete, 0);
        incomplete += 1;
    }
    if incomplete > 0 {
        tracing::info!(incomplete, "mutations left unevaluated");
    }
    Ok(global_timeout_hit)
}

/// Apply one joined result. Returns the pool failure if the pool gave up.
fn record(
    mutations: &mut [Mutation],
    joined: std::result::Result<(usize, std::result::Result<TestResult, PoolError>), tokio::task::JoinError>,
) -> Option<PoolError> {
    match joined {
        Ok((index, Ok(result))) => {
            if let Some(mutation) = mutations.get_mut(index) {
                mutation.resolve(result.status, result.duration_ms);
            }
            None
        }
        Ok((_, Err(PoolError::Cancelled | PoolError::ShuttingDown))) => None,
        Ok((_, Err(error))) => Some(error),
        Err(e) => {
            tracing::error!("result collector failed: {e}");
            None
        }
    }
}
