use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::copy_tree::Workspace;
use crate::error::{Error, Result};
use crate::files::{SourceFile, TestFile};
use crate::mutants::{Mutation, MutationStatus, Span};
use crate::toolchain::{Toolchain, Verdict};

/// What the test process did, independent of how the mutation is scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestOutcome {
    TestsPassed,
    TestsFailed,
    TypeError,
    TimedOut,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub mutation_id: usize,
    pub status: MutationStatus,
    pub outcome: TestOutcome,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl TestResult {
    pub fn timed_out(mutation_id: usize, timeout_ms: u64) -> Self {
        TestResult {
            mutation_id,
            status: MutationStatus::TimedOut,
            outcome: TestOutcome::TimedOut,
            error: None,
            duration_ms: timeout_ms,
        }
    }

    pub fn failed(mutation_id: usize, error: impl Into<String>, duration_ms: u64) -> Self {
        TestResult {
            mutation_id,
            status: MutationStatus::Error,
            outcome: TestOutcome::Error,
            error: Some(error.into()),
            duration_ms,
        }
    }
}

/// Everything one worker needs to evaluate one mutation.
#[derive(Debug, Clone)]
pub struct WorkerTask {
    pub mutation: Mutation,
    pub source_files: Arc<[SourceFile]>,
    pub test_files: Arc<[TestFile]>,
    /// Parent of the per-task workspaces.
    pub working_directory: PathBuf,
    pub no_check: bool,
}

/// Splice `replacement` into the operator gap, padded with one space on each
/// side so neighbouring tokens never merge.
pub fn apply_mutation(source: &str, span: Span, replacement: &str) -> String {
    let mut result = String::with_capacity(source.len() + replacement.len() + 2);
    result.push_str(&source[..span.start]);
    result.push(' ');
    result.push_str(replacement);
    result.push(' ');
    result.push_str(&source[span.end..]);
    result
}

pub fn generate_diff(original: &str, mutated: &str) -> String {
    use similar::{ChangeTag, TextDiff};
    let diff = TextDiff::from_lines(original, mutated);
    let mut output = String::new();
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Delete => output.push_str(&format!("- {change}")),
            ChangeTag::Insert => output.push_str(&format!("+ {change}")),
            ChangeTag::Equal => {}
        }
    }
    output
}

fn prepare_workspace(task: &WorkerTask) -> std::io::Result<Workspace> {
    let workspace = Workspace::create(&task.working_directory, "task-")?;
    workspace.populate(task.source_files.iter().chain(task.test_files.iter()))?;
    workspace.write_file(&task.mutation.source.relative_path, &task.mutation.mutated_content())?;
    Ok(workspace)
}

/// Evaluate one mutation in a fresh copy of the project.
///
/// Test failures and type errors are results, not errors. `Err` means the
/// task could not be carried out at all (workspace I/O, a toolchain that
/// cannot be spawned) and the worker should be treated as faulted.
pub async fn execute_task(task: WorkerTask, toolchain: &Toolchain) -> Result<TestResult> {
    let start = Instant::now();
    let mutation_id = task.mutation.id;
    let parent = task.working_directory.clone();

    let workspace = tokio::task::spawn_blocking(move || prepare_workspace(&task).map(|ws| (ws, task)))
        .await
        .map_err(|e| Error::io(&parent, std::io::Error::other(e.to_string())))?
        .map_err(|e| Error::io(&parent, e));
    let (workspace, task) = workspace?;

    let result = run_in_workspace(&task, toolchain, &workspace, start).await;

    let root = workspace.root().to_path_buf();
    if let Err(e) = workspace.close() {
        tracing::warn!(mutation = mutation_id, "failed to remove workspace {}: {e}", root.display());
    }
    result
}

async fn run_in_workspace(
    task: &WorkerTask,
    toolchain: &Toolchain,
    workspace: &Workspace,
    start: Instant,
) -> Result<TestResult> {
    let mutation = &task.mutation;
    let tests = mutation
        .test_files
        .iter()
        .map(|rel| workspace.path_of(rel).map_err(|e| Error::io(workspace.root(), e)))
        .collect::<Result<Vec<_>>>()?;

    if !task.no_check {
        let check = toolchain.type_check_command(&tests).run(workspace.root()).await?;
        if !check.success() {
            tracing::debug!(mutation = mutation.id, "type check rejected mutation");
            return Ok(TestResult {
                mutation_id: mutation.id,
                status: MutationStatus::TypeError,
                outcome: TestOutcome::TypeError,
                error: Some(check.stderr),
                duration_ms: start.elapsed().as_millis() as u64,
            });
        }
    }

    let output = toolchain
        .test_command(&tests, task.no_check)
        .run(workspace.root())
        .await?;
    let status = match toolchain.classify(&output) {
        Verdict::Killed => MutationStatus::Killed,
        Verdict::Survived => MutationStatus::Survived,
    };
    let (outcome, error) = if output.success() {
        (TestOutcome::TestsPassed, None)
    } else {
        (TestOutcome::TestsFailed, Some(output.stderr))
    };

    tracing::debug!(mutation = mutation.id, %status, "mutation evaluated");
    Ok(TestResult {
        mutation_id: mutation.id,
        status,
        outcome,
        error,
        duration_ms: start.elapsed().as_millis() as u64,
    })
}
