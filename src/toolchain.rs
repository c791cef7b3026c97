//! Subprocess execution and the commands used to type-check, test and
//! collect coverage for a target project.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::error::{Error, Result};

const FILES_PLACEHOLDER: &str = "{files}";
const COVERAGE_DIR_PLACEHOLDER: &str = "{coverage_dir}";

/// Marker the Deno test runner prints on stderr when an assertion fails.
pub const DENO_FAILURE_MARKER: &str = "Test failed";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Run to completion, capturing both streams. The child runs in its own
    /// process group; if the returned future is dropped before it finishes,
    /// the whole group is killed.
    pub async fn run(&self, cwd: &Path) -> Result<ProcessOutput> {
        tracing::trace!(program = %self.program, args = ?self.args, cwd = %cwd.display(), "spawning");
        let mut std_cmd = std::process::Command::new(&self.program);
        std_cmd
            .args(&self.args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut std_cmd, 0);

        let child = Command::from(std_cmd)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| Error::Spawn {
                program: self.program.clone(),
                source,
            })?;
        let group = GroupGuard(child.id());
        let output = child.wait_with_output().await.map_err(|source| Error::Spawn {
            program: self.program.clone(),
            source,
        })?;
        group.disarm();

        Ok(ProcessOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Kills a child's process group when dropped, so grandchildren die with a
/// cancelled command instead of outliving it.
struct GroupGuard(Option<u32>);

impl GroupGuard {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if let Some(id) = self.0 {
            kill_group(id);
        }
    }
}

#[cfg(unix)]
fn kill_group(id: u32) {
    let Ok(pgid) = libc::pid_t::try_from(id) else {
        return;
    };
    // SAFETY: killpg has no memory-safety preconditions. The group leader is
    // not reaped yet, so the id still names our group.
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_id: u32) {}

/// How a test run signals that at least one assertion failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureSignal {
    /// Substring on stderr. Exit code is ignored.
    Marker(String),
    /// Non-zero exit code means a test failed.
    ExitCode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Killed,
    Survived,
}

/// Decide whether a test run detected the mutation.
pub fn classify_outcome(_stdout: &str, stderr: &str, exit_code: Option<i32>, signal: &FailureSignal) -> Verdict {
    let failed = match signal {
        FailureSignal::Marker(marker) => stderr.contains(marker.as_str()),
        FailureSignal::ExitCode => exit_code != Some(0),
    };
    if failed { Verdict::Killed } else { Verdict::Survived }
}

/// The commands a target project is checked, tested and measured with.
///
/// Arguments may contain `{coverage_dir}`; an argument equal to `{files}`
/// expands to the file list in place, otherwise files are appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toolchain {
    pub program: String,
    pub type_check_args: Vec<String>,
    pub test_args: Vec<String>,
    #[serde(default)]
    pub no_check_args: Vec<String>,
    pub coverage_args: Vec<String>,
    pub failure_signal: FailureSignal,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self::deno()
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Toolchain {
    pub fn deno() -> Self {
        Toolchain {
            program: "deno".to_string(),
            type_check_args: strings(&["check"]),
            test_args: strings(&["test", "--allow-all"]),
            no_check_args: strings(&["--no-check"]),
            coverage_args: strings(&["test", "--allow-all", "--coverage={coverage_dir}"]),
            failure_signal: FailureSignal::Marker(DENO_FAILURE_MARKER.to_string()),
        }
    }

    /// Each step runs as `sh -c <script> mutarun <files...>`, so scripts see
    /// the files as `"$@"`.
    pub fn shell(type_check: &str, test: &str, coverage: &str, failure_signal: FailureSignal) -> Self {
        let script = |s: &str| strings(&["-c", s, "mutarun"]);
        Toolchain {
            program: "sh".to_string(),
            type_check_args: script(type_check),
            test_args: script(test),
            no_check_args: vec![],
            coverage_args: script(coverage),
            failure_signal,
        }
    }

    fn build(&self, base: &[String], extra: &[String], files: &[PathBuf], coverage_dir: Option<&Path>) -> CommandSpec {
        let files: Vec<String> = files.iter().map(|f| f.to_string_lossy().into_owned()).collect();
        let mut args = Vec::with_capacity(base.len() + extra.len() + files.len());
        let mut files_placed = false;

        for arg in base.iter().chain(extra) {
            if arg == FILES_PLACEHOLDER {
                args.extend(files.iter().cloned());
                files_placed = true;
                continue;
            }
            match coverage_dir {
                Some(dir) if arg.contains(COVERAGE_DIR_PLACEHOLDER) => {
                    args.push(arg.replace(COVERAGE_DIR_PLACEHOLDER, &dir.to_string_lossy()));
                }
                _ => args.push(arg.clone()),
            }
        }
        if !files_placed {
            args.extend(files);
        }

        CommandSpec {
            program: self.program.clone(),
            args,
        }
    }

    pub fn type_check_command(&self, files: &[PathBuf]) -> CommandSpec {
        self.build(&self.type_check_args, &[], files, None)
    }

    pub fn test_command(&self, files: &[PathBuf], no_check: bool) -> CommandSpec {
        let extra: &[String] = if no_check { &self.no_check_args } else { &[] };
        self.build(&self.test_args, extra, files, None)
    }

    pub fn coverage_command(&self, files: &[PathBuf], coverage_dir: &Path) -> CommandSpec {
        self.build(&self.coverage_args, &[], files, Some(coverage_dir))
    }

    pub fn classify(&self, output: &ProcessOutput) -> Verdict {
        classify_outcome(&output.stdout, &output.stderr, output.exit_code, &self.failure_signal)
    }
}
