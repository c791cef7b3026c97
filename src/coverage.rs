//! Coverage Mapper: runs every test file once with coverage enabled and
//! records which source files each one touched.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::copy_tree::Workspace;
use crate::error::{Error, Result};
use crate::files::{SourceFile, TestFile, relative_to};
use crate::toolchain::Toolchain;

/// Source file (project-relative) to the test files whose run touched it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageMap {
    entries: BTreeMap<Utf8PathBuf, BTreeSet<Utf8PathBuf>>,
}

impl CoverageMap {
    pub fn insert(&mut self, source: Utf8PathBuf, test: Utf8PathBuf) {
        self.entries.entry(source).or_default().insert(test);
    }

    /// Covering tests for `source`, empty when nothing touched it.
    pub fn tests_for(&self, source: &Utf8Path) -> Vec<Utf8PathBuf> {
        self.entries
            .get(source)
            .map(|tests| tests.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_covered(&self, source: &Utf8Path) -> bool {
        self.entries.get(source).is_some_and(|tests| !tests.is_empty())
    }

    pub fn sources(&self) -> impl Iterator<Item = &Utf8PathBuf> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A test file whose instrumented run failed. Its coverage is not used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestMappingError {
    pub test_file: Utf8PathBuf,
    pub coverage_path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct CoverageReport {
    pub map: CoverageMap,
    pub errors: Vec<TestMappingError>,
    /// Wall-clock duration of each test file's instrumented run.
    pub durations_ms: BTreeMap<Utf8PathBuf, u64>,
}

impl CoverageReport {
    pub fn slowest_ms(&self) -> u64 {
        self.durations_ms.values().copied().max().unwrap_or(0)
    }
}

/// `max(static, ceil(slowest * multiplier))`; a multiplier of zero or less
/// leaves the static timeout in place.
pub fn dynamic_timeout(static_ms: u64, slowest_ms: u64, multiplier: f64) -> u64 {
    if multiplier <= 0.0 {
        return static_ms;
    }
    let scaled = (slowest_ms as f64 * multiplier).ceil() as u64;
    static_ms.max(scaled)
}

#[derive(Deserialize)]
struct ScriptCoverage {
    url: String,
}

/// Turn a coverage record url into a path. Relative paths are taken
/// relative to `base`.
fn url_to_path(url: &str, base: &Path) -> Option<PathBuf> {
    let raw = url.strip_prefix("file://").unwrap_or(url);
    if raw.is_empty() || raw.contains("://") {
        return None;
    }
    let path = PathBuf::from(percent_decode(raw)?);
    Some(if path.is_absolute() { path } else { base.join(path) })
}

/// Decode `%XX` escapes into bytes, then UTF-8. A `%` not followed by two
/// hex digits is kept as written.
fn percent_decode(raw: &str) -> Option<String> {
    let bytes = raw.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let escaped = (bytes[i] == b'%')
            .then(|| raw.get(i + 1..i + 3))
            .flatten()
            .filter(|hex| hex.bytes().all(|b| b.is_ascii_hexdigit()))
            .and_then(|hex| u8::from_str_radix(hex, 16).ok());
        match escaped {
            Some(byte) => {
                decoded.push(byte);
                i += 3;
            }
            None => {
                decoded.push(bytes[i]);
                i += 1;
            }
        }
    }
    String::from_utf8(decoded).ok()
}

/// Read every `*.json` coverage record under `dir` and return the paths they
/// refer to. Unreadable or foreign records are skipped.
fn read_coverage_records(dir: &Path, base: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut paths = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let record = fs::read_to_string(&path)
            .ok()
            .and_then(|text| serde_json::from_str::<ScriptCoverage>(&text).ok());
        match record {
            Some(record) => paths.extend(url_to_path(&record.url, base)),
            None => tracing::trace!("ignoring coverage record {}", path.display()),
        }
    }
    paths
}

/// Which known source a covered path refers to: its copy inside the pass
/// workspace, or the original file on disk.
fn match_source<'a>(covered: &Path, workspace_roots: &[PathBuf], sources: &'a [SourceFile]) -> Option<&'a SourceFile> {
    for root in workspace_roots {
        if covered.starts_with(root) {
            let rel = relative_to(covered, root)?;
            return sources.iter().find(|s| s.relative_path == rel);
        }
    }
    sources.iter().find(|s| s.path == covered)
}

/// Run each test file on its own, sequentially, in a fresh copy of the
/// project under `working_directory/coverage`.
///
/// A failing test file is recorded as a [`TestMappingError`] and the pass
/// continues with the rest of the suite.
pub async fn map_coverage(
    sources: &[SourceFile],
    tests: &[TestFile],
    working_directory: &Path,
    toolchain: &Toolchain,
) -> Result<CoverageReport> {
    let coverage_root = working_directory.join("coverage");
    fs::create_dir_all(&coverage_root).map_err(|e| Error::io(&coverage_root, e))?;

    let mut report = CoverageReport::default();

    for (index, test) in tests.iter().enumerate() {
        let records_dir = coverage_root.join(format!("records-{index}"));
        fs::create_dir_all(&records_dir).map_err(|e| Error::io(&records_dir, e))?;

        let workspace = Workspace::create(&coverage_root, "pass-").map_err(|e| Error::io(&coverage_root, e))?;
        workspace
            .populate(sources.iter().chain(tests.iter()))
            .map_err(|e| Error::io(workspace.root(), e))?;
        let test_path = workspace
            .path_of(&test.relative_path)
            .map_err(|e| Error::io(workspace.root(), e))?;

        let start = Instant::now();
        let output = toolchain
            .coverage_command(&[test_path], &records_dir)
            .run(workspace.root())
            .await;
        let duration_ms = start.elapsed().as_millis() as u64;
        report.durations_ms.insert(test.relative_path.clone(), duration_ms);

        let failure = match output {
            Ok(output) if output.success() => None,
            Ok(output) => Some(if output.stderr.trim().is_empty() {
                format!("test run exited with {:?}", output.exit_code)
            } else {
                output.stderr
            }),
            Err(e) => Some(e.to_string()),
        };

        match failure {
            Some(error) => {
                tracing::warn!(test = %test.relative_path, "coverage run failed, tests from this file are not scoped");
                report.errors.push(TestMappingError {
                    test_file: test.relative_path.clone(),
                    coverage_path: records_dir.clone(),
                    error,
                });
            }
            None => {
                // Runners may report the workspace through a resolved symlink.
                let mut roots = vec![workspace.root().to_path_buf()];
                roots.extend(workspace.root().canonicalize().ok());
                let mut touched = 0;
                for covered in read_coverage_records(&records_dir, workspace.root()) {
                    if let Some(source) = match_source(&covered, &roots, sources) {
                        report.map.insert(source.relative_path.clone(), test.relative_path.clone());
                        touched += 1;
                    }
                }
                tracing::debug!(test = %test.relative_path, touched, duration_ms, "coverage mapped");
            }
        }

        if let Err(e) = workspace.close() {
            tracing::warn!("failed to remove coverage workspace: {e}");
        }
    }

    tracing::info!(
        covered_sources = report.map.len(),
        failed_tests = report.errors.len(),
        slowest_ms = report.slowest_ms(),
        "coverage mapping finished"
    );
    Ok(report)
}
