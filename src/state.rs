use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::coordinator::RunResult;
use crate::coverage::TestMappingError;
use crate::error::{Error, Result};
use crate::mutants::{Mutation, MutationStatus};
use crate::runner::generate_diff;

pub const STATE_FILE_NAME: &str = ".mutarun-state.json";

/// Serializable form of a finished run. Every bucket is present even when
/// zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    /// Short random id distinguishing saved runs.
    pub run_id: String,
    pub total: usize,
    pub killed: usize,
    pub survived: usize,
    pub timed_out: usize,
    pub error: usize,
    pub type_error: usize,
    pub incomplete: usize,
    pub score: Option<f64>,
    pub global_timeout_hit: bool,
    pub timeout_ms: u64,
    pub total_time_ms: u64,
    pub mutations: Vec<MutationEntry>,
    pub coverage_errors: Vec<TestMappingError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationEntry {
    pub ref_id: String,
    pub file: String,
    pub line: usize,
    pub column: usize,
    pub operator: String,
    pub original: String,
    pub replacement: String,
    pub status: MutationStatus,
    pub duration_ms: u64,
    pub test_files: Vec<String>,
    pub diff: String,
}

impl MutationEntry {
    fn from_mutation(mutation: &Mutation) -> Self {
        MutationEntry {
            ref_id: format!("m{}", mutation.id + 1),
            file: mutation.source.relative_path.to_string(),
            line: mutation.line,
            column: mutation.column,
            operator: mutation.operator.clone(),
            original: mutation.original.clone(),
            replacement: mutation.replacement.clone(),
            status: mutation.status(),
            duration_ms: mutation.duration_ms(),
            test_files: mutation.test_files.iter().map(ToString::to_string).collect(),
            diff: generate_diff(&mutation.source.content, &mutation.mutated_content()),
        }
    }
}

/// One source file's mutations, grouped by outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReport {
    pub file: String,
    pub test_files: BTreeSet<String>,
    pub total: usize,
    /// Status name to the ref ids that ended in it.
    pub by_status: BTreeMap<String, Vec<String>>,
}

impl RunReport {
    pub fn from_result(result: &RunResult) -> Self {
        RunReport {
            run_id: generate_run_id(),
            total: result.total,
            killed: result.killed,
            survived: result.survived,
            timed_out: result.timed_out,
            error: result.erroneous,
            type_error: result.type_errors,
            incomplete: result.incomplete,
            score: result.score(),
            global_timeout_hit: result.global_timeout_hit,
            timeout_ms: result.timeout_ms,
            total_time_ms: result.total_time_ms,
            mutations: result.mutations.iter().map(MutationEntry::from_mutation).collect(),
            coverage_errors: result.coverage_errors.clone(),
        }
    }

    pub fn survivors(&self) -> impl Iterator<Item = &MutationEntry> {
        self.mutations.iter().filter(|m| m.status == MutationStatus::Survived)
    }

    /// Look up a mutation by ref, with or without the leading `@`.
    pub fn find(&self, mutant_ref: &str) -> Option<&MutationEntry> {
        let ref_id = mutant_ref.trim_start_matches('@');
        self.mutations.iter().find(|m| m.ref_id == ref_id)
    }

    pub fn by_file(&self) -> Vec<FileReport> {
        let mut files: BTreeMap<&str, FileReport> = BTreeMap::new();
        for entry in &self.mutations {
            let report = files.entry(entry.file.as_str()).or_insert_with(|| FileReport {
                file: entry.file.clone(),
                test_files: BTreeSet::new(),
                total: 0,
                by_status: BTreeMap::new(),
            });
            report.total += 1;
            report.test_files.extend(entry.test_files.iter().cloned());
            report
                .by_status
                .entry(entry.status.to_string())
                .or_default()
                .push(entry.ref_id.clone());
        }
        files.into_values().collect()
    }

    /// 1 when anything survived, otherwise 4 when the global timeout cut
    /// the run short, otherwise 0.
    pub fn exit_code(&self) -> i32 {
        if self.survived > 0 {
            1
        } else if self.global_timeout_hit {
            4
        } else {
            0
        }
    }
}

fn generate_run_id() -> String {
    format!("{:08x}", fastrand::u32(..))
}

pub fn state_path(dir: &Path) -> PathBuf {
    dir.join(STATE_FILE_NAME)
}

pub fn save_last_run(report: &RunReport, dir: &Path) -> Result<()> {
    save_to_path(report, &state_path(dir))
}

pub fn load_last_run(dir: &Path) -> Option<RunReport> {
    load_from_path(&state_path(dir)).ok()
}

pub fn save_to_path(report: &RunReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json).map_err(|e| Error::io(path, e))
}

pub fn load_from_path(path: &Path) -> Result<RunReport> {
    let data = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    Ok(serde_json::from_str(&data)?)
}
