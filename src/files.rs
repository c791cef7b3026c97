//! Source and test file records, and discovery of both under a project root.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use camino::Utf8PathBuf;
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// A file loaded once at the start of a run. Content is never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectFile {
    pub path: PathBuf,
    pub relative_path: Utf8PathBuf,
    pub content: String,
}

pub type SourceFile = ProjectFile;
pub type TestFile = ProjectFile;

const SKIP_DIRS: &[&str] = &["node_modules", "target", "dist", "build", "coverage"];

const TEST_SUFFIXES: &[&str] = &["_test", ".test", ".spec"];

impl ProjectFile {
    /// Load `path`, which must lie under `root`.
    pub fn load(path: &Path, root: &Path) -> Result<Self> {
        let relative_path = relative_to(path, root).ok_or_else(|| {
            Error::Config(format!(
                "{} is outside the working directory {}",
                path.display(),
                root.display()
            ))
        })?;
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Ok(ProjectFile {
            path: path.to_path_buf(),
            relative_path,
            content,
        })
    }
}

/// Path of `path` relative to `root`, or `None` when `path` lies outside it.
pub fn relative_to(path: &Path, root: &Path) -> Option<Utf8PathBuf> {
    let rel = path.strip_prefix(root).ok()?.to_path_buf();
    Some(Utf8PathBuf::from_path_buf(rel).unwrap_or_else(|p| Utf8PathBuf::from(p.to_string_lossy().into_owned())))
}

/// Whether `path` sits inside a run's scratch tree under `root`.
fn in_scratch(path: &Path, root: &Path) -> bool {
    path.strip_prefix(root)
        .is_ok_and(|rel| rel.components().any(|c| c.as_os_str() == crate::coordinator::SCRATCH_DIR))
}

fn is_hidden_or_skipped(name: &str) -> bool {
    (name.starts_with('.') && name != "." && name != "..") || SKIP_DIRS.contains(&name)
}

fn has_test_name(path: &Path) -> bool {
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return false;
    };
    TEST_SUFFIXES.iter().any(|suffix| stem.ends_with(suffix))
}

/// A file is a test file if its name says so, or if it registers tests or
/// imports the standard assertion module.
pub fn is_test_file(path: &Path, content: &str) -> bool {
    has_test_name(path) || content.contains("Deno.test(") || content.contains("@std/assert")
}

/// Walk `root` for JS/TS files, skipping hidden and dependency directories,
/// and split them into source and test files.
pub fn discover(root: &Path) -> Result<(Vec<SourceFile>, Vec<TestFile>)> {
    let mut sources = Vec::new();
    let mut tests = Vec::new();

    let walker = WalkDir::new(root).sort_by_file_name().into_iter().filter_entry(|entry| {
        entry.depth() == 0 || !is_hidden_or_skipped(&entry.file_name().to_string_lossy())
    });

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
            Error::io(path, std::io::Error::other(e.to_string()))
        })?;
        if !entry.file_type().is_file() || crate::detect_language(entry.path()).is_none() {
            continue;
        }
        let file = ProjectFile::load(entry.path(), root)?;
        if is_test_file(&file.path, &file.content) {
            tests.push(file);
        } else {
            sources.push(file);
        }
    }

    tracing::debug!(
        sources = sources.len(),
        tests = tests.len(),
        "discovered files under {}",
        root.display()
    );
    Ok((sources, tests))
}

fn expand_globs(patterns: &[String], root: &Path) -> Result<BTreeSet<PathBuf>> {
    let mut paths = BTreeSet::new();
    for pattern in patterns {
        let full = if Path::new(pattern).is_absolute() {
            pattern.clone()
        } else {
            root.join(pattern).to_string_lossy().into_owned()
        };
        let matches = glob::glob(&full).map_err(|e| Error::Glob {
            pattern: pattern.clone(),
            reason: e.to_string(),
        })?;
        for entry in matches {
            match entry {
                Ok(path) if path.is_file() && !in_scratch(&path, root) => {
                    paths.insert(path);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("skipping unreadable glob match: {e}"),
            }
        }
    }
    Ok(paths)
}

/// Expand explicit glob lists. Any file matched by both lists is treated as
/// a test file only.
pub fn from_globs(
    source_globs: &[String],
    test_globs: &[String],
    root: &Path,
) -> Result<(Vec<SourceFile>, Vec<TestFile>)> {
    let test_paths = expand_globs(test_globs, root)?;
    let source_paths: Vec<PathBuf> = expand_globs(source_globs, root)?
        .into_iter()
        .filter(|p| !test_paths.contains(p))
        .collect();

    let sources = source_paths
        .iter()
        .map(|p| ProjectFile::load(p, root))
        .collect::<Result<Vec<_>>>()?;
    let tests = test_paths
        .iter()
        .map(|p| ProjectFile::load(p, root))
        .collect::<Result<Vec<_>>>()?;
    Ok((sources, tests))
}
