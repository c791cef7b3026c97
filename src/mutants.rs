use std::fmt;
use std::sync::Arc;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::files::SourceFile;

/// Byte range `[start, end)` of the gap between the left and right operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A mutation point emitted by the generator, before it is bound to tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationCandidate {
    pub span: Span,
    pub operator: String,
    pub original: String,
    pub replacement: String,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MutationStatus {
    Waiting,
    Killed,
    Survived,
    TimedOut,
    Error,
    TypeError,
    Incomplete,
}

impl MutationStatus {
    pub fn is_terminal(self) -> bool {
        self != MutationStatus::Waiting
    }

    /// Outcomes that count towards the mutation score.
    pub fn is_detected(self) -> bool {
        matches!(self, MutationStatus::Killed | MutationStatus::TypeError)
    }
}

impl fmt::Display for MutationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MutationStatus::Waiting => "waiting",
            MutationStatus::Killed => "killed",
            MutationStatus::Survived => "survived",
            MutationStatus::TimedOut => "timed-out",
            MutationStatus::Error => "error",
            MutationStatus::TypeError => "type-error",
            MutationStatus::Incomplete => "incomplete",
        };
        f.write_str(s)
    }
}

/// The unit of work: one operator substitution in one source file.
///
/// The mutated text is never stored; [`Mutation::mutated_content`] derives it
/// from the original content on demand.
#[derive(Debug, Clone)]
pub struct Mutation {
    pub id: usize,
    pub source: Arc<SourceFile>,
    pub span: Span,
    pub operator: String,
    pub original: String,
    pub replacement: String,
    pub line: usize,
    pub column: usize,
    /// Project-relative paths of the test files whose coverage touched the source.
    pub test_files: Vec<Utf8PathBuf>,
    status: MutationStatus,
    duration_ms: u64,
}

impl Mutation {
    pub fn new(
        id: usize,
        source: Arc<SourceFile>,
        candidate: MutationCandidate,
        test_files: Vec<Utf8PathBuf>,
    ) -> Self {
        debug_assert!(candidate.span.start <= candidate.span.end);
        debug_assert!(candidate.span.end <= source.content.len());
        Mutation {
            id,
            source,
            span: candidate.span,
            operator: candidate.operator,
            original: candidate.original,
            replacement: candidate.replacement,
            line: candidate.line,
            column: candidate.column,
            test_files,
            status: MutationStatus::Waiting,
            duration_ms: 0,
        }
    }

    pub fn status(&self) -> MutationStatus {
        self.status
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    /// Move out of `waiting` into a terminal status. A status, once set, is
    /// never changed again; returns `false` if the mutation was already
    /// resolved or `status` is not terminal.
    pub fn resolve(&mut self, status: MutationStatus, duration_ms: u64) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.duration_ms = duration_ms;
        true
    }

    pub fn mutated_content(&self) -> String {
        crate::runner::apply_mutation(&self.source.content, self.span, &self.replacement)
    }
}
