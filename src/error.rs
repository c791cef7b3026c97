use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A source file could not be parsed. Only that file is affected.
    #[error("failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("unsupported file type: {0}")]
    UnsupportedLanguage(PathBuf),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("no source files resolved under {0}")]
    NoSourceFiles(PathBuf),

    #[error("invalid glob pattern '{pattern}': {reason}")]
    Glob { pattern: String, reason: String },

    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Pool(#[from] crate::pool::PoolError),

    #[error("failed to (de)serialize report: {0}")]
    Report(#[from] serde_json::Error),

    #[error("failed to read config {path}: {reason}")]
    ConfigFile { path: PathBuf, reason: String },
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
