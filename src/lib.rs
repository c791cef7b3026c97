pub mod config;
pub mod coordinator;
pub mod copy_tree;
pub mod coverage;
pub mod error;
pub mod files;
pub mod memory;
pub mod mutants;
pub mod operators;
pub mod output;
pub mod parser;
pub mod pool;
pub mod runner;
pub mod state;
pub mod toolchain;

pub use error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    JavaScript,
    TypeScript,
    Tsx,
}

pub fn detect_language(path: &std::path::Path) -> Option<Language> {
    match path.extension()?.to_str()? {
        "js" | "mjs" | "cjs" => Some(Language::JavaScript),
        "ts" | "mts" | "cts" => Some(Language::TypeScript),
        "tsx" | "jsx" => Some(Language::Tsx),
        _ => None,
    }
}
