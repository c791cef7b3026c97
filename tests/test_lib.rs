use mutarun::{Language, detect_language};
use std::path::Path;

#[test]
fn detect_javascript() {
    assert_eq!(detect_language(Path::new("foo.js")), Some(Language::JavaScript));
    assert_eq!(detect_language(Path::new("foo.mjs")), Some(Language::JavaScript));
    assert_eq!(detect_language(Path::new("foo.cjs")), Some(Language::JavaScript));
}

#[test]
fn detect_typescript() {
    assert_eq!(detect_language(Path::new("foo.ts")), Some(Language::TypeScript));
    assert_eq!(detect_language(Path::new("foo.mts")), Some(Language::TypeScript));
    assert_eq!(detect_language(Path::new("foo.cts")), Some(Language::TypeScript));
}

#[test]
fn detect_tsx_jsx() {
    assert_eq!(detect_language(Path::new("foo.tsx")), Some(Language::Tsx));
    assert_eq!(detect_language(Path::new("foo.jsx")), Some(Language::Tsx));
}

#[test]
fn detect_nested_path() {
    assert_eq!(detect_language(Path::new("src/deep/mod/calc.test.ts")), Some(Language::TypeScript));
}

#[test]
fn detect_unknown() {
    assert_eq!(detect_language(Path::new("foo.py")), None);
    assert_eq!(detect_language(Path::new("foo.rs")), None);
    assert_eq!(detect_language(Path::new("foo.json")), None);
}

#[test]
fn detect_no_extension() {
    assert_eq!(detect_language(Path::new("Makefile")), None);
}
