use mutarun::files::{self, ProjectFile};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn relative_paths(files: &[ProjectFile]) -> Vec<String> {
    files.iter().map(|f| f.relative_path.to_string()).collect()
}

// --- is_test_file ---

#[test]
fn test_suffixes() {
    assert!(files::is_test_file(Path::new("calc.test.ts"), ""));
    assert!(files::is_test_file(Path::new("calc_test.js"), ""));
    assert!(files::is_test_file(Path::new("calc.spec.tsx"), ""));
    assert!(!files::is_test_file(Path::new("calc.ts"), "export const x = 1;"));
    assert!(!files::is_test_file(Path::new("testing.ts"), ""));
}

#[test]
fn test_by_content() {
    assert!(files::is_test_file(Path::new("checks.ts"), "Deno.test(\"x\", () => {});"));
    assert!(files::is_test_file(
        Path::new("checks.ts"),
        "import { assertEquals } from \"jsr:@std/assert\";"
    ));
}

// --- discover ---

#[test]
fn discover_splits_sources_and_tests() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "src/a.ts", "export const a = 1;");
    write(dir.path(), "src/b.js", "export const b = 2;");
    write(dir.path(), "tests/a.test.ts", "import { a } from \"../src/a.ts\";");
    write(dir.path(), "README.md", "# readme");

    let (sources, tests) = files::discover(dir.path()).unwrap();

    assert_eq!(relative_paths(&sources), vec!["src/a.ts", "src/b.js"]);
    assert_eq!(relative_paths(&tests), vec!["tests/a.test.ts"]);
    assert_eq!(sources[0].content, "export const a = 1;");
    assert_eq!(sources[0].path, dir.path().join("src/a.ts"));
}

#[test]
fn discover_skips_hidden_and_dependency_dirs() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "main.ts", "export {};");
    write(dir.path(), "node_modules/pkg/index.js", "module.exports = 1;");
    write(dir.path(), ".mutarun/run-1/main.ts", "export {};");
    write(dir.path(), "coverage/out.js", "");
    write(dir.path(), "dist/bundle.js", "");

    let (sources, tests) = files::discover(dir.path()).unwrap();

    assert_eq!(relative_paths(&sources), vec!["main.ts"]);
    assert!(tests.is_empty());
}

// --- from_globs ---

#[test]
fn globs_resolve_relative_to_root() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "src/a.ts", "");
    write(dir.path(), "src/b.ts", "");
    write(dir.path(), "lib/c.ts", "");
    write(dir.path(), "tests/a.test.ts", "");

    let (sources, tests) =
        files::from_globs(&["src/*.ts".to_string()], &["tests/**/*.ts".to_string()], dir.path()).unwrap();

    assert_eq!(relative_paths(&sources), vec!["src/a.ts", "src/b.ts"]);
    assert_eq!(relative_paths(&tests), vec!["tests/a.test.ts"]);
}

#[test]
fn file_matched_by_both_lists_is_a_test() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "src/a.ts", "");
    write(dir.path(), "src/a.test.ts", "");

    let (sources, tests) =
        files::from_globs(&["src/*.ts".to_string()], &["src/*.test.ts".to_string()], dir.path()).unwrap();

    assert_eq!(relative_paths(&sources), vec!["src/a.ts"]);
    assert_eq!(relative_paths(&tests), vec!["src/a.test.ts"]);
}

#[test]
fn invalid_glob_is_an_error() {
    let dir = TempDir::new().unwrap();
    let err = files::from_globs(&["src/[".to_string()], &[], dir.path()).unwrap_err();
    assert!(matches!(err, mutarun::Error::Glob { .. }));
}

// --- relative_to ---

#[test]
fn relative_to_strips_root() {
    let rel = files::relative_to(Path::new("/project/src/a.ts"), Path::new("/project")).unwrap();
    assert_eq!(rel.as_str(), "src/a.ts");
}

#[test]
fn relative_to_outside_root_is_none() {
    assert!(files::relative_to(Path::new("/elsewhere/a.ts"), Path::new("/project")).is_none());
}

#[test]
fn absolute_glob_outside_root_is_rejected() {
    let root = TempDir::new().unwrap();
    let elsewhere = TempDir::new().unwrap();
    write(elsewhere.path(), "a/util.ts", "export const a = 1 + 1;\n");
    write(elsewhere.path(), "b/util.ts", "export const b = 2 + 2;\n");
    let pattern = format!("{}/*/util.ts", elsewhere.path().display());

    let err = files::from_globs(&[pattern], &[], root.path()).unwrap_err();

    assert!(matches!(err, mutarun::Error::Config(ref reason) if reason.contains("outside the working directory")));
}

#[test]
fn globs_skip_scratch_directory() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "src/sum.ts", "export const sum = (a: number, b: number) => a + b;\n");
    write(
        dir.path(),
        ".mutarun/run-abc/tasks/task-1/src/sum.ts",
        "export const sum = (a: number, b: number) => a - b;\n",
    );

    let (sources, _) = files::from_globs(&["**/*.ts".to_string()], &[], dir.path()).unwrap();

    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].relative_path.as_str(), "src/sum.ts");
}

#[test]
fn load_missing_file_is_io_error() {
    let dir = TempDir::new().unwrap();
    let err = ProjectFile::load(&dir.path().join("nope.ts"), dir.path()).unwrap_err();
    assert!(matches!(err, mutarun::Error::Io { .. }));
}
