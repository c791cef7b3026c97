use mutarun::coverage::{self, CoverageMap};
use mutarun::files::ProjectFile;
use mutarun::toolchain::{FailureSignal, Toolchain};

use camino::{Utf8Path, Utf8PathBuf};
use std::path::Path;
use tempfile::TempDir;

/// Emits one record per `src/*.ts` path a test file mentions, as a path
/// relative to the working directory. Tests containing BROKEN fail.
const RELATIVE_COVERAGE: &str = r#"for t in "$@"; do grep -o 'src/[a-z_]*\.ts' "$t" | while read -r s; do printf '{"url":"%s"}' "$s" > "{coverage_dir}/$(basename "$s").json"; done; done; grep -q BROKEN "$1" && exit 1; exit 0"#;

/// Same, but as absolute `file://` urls through the resolved working directory.
const ABSOLUTE_COVERAGE: &str = r#"for t in "$@"; do grep -o 'src/[a-z_]*\.ts' "$t" | while read -r s; do printf '{"url":"file://%s/%s"}' "$(pwd -P)" "$s" > "{coverage_dir}/$(basename "$s").json"; done; done; exit 0"#;

fn make_file(root: &Path, rel: &str, content: &str) -> ProjectFile {
    ProjectFile {
        path: root.join(rel),
        relative_path: Utf8PathBuf::from(rel),
        content: content.to_string(),
    }
}

fn make_project(root: &Path) -> (Vec<ProjectFile>, Vec<ProjectFile>) {
    let sources = vec![
        make_file(root, "src/sum.ts", "export const sum = (a: number, b: number) => a + b;\n"),
        make_file(root, "src/mul.ts", "export const mul = (a: number, b: number) => a * b;\n"),
        make_file(root, "src/unused.ts", "export const neg = (a: number) => 0 - a;\n"),
    ];
    let tests = vec![
        make_file(root, "tests/sum.test.ts", "import { sum } from \"../src/sum.ts\";\n"),
        make_file(
            root,
            "tests/both.test.ts",
            "import { sum } from \"../src/sum.ts\";\nimport { mul } from \"../src/mul.ts\";\n",
        ),
    ];
    (sources, tests)
}

fn toolchain(coverage: &str) -> Toolchain {
    Toolchain::shell("true", "true", coverage, FailureSignal::ExitCode)
}

// --- map_coverage ---

#[tokio::test]
async fn maps_each_source_to_its_tests() {
    let dir = TempDir::new().unwrap();
    let (sources, tests) = make_project(dir.path());

    let report = coverage::map_coverage(&sources, &tests, dir.path(), &toolchain(RELATIVE_COVERAGE))
        .await
        .unwrap();

    assert!(report.errors.is_empty());
    assert_eq!(
        report.map.tests_for(Utf8Path::new("src/sum.ts")),
        vec![Utf8PathBuf::from("tests/both.test.ts"), Utf8PathBuf::from("tests/sum.test.ts")]
    );
    assert_eq!(
        report.map.tests_for(Utf8Path::new("src/mul.ts")),
        vec![Utf8PathBuf::from("tests/both.test.ts")]
    );
}

#[tokio::test]
async fn untouched_source_has_no_entry() {
    let dir = TempDir::new().unwrap();
    let (sources, tests) = make_project(dir.path());

    let report = coverage::map_coverage(&sources, &tests, dir.path(), &toolchain(RELATIVE_COVERAGE))
        .await
        .unwrap();

    assert!(!report.map.is_covered(Utf8Path::new("src/unused.ts")));
    assert!(report.map.tests_for(Utf8Path::new("src/unused.ts")).is_empty());
    assert_eq!(report.map.len(), 2);
}

#[tokio::test]
async fn absolute_file_urls_are_matched() {
    let dir = TempDir::new().unwrap();
    let (sources, tests) = make_project(dir.path());

    let report = coverage::map_coverage(&sources, &tests, dir.path(), &toolchain(ABSOLUTE_COVERAGE))
        .await
        .unwrap();

    assert!(report.map.is_covered(Utf8Path::new("src/sum.ts")));
    assert!(report.map.is_covered(Utf8Path::new("src/mul.ts")));
    assert!(!report.map.is_covered(Utf8Path::new("src/unused.ts")));
}

#[tokio::test]
async fn percent_encoded_urls_are_decoded() {
    let dir = TempDir::new().unwrap();
    let sources = vec![
        make_file(dir.path(), "src/café.ts", "export const c = (a: number) => a + 1;\n"),
        make_file(dir.path(), "src/a#b[1].ts", "export const d = (a: number) => a - 1;\n"),
    ];
    let tests = vec![make_file(dir.path(), "tests/cafe.test.ts", "import \"../src/café.ts\";\n")];
    let encoded = r#"printf '{"url":"file://%s/src/caf%%C3%%A9.ts"}' "$(pwd -P)" > "{coverage_dir}/a.json"; printf '{"url":"file://%s/src/a%%23b%%5B1%%5D.ts"}' "$(pwd -P)" > "{coverage_dir}/b.json"; exit 0"#;

    let report = coverage::map_coverage(&sources, &tests, dir.path(), &toolchain(encoded))
        .await
        .unwrap();

    assert!(report.errors.is_empty());
    assert!(report.map.is_covered(Utf8Path::new("src/café.ts")));
    assert!(report.map.is_covered(Utf8Path::new("src/a#b[1].ts")));
}

#[tokio::test]
async fn failing_test_is_reported_and_others_still_mapped() {
    let dir = TempDir::new().unwrap();
    let (sources, mut tests) = make_project(dir.path());
    tests.push(make_file(
        dir.path(),
        "tests/broken.test.ts",
        "import { neg } from \"../src/unused.ts\";\n// BROKEN\n",
    ));

    let report = coverage::map_coverage(&sources, &tests, dir.path(), &toolchain(RELATIVE_COVERAGE))
        .await
        .unwrap();

    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].test_file, Utf8PathBuf::from("tests/broken.test.ts"));
    assert!(report.errors[0].coverage_path.starts_with(dir.path().join("coverage")));
    assert!(!report.map.is_covered(Utf8Path::new("src/unused.ts")));
    assert!(report.map.is_covered(Utf8Path::new("src/sum.ts")));
}

#[tokio::test]
async fn durations_are_recorded_for_every_test() {
    let dir = TempDir::new().unwrap();
    let (sources, tests) = make_project(dir.path());
    let slow = format!("sleep 0.2; {RELATIVE_COVERAGE}");

    let report = coverage::map_coverage(&sources, &tests, dir.path(), &toolchain(&slow))
        .await
        .unwrap();

    assert_eq!(report.durations_ms.len(), 2);
    assert!(report.slowest_ms() >= 200);
}

#[tokio::test]
async fn pass_workspaces_are_removed() {
    let dir = TempDir::new().unwrap();
    let (sources, tests) = make_project(dir.path());

    coverage::map_coverage(&sources, &tests, dir.path(), &toolchain(RELATIVE_COVERAGE))
        .await
        .unwrap();

    let pass_dirs = std::fs::read_dir(dir.path().join("coverage"))
        .unwrap()
        .flatten()
        .filter(|e| e.file_name().to_string_lossy().starts_with("pass-"))
        .count();
    assert_eq!(pass_dirs, 0);
}

#[tokio::test]
async fn missing_toolchain_is_recorded_per_test() {
    let dir = TempDir::new().unwrap();
    let (sources, tests) = make_project(dir.path());
    let mut tc = toolchain(RELATIVE_COVERAGE);
    tc.program = "definitely-not-a-real-binary-xyz".to_string();

    let report = coverage::map_coverage(&sources, &tests, dir.path(), &tc).await.unwrap();

    assert_eq!(report.errors.len(), 2);
    assert!(report.map.is_empty());
}

// --- CoverageMap ---

#[test]
fn map_deduplicates_tests() {
    let mut map = CoverageMap::default();
    map.insert("src/a.ts".into(), "tests/a.test.ts".into());
    map.insert("src/a.ts".into(), "tests/a.test.ts".into());
    assert_eq!(map.tests_for(Utf8Path::new("src/a.ts")).len(), 1);
    assert_eq!(map.sources().count(), 1);
}

// --- dynamic_timeout ---

#[test]
fn static_timeout_wins_when_larger() {
    assert_eq!(coverage::dynamic_timeout(10_000, 2_000, 3.0), 10_000);
}

#[test]
fn scaled_baseline_wins_when_larger() {
    assert_eq!(coverage::dynamic_timeout(1_000, 2_000, 1.5), 3_000);
}

#[test]
fn scaled_baseline_rounds_up() {
    assert_eq!(coverage::dynamic_timeout(100, 333, 1.5), 500);
}

#[test]
fn zero_multiplier_disables_scaling() {
    assert_eq!(coverage::dynamic_timeout(1_000, 60_000, 0.0), 1_000);
}
