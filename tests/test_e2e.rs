use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn mutarun_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_mutarun"))
}

const COVERAGE: &str = r#"for t in "$@"; do grep -o 'src/[a-z_]*\.ts' "$t" | while read -r s; do printf '{"url":"%s"}' "$s" > "{coverage_dir}/$(basename "$s").json"; done; done; exit 0"#;
const KILLING_TEST: &str = r#"grep -q "return a + b;" src/sum.ts || { echo "Test failed" >&2; exit 1; }"#;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

/// A one-function project driven by a `sh` toolchain. `test_script` decides
/// whether mutants are detected.
fn create_project(dir: &Path, test_script: &str) {
    write(
        dir,
        "src/sum.ts",
        "export function sum(a: number, b: number): number {\n  return a + b;\n}\n",
    );
    write(
        dir,
        "tests/sum.test.ts",
        "import { sum } from \"../src/sum.ts\";\nDeno.test(\"sum\", () => { if (sum(1, 2) !== 3) throw new Error(); });\n",
    );
    let config = format!(
        r#"workers = 2

[memory]
enabled = false

[toolchain]
program = "sh"
type_check_args = ["-c", "true", "mutarun"]
test_args = ["-c", '''{test_script}''', "mutarun"]
coverage_args = ["-c", '''{COVERAGE}''', "mutarun"]
failure_signal = {{ marker = "Test failed" }}
"#
    );
    write(dir, "mutarun.toml", &config);
}

fn run_in(dir: &Path, args: &[&str]) -> Output {
    Command::new(mutarun_bin())
        .args(args)
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run mutarun")
}

fn stdout_json(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(stdout.trim()).unwrap_or_else(|e| {
        panic!(
            "Invalid JSON: {e}\nstdout: {stdout}\nstderr: {}",
            String::from_utf8_lossy(&output.stderr)
        )
    })
}

#[test]
fn e2e_full_run_json_output() {
    let dir = tempfile::TempDir::new().unwrap();
    create_project(dir.path(), KILLING_TEST);

    let output = run_in(dir.path(), &["run", "--json"]);

    let result = stdout_json(&output);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(result["total"], 3);
    assert_eq!(result["killed"], 3);
    assert_eq!(result["survived"], 0);
    assert_eq!(result["score"].as_f64(), Some(100.0));
    assert!(result["mutations"].is_array());
}

#[test]
fn e2e_survivors_exit_one() {
    let dir = tempfile::TempDir::new().unwrap();
    create_project(dir.path(), "true");

    let output = run_in(dir.path(), &["run", "--json"]);

    let result = stdout_json(&output);
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(result["survived"], 3);
}

#[test]
fn e2e_state_file_written() {
    let dir = tempfile::TempDir::new().unwrap();
    create_project(dir.path(), KILLING_TEST);

    run_in(dir.path(), &["run", "-q"]);

    let state = dir.path().join(".mutarun-state.json");
    assert!(state.exists(), "state file should be written");
    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(state).unwrap()).unwrap();
    assert_eq!(json["total"], 3);
}

#[test]
fn e2e_status_and_show_after_run() {
    let dir = tempfile::TempDir::new().unwrap();
    create_project(dir.path(), "true");
    run_in(dir.path(), &["run", "-q"]);

    let status = run_in(dir.path(), &["status", "--json"]);
    assert_eq!(status.status.code(), Some(0));
    assert_eq!(stdout_json(&status)["survived"], 3);

    let show = run_in(dir.path(), &["show", "@m1", "--json"]);
    assert_eq!(show.status.code(), Some(0));
    let mutant = stdout_json(&show);
    assert_eq!(mutant["refId"], "m1");
    assert_eq!(mutant["file"], "src/sum.ts");
    assert_eq!(mutant["replacement"], "-");
    assert!(mutant["diff"].as_str().unwrap().contains("+   return a - b;"));
}

#[test]
fn e2e_show_unknown_ref() {
    let dir = tempfile::TempDir::new().unwrap();
    create_project(dir.path(), "true");
    run_in(dir.path(), &["run", "-q"]);

    let output = run_in(dir.path(), &["show", "@m99"]);

    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("not found"));
}

#[test]
fn e2e_status_without_previous_run() {
    let dir = tempfile::TempDir::new().unwrap();

    let output = run_in(dir.path(), &["status"]);

    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("No previous run"));
}

#[test]
fn e2e_invalid_workers_is_usage_error() {
    let dir = tempfile::TempDir::new().unwrap();
    create_project(dir.path(), KILLING_TEST);

    let output = run_in(dir.path(), &["run", "-w", "0"]);

    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("workers"));
}

#[test]
fn e2e_empty_project_is_usage_error() {
    let dir = tempfile::TempDir::new().unwrap();

    let output = run_in(dir.path(), &["run"]);

    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn e2e_quiet_mode_no_output() {
    let dir = tempfile::TempDir::new().unwrap();
    create_project(dir.path(), KILLING_TEST);

    let output = run_in(dir.path(), &["run", "-q"]);

    assert_eq!(output.status.code(), Some(0));
    assert!(output.stdout.is_empty());
}

#[test]
fn e2e_dir_flag_and_report_file() {
    let project = tempfile::TempDir::new().unwrap();
    let elsewhere = tempfile::TempDir::new().unwrap();
    create_project(project.path(), KILLING_TEST);
    let report = elsewhere.path().join("report.json");

    let output = run_in(
        elsewhere.path(),
        &["run", "-q", "-C", project.path().to_str().unwrap(), "--report", report.to_str().unwrap()],
    );

    assert_eq!(output.status.code(), Some(0));
    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(json["killed"], 3);
    assert!(project.path().join(".mutarun-state.json").exists());
}

#[test]
fn e2e_by_file_json() {
    let dir = tempfile::TempDir::new().unwrap();
    create_project(dir.path(), "true");

    let output = run_in(dir.path(), &["run", "--json", "--by-file"]);

    let files = stdout_json(&output);
    assert_eq!(files[0]["file"], "src/sum.ts");
    assert_eq!(files[0]["total"], 3);
    assert_eq!(files[0]["byStatus"]["survived"].as_array().unwrap().len(), 3);
}

#[test]
fn e2e_original_files_untouched_and_scratch_removed() {
    let dir = tempfile::TempDir::new().unwrap();
    create_project(dir.path(), KILLING_TEST);
    let before = std::fs::read_to_string(dir.path().join("src/sum.ts")).unwrap();

    run_in(dir.path(), &["run", "-q"]);

    let after = std::fs::read_to_string(dir.path().join("src/sum.ts")).unwrap();
    assert_eq!(before, after);
    assert!(!dir.path().join(".mutarun").exists());
}

#[test]
fn e2e_global_timeout_without_survivors_exits_four() {
    let dir = tempfile::TempDir::new().unwrap();
    create_project(dir.path(), "sleep 5");

    let output = run_in(dir.path(), &["run", "--json", "--global-timeout", "1000"]);

    let result = stdout_json(&output);
    assert_eq!(output.status.code(), Some(4));
    assert_eq!(result["globalTimeoutHit"], true);
    assert_eq!(result["survived"], 0);
    assert!(!dir.path().join(".mutarun").exists());
}
