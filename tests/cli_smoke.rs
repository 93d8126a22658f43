//! Smoke tests against the built `gufi` binary.

mod common;

use std::fs;

use common::{IndexTree, run_cli_case};

#[test]
fn index_then_rollup_emit_json() {
    let tmp = tempfile::tempdir().unwrap();
    let src = tmp.path().join("tree");
    fs::create_dir_all(src.join("sub/deeper")).unwrap();
    fs::write(src.join("top.txt"), b"hello").unwrap();
    fs::write(src.join("sub/deeper/leaf.txt"), b"leaf").unwrap();
    let dest = tmp.path().join("index");
    let (src_arg, dest_arg) = (src.to_string_lossy(), dest.to_string_lossy());

    let built = run_cli_case("index_json", &["--json", "index", "-n", "2", &src_arg, &dest_arg]);
    assert!(built.status.success(), "log: {}", built.log_path.display());
    let report: serde_json::Value = serde_json::from_str(built.stdout.trim()).unwrap();
    assert_eq!(report["report"]["directories_indexed"], 3);
    let index_root = report["report"]["index_root"].as_str().unwrap().to_string();

    let rolled = run_cli_case("rollup_json", &["--json", "rollup", "-n", "2", &index_root]);
    assert!(rolled.status.success(), "log: {}", rolled.log_path.display());
    let summary: serde_json::Value = serde_json::from_str(rolled.stdout.trim()).unwrap();
    assert_eq!(summary["summary"]["total_entries"], 2);
    assert_eq!(summary["summary"]["successful"]["total"], 3);
    assert!(!std::path::Path::new(&index_root).join("sub").exists());
}

#[test]
fn printed_scores_keep_json_stdout_clean() {
    let tree = IndexTree::new();
    tree.dir("", 0o755, &["top"]);
    tree.dir("b", 0o750, &["x"]);
    let root = tree.root.to_string_lossy().into_owned();

    let out = run_cli_case(
        "rollup_json_print_scores",
        &["--json", "rollup", "--print-scores", "-n", "1", &root],
    );
    assert!(out.status.success(), "log: {}", out.log_path.display());
    let lines: Vec<&str> = out.stdout.lines().collect();
    assert_eq!(lines.len(), 1, "stdout: {}", out.stdout);
    for line in &lines {
        assert!(
            serde_json::from_str::<serde_json::Value>(line).is_ok(),
            "non-JSON stdout line: {line:?}"
        );
    }
    let child_line = format!("{} 1", tree.path("b").display());
    let root_line = format!("{root} 2");
    assert!(out.stderr.lines().any(|l| l == child_line), "stderr: {}", out.stderr);
    assert!(out.stderr.lines().any(|l| l == root_line), "stderr: {}", out.stderr);
}

#[test]
fn missing_root_is_skipped_not_fatal() {
    let rolled = run_cli_case("rollup_missing_root", &["--json", "rollup", "/no/such/gufi/index"]);
    assert!(rolled.status.success(), "log: {}", rolled.log_path.display());
    let summary: serde_json::Value = serde_json::from_str(rolled.stdout.trim()).unwrap();
    assert_eq!(summary["walk"]["roots_skipped"], 1);
}

#[test]
fn zero_threads_is_a_usage_error() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().to_string_lossy();
    let rolled = run_cli_case("rollup_zero_threads", &["rollup", "-n", "0", &root]);
    assert_eq!(rolled.status.code(), Some(1), "log: {}", rolled.log_path.display());
}

#[test]
fn completions_are_generated() {
    let out = run_cli_case("completions_bash", &["completions", "bash"]);
    assert!(out.status.success());
    assert!(out.stdout.contains("gufi"));
}
