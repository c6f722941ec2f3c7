// Command-line tests: exit codes, emit stages, settings, and determinism.
//
// These tests run the `amc` binary on the files under `tests/data/` and on
// small sources written to the temp directory.

use std::path::{Path, PathBuf};
use std::process::Command;

fn amc_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_amc"))
}

fn data_file(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/data").join(name)
}

/// A temp path unique to this test process.
fn temp_file(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("amc_cli_{}_{}", std::process::id(), name))
}

fn run_amc(args: &[&str]) -> String {
    let output = Command::new(amc_binary())
        .args(args)
        .output()
        .expect("failed to run amc");
    assert!(
        output.status.success(),
        "amc failed with args {:?}\nstderr: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).expect("non-UTF8 output")
}

/// Exit code and stderr of a run expected to fail.
fn run_amc_failing(args: &[&str]) -> (i32, String) {
    let output = Command::new(amc_binary())
        .args(args)
        .output()
        .expect("failed to run amc");
    assert!(!output.status.success(), "amc unexpectedly succeeded: {:?}", args);
    (
        output.status.code().unwrap_or(-1),
        String::from_utf8_lossy(&output.stderr).into_owned(),
    )
}

// ── Determinism ─────────────────────────────────────────────────────────────

/// Compiling the same source twice produces byte-identical routines.
#[test]
fn same_source_identical_code() {
    let src = data_file("filter.am");
    let src = src.to_str().unwrap();
    for target in ["cooperative", "multicore", "virtual-time"] {
        let first = run_amc(&["--emit", "code", "--target", target, src]);
        let second = run_amc(&["--emit", "code", "--target", target, src]);
        assert_eq!(first, second, "{target} output should be byte-identical across runs");
    }
}

#[test]
fn build_info_tracks_source() {
    let src = data_file("filter.am");
    let first = run_amc(&["--emit", "build-info", src.to_str().unwrap()]);
    let second = run_amc(&["--emit", "build-info", src.to_str().unwrap()]);
    assert_eq!(first, second);

    let other = temp_file("other.am");
    std::fs::write(&other, "actor Idle { initial 0; state 0 = wait -> 0; }\n").unwrap();
    let third = run_amc(&["--emit", "build-info", other.to_str().unwrap()]);
    let _ = std::fs::remove_file(&other);

    let a: serde_json::Value = serde_json::from_str(&first).unwrap();
    let b: serde_json::Value = serde_json::from_str(&third).unwrap();
    assert_eq!(a["source_hash"].as_str().unwrap().len(), 64);
    assert_ne!(a["source_hash"], b["source_hash"]);
    assert_eq!(a["compiler_version"], env!("CARGO_PKG_VERSION"));
}

// ── Emit stages ─────────────────────────────────────────────────────────────

/// Lowered JSON compiles to the same controller as the source it came from.
#[test]
fn json_machines_compile_like_source() {
    let src = data_file("filter.am");
    let src = src.to_str().unwrap();
    let json = run_amc(&["--emit", "json", src]);
    let json_path = temp_file("filter.json");
    std::fs::write(&json_path, &json).unwrap();

    let from_source = run_amc(&["--emit", "controller", src]);
    let from_json = run_amc(&["--emit", "controller", json_path.to_str().unwrap()]);
    let _ = std::fs::remove_file(&json_path);

    assert_eq!(from_source, from_json);
    assert!(from_source.starts_with("controller Filter (liveness)\n"));
}

#[test]
fn scope_flag_selects_conservative() {
    let src = data_file("filter.am");
    let listing = run_amc(&["--emit", "controller", "--no-scope-liveness", src.to_str().unwrap()]);
    assert!(listing.starts_with("controller Filter (conservative)\n"));

    let scopes = run_amc(&["--emit", "scopes", "--no-scope-liveness", src.to_str().unwrap()]);
    assert!(scopes.starts_with("actor Filter\nstrategy conservative\n"));
}

#[test]
fn code_lists_hooks_before_routine() {
    let src = data_file("filter.am");
    let code = run_amc(&["--emit", "code", src.to_str().unwrap()]);
    assert!(code.starts_with("// Filter_condition_0: tokens on IN >= 1\n"));
    assert!(code.contains("// Filter_transition_1: drop\n"));
    assert!(code.contains("amc_status Filter_scheduler(Filter_state *self) {"));
}

#[test]
fn dot_and_output_file() {
    let src = data_file("filter.am");
    let out = temp_file("filter.dot");
    let stdout = run_amc(&[
        "--emit",
        "dot",
        "-o",
        out.to_str().unwrap(),
        src.to_str().unwrap(),
    ]);
    let dot = std::fs::read_to_string(&out).unwrap();
    let _ = std::fs::remove_file(&out);
    assert!(stdout.is_empty());
    assert!(dot.starts_with("digraph amc {"));
    assert!(dot.contains("subgraph cluster_Filter"));
}

// ── Settings ────────────────────────────────────────────────────────────────

#[test]
fn settings_file_selects_target_and_flags_override() {
    let src = data_file("filter.am");
    let settings = temp_file("settings.json");
    std::fs::write(&settings, r#"{"target": "virtual-time"}"#).unwrap();

    let vt = run_amc(&["--settings", settings.to_str().unwrap(), src.to_str().unwrap()]);
    let coop = run_amc(&[
        "--settings",
        settings.to_str().unwrap(),
        "--target",
        "cooperative",
        src.to_str().unwrap(),
    ]);
    let _ = std::fs::remove_file(&settings);

    assert!(vt.contains("void Filter::scheduler(wsim::ActorScheduleQuery& query) {"));
    assert!(coop.contains("amc_status Filter_scheduler"));
}

// ── Exit codes ──────────────────────────────────────────────────────────────

#[test]
fn invalid_settings_exit_2() {
    let src = data_file("filter.am");
    let settings = temp_file("bad_settings.json");
    std::fs::write(&settings, r#"{"workers": 0}"#).unwrap();
    let (code, stderr) =
        run_amc_failing(&["--settings", settings.to_str().unwrap(), src.to_str().unwrap()]);
    let _ = std::fs::remove_file(&settings);
    assert_eq!(code, 2);
    assert!(stderr.contains("workers"), "stderr: {stderr}");
}

#[test]
fn missing_source_exit_2() {
    let (code, _) = run_amc_failing(&["/nonexistent/amc/missing.am"]);
    assert_eq!(code, 2);
}

#[test]
fn parse_error_exit_1() {
    let src = temp_file("broken.am");
    std::fs::write(&src, "actor Broken { input IN }\n").unwrap();
    let (code, stderr) = run_amc_failing(&[src.to_str().unwrap()]);
    let _ = std::fs::remove_file(&src);
    assert_eq!(code, 1);
    assert!(stderr.contains("parse error"), "stderr: {stderr}");
}

#[test]
fn malformed_machine_exit_1() {
    let src = temp_file("dangling.am");
    std::fs::write(
        &src,
        "actor Dangling { initial 0; state 0 = wait -> 7; }\n",
    )
    .unwrap();
    let (code, stderr) = run_amc_failing(&["--emit", "controller", src.to_str().unwrap()]);
    let _ = std::fs::remove_file(&src);
    assert_eq!(code, 1);
    assert!(stderr.contains("error"), "stderr: {stderr}");
}
