//! CLI integration tests for relmig.
//!
//! These tests verify argument parsing, help output, exit codes, and a
//! plan / retarget / run / validate cycle over a dump source.

use assert_cmd::Command;
use predicates::prelude::*;
use relmig::core::{Column, ObjectGraph, Schema, Table};
use relmig::DumpFile;
use serde_json::json;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Get a command for the relmig binary.
fn cmd() -> Command {
    Command::cargo_bin("relmig").unwrap()
}

/// Write a two-table dump and a config pointing at it; returns the config path.
fn workspace(dir: &Path) -> PathBuf {
    let graph = ObjectGraph::new("HRDB", "dump").with_schema(
        Schema::new("HR")
            .with_table(
                Table::new("HR", "DEPT")
                    .with_column(Column::new("ID", "NUMBER").with_precision(10, 0))
                    .with_column(Column::new("NAME", "VARCHAR2").with_length(50))
                    .with_primary_key("PK_DEPT", &["ID"]),
            )
            .with_table(
                Table::new("HR", "EMP")
                    .with_column(Column::new("ID", "NUMBER").with_precision(10, 0))
                    .with_column(Column::new("ENAME", "VARCHAR2").with_length(50)),
            ),
    );
    let dump = DumpFile::new(graph)
        .with_rows("HR", "DEPT", vec![json!([1, "Sales"]), json!([2, "Ops"])])
        .with_rows(
            "HR",
            "EMP",
            vec![json!([1, "Ann"]), json!([2, "Bob"]), json!([3, "Cy"])],
        );
    let dump_path = dir.join("hr.json");
    dump.save(&dump_path).unwrap();

    let config_path = dir.join("relmig.yaml");
    std::fs::write(
        &config_path,
        format!(
            "source:\n  kind: dump\n  path: '{}'\ntarget:\n  output_dir: '{}'\n  prefix: hr\n",
            dump_path.display(),
            dir.join("out").display()
        ),
    )
    .unwrap();
    config_path
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("retarget"))
        .stdout(predicate::str::contains("files"))
        .stdout(predicate::str::contains("validate"));
}

#[test]
fn test_retarget_subcommand_help() {
    cmd()
        .args(["retarget", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--column"))
        .stdout(predicate::str::contains("--schema"))
        .stdout(predicate::str::contains("OWNER.TABLE"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("relmig"));
}

// =============================================================================
// Global Flags Tests
// =============================================================================

#[test]
fn test_log_format_flag_exists() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("[default: text]"));
}

#[test]
fn test_verbosity_flag_exists() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--verbosity"))
        .stdout(predicate::str::contains("[default: info]"));
}

#[test]
fn test_config_default_path() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--script-file"))
        .stdout(predicate::str::contains("[default: relmig.yaml]"));
}

// =============================================================================
// Exit Code Tests
// =============================================================================

#[test]
fn test_missing_config_exits_with_code_1() {
    // Missing file is an IO error, not a config error
    cmd()
        .args(["--config", "nonexistent_config_file.yaml", "plan"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("IO error"));
}

#[test]
fn test_invalid_yaml_exits_with_code_2() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "invalid: yaml: content: [").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "plan"])
        .assert()
        .code(2);
}

#[test]
fn test_dump_without_path_exits_with_code_2() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "source:\n  kind: dump\ntarget:\n  output_dir: /tmp/out").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "plan"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("source.path"));
}

#[test]
fn test_unknown_log_format_exits_with_code_2() {
    cmd()
        .args(["--log-format", "xml", "plan"])
        .assert()
        .code(2);
}

#[test]
fn test_retarget_unknown_table_exits_with_code_3() {
    let dir = tempfile::tempdir().unwrap();
    let config = workspace(dir.path());

    cmd()
        .args(["--config", config.to_str().unwrap(), "retarget", "HR.MISSING", "x"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("HR.MISSING"));
}

#[test]
fn test_no_subcommand_shows_help() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage:"));
}

// =============================================================================
// End-to-End Tests
// =============================================================================

#[test]
fn test_plan_writes_script_and_prints_summary() {
    let dir = tempfile::tempdir().unwrap();
    let config = workspace(dir.path());

    cmd()
        .args(["--config", config.to_str().unwrap(), "plan", "--tasks"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Tables: 2 source -> 2 target"))
        .stdout(predicate::str::contains("copy HR.EMP into public.emp"));

    assert!(dir.path().join("out").join("hr_script.json").exists());
}

#[test]
fn test_retarget_run_and_validate() {
    let dir = tempfile::tempdir().unwrap();
    let config = workspace(dir.path());
    let config = config.to_str().unwrap();

    cmd().args(["--config", config, "plan"]).assert().success();
    cmd()
        .args(["--config", config, "retarget", "HR.EMP", "employees"])
        .assert()
        .success()
        .stdout(predicate::str::contains("HR.EMP -> public.employees"));
    cmd()
        .args(["--config", config, "retarget", "HR.EMP", "--column", "ENAME", "full_name"])
        .assert()
        .success();

    let output = cmd()
        .args(["--config", config, "--output-json", "run"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["status"], "completed");
    assert_eq!(result["rows_transferred"], 5);

    let data = std::fs::read_to_string(dir.path().join("out").join("hr_public_employees.csv")).unwrap();
    assert!(data.starts_with("id,full_name\n"));

    cmd()
        .args(["--config", config, "files"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hr_public_table.sql"));
    cmd()
        .args(["--config", config, "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("public.employees: 3 / 3 (match)"));
}

#[test]
fn test_validate_detects_truncated_data_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = workspace(dir.path());
    let config = config.to_str().unwrap();

    cmd().args(["--config", config, "run"]).assert().success();
    std::fs::write(dir.path().join("out").join("hr_public_dept.csv"), "id,name\n1,Sales\n").unwrap();

    cmd()
        .args(["--config", config, "validate"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("(MISMATCH)"));
}

#[test]
fn test_progress_streams_events_to_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let config = workspace(dir.path());

    cmd()
        .args(["--config", config.to_str().unwrap(), "--progress", "run"])
        .assert()
        .success()
        .stderr(predicate::str::contains("\"event\":\"table_merged\""))
        .stderr(predicate::str::contains("\"event\":\"run_completed\""));
}
