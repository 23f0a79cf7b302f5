//! Smoke tests -- verify the binary runs and key subcommands work.

use assert_cmd::Command;
use std::path::Path;

fn write_config(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("jobwrap.toml");
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_cli_help() {
    Command::cargo_bin("jobwrap")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicates::str::contains("fault-isolated cron job runner"));
}

#[test]
fn test_cli_version() {
    Command::cargo_bin("jobwrap")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("jobwrap"));
}

#[test]
fn test_history_subcommand_exists() {
    Command::cargo_bin("jobwrap")
        .unwrap()
        .args(["history", "last", "--help"])
        .assert()
        .success();
}

#[test]
fn test_schedule_dry_run_lists_configured_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"
[[jobs]]
name = "hourly-report"
schedule = "0 0 * * * *"
command = "true"
"#,
    );

    Command::cargo_bin("jobwrap")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .args(["schedule", "dry-run", "--hours", "3"])
        .assert()
        .success()
        .stdout(predicates::str::contains("hourly-report"));
}

#[test]
fn test_invalid_config_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"
[[jobs]]
name = "dup"
schedule = "0 0 * * * *"
command = "true"

[[jobs]]
name = "dup"
schedule = "0 0 * * * *"
command = "true"
"#,
    );

    Command::cargo_bin("jobwrap")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .args(["schedule", "list"])
        .assert()
        .failure();
}

#[cfg(unix)]
#[test]
fn test_run_records_success_in_sqlite_history() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("history.db");
    let config = write_config(
        dir.path(),
        &format!(
            r#"
[history]
backend = "sqlite"
path = "{}"

[[jobs]]
name = "ok"
schedule = "0 0 * * * *"
command = "true"
"#,
            db.display()
        ),
    );

    Command::cargo_bin("jobwrap")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .args(["run", "--job", "ok"])
        .assert()
        .success()
        .stdout(predicates::str::contains("\"succeeded\": true"));

    Command::cargo_bin("jobwrap")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .args(["history", "last", "--job", "ok"])
        .assert()
        .success()
        .stdout(predicates::str::contains("ok: last completed"));
}

#[cfg(unix)]
#[test]
fn test_run_failing_job_exits_non_zero() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(
        dir.path(),
        r#"
[[jobs]]
name = "broken"
schedule = "0 0 * * * *"
command = "false"
"#,
    );

    Command::cargo_bin("jobwrap")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .args(["run", "--job", "broken"])
        .assert()
        .failure()
        .stdout(predicates::str::contains("\"succeeded\": false"));
}

#[test]
fn test_unreadable_env_config_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.toml");

    Command::cargo_bin("jobwrap")
        .unwrap()
        .env("JOBWRAP_CONFIG", &missing)
        .env_remove("RUST_LOG")
        .args(["schedule", "list"])
        .assert()
        .success()
        .stderr(predicates::str::contains(
            "JOBWRAP_CONFIG set but file could not be loaded",
        ));
}
