//! CLI integration tests for shop-sync.
//!
//! These run the binary without a database: argument parsing, config
//! validation, exit codes and the offline `plan` command.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

fn cmd() -> Command {
    Command::cargo_bin("shop-sync").unwrap()
}

fn config_file(db_type: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
target:
  type: {}
  host: localhost
  database: shop
  user: loader
  password: secret
"#,
        db_type
    )
    .unwrap();
    file.flush().unwrap();
    file
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
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("calendar"))
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("health-check"));
}

#[test]
fn test_run_subcommand_help() {
    cmd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--batches"))
        .stdout(predicate::str::contains("--skip-calendar"));
}

#[test]
fn test_calendar_subcommand_help() {
    cmd()
        .args(["calendar", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--start"))
        .stdout(predicate::str::contains("--horizon-days"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("shop-sync"));
}

#[test]
fn test_run_requires_batches() {
    cmd()
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--batches"));
}

// =============================================================================
// Configuration Error Tests
// =============================================================================

#[test]
fn test_missing_config_file() {
    cmd()
        .args(["--config", "/nonexistent/config.yaml", "plan"])
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("IO error"));
}

#[test]
fn test_invalid_yaml() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "target: [unclosed").unwrap();
    file.flush().unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "plan"])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn test_unknown_dialect_rejected_before_connecting() {
    let file = config_file("oracle");
    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Unsupported dialect 'oracle'"));
}

// =============================================================================
// Plan Tests (no database needed)
// =============================================================================

#[test]
fn test_plan_mssql_merge() {
    let file = config_file("mssql");
    cmd()
        .args(["--config", file.path().to_str().unwrap(), "plan", "--table", "orders"])
        .assert()
        .success()
        .stdout(predicate::str::contains("MERGE INTO [dbo].[orders] WITH (HOLDLOCK) AS target"))
        .stdout(predicate::str::contains("OUTPUT $action;"));
}

#[test]
fn test_plan_postgres_on_conflict() {
    let file = config_file("postgresql");
    cmd()
        .args(["--config", file.path().to_str().unwrap(), "plan", "--table", "LineItems"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ON CONFLICT (\"id\") DO NOTHING"));
}

#[test]
fn test_plan_mysql_json() {
    let file = config_file("mariadb");
    cmd()
        .args([
            "--config",
            file.path().to_str().unwrap(),
            "--output-json",
            "plan",
            "--table",
            "customers",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"dialect\": \"mysql\""))
        .stdout(predicate::str::contains("ON DUPLICATE KEY UPDATE"))
        .stdout(predicate::str::contains("\"match_probe\""));
}

#[test]
fn test_plan_unknown_table() {
    let file = config_file("postgres");
    cmd()
        .args(["--config", file.path().to_str().unwrap(), "plan", "--table", "widgets"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown table 'widgets'"));
}
