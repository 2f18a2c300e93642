use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn logwarden() -> Command {
    let mut cmd = Command::cargo_bin("logwarden").unwrap();
    // Hermetic: ambient PORT/TOGGLE variables must not leak into assertions
    cmd.env_clear();
    cmd
}

#[test]
fn check_reports_configuration() {
    let dir = TempDir::new().unwrap();
    logwarden()
        .args(["--data-dir", dir.path().to_str().unwrap(), "check"])
        .assert()
        .success()
        .stdout(predicate::str::contains("configuration ok"))
        .stdout(predicate::str::contains("udp/514"));
}

#[test]
fn check_respects_protocol_toggles() {
    let dir = TempDir::new().unwrap();
    logwarden()
        .args(["--data-dir", dir.path().to_str().unwrap(), "check"])
        .env("SYSLOG_ENABLED", "false")
        .env("GELF_UDP_PORT", "22201")
        .assert()
        .success()
        .stdout(predicate::str::contains("udp/22201"));
}

#[test]
fn init_scaffolds_data_dir() {
    let dir = TempDir::new().unwrap();
    logwarden()
        .args(["--data-dir", dir.path().to_str().unwrap(), "init"])
        .assert()
        .success();

    assert!(dir.path().join("config.toml").exists());
    assert!(dir.path().join("databases").is_dir());
    assert!(dir.path().join("logs").is_dir());
    assert!(dir.path().join("backups").is_dir());
}

#[test]
fn production_without_secret_fails_with_code_one() {
    let dir = TempDir::new().unwrap();
    logwarden()
        .args(["--data-dir", dir.path().to_str().unwrap(), "check"])
        .env("LOGWARDEN_ENV", "production")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("JWT_SECRET"));
}

#[test]
fn user_add_and_duplicate() {
    let dir = TempDir::new().unwrap();
    let data = dir.path().to_str().unwrap();

    logwarden()
        .args([
            "--data-dir", data, "user", "add", "ops",
            "--role", "admin", "--password", "hunter2",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("created"));

    logwarden()
        .args([
            "--data-dir", data, "user", "add", "ops",
            "--role", "admin", "--password", "hunter2",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn user_add_rejects_unknown_role() {
    let dir = TempDir::new().unwrap();
    logwarden()
        .args([
            "--data-dir",
            dir.path().to_str().unwrap(),
            "user",
            "add",
            "x",
            "--role",
            "root",
            "--password",
            "pw",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("role"));
}
