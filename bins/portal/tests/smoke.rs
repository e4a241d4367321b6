use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn runs_a_few_iterations_on_the_sim_rig() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    Command::cargo_bin("portal").unwrap()
        .env_remove("RUST_LOG")
        .arg("--config").arg(&config)
        .args(["--no-watchdog", "--ticks", "5", "--log", "info"])
        .assert()
        .success()
        .stdout(predicate::str::contains("stopped after 5 iterations"));
    assert!(config.exists());
}

#[test]
fn rejects_invalid_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(&config, "[jobs]\nupdate_time = 0.0\n").unwrap();
    Command::cargo_bin("portal").unwrap()
        .env_remove("RUST_LOG")
        .arg("--config").arg(&config)
        .args(["--no-watchdog", "--ticks", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("update_time"));
}
