use std::fs;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::tempdir;

#[test]
fn test_config_path_command() {
    let dir = tempdir().unwrap();

    cargo_bin_cmd!("vigil")
        .env("VIGIL_HOME", dir.path())
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_config_init_creates_file() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("config.toml");

    assert!(!config_path.exists());

    cargo_bin_cmd!("vigil")
        .env("VIGIL_HOME", dir.path())
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Created config at"));

    assert!(config_path.exists());

    let contents = fs::read_to_string(&config_path).unwrap();
    assert!(contents.contains("[feed]"));
    assert!(contents.contains("# min_glow_ms = 5000"));
}

#[test]
fn test_config_init_fails_if_exists() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("config.toml");

    fs::write(&config_path, "# existing config").unwrap();

    cargo_bin_cmd!("vigil")
        .env("VIGIL_HOME", dir.path())
        .args(["config", "init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_config_show_redacts_token() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("config.toml"),
        "[feed]\nurl = \"wss://feed.example.com/ws\"\ntoken = \"super-secret\"\n",
    )
    .unwrap();

    cargo_bin_cmd!("vigil")
        .env("VIGIL_HOME", dir.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("<redacted>"))
        .stdout(predicate::str::contains("min_glow_ms = 5000"))
        .stdout(predicate::str::contains("super-secret").not());
}

#[test]
fn test_tail_requires_feed_url() {
    let dir = tempdir().unwrap();

    cargo_bin_cmd!("vigil")
        .env("VIGIL_HOME", dir.path())
        .env_remove("VIGIL_FEED_TOKEN")
        .arg("tail")
        .assert()
        .failure()
        .stderr(predicate::str::contains("feed.url"));
}

#[test]
fn test_tail_rejects_http_url() {
    let dir = tempdir().unwrap();

    cargo_bin_cmd!("vigil")
        .env("VIGIL_HOME", dir.path())
        .env_remove("VIGIL_FEED_TOKEN")
        .args(["tail", "--url", "https://feed.example.com", "--token", "t"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("ws://"));
}
