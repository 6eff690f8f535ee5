use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

fn bin() -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::cargo_bin("questkeep").expect("binary");
    cmd.env_remove("QUESTKEEP_CONFIG")
        .env_remove("QUESTKEEP_DEBOUNCE_MS")
        .env_remove("QUESTKEEP_RETRY_ATTEMPTS")
        .env_remove("QUESTKEEP_RETRY_BACKOFF_MS")
        .env_remove("QUESTKEEP_MAX_QUESTS");
    cmd
}

#[test]
fn check_prints_effective_defaults() {
    bin()
        .args(["config", "check"])
        .assert()
        .success()
        .stdout(predicate::str::contains("debounce_ms = 2000"))
        .stdout(predicate::str::contains("key_prefix = \"questkeep/\""));
}

#[test]
fn environment_overrides_the_file() {
    let tmp = tempdir().expect("tmpdir");
    let path = tmp.path().join("questkeep.toml");
    fs::write(&path, "[writeback]\ndebounce_ms = 750\nretry_attempts = 5\n").expect("write");

    bin()
        .arg("--config")
        .arg(&path)
        .args(["config", "check"])
        .env("QUESTKEEP_RETRY_ATTEMPTS", "2")
        .assert()
        .success()
        .stdout(predicate::str::contains("debounce_ms = 750"))
        .stdout(predicate::str::contains("retry_attempts = 2"));
}

#[test]
fn check_rejects_invalid_files() {
    let tmp = tempdir().expect("tmpdir");
    let path = tmp.path().join("questkeep.toml");
    fs::write(&path, "[claim]\ngrowth = 0.5\n").expect("write");

    bin()
        .arg("--config")
        .arg(&path)
        .args(["config", "check"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("claim.growth"));
}

#[test]
fn schema_can_be_written_to_a_file() {
    let tmp = tempdir().expect("tmpdir");
    let out = tmp.path().join("schema.json");
    bin()
        .args(["config", "schema", "--out"])
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote"));
    let text = fs::read_to_string(&out).expect("read schema");
    assert!(text.contains("\"writeback\""));
}
