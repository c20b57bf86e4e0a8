use assert_fs::prelude::*;
use assert_fs::TempDir;
use predicates::prelude::*;
use std::process::{Command, Output};
use worldsync::state::{EventType, StateDb, SyncEventBuilder};

/// These tests run the actual binary with an isolated config

fn worldsync(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_worldsync"))
        .args(args)
        .env_remove("GITHUB_TOKEN")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute worldsync")
}

/// Config with every path inside `temp`
fn write_config(temp: &TempDir) -> String {
    let config = temp.child("config.yml");
    config
        .write_str(&format!(
            r#"
saves_directory: "{saves}"
bindings_file: "{bindings}"
state:
  enabled: true
  db_path: "{db}"
"#,
            saves = temp.child("saves").path().display(),
            bindings = temp.child("bindings.json").path().display(),
            db = temp.child("state.db").path().display(),
        ))
        .unwrap();
    config.path().display().to_string()
}

#[test]
fn test_cli_help() {
    let output = worldsync(&["--help"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in [
        "init", "reconcile", "refresh", "enable", "disable", "push", "delete", "list", "history",
        "doctor",
    ] {
        assert!(stdout.contains(command), "help is missing {}", command);
    }
}

#[test]
fn test_cli_version() {
    let output = worldsync(&["--version"]);

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("worldsync"));
}

#[test]
fn test_init_writes_config_and_token() {
    let temp = TempDir::new().unwrap();
    let config = temp.child("fresh").child("config.yml");
    let saves = temp.child("saves");

    let output = worldsync(&[
        "--config",
        config.path().to_str().unwrap(),
        "init",
        "--saves-dir",
        saves.path().to_str().unwrap(),
        "--token",
        "ghp_stored",
    ]);

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    config.assert(predicate::path::is_file());
    saves.assert(predicate::path::is_dir());
    temp.child("fresh")
        .child("bindings.json")
        .assert(predicate::str::contains("\"accessToken\": \"ghp_stored\""));
}

#[test]
fn test_list_shows_bindings_and_local_worlds() {
    let temp = TempDir::new().unwrap();
    let config = write_config(&temp);
    temp.child("saves").child("Local").child("level.dat").touch().unwrap();
    temp.child("bindings.json")
        .write_str(
            r#"{
  "accessToken": "",
  "backedUpWorlds": {
    "Island": { "repoFullName": "steve/minecraft-world-Island", "enabled": false }
  },
  "noBackupWorlds": ["Old"]
}"#,
        )
        .unwrap();

    let output = worldsync(&["--config", &config, "list"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Island [remote only] → steve/minecraft-world-Island (disabled)"));
    assert!(stdout.contains("Local [local] not backed up"));
    assert!(stdout.contains("Old [remote only] excluded"));
}

#[test]
fn test_history_on_empty_log() {
    let temp = TempDir::new().unwrap();
    let config = write_config(&temp);

    let output = worldsync(&["--config", &config, "history"]);

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("No sync events recorded"));
}

/// Record events straight into the log the config points at
fn seed_events(temp: &TempDir) {
    let db = StateDb::open_at(temp.child("state.db").path().to_path_buf()).unwrap();
    db.record_event(SyncEventBuilder::new(EventType::Pushed, "Backed up Farm").world("Farm"))
        .unwrap();
    db.record_event(
        SyncEventBuilder::new(EventType::SyncError, "Sync FAILED for Farm")
            .world("Farm")
            .details("git push failed: remote rejected"),
    )
    .unwrap();
}

#[test]
fn test_history_unread_then_ack() {
    let temp = TempDir::new().unwrap();
    let config = write_config(&temp);
    seed_events(&temp);

    let output = worldsync(&["--config", &config, "history", "--unread", "--ack"]);

    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Farm: Sync FAILED for Farm"));
    assert!(stdout.contains("git push failed: remote rejected"));
    assert!(stdout.contains("Marked 2 events as read"));

    let output = worldsync(&["--config", &config, "history", "--unread"]);
    assert!(String::from_utf8_lossy(&output.stdout).contains("No sync events recorded"));

    // Acknowledged events remain in the full history
    let output = worldsync(&["--config", &config, "history"]);
    assert!(String::from_utf8_lossy(&output.stdout).contains("Backed up Farm"));
}

#[test]
fn test_history_reports_unread_problems() {
    let temp = TempDir::new().unwrap();
    let config = write_config(&temp);
    seed_events(&temp);

    let output = worldsync(&["--config", &config, "history", "--world", "Farm"]);

    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("1 errors and 0 warnings unread"));
}

#[test]
fn test_list_shows_last_status() {
    let temp = TempDir::new().unwrap();
    let config = write_config(&temp);
    temp.child("saves").child("Farm").child("level.dat").touch().unwrap();
    seed_events(&temp);

    let output = worldsync(&["--config", &config, "list"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Farm [local] not backed up"));
    assert!(stdout.contains("last: error at"));
    assert!(stdout.contains("(Sync FAILED for Farm)"));
}

#[test]
fn test_doctor_reports_missing_token() {
    let temp = TempDir::new().unwrap();
    let config = write_config(&temp);

    let output = worldsync(&["--config", &config, "doctor"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("diagnostics"));
    assert!(stdout.contains("No GitHub token configured"));
    assert!(stdout.contains("Some checks failed"));
}

#[test]
fn test_invalid_command() {
    let output = worldsync(&["nonexistent-command"]);

    assert!(!output.status.success());
    assert!(!output.stderr.is_empty());
}

#[test]
fn test_error_handling_invalid_config() {
    let temp = TempDir::new().unwrap();
    let config = temp.child("invalid-config.yml");
    config.write_str("invalid: yaml: content: [").unwrap();

    let output = worldsync(&["--config", config.path().to_str().unwrap(), "list"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("parse") || stderr.contains("config"));
}
