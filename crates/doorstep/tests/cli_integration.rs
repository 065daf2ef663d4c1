//! CLI integration tests for the doorstep command-line interface.
//!
//! Every test runs in its own temporary directory with its own user config
//! directory, so no config on the host is picked up.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a command for the doorstep binary, isolated in `dir`.
fn doorstep(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("doorstep").unwrap();
    cmd.current_dir(dir.path())
        .env("DOORSTEP_CONFIG_DIR", dir.path().join("config"))
        .env_remove("DOORSTEP_ENGINE")
        .env_remove("DOORSTEP_CONFIG");
    cmd
}

// ─────────────────────────────────────────────────────────────────────────────
// Help and Version Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_help_lists_subcommands() {
    let dir = TempDir::new().unwrap();
    doorstep(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("process"))
        .stdout(predicate::str::contains("processors"))
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_version_displays() {
    let dir = TempDir::new().unwrap();
    doorstep(&dir)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("doorstep"));
}

#[test]
fn test_unknown_engine_rejected() {
    let dir = TempDir::new().unwrap();
    doorstep(&dir)
        .args(["--engine", "mainframe", "processors"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown engine"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_processors_lists_builtins() {
    let dir = TempDir::new().unwrap();
    doorstep(&dir)
        .arg("processors")
        .assert()
        .success()
        .stdout(predicate::str::contains("columns"));
}

#[test]
fn test_config_which_reports_missing_files() {
    let dir = TempDir::new().unwrap();
    doorstep(&dir)
        .args(["config", "which"])
        .assert()
        .success()
        .stdout(predicate::str::contains("doorstep.toml (not found)"));
}

#[test]
fn test_config_init_local_then_show() {
    let dir = TempDir::new().unwrap();
    doorstep(&dir)
        .args(["config", "init", "--local"])
        .assert()
        .success();
    assert!(dir.path().join("doorstep.toml").exists());

    doorstep(&dir)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("engine = container"))
        .stdout(predicate::str::contains("max_length_chars"));

    doorstep(&dir)
        .args(["config", "init", "--local"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_process_with_local_engine() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("people.csv"), "name,age\nann,3\nbob\n").unwrap();
    std::fs::write(dir.path().join("columns.py"), "").unwrap();

    doorstep(&dir)
        .args(["--engine", "local", "process", "people.csv", "columns.py"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"wrong-column-count\""))
        .stdout(predicate::str::contains("\"filename\":\"people.csv\""))
        .stdout(predicate::str::contains("\"valid\":false"));
}

#[test]
fn test_process_engine_from_project_config() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("doorstep.toml"), "[engine]\nkind = \"local\"\n").unwrap();
    std::fs::write(dir.path().join("people.csv"), "name,age\nann,3\n").unwrap();
    std::fs::write(dir.path().join("columns.py"), "").unwrap();

    doorstep(&dir)
        .args(["process", "people.csv", "columns.py"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"valid\":true"));
}

#[test]
fn test_process_unregistered_module_fails() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("people.csv"), "a\n").unwrap();
    std::fs::write(dir.path().join("other.py"), "").unwrap();

    doorstep(&dir)
        .args(["--engine", "local", "process", "people.csv", "other.py"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no processor registered"));
}

#[test]
fn test_serve_answers_one_reply_per_request() {
    let dir = TempDir::new().unwrap();
    let output = doorstep(&dir)
        .args(["--engine", "local", "serve"])
        .write_stdin(concat!(
            "{\"method\":\"engage\"}\n",
            "\n",
            "not json\n",
            "{\"method\":\"report.get\",\"server\":\"ltlwc-other\",\"session\":\"s\"}\n",
        ))
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let replies: Vec<serde_json::Value> = String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(replies.len(), 3);

    assert_eq!(replies[0]["status"], "ok");
    let server_id = replies[0]["body"]["server_id"].as_str().unwrap();
    assert!(server_id.starts_with("ltlwc-"));
    assert!(replies[0]["body"]["session_id"].is_string());

    assert_eq!(replies[1]["status"], "error");
    assert_eq!(replies[1]["body"]["kind"], "invalid-request");

    assert_eq!(replies[2]["status"], "error");
    assert_eq!(replies[2]["body"]["kind"], "wrong-server");
}
