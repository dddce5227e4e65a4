//! CLI integration tests for all subcommands.
//!
//! Uses `assert_cmd` to spawn the `statekeeper` binary and verify
//! exit codes, stdout content, and stderr content. Fixture files are
//! written to a temporary directory per test.

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

fn statekeeper() -> Command {
    cargo_bin_cmd!("statekeeper")
}

fn write_fixture(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).expect("write fixture");
    path
}

const AGENDA_TABLES: &str = r#"{
    "max_history_limit": 20,
    "tables": {
        "agenda": {
            "initial": ["pendente"],
            "transitions": { "pendente": ["concluido"], "concluido": [] }
        }
    }
}"#;

// ──────────────────────────────────────────────
// 1. Help and version
// ──────────────────────────────────────────────

#[test]
fn help_exits_0_with_description() {
    statekeeper()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Lifecycle transition table tooling"));
}

#[test]
fn version_exits_0() {
    statekeeper()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("statekeeper"));
}

// ──────────────────────────────────────────────
// 2. Check subcommand
// ──────────────────────────────────────────────

#[test]
fn check_valid_file_exits_0() {
    let dir = TempDir::new().unwrap();
    let path = write_fixture(&dir, "tables.json", AGENDA_TABLES);
    statekeeper()
        .arg("check")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("agenda: 2 states, 1 transitions"))
        .stdout(predicate::str::contains("No table (transitions rejected)"));
}

#[test]
fn check_json_output_reports_analysis() {
    let dir = TempDir::new().unwrap();
    let path = write_fixture(&dir, "tables.json", AGENDA_TABLES);
    let output = statekeeper()
        .args(["--output", "json", "check"])
        .arg(&path)
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["valid"], true);
    assert_eq!(json["max_history_limit"], 20);
    assert_eq!(
        json["report"]["tables"]["agenda"]["terminal_states"],
        serde_json::json!(["concluido"])
    );
    assert_eq!(json["report"]["missing"].as_array().unwrap().len(), 6);
}

#[test]
fn check_schema_violation_exits_1() {
    let dir = TempDir::new().unwrap();
    let path = write_fixture(
        &dir,
        "tables.json",
        r#"{ "tables": { "agenda": { "transitions": { "pendente": [] } } } }"#,
    );
    statekeeper()
        .arg("check")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid tables file"));
}

#[test]
fn check_unknown_entity_type_fails_schema() {
    let dir = TempDir::new().unwrap();
    let path = write_fixture(
        &dir,
        "tables.json",
        r#"{ "tables": { "invoice": { "initial": ["a"], "transitions": { "a": [] } } } }"#,
    );
    statekeeper().arg("check").arg(&path).assert().failure();
}

#[test]
fn check_dangling_target_exits_1() {
    let dir = TempDir::new().unwrap();
    let path = write_fixture(
        &dir,
        "tables.json",
        r#"{ "tables": { "document": { "initial": ["draft"], "transitions": { "draft": ["review"] } } } }"#,
    );
    statekeeper()
        .arg("check")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("'review'"));
}

#[test]
fn check_same_type_under_two_keys_exits_1() {
    let dir = TempDir::new().unwrap();
    let path = write_fixture(
        &dir,
        "tables.json",
        r#"{ "tables": {
            "financial": { "initial": ["pendente"], "transitions": { "pendente": ["pago"], "pago": [] } },
            "financeiro": { "initial": ["aberto"], "transitions": { "aberto": ["fechado"], "fechado": [] } }
        } }"#,
    );
    statekeeper()
        .arg("check")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "entity type 'financial' has more than one table",
        ));
}

#[test]
fn check_reports_unreachable_states() {
    let dir = TempDir::new().unwrap();
    let path = write_fixture(
        &dir,
        "tables.json",
        r#"{ "tables": { "financial": {
            "initial": ["pendente"],
            "transitions": { "pendente": ["pago"], "pago": [], "estornado": ["pago"] }
        } } }"#,
    );
    statekeeper()
        .arg("check")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("unreachable states: estornado"));
}

#[test]
fn check_missing_file_exits_1() {
    statekeeper()
        .args(["check", "/nonexistent/tables.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error reading file"));
}

#[test]
fn check_quiet_suppresses_output() {
    let dir = TempDir::new().unwrap();
    let path = write_fixture(&dir, "tables.json", AGENDA_TABLES);
    statekeeper()
        .args(["--quiet", "check"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

// ──────────────────────────────────────────────
// 3. Validate subcommand
// ──────────────────────────────────────────────

#[test]
fn validate_allowed_transition() {
    statekeeper()
        .args([
            "validate",
            "--entity-type",
            "financial",
            "--from",
            "pendente",
            "--to",
            "pago",
        ])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("valid: pendente -> pago"));
}

#[test]
fn validate_disallowed_transition_still_exits_0() {
    statekeeper()
        .args([
            "validate",
            "--entity-type",
            "agenda",
            "--from",
            "pendente",
            "--to",
            "pago",
        ])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("invalid"));
}

#[test]
fn validate_without_from_checks_initial_states() {
    statekeeper()
        .args(["validate", "--entity-type", "cliente", "--to", "active"])
        .assert()
        .success()
        .stdout(predicate::str::contains("valid: (initial) -> active"));
}

#[test]
fn validate_json_output() {
    let output = statekeeper()
        .args([
            "--output",
            "json",
            "validate",
            "--entity-type",
            "agenda",
            "--to",
            "concluido",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["valid"], false);
    assert!(json["fromState"].is_null());
    assert_eq!(json["toState"], "concluido");
}

#[test]
fn validate_unknown_entity_type_exits_1() {
    statekeeper()
        .args(["validate", "--entity-type", "invoice", "--to", "paid"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown entity type 'invoice'"));
}

#[test]
fn validate_with_custom_tables() {
    let dir = TempDir::new().unwrap();
    let path = write_fixture(&dir, "tables.json", AGENDA_TABLES);
    statekeeper()
        .args(["validate", "--entity-type", "financial", "--from", "pendente", "--to", "pago"])
        .arg("--tables")
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::starts_with("invalid"));
}

// ──────────────────────────────────────────────
// 4. Explain subcommand
// ──────────────────────────────────────────────

#[test]
fn explain_single_type() {
    statekeeper()
        .args(["explain", "agenda"])
        .assert()
        .success()
        .stdout(predicate::str::contains("initial: pendente"))
        .stdout(predicate::str::contains("pendente -> concluido"))
        .stdout(predicate::str::contains("concluido (terminal)"));
}

#[test]
fn explain_all_types_lists_every_builtin_table() {
    let assert = statekeeper().arg("explain").assert().success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    for ty in [
        "process", "document", "agenda", "pipeline", "financial", "client", "insight",
    ] {
        assert!(stdout.lines().any(|l| l == ty), "missing table {ty}");
    }
}

#[test]
fn explain_json_output() {
    let output = statekeeper()
        .args(["--output", "json", "explain", "document"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["document"]["initial"], serde_json::json!(["draft"]));
    assert_eq!(
        json["document"]["transitions"]["draft"],
        serde_json::json!(["review"])
    );
}

#[test]
fn explain_type_without_table_exits_1() {
    let dir = TempDir::new().unwrap();
    let path = write_fixture(&dir, "tables.json", AGENDA_TABLES);
    statekeeper()
        .args(["explain", "process", "--tables"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("no transition table"));
}

// ──────────────────────────────────────────────
// 5. Simulate subcommand
// ──────────────────────────────────────────────

const AGENDA_SCRIPT: &str = r#"[
    { "op": "transition", "entity_type": "agenda", "entity_id": 7, "to": "concluido" },
    { "op": "transition", "entity_type": "agenda", "entity_id": 7, "to": "pendente" },
    { "op": "transition", "entity_type": "agenda", "entity_id": 7, "to": "concluido", "user_id": 3 },
    { "op": "transition", "entity_type": "agenda", "entity_id": 7, "to": "pendente" },
    { "op": "force", "entity_type": "agenda", "entity_id": 7, "to": "pendente", "user_id": 3 },
    { "op": "force", "entity_type": "agenda", "entity_id": 7, "to": "pendente",
      "reason": "manual correction", "user_id": 3 }
]"#;

#[test]
fn simulate_reports_outcomes_and_history() {
    let dir = TempDir::new().unwrap();
    let script = write_fixture(&dir, "script.json", AGENDA_SCRIPT);
    let output = statekeeper()
        .args(["--output", "json", "simulate"])
        .arg(&script)
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();

    let oks: Vec<bool> = json["steps"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["ok"].as_bool().unwrap())
        .collect();
    assert_eq!(oks, vec![false, true, true, false, false, true]);
    assert_eq!(json["steps"][0]["error_kind"], "TRANSITION_NOT_ALLOWED");
    assert_eq!(json["steps"][4]["error_kind"], "VALIDATION");

    let history = &json["history"][0];
    assert_eq!(history["final_state"], "pendente");
    assert_eq!(history["walk_valid"], true);
    let entries = history["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[2]["forced"], true);
    assert_eq!(entries[2]["reason"], "manual correction");
}

#[test]
fn simulate_text_output() {
    let dir = TempDir::new().unwrap();
    let script = write_fixture(&dir, "script.json", AGENDA_SCRIPT);
    statekeeper()
        .arg("simulate")
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("rejected [TRANSITION_NOT_ALLOWED]"))
        .stdout(predicate::str::contains("agenda/7 (final: pendente)"))
        .stdout(predicate::str::contains(
            "concluido -> pendente [forced] \"manual correction\"",
        ));
}

#[test]
fn simulate_against_custom_tables_rejects_missing_types() {
    let dir = TempDir::new().unwrap();
    let tables = write_fixture(&dir, "tables.json", AGENDA_TABLES);
    let script = write_fixture(
        &dir,
        "script.json",
        r#"[ { "op": "transition", "entity_type": "financial", "entity_id": 1, "to": "pendente" } ]"#,
    );
    statekeeper()
        .arg("simulate")
        .arg(&script)
        .arg("--tables")
        .arg(&tables)
        .assert()
        .success()
        .stdout(predicate::str::contains("rejected [VALIDATION]"));
}

#[test]
fn simulate_malformed_script_exits_1() {
    let dir = TempDir::new().unwrap();
    let script = write_fixture(&dir, "script.json", r#"[ { "op": "teleport" } ]"#);
    statekeeper()
        .arg("simulate")
        .arg(&script)
        .assert()
        .failure()
        .stderr(predicate::str::contains("error parsing script"));
}
