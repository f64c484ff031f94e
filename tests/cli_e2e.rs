//! End-to-end CLI tests for the harvester binary.

mod support;

use assert_cmd::Command;
use harvester_core::Database;
use predicates::prelude::*;
use serde_json::{Value, json};
use support::socket_guard::start_mock_server_or_skip;
use tempfile::TempDir;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, ResponseTemplate};

/// Test that --help displays usage information and exits with code 0.
#[test]
fn test_binary_help_displays_usage() {
    let mut cmd = Command::cargo_bin("harvester").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Harvest research and regulatory listings"));
}

/// Test that --version displays version and exits with code 0.
#[test]
fn test_binary_version_displays_version() {
    let mut cmd = Command::cargo_bin("harvester").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("harvester"));
}

/// Test that an unknown mode is a usage error with exit code 1.
#[test]
fn test_binary_invalid_mode_returns_error() {
    let mut cmd = Command::cargo_bin("harvester").unwrap();
    cmd.args(["--mode", "scrape_everything"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("invalid mode"));
}

/// Test that EDGAR modes refuse to start without a contact.
#[test]
fn test_binary_edgar_mode_requires_contact() {
    let temp_dir = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("harvester").unwrap();
    cmd.env_remove("RUST_LOG")
        .current_dir(temp_dir.path())
        .args(["--mode", "company_search", "--query", "apple"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("contact"));
}

/// Test that a malformed input document is reported.
#[test]
fn test_binary_malformed_input_document_fails() {
    let temp_dir = TempDir::new().unwrap();
    let input = temp_dir.path().join("input.json");
    std::fs::write(&input, "{ not json").unwrap();

    let mut cmd = Command::cargo_bin("harvester").unwrap();
    cmd.env_remove("RUST_LOG")
        .current_dir(temp_dir.path())
        .arg("--input")
        .arg(&input)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("input document"));
}

/// Test a complete company search run against a mock EDGAR.
#[tokio::test(flavor = "multi_thread")]
async fn test_binary_company_search_writes_dataset() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/files/company_tickers.json"))
        .and(header_exists("user-agent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "0": {"cik_str": 320193, "ticker": "AAPL", "title": "Apple Inc."},
            "1": {"cik_str": 789019, "ticker": "MSFT", "title": "MICROSOFT CORP"}
        })))
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().unwrap();
    let input = temp_dir.path().join("input.json");
    std::fs::write(
        &input,
        r#"{"mode": "company_search", "query": "msft", "contact": "Data Team data@example.org"}"#,
    )
    .unwrap();
    let output = temp_dir.path().join("out.jsonl");
    let db = temp_dir.path().join("state.db");
    let base_url = server.uri();

    let assert = {
        let output = output.clone();
        tokio::task::spawn_blocking(move || {
            Command::cargo_bin("harvester")
                .unwrap()
                .arg("--input")
                .arg(&input)
                .arg("--output")
                .arg(&output)
                .arg("--db")
                .arg(&db)
                .args(["--base-url", &base_url, "--request-interval", "0", "-q"])
                .assert()
        })
        .await
        .unwrap()
    };
    assert.success();

    let text = std::fs::read_to_string(&output).unwrap();
    let lines: Vec<Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["type"], "entity");
    assert_eq!(lines[0]["ticker"], "MSFT");
    assert_eq!(lines[0]["cik"], "0000789019");
}

/// Test that an unreadable checkpoint aborts before the dataset is reopened.
#[test]
fn test_binary_corrupt_checkpoint_keeps_existing_dataset() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("state.db");
    tokio_test::block_on(async {
        let db = Database::new(&db_path).await.unwrap();
        sqlx::query(
            "INSERT INTO run_checkpoints (run_id, mode, state_json) VALUES ('r1', 'company_search', 'not json')",
        )
        .execute(db.pool())
        .await
        .unwrap();
        db.close().await;
    });

    let output = temp_dir.path().join("out.jsonl");
    let delivered = "{\"type\":\"entity\",\"ticker\":\"AAPL\"}\n{\"type\":\"entity\",\"ticker\":\"APLE\"}\n";
    std::fs::write(&output, delivered).unwrap();

    let mut cmd = Command::cargo_bin("harvester").unwrap();
    cmd.env_remove("RUST_LOG")
        .args(["--mode", "company_search", "--query", "apple"])
        .args(["--contact", "Data Team data@example.org", "--run-id", "r1"])
        .arg("--db")
        .arg(&db_path)
        .arg("--output")
        .arg(&output)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("--fresh"));

    assert_eq!(std::fs::read_to_string(&output).unwrap(), delivered);
}
