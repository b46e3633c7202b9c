//! End-to-end tests of the JSON-RPC tool protocol against the compiled
//! binary: no real cluster, no real `sbctl`/`kubectl` binary required,
//! because these cases never get far enough to need one.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn kubectl_without_active_bundle_reports_no_active_bundle() {
    let request = r#"{"jsonrpc":"2.0","id":1,"method":"kubectl","params":{"command":"get pods"}}"#;

    Command::cargo_bin("kbundle-mcp")
        .unwrap()
        .env("MCP_BUNDLE_STORAGE", std::env::temp_dir())
        .write_stdin(format!("{request}\n"))
        .timeout(std::time::Duration::from_secs(5))
        .assert()
        .stdout(predicate::str::contains("no_active_bundle").or(predicate::str::contains("no active bundle")));
}

#[test]
fn list_available_bundles_on_empty_directory_reports_none_found() {
    let tmp = tempfile::tempdir().unwrap();
    let request = r#"{"jsonrpc":"2.0","id":1,"method":"list_available_bundles","params":{}}"#;

    Command::cargo_bin("kbundle-mcp")
        .unwrap()
        .env("MCP_BUNDLE_STORAGE", tmp.path())
        .write_stdin(format!("{request}\n"))
        .timeout(std::time::Duration::from_secs(5))
        .assert()
        .stdout(predicate::str::contains("No bundles found"));
}

#[test]
fn malformed_request_gets_a_formatted_error_not_a_crash() {
    Command::cargo_bin("kbundle-mcp")
        .unwrap()
        .env("MCP_BUNDLE_STORAGE", std::env::temp_dir())
        .write_stdin("not json at all\n")
        .timeout(std::time::Duration::from_secs(5))
        .assert()
        .stdout(predicate::str::contains("malformed JSON-RPC request"));
}

#[test]
fn unknown_method_is_reported_as_invalid_input() {
    let request = r#"{"jsonrpc":"2.0","id":1,"method":"not_a_real_tool","params":{}}"#;

    Command::cargo_bin("kbundle-mcp")
        .unwrap()
        .env("MCP_BUNDLE_STORAGE", std::env::temp_dir())
        .write_stdin(format!("{request}\n"))
        .timeout(std::time::Duration::from_secs(5))
        .assert()
        .stdout(predicate::str::contains("unknown tool"));
}
