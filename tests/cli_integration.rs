//! Integration tests for the `kbundle-mcp` binary.
//! These test CLI arg parsing, `--expand-config`, and help output without
//! needing a real cluster or `sbctl` binary.

use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_flag() {
    Command::cargo_bin("kbundle-mcp")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("JSON-RPC tool server"))
        .stdout(predicate::str::contains("--bundle-dir"))
        .stdout(predicate::str::contains("--expand-config"));
}

#[test]
fn version_flag() {
    Command::cargo_bin("kbundle-mcp")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("kbundle-mcp"));
}

#[test]
fn expand_config_without_env_var_fails_with_exit_code_two() {
    Command::cargo_bin("kbundle-mcp")
        .unwrap()
        .arg("--expand-config")
        .env_remove("MCP_CONFIG_PATH")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn expand_config_expands_troubleshoot_server_entry() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"mcpServers": {{"bundles": {{"command": "docker", "args": ["run", "kbundle-mcp:latest"], "bundleDir": "/tmp/bundles"}}}}}}"#
    )
    .unwrap();

    Command::cargo_bin("kbundle-mcp")
        .unwrap()
        .arg("--expand-config")
        .env("MCP_CONFIG_PATH", file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("MCP_BUNDLE_STORAGE"))
        .stdout(predicate::str::contains("--rm"));
}

#[test]
fn expand_config_missing_file_fails() {
    Command::cargo_bin("kbundle-mcp")
        .unwrap()
        .arg("--expand-config")
        .env("MCP_CONFIG_PATH", "/nonexistent/path/config.json")
        .assert()
        .failure()
        .code(2);
}
