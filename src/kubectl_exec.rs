//! Kubectl executor: run `kubectl` against the active bundle's emulated
//! API server, with file-path-shaped arguments resolved through the
//! sandbox first.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use regex::Regex;
use tokio::process::Command;

use crate::error::{Error, Result};
use crate::model::{ActiveBundle, KubectlOutput};
use crate::sandbox;
use crate::supervisor;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Arguments that take a filesystem path as their value and must be
/// sandboxed before the child process is spawned.
const FILE_FLAGS: &[&str] = &["-f", "--filename"];

/// First-token verbs that mutate cluster state. A bundle's emulated API
/// server is read-only, so these are rejected before a process is spawned.
const MUTATING_VERBS: &[&str] = &[
    "delete", "edit", "exec", "cp", "patch", "port-forward", "attach", "replace", "apply",
];

pub async fn run(
    active: &ActiveBundle,
    command: &str,
    timeout: Option<Duration>,
    json_output: bool,
) -> Result<KubectlOutput> {
    if !active.is_ready() {
        return Err(Error::NoActiveBundle);
    }
    let kubeconfig = active
        .kubeconfig_path
        .as_ref()
        .ok_or(Error::NoActiveBundle)?;

    let tokens = tokenize_and_reject_mutating(command)?;

    if !supervisor::probe_api_available(kubeconfig).await {
        return Err(Error::ApiUnavailable);
    }

    let mut resolved_args = sandbox_file_args(active, &tokens)?;
    let has_output_flag = resolved_args.iter().any(|a| a == "-o" || a.starts_with("-o=") || a.starts_with("--output"));
    let is_json = json_output && !has_output_flag;
    if is_json {
        resolved_args.push("-o".to_string());
        resolved_args.push("json".to_string());
    }

    let mut cmd = Command::new("kubectl");
    cmd.arg("--kubeconfig")
        .arg(kubeconfig)
        .args(&resolved_args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let started = Instant::now();
    let child = cmd
        .spawn()
        .map_err(|e| Error::Internal(format!("failed to spawn kubectl: {e}")))?;

    let timeout = timeout.unwrap_or(DEFAULT_TIMEOUT);
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| Error::Internal(format!("failed to read kubectl output: {e}")))?,
        Err(_) => return Err(Error::KubectlTimeout(timeout)),
    };
    let duration_ms = started.elapsed().as_millis();

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        return Err(Error::KubectlFailed(if stderr.trim().is_empty() {
            format!("kubectl exited with status {}", output.status)
        } else {
            stderr.clone()
        }));
    }

    let parsed_output = if is_json {
        serde_json::from_str(&stdout).ok()
    } else {
        None
    };

    Ok(KubectlOutput {
        command: command.to_string(),
        exit_code: output.status.code().unwrap_or(-1),
        stdout,
        stderr,
        parsed_output,
        is_json,
        duration_ms,
    })
}

fn tokenize_and_reject_mutating(command: &str) -> Result<Vec<String>> {
    let tokens: Vec<String> = command.split_whitespace().map(String::from).collect();
    let first = tokens
        .first()
        .ok_or_else(|| Error::InvalidInput("command must not be empty".into()))?;
    if MUTATING_VERBS.contains(&first.as_str()) {
        return Err(Error::InvalidInput(format!(
            "'{first}' mutates cluster state and is not permitted against a support bundle"
        )));
    }
    Ok(tokens)
}

fn sandbox_file_args(active: &ActiveBundle, args: &[String]) -> Result<Vec<String>> {
    let mut out = Vec::with_capacity(args.len());
    let mut expect_path = false;

    for arg in args {
        if expect_path {
            let resolved = sandbox::normalize_under_root(&active.extraction_dir, arg)?;
            out.push(resolved.to_string_lossy().into_owned());
            expect_path = false;
            continue;
        }

        if let Some((flag, value)) = arg.split_once('=') {
            if FILE_FLAGS.contains(&flag) {
                let resolved = sandbox::normalize_under_root(&active.extraction_dir, value)?;
                out.push(format!("{flag}={}", resolved.to_string_lossy()));
                continue;
            }
        }

        if FILE_FLAGS.contains(&arg.as_str()) {
            out.push(arg.clone());
            expect_path = true;
            continue;
        }

        out.push(arg.clone());
    }

    Ok(out)
}

/// Three-tier kubeconfig parsing: JSON, then YAML-ish line scanning, then a
/// bare regex over `server:`. Used by the supervisor's readiness probe and
/// available for diagnostics.
pub fn server_url_from_kubeconfig(path: &Path) -> Option<String> {
    let text = std::fs::read_to_string(path).ok()?;

    if let Ok(json) = serde_json::from_str::<serde_json::Value>(&text) {
        if let Some(server) = extract_server_from_json(&json) {
            return Some(server);
        }
    }

    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("server:") {
            let candidate = rest.trim();
            if !candidate.is_empty() {
                return Some(candidate.to_string());
            }
        }
    }

    let re = Regex::new(r"server:\s*(http\S+)").ok()?;
    re.captures(&text).map(|c| c[1].to_string())
}

fn extract_server_from_json(value: &serde_json::Value) -> Option<String> {
    value
        .get("clusters")?
        .as_array()?
        .first()?
        .get("cluster")?
        .get("server")?
        .as_str()
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    fn bundle(dir: &Path) -> ActiveBundle {
        ActiveBundle {
            id: "test".into(),
            source: "test".into(),
            archive_path: dir.join("bundle.tar.gz"),
            extraction_dir: dir.to_path_buf(),
            kubeconfig_path: Some(dir.join("kubeconfig")),
            helper: None,
            state: crate::model::BundleState::Ready,
            acquired_at: SystemTime::now(),
            ready_at: Some(SystemTime::now()),
            readiness: None,
        }
    }

    #[test]
    fn sandboxes_filename_flag_values() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("pod.yaml"), "apiVersion: v1").unwrap();
        let active = bundle(tmp.path());
        let args = vec!["apply".to_string(), "-f".to_string(), "pod.yaml".to_string()];
        let resolved = sandbox_file_args(&active, &args).unwrap();
        assert_eq!(resolved[0], "apply");
        assert!(resolved[2].ends_with("pod.yaml"));
    }

    #[test]
    fn rejects_traversal_in_filename_flag() {
        let tmp = tempfile::tempdir().unwrap();
        let active = bundle(tmp.path());
        let args = vec!["apply".to_string(), "-f".to_string(), "../escape.yaml".to_string()];
        assert!(sandbox_file_args(&active, &args).is_err());
    }

    #[test]
    fn rejects_empty_command() {
        assert!(tokenize_and_reject_mutating("   ").is_err());
    }

    #[test]
    fn rejects_mutating_verbs() {
        for verb in ["delete", "apply", "exec", "port-forward"] {
            assert!(tokenize_and_reject_mutating(verb).is_err(), "{verb} should be rejected");
        }
    }

    #[test]
    fn allows_read_only_verbs() {
        let tokens = tokenize_and_reject_mutating("get namespaces").unwrap();
        assert_eq!(tokens, vec!["get", "namespaces"]);
    }

    #[test]
    fn parses_server_url_from_yaml_kubeconfig() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("kubeconfig");
        std::fs::write(&path, "clusters:\n- cluster:\n    server: http://127.0.0.1:32000\n").unwrap();
        assert_eq!(
            server_url_from_kubeconfig(&path),
            Some("http://127.0.0.1:32000".to_string())
        );
    }
}
