//! Process-wide configuration, built once at startup from CLI flags and
//! environment variables, plus the `--expand-config` MCP client-config
//! expansion helper.

use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

const DEFAULT_IMAGE_NAME: &str = "kbundle-mcp:latest";
const DEFAULT_BUNDLE_STORAGE: &str = "/data/bundles";
const DEFAULT_ENTRYPOINT: &str = "kbundle-mcp";
const DEFAULT_MAX_DOWNLOAD_SIZE: u64 = 1024 * 1024 * 1024; // 1 GiB
const DEFAULT_MAX_DOWNLOAD_SECS: u64 = 300;
const DEFAULT_MAX_READY_SECS: u64 = 120;
const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 3600;

#[derive(Parser, Debug)]
#[command(
    name = "kbundle-mcp",
    about = "JSON-RPC tool server for Kubernetes support bundles",
    version
)]
pub struct Args {
    /// Directory bundles are stored under. Overrides MCP_BUNDLE_STORAGE.
    #[arg(long)]
    pub bundle_dir: Option<PathBuf>,

    /// Raise the stderr log level.
    #[arg(long)]
    pub verbose: bool,

    /// Expand an MCP client config (read from MCP_CONFIG_PATH) with smart
    /// defaults and print the result to stdout, then exit.
    #[arg(long)]
    pub expand_config: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bundle_dir: PathBuf,
    pub bundle_dir_is_ephemeral: bool,
    pub max_download_size: u64,
    pub max_download_time: Duration,
    pub max_ready_time: Duration,
    pub cleanup_orphans: bool,
    pub allow_alternative_kubeconfig: bool,
    pub enable_periodic_cleanup: bool,
    pub cleanup_interval: Duration,
    pub verbose: bool,
    pub auth_token: Option<String>,
}

impl Config {
    /// Resolve the bundle storage directory the way `cli.py::main` does:
    /// the CLI flag wins, then `MCP_BUNDLE_STORAGE`, then the default path
    /// only if it already exists on disk, otherwise an ephemeral temp dir.
    pub fn build(args: &Args) -> Result<Config> {
        let (bundle_dir, ephemeral) = match args
            .bundle_dir
            .clone()
            .or_else(|| env::var("MCP_BUNDLE_STORAGE").ok().map(PathBuf::from))
        {
            Some(path) => (path, false),
            None if PathBuf::from(DEFAULT_BUNDLE_STORAGE).exists() => {
                (PathBuf::from(DEFAULT_BUNDLE_STORAGE), false)
            }
            None => {
                let dir = tempfile::Builder::new()
                    .prefix("kbundle-mcp-")
                    .tempdir()
                    .map_err(|e| Error::Internal(e.to_string()))?;
                (dir.into_path(), true)
            }
        };

        Ok(Config {
            bundle_dir,
            bundle_dir_is_ephemeral: ephemeral,
            max_download_size: env_u64("MAX_DOWNLOAD_SIZE", DEFAULT_MAX_DOWNLOAD_SIZE),
            max_download_time: Duration::from_secs(env_u64(
                "MAX_DOWNLOAD_TIMEOUT",
                DEFAULT_MAX_DOWNLOAD_SECS,
            )),
            max_ready_time: Duration::from_secs(env_u64(
                "MAX_INITIALIZATION_TIMEOUT",
                DEFAULT_MAX_READY_SECS,
            )),
            cleanup_orphans: env_bool("CLEANUP_ORPHANED", true),
            allow_alternative_kubeconfig: env_bool("ALLOW_ALTERNATIVE_KUBECONFIG", true),
            enable_periodic_cleanup: env_bool("ENABLE_PERIODIC_CLEANUP", false),
            cleanup_interval: Duration::from_secs(env_u64(
                "CLEANUP_INTERVAL",
                DEFAULT_CLEANUP_INTERVAL_SECS,
            )),
            verbose: args.verbose,
            auth_token: env::var("SBCTL_TOKEN").ok().or_else(|| env::var("REPLICATED_TOKEN").ok()),
        })
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"),
        Err(_) => default,
    }
}

/// Load the MCP client config document pointed to by `MCP_CONFIG_PATH`.
pub fn load_config_from_env() -> Option<Value> {
    let path = env::var("MCP_CONFIG_PATH").ok()?;
    match load_config_from_path(&path) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::error!("failed to load config from environment: {e}");
            None
        }
    }
}

pub fn load_config_from_path(path: &str) -> Result<Value> {
    let p = PathBuf::from(path);
    if !p.exists() {
        return Err(Error::InvalidInput(format!(
            "configuration file not found: {}",
            p.display()
        )));
    }
    let text = std::fs::read_to_string(&p)?;
    serde_json::from_str(&text)
        .map_err(|e| Error::InvalidInput(format!("invalid configuration JSON: {e}")))
}

/// Expand a minimal MCP client configuration with smart defaults, the way
/// a user would otherwise have to spell out by hand in their client
/// settings.
pub fn expand_client_config(config: &Value) -> Value {
    let Some(servers) = config.get("mcpServers").and_then(Value::as_object) else {
        tracing::warn!("invalid MCP configuration: 'mcpServers' key missing");
        return config.clone();
    };

    let mut expanded = config.clone();
    let out_servers = expanded
        .get_mut("mcpServers")
        .and_then(Value::as_object_mut)
        .unwrap();

    for (name, server_config) in servers {
        if is_troubleshoot_server(server_config) {
            out_servers.insert(name.clone(), expand_server_config(server_config));
        }
    }

    expanded
}

fn is_troubleshoot_server(server_config: &Value) -> bool {
    if server_config.get("command").and_then(Value::as_str) != Some("docker") {
        return false;
    }
    server_config
        .get("args")
        .and_then(Value::as_array)
        .map(|args| {
            args.iter()
                .filter_map(Value::as_str)
                .any(|a| a.contains("kbundle-mcp"))
        })
        .unwrap_or(false)
}

fn expand_server_config(server_config: &Value) -> Value {
    let mut expanded = server_config
        .as_object()
        .cloned()
        .unwrap_or_else(Map::new);

    let original_args: Vec<String> = expanded
        .get("args")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
        .unwrap_or_default();

    let image_name = extract_image_name(&original_args).unwrap_or_else(|| DEFAULT_IMAGE_NAME.to_string());

    let bundle_dir = expanded.remove("bundleDir").and_then(|v| v.as_str().map(String::from));
    let volume_mount = bundle_dir
        .map(|d| format!("{d}:{DEFAULT_BUNDLE_STORAGE}"))
        .or_else(|| extract_volume_mount(&original_args));

    let mut env_map: BTreeMap<String, String> = expanded
        .remove("env")
        .and_then(|v| v.as_object().cloned())
        .map(|m| {
            m.into_iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k, s.to_string())))
                .collect()
        })
        .unwrap_or_default();

    for (k, v) in extract_env_vars(&original_args) {
        env_map.entry(k).or_insert(v);
    }
    env_map
        .entry("MCP_BUNDLE_STORAGE".to_string())
        .or_insert_with(|| DEFAULT_BUNDLE_STORAGE.to_string());
    env_map
        .entry("MCP_KEEP_ALIVE".to_string())
        .or_insert_with(|| "true".to_string());

    let mut new_args = vec!["run".to_string(), "-i".to_string()];
    if let Some(vm) = volume_mount {
        new_args.push("-v".to_string());
        new_args.push(vm);
    }
    for (k, v) in &env_map {
        new_args.push("-e".to_string());
        new_args.push(format!("{k}={v}"));
    }
    new_args.push("--rm".to_string());
    if !original_args.iter().any(|a| a == "--entrypoint") {
        new_args.push("--entrypoint".to_string());
        new_args.push(DEFAULT_ENTRYPOINT.to_string());
    }
    new_args.push(image_name);

    expanded.insert(
        "args".to_string(),
        Value::Array(new_args.into_iter().map(Value::String).collect()),
    );

    Value::Object(expanded)
}

fn extract_image_name(args: &[String]) -> Option<String> {
    args.iter()
        .find(|a| a.starts_with("kbundle-mcp"))
        .cloned()
}

fn extract_volume_mount(args: &[String]) -> Option<String> {
    let idx = args.iter().position(|a| a == "-v")?;
    args.get(idx + 1).cloned()
}

fn extract_env_vars(args: &[String]) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "-e" {
            if let Some(pair) = args.get(i + 1) {
                if let Some((k, v)) = pair.split_once('=') {
                    let v = v.trim_matches(|c| c == '"' || c == '\'');
                    out.push((k.to_string(), v.to_string()));
                }
            }
            i += 2;
        } else {
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn skips_non_troubleshoot_servers() {
        let cfg = json!({"mcpServers": {"other": {"command": "node", "args": []}}});
        let expanded = expand_client_config(&cfg);
        assert_eq!(expanded, cfg);
    }

    #[test]
    fn expands_troubleshoot_server_with_bundle_dir() {
        let cfg = json!({
            "mcpServers": {
                "bundles": {
                    "command": "docker",
                    "args": ["run", "kbundle-mcp:latest"],
                    "bundleDir": "/home/user/bundles"
                }
            }
        });
        let expanded = expand_client_config(&cfg);
        let args = expanded["mcpServers"]["bundles"]["args"].as_array().unwrap();
        let joined: Vec<&str> = args.iter().map(|v| v.as_str().unwrap()).collect();
        assert!(joined.contains(&"-v"));
        assert!(joined.iter().any(|a| a.contains("/data/bundles")));
        assert!(joined.contains(&"--rm"));
    }

    #[test]
    fn preserves_existing_env_vars() {
        let args = vec!["-e".to_string(), "FOO=bar".to_string()];
        let vars = extract_env_vars(&args);
        assert_eq!(vars, vec![("FOO".to_string(), "bar".to_string())]);
    }
}
