//! Shared data types for the active bundle record, the catalogue, and the
//! helper process handle (data model, unchanged across components).

use std::path::PathBuf;
use std::time::SystemTime;

use serde::Serialize;
use tokio::process::Child;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleState {
    Idle,
    Acquiring,
    Starting,
    Ready,
}

/// How the helper supervisor decided the bundle was ready, kept around so
/// the formatter's debug level can surface it.
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessInfo {
    pub reached_by_compensation: bool,
    pub probe_attempts: u32,
}

pub struct HelperHandle {
    pub child: Child,
    pub pid: u32,
}

pub struct ActiveBundle {
    pub id: String,
    pub source: String,
    pub archive_path: PathBuf,
    pub extraction_dir: PathBuf,
    pub kubeconfig_path: Option<PathBuf>,
    pub helper: Option<HelperHandle>,
    pub state: BundleState,
    pub acquired_at: SystemTime,
    pub ready_at: Option<SystemTime>,
    pub readiness: Option<ReadinessInfo>,
}

impl ActiveBundle {
    pub fn is_ready(&self) -> bool {
        self.state == BundleState::Ready && self.kubeconfig_path.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogueEntry {
    pub path: PathBuf,
    pub size: Option<u64>,
    pub modified: Option<SystemTime>,
    pub valid: bool,
    pub invalid_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Dir,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub relative_path: PathBuf,
    pub kind: EntryKind,
    pub size: Option<u64>,
    pub accessed: Option<SystemTime>,
    pub modified: Option<SystemTime>,
    pub is_binary: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileContent {
    pub path: PathBuf,
    pub start_line: usize,
    pub end_line: usize,
    pub total_lines: usize,
    pub content: String,
    pub is_binary: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct GrepMatch {
    pub path: PathBuf,
    pub line_number: usize,
    pub line: String,
    pub matched_text: String,
    pub byte_offset: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct GrepResult {
    pub matches: Vec<GrepMatch>,
    pub total_matches: usize,
    pub files_searched: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct KubectlOutput {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub parsed_output: Option<serde_json::Value>,
    pub is_json: bool,
    pub duration_ms: u128,
}

/// A single candidate port the supervisor probed while looking for the
/// helper's emulated API server.
#[derive(Debug, Clone, Serialize)]
pub struct PortProbe {
    pub port: u16,
    pub listening: bool,
    pub probe_code: Option<u16>,
}

/// Diagnostic snapshot attached to `internal_error` responses and surfaced
/// in full at debug verbosity.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub helper_on_path: bool,
    pub helper_alive: Option<bool>,
    pub api_probe_ok: bool,
    pub bundle_initialized: bool,
    pub port_probes: Vec<PortProbe>,
    pub helper_pid: Option<u32>,
    pub helper_exit_code: Option<i32>,
    pub archive_path: Option<PathBuf>,
    pub archive_modified: Option<SystemTime>,
    pub extraction_dir: Option<PathBuf>,
}
