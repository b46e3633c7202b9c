//! Response formatter: renders tool results and errors at one of four
//! verbosity levels. Every tool result type gets its own render function
//! so the dispatcher never has to guess which branch applies.

use std::env;

use crate::error::Error;
use crate::model::{ActiveBundle, CatalogueEntry, Diagnostics, FileContent, FileEntry, GrepResult, KubectlOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Minimal,
    Standard,
    Verbose,
    Debug,
}

impl Verbosity {
    pub fn from_env() -> Verbosity {
        if env_truthy("MCP_DEBUG") {
            return Verbosity::Debug;
        }
        match env::var("MCP_VERBOSITY").ok().as_deref() {
            Some("standard") => Verbosity::Standard,
            Some("verbose") => Verbosity::Verbose,
            Some("debug") => Verbosity::Debug,
            _ => Verbosity::Minimal,
        }
    }

    pub fn parse(s: &str) -> Option<Verbosity> {
        match s {
            "minimal" => Some(Verbosity::Minimal),
            "standard" => Some(Verbosity::Standard),
            "verbose" => Some(Verbosity::Verbose),
            "debug" => Some(Verbosity::Debug),
            _ => None,
        }
    }
}

fn env_truthy(key: &str) -> bool {
    env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}

pub fn format_bundle_initialization(bundle: &ActiveBundle, verbosity: Verbosity) -> String {
    match verbosity {
        Verbosity::Minimal => format!("Bundle {} ready.", bundle.id),
        Verbosity::Standard => format!(
            "Bundle {} ready.\nSource: {}\nKubeconfig: {}",
            bundle.id,
            bundle.source,
            bundle
                .kubeconfig_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "none".into())
        ),
        Verbosity::Verbose | Verbosity::Debug => {
            let mut out = format!(
                "Bundle {} ready.\nSource: {}\nArchive: {}\nExtracted to: {}\nKubeconfig: {}\nState: {:?}",
                bundle.id,
                bundle.source,
                bundle.archive_path.display(),
                bundle.extraction_dir.display(),
                bundle
                    .kubeconfig_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "none".into()),
                bundle.state,
            );
            if verbosity == Verbosity::Debug {
                if let Some(readiness) = &bundle.readiness {
                    out.push_str(&format!(
                        "\nReadiness: reached_by_compensation={} probe_attempts={}",
                        readiness.reached_by_compensation, readiness.probe_attempts
                    ));
                }
            }
            out
        }
    }
}

pub fn format_bundle_list(entries: &[CatalogueEntry], verbosity: Verbosity) -> String {
    if entries.is_empty() {
        return "No bundles found.".to_string();
    }
    match verbosity {
        Verbosity::Minimal => format!("{} bundle(s) found.", entries.len()),
        _ => {
            let mut lines = vec![format!("{} bundle(s) found:", entries.len())];
            for entry in entries {
                let size = entry.size.map(format_file_size).unwrap_or_else(|| "?".into());
                let status = if entry.valid { "valid" } else { "invalid" };
                let mut line = format!("  {} ({size}, {status})", entry.path.display());
                if verbosity != Verbosity::Standard {
                    if let Some(reason) = &entry.invalid_reason {
                        line.push_str(&format!(" — {reason}"));
                    }
                }
                lines.push(line);
            }
            lines.join("\n")
        }
    }
}

pub fn format_file_list(entries: &[FileEntry], verbosity: Verbosity) -> String {
    if entries.is_empty() {
        return "No files found.".to_string();
    }
    match verbosity {
        Verbosity::Minimal => format!("{} entries.", entries.len()),
        _ => {
            let mut lines = vec![format!("{} entries:", entries.len())];
            for entry in entries {
                let marker = if entry.kind == crate::model::EntryKind::Dir { "/" } else { "" };
                let size = entry.size.map(format_file_size).unwrap_or_default();
                let mut line = format!("  {}{marker} {size}", entry.relative_path.display());
                if verbosity != Verbosity::Standard && entry.is_binary {
                    line.push_str(" (binary)");
                }
                lines.push(line);
            }
            lines.join("\n")
        }
    }
}

pub fn format_file_content(content: &FileContent, verbosity: Verbosity) -> String {
    match verbosity {
        Verbosity::Minimal => content.content.lines().next().unwrap_or("").to_string(),
        Verbosity::Standard => content.content.lines().take(20).collect::<Vec<_>>().join("\n"),
        Verbosity::Verbose | Verbosity::Debug => {
            let mut out = content.content.clone();
            if verbosity == Verbosity::Debug {
                out.push_str(&format!(
                    "\n[lines {}-{} of {}]",
                    content.start_line, content.end_line, content.total_lines
                ));
            }
            out
        }
    }
}

pub fn format_grep_results(result: &GrepResult, verbosity: Verbosity) -> String {
    if result.matches.is_empty() {
        return "No matches.".to_string();
    }
    match verbosity {
        Verbosity::Minimal => format!("{} match(es).", result.total_matches),
        _ => {
            let mut lines = vec![format!(
                "{} match(es) across {} file(s){}:",
                result.total_matches,
                result.files_searched,
                if result.truncated { ", truncated" } else { "" }
            )];
            for m in &result.matches {
                lines.push(format!(
                    "  {}:{}:{}: {} [{}]",
                    m.path.display(),
                    m.line_number,
                    m.byte_offset,
                    m.line,
                    m.matched_text
                ));
            }
            lines.join("\n")
        }
    }
}

pub fn format_kubectl_result(output: &KubectlOutput, verbosity: Verbosity) -> String {
    match verbosity {
        Verbosity::Minimal => output.stdout.lines().next().unwrap_or("").to_string(),
        Verbosity::Standard => output.stdout.clone(),
        Verbosity::Verbose | Verbosity::Debug => {
            let mut out = format!("$ {}\n{}", output.command, output.stdout);
            if verbosity == Verbosity::Debug {
                out.push_str(&format!(
                    "\n[exit_code={} is_json={} duration_ms={}]\nstderr:\n{}",
                    output.exit_code, output.is_json, output.duration_ms, output.stderr
                ));
            }
            out
        }
    }
}

pub fn format_error(err: &Error, verbosity: Verbosity) -> String {
    format_error_with_diagnostics(err, verbosity, None)
}

/// `internal_error` always carries a diagnostics snapshot at debug
/// verbosity; other error kinds ignore `diagnostics` even if one is passed.
pub fn format_error_with_diagnostics(
    err: &Error,
    verbosity: Verbosity,
    diagnostics: Option<&Diagnostics>,
) -> String {
    let full = err.to_string();
    match verbosity {
        Verbosity::Minimal => full.lines().next().unwrap_or(&full).to_string(),
        Verbosity::Standard => full.lines().take(3).collect::<Vec<_>>().join("\n"),
        Verbosity::Verbose => format!("[{}] {full}", err.kind()),
        Verbosity::Debug => {
            let mut out = format!("[{}] {full}\nerror_kind={}", err.kind(), err.kind());
            if let Some(d) = diagnostics {
                out.push_str(&format!(
                    "\ndiagnostics: helper_on_path={} helper_alive={:?} api_probe_ok={} bundle_initialized={} helper_pid={:?} archive_path={:?} archive_modified={:?}",
                    d.helper_on_path,
                    d.helper_alive,
                    d.api_probe_ok,
                    d.bundle_initialized,
                    d.helper_pid,
                    d.archive_path,
                    d.archive_modified,
                ));
                for probe in &d.port_probes {
                    out.push_str(&format!(
                        "\n  port {} listening={} probe_code={:?}",
                        probe.port, probe.listening, probe.probe_code
                    ));
                }
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_error_is_first_line_only() {
        let err = Error::KubectlFailed("line one\nline two".into());
        assert_eq!(format_error(&err, Verbosity::Minimal), "kubectl exited with a non-zero status: line one");
    }

    #[test]
    fn verbose_error_includes_kind_tag() {
        let err = Error::NoActiveBundle;
        assert!(format_error(&err, Verbosity::Verbose).starts_with("[no_active_bundle]"));
    }

    #[test]
    fn file_size_formatting_picks_sensible_unit() {
        assert_eq!(format_file_size(512), "512 B");
        assert_eq!(format_file_size(2048), "2.0 KB");
    }

    #[test]
    fn empty_grep_results_say_so() {
        let empty = GrepResult { matches: vec![], total_matches: 0, files_searched: 0, truncated: false };
        assert_eq!(format_grep_results(&empty, Verbosity::Minimal), "No matches.");
    }
}
