//! File explorer: sandboxed listing, reading, and grepping of an active
//! bundle's extracted contents.

use std::fs;
use std::path::Path;

use regex::RegexBuilder;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::model::{ActiveBundle, EntryKind, FileContent, FileEntry, GrepMatch, GrepResult};
use crate::sandbox;

/// First few KiB peeked when deciding whether a file is binary: a NUL byte
/// or invalid UTF-8 in that window is treated as binary.
const BINARY_PEEK_BYTES: usize = 8192;

pub fn list_files(active: &ActiveBundle, path: &str, recursive: bool) -> Result<Vec<FileEntry>> {
    let root = sandbox::normalize_under_root(&active.extraction_dir, path)?;
    if !root.is_dir() {
        if root.is_file() {
            return Err(Error::FilesystemError(format!(
                "{} is a file, not a directory",
                root.display()
            )));
        }
        return Err(Error::PathNotFound(root));
    }

    let mut entries = Vec::new();
    if recursive {
        for item in WalkDir::new(&root).min_depth(1).into_iter().filter_map(|e| e.ok()) {
            entries.push(build_entry(&root, item.path())?);
        }
    } else {
        let read_dir = fs::read_dir(&root).map_err(|_| Error::PathNotFound(root.clone()))?;
        for item in read_dir.flatten() {
            entries.push(build_entry(&root, &item.path())?);
        }
    }

    entries.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(entries)
}

fn build_entry(root: &Path, entry_path: &Path) -> Result<FileEntry> {
    let metadata = fs::symlink_metadata(entry_path)?;
    let is_dir = metadata.is_dir();
    let name = entry_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let relative_path = entry_path.strip_prefix(root).unwrap_or(entry_path).to_path_buf();

    let is_binary = if is_dir { false } else { peek_is_binary(entry_path) };

    Ok(FileEntry {
        name,
        relative_path,
        kind: if is_dir { EntryKind::Dir } else { EntryKind::File },
        size: if is_dir { None } else { Some(metadata.len()) },
        accessed: metadata.accessed().ok(),
        modified: metadata.modified().ok(),
        is_binary,
    })
}

fn peek_is_binary(path: &Path) -> bool {
    let Ok(bytes) = fs::read(path) else { return false };
    let window = &bytes[..bytes.len().min(BINARY_PEEK_BYTES)];
    window.contains(&0) || std::str::from_utf8(window).is_err()
}

pub fn read_file(
    active: &ActiveBundle,
    path: &str,
    start_line: Option<usize>,
    end_line: Option<usize>,
) -> Result<FileContent> {
    let resolved = sandbox::normalize_under_root(&active.extraction_dir, path)?;
    if resolved.is_dir() {
        return Err(Error::ReadFileError(format!(
            "{} is a directory, not a file",
            resolved.display()
        )));
    }

    let raw = fs::read(&resolved).map_err(|e| Error::ReadFileError(format!("{}: {e}", resolved.display())))?;
    let window = &raw[..raw.len().min(BINARY_PEEK_BYTES)];
    let is_binary = window.contains(&0) || std::str::from_utf8(window).is_err();
    if is_binary {
        return Ok(FileContent {
            path: resolved,
            start_line: start_line.unwrap_or(0),
            end_line: end_line.unwrap_or(0),
            total_lines: 0,
            content: hex_dump(&raw),
            is_binary: true,
        });
    }

    let text = String::from_utf8_lossy(&raw).into_owned();
    let lines: Vec<&str> = text.lines().collect();
    let total_lines = lines.len();
    let start = start_line.unwrap_or(1).max(1);
    let end = end_line.unwrap_or(total_lines).min(total_lines.max(1));

    if start > end || start > total_lines {
        return Ok(FileContent {
            path: resolved,
            start_line: start,
            end_line: start.saturating_sub(1),
            total_lines,
            content: String::new(),
            is_binary: false,
        });
    }

    let content = lines[(start - 1)..end].join("\n");
    Ok(FileContent {
        path: resolved,
        start_line: start,
        end_line: end,
        total_lines,
        content,
        is_binary: false,
    })
}

fn hex_dump(bytes: &[u8]) -> String {
    let mut out = String::new();
    for (i, chunk) in bytes.chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
        out.push_str(&format!("{:08x}  {}\n", i * 16, hex.join(" ")));
    }
    out
}

pub fn grep_files(
    active: &ActiveBundle,
    pattern: &str,
    path: &str,
    recursive: bool,
    glob_pattern: Option<&str>,
    case_sensitive: bool,
    max_results: usize,
) -> Result<GrepResult> {
    let root = sandbox::normalize_under_root(&active.extraction_dir, path)?;
    let regex = RegexBuilder::new(pattern)
        .case_insensitive(!case_sensitive)
        .build()
        .map_err(|e| Error::InvalidInput(format!("invalid grep pattern: {e}")))?;

    let walker: Box<dyn Iterator<Item = walkdir::DirEntry>> = if recursive {
        Box::new(WalkDir::new(&root).into_iter().filter_map(|e| e.ok()))
    } else {
        Box::new(WalkDir::new(&root).max_depth(1).into_iter().filter_map(|e| e.ok()))
    };

    let mut matches = Vec::new();
    let mut files_searched = 0usize;
    let mut truncated = false;

    'walk: for entry in walker {
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(glob) = glob_pattern {
            let name = entry.file_name().to_string_lossy();
            if !matches_glob(&name, glob) {
                continue;
            }
        }
        let Ok(text) = fs::read_to_string(entry.path()) else {
            continue;
        };
        files_searched += 1;

        for (idx, line) in text.lines().enumerate() {
            if let Some(m) = regex.find(line) {
                matches.push(GrepMatch {
                    path: entry.path().to_path_buf(),
                    line_number: idx,
                    line: line.to_string(),
                    matched_text: m.as_str().to_string(),
                    byte_offset: m.start(),
                });
                if matches.len() >= max_results {
                    truncated = true;
                    break 'walk;
                }
            }
        }
    }

    let total_matches = matches.len();
    Ok(GrepResult { matches, total_matches, files_searched, truncated })
}

/// Minimal glob support (`*` and `?`) for filtering filenames before a file
/// is opened — the explorer never needs full glob semantics beyond this.
fn matches_glob(name: &str, pattern: &str) -> bool {
    let mut regex_str = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => regex_str.push_str(".*"),
            '?' => regex_str.push('.'),
            c => regex_str.push_str(&regex::escape(&c.to_string())),
        }
    }
    regex_str.push('$');
    regex::Regex::new(&regex_str).map(|re| re.is_match(name)).unwrap_or(false)
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
            kubeconfig_path: None,
            helper: None,
            state: crate::model::BundleState::Ready,
            acquired_at: SystemTime::now(),
            ready_at: None,
            readiness: None,
        }
    }

    #[test]
    fn lists_files_in_sandboxed_dir() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.log"), "hello").unwrap();
        let active = bundle(tmp.path());
        let entries = list_files(&active, ".", false).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, EntryKind::File);
    }

    #[test]
    fn lists_files_recursively() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("sub").join("b.log"), "hi").unwrap();
        let active = bundle(tmp.path());
        let entries = list_files(&active, ".", true).unwrap();
        assert!(entries.iter().any(|e| e.name == "b.log"));
    }

    #[test]
    fn file_where_directory_expected_is_a_filesystem_error() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.log"), "hello").unwrap();
        let active = bundle(tmp.path());
        assert!(matches!(list_files(&active, "a.log", false), Err(Error::FilesystemError(_))));
    }

    #[test]
    fn reads_requested_line_range() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.log"), "one\ntwo\nthree\n").unwrap();
        let active = bundle(tmp.path());
        let content = read_file(&active, "a.log", Some(2), Some(3)).unwrap();
        assert_eq!(content.content, "two\nthree");
        assert!(!content.is_binary);
    }

    #[test]
    fn reading_a_directory_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        let active = bundle(tmp.path());
        assert!(read_file(&active, "sub", None, None).is_err());
    }

    #[test]
    fn binary_file_is_hex_dumped() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("blob.bin"), [0u8, 1, 2, 255, 254]).unwrap();
        let active = bundle(tmp.path());
        let content = read_file(&active, "blob.bin", None, None).unwrap();
        assert!(content.is_binary);
        assert!(content.content.contains("00 01 02 ff fe"));
    }

    #[test]
    fn grep_finds_matching_lines_case_insensitive() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.log"), "ERROR: boom\nok\n").unwrap();
        let active = bundle(tmp.path());
        let result = grep_files(&active, "error", ".", false, None, false, 10).unwrap();
        assert_eq!(result.matches.len(), 1);
        assert_eq!(result.matches[0].line_number, 0);
        assert_eq!(result.matches[0].matched_text, "ERROR");
        assert!(!result.truncated);
    }

    #[test]
    fn grep_stops_at_max_results_and_reports_truncation() {
        let tmp = tempfile::tempdir().unwrap();
        for i in 0..5 {
            let body = "x match\n".repeat(3);
            fs::write(tmp.path().join(format!("f{i}.log")), body).unwrap();
        }
        let active = bundle(tmp.path());
        let result = grep_files(&active, "x", ".", false, None, true, 4).unwrap();
        assert_eq!(result.matches.len(), 4);
        assert_eq!(result.total_matches, 4);
        assert!(result.truncated);
        assert!(result.files_searched >= 1);
    }

    #[test]
    fn glob_pattern_filters_filenames() {
        assert!(matches_glob("a.log", "*.log"));
        assert!(!matches_glob("a.txt", "*.log"));
    }
}
