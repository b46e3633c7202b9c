//! Bundle catalogue: listing and cheap validity-checking of archives
//! sitting under the storage root.

use std::fs;
use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use tar::Archive;

use crate::error::Result;
use crate::model::CatalogueEntry;

const VALIDITY_PEEK_LIMIT: usize = 20;

pub fn list_bundles(storage_root: &Path, include_invalid: bool) -> Result<Vec<CatalogueEntry>> {
    let mut entries = Vec::new();

    let read_dir = match fs::read_dir(storage_root) {
        Ok(rd) => rd,
        Err(_) => return Ok(entries),
    };

    for item in read_dir.flatten() {
        let path = item.path();
        let is_bundle = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.ends_with(".tar.gz") || n.ends_with(".tgz"))
            .unwrap_or(false);
        if !is_bundle {
            continue;
        }

        let metadata = item.metadata().ok();
        let size = metadata.as_ref().map(|m| m.len());
        let modified = metadata.as_ref().and_then(|m| m.modified().ok());

        match check_bundle_validity(&path) {
            Ok(()) => entries.push(CatalogueEntry {
                path,
                size,
                modified,
                valid: true,
                invalid_reason: None,
            }),
            Err(e) if include_invalid => entries.push(CatalogueEntry {
                path,
                size,
                modified,
                valid: false,
                invalid_reason: Some(e.to_string()),
            }),
            Err(_) => {}
        }
    }

    entries.sort_by(|a, b| b.modified.cmp(&a.modified));
    Ok(entries)
}

/// Peek the first members of the archive looking for the markers a real
/// support bundle carries, without extracting anything.
pub fn check_bundle_validity(path: &Path) -> Result<()> {
    let file = fs::File::open(path)?;
    let decoder = GzDecoder::new(file);
    let mut archive = Archive::new(decoder);

    let mut saw_marker = false;
    for (i, entry) in archive.entries()?.enumerate() {
        if i >= VALIDITY_PEEK_LIMIT {
            break;
        }
        let entry = entry?;
        let name = entry.path()?.to_string_lossy().into_owned();
        if name.contains("cluster-resources/") || name.starts_with("support-bundle-") {
            saw_marker = true;
            break;
        }
    }

    if saw_marker {
        Ok(())
    } else {
        Err(crate::error::Error::BundleMetadataMalformed(format!(
            "{} does not look like a support bundle archive",
            path.display()
        )))
    }
}

/// Used by tests and the acquirer to make sure downloaded bytes decode at
/// all before we hand the path off to the supervisor.
pub fn peek_first_bytes(path: &Path, n: usize) -> Result<Vec<u8>> {
    let mut file = fs::File::open(path)?;
    let mut buf = vec![0u8; n];
    let read = file.read(&mut buf)?;
    buf.truncate(read);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tar::{Builder, Header};

    fn write_tarball(path: &Path, member_name: &str) {
        let file = fs::File::create(path).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = Builder::new(encoder);
        let data = b"content";
        let mut header = Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_cksum();
        builder.append_data(&mut header, member_name, &data[..]).unwrap();
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn recognizes_cluster_resources_nested_under_a_bundle_prefix() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bundle.tar.gz");
        write_tarball(&path, "my-bundle/cluster-resources/nodes.json");
        assert!(check_bundle_validity(&path).is_ok());
    }

    #[test]
    fn rejects_archives_without_either_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bundle.tar.gz");
        write_tarball(&path, "unrelated/file.txt");
        assert!(check_bundle_validity(&path).is_err());
    }
}
