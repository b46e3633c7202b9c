//! Bundle acquisition: resolve a `source` argument into a local archive
//! path, either by using an existing file directly or by downloading one,
//! including the Replicated vendor-portal two-step auth flow.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use regex::Regex;
use reqwest::Client;
use serde_json::Value;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};

const VENDOR_URL_PATTERN: &str =
    r"^https://vendor\.replicated\.com/troubleshoot/analyze/([A-Za-z0-9_-]+)$";
const VENDOR_API_BASE: &str = "https://api.replicated.com/vendor/v3/supportbundle";

pub struct AcquireOptions {
    pub storage_root: PathBuf,
    pub max_download_size: u64,
    pub max_download_time: Duration,
    pub auth_token: Option<String>,
}

/// Resolve `source` into a local archive path under `opts.storage_root`.
pub async fn resolve_source(
    client: &Client,
    source: &str,
    opts: &AcquireOptions,
) -> Result<PathBuf> {
    let candidate = opts.storage_root.join(source);
    if Path::new(source).is_file() {
        return Ok(PathBuf::from(source));
    }
    if candidate.is_file() {
        return Ok(candidate);
    }

    let vendor_re = Regex::new(VENDOR_URL_PATTERN).expect("valid regex");
    if let Some(captures) = vendor_re.captures(source) {
        let slug = &captures[1];
        let signed_url = fetch_replicated_signed_url(client, slug, opts).await?;
        return download(client, &signed_url, opts, None).await;
    }

    if source.starts_with("http://") || source.starts_with("https://") {
        return download(client, source, opts, opts.auth_token.as_deref()).await;
    }

    if let Some(path) = find_in_catalogue(&opts.storage_root, source) {
        return Ok(path);
    }

    Err(Error::BundleNotFound(source.to_string()))
}

/// Last-ditch lookup before giving up: does any cataloged archive's relative
/// name or bare file name equal `source`?
fn find_in_catalogue(storage_root: &Path, source: &str) -> Option<PathBuf> {
    let entries = crate::catalogue::list_bundles(storage_root, true).ok()?;
    entries
        .into_iter()
        .find(|entry| {
            entry
                .path
                .file_name()
                .map(|n| n.to_string_lossy() == source)
                .unwrap_or(false)
                || entry
                    .path
                    .strip_prefix(storage_root)
                    .map(|rel| rel.to_string_lossy() == source)
                    .unwrap_or(false)
        })
        .map(|entry| entry.path)
}

async fn fetch_replicated_signed_url(client: &Client, slug: &str, opts: &AcquireOptions) -> Result<String> {
    let token = opts
        .auth_token
        .clone()
        .ok_or_else(|| Error::Unauthorized("no SBCTL_TOKEN or REPLICATED_TOKEN configured".into()))?;

    let url = format!("{VENDOR_API_BASE}/{slug}");
    let response = client
        .get(&url)
        .header("Authorization", token)
        .send()
        .await
        .map_err(|e| Error::BundleMetadataFailed(e.to_string()))?;

    match response.status().as_u16() {
        200 => {}
        401 => return Err(Error::Unauthorized(format!("vendor portal rejected the token for {slug}"))),
        404 => return Err(Error::BundleNotFound(slug.to_string())),
        status => {
            return Err(Error::BundleMetadataFailed(format!(
                "vendor portal returned status {status}"
            )))
        }
    }

    let body: Value = response
        .json()
        .await
        .map_err(|e| Error::BundleMetadataMalformed(e.to_string()))?;

    body.get("signedUri")
        .and_then(Value::as_str)
        .or_else(|| body.get("bundle").and_then(|b| b.get("uri")).and_then(Value::as_str))
        .map(String::from)
        .ok_or_else(|| {
            Error::BundleMetadataMalformed(
                "response had neither a top-level signedUri nor a nested bundle.uri".into(),
            )
        })
}

async fn download(
    client: &Client,
    url: &str,
    opts: &AcquireOptions,
    bearer_token: Option<&str>,
) -> Result<PathBuf> {
    let mut request = client.get(url);
    if let Some(token) = bearer_token {
        request = request.header("Authorization", format!("Bearer {token}"));
    }

    let response = request.send().await?;
    if !response.status().is_success() {
        return Err(Error::DownloadFailed(format!(
            "server returned status {}",
            response.status()
        )));
    }

    if let Some(len) = response.content_length() {
        if len > opts.max_download_size {
            return Err(Error::DownloadTooLarge { limit: opts.max_download_size });
        }
    }

    let filename = sanitize_filename(url);
    let dest_path = opts.storage_root.join(&filename);
    std::fs::create_dir_all(&opts.storage_root)?;

    let mut file = tokio::fs::File::create(&dest_path).await?;
    let mut stream = response.bytes_stream();
    let mut total: u64 = 0;
    let deadline = Instant::now() + opts.max_download_time;

    use futures_util::StreamExt;
    loop {
        let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
            drop(file);
            let _ = tokio::fs::remove_file(&dest_path).await;
            return Err(Error::DownloadFailed("download exceeded the time cap".into()));
        };

        let next = match tokio::time::timeout(remaining, stream.next()).await {
            Ok(next) => next,
            Err(_) => {
                drop(file);
                let _ = tokio::fs::remove_file(&dest_path).await;
                return Err(Error::DownloadFailed("download exceeded the time cap".into()));
            }
        };

        let Some(chunk) = next else { break };
        let chunk = chunk?;
        total += chunk.len() as u64;
        if total > opts.max_download_size {
            drop(file);
            let _ = tokio::fs::remove_file(&dest_path).await;
            return Err(Error::DownloadTooLarge { limit: opts.max_download_size });
        }

        file.write_all(&chunk).await?;
    }

    file.flush().await?;
    Ok(dest_path)
}

fn sanitize_filename(url: &str) -> String {
    let base = url
        .rsplit('/')
        .next()
        .unwrap_or("bundle")
        .split('?')
        .next()
        .unwrap_or("bundle");
    let sanitized: String = base
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if sanitized.ends_with(".tar.gz") || sanitized.ends_with(".tgz") {
        sanitized
    } else {
        format!("{sanitized}.tar.gz")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_query_strings_and_bad_characters() {
        let name = sanitize_filename("https://example.com/a b$c.tar.gz?token=xyz");
        assert_eq!(name, "a_b_c.tar.gz");
    }

    #[test]
    fn appends_extension_when_missing() {
        let name = sanitize_filename("https://example.com/download");
        assert_eq!(name, "download.tar.gz");
    }

    #[test]
    fn vendor_pattern_matches_expected_shape() {
        let re = Regex::new(VENDOR_URL_PATTERN).unwrap();
        assert!(re.is_match("https://vendor.replicated.com/troubleshoot/analyze/abc-123"));
        assert!(!re.is_match("https://vendor.replicated.com/other/path"));
    }
}
