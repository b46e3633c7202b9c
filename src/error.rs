//! The closed error taxonomy shared by every component.
//!
//! Every fallible operation below the dispatcher returns `Result<T, Error>`
//! rather than a boxed or dynamic error, so the dispatcher and formatter can
//! match exhaustively when choosing how to render a failure.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("bundle not found: {0}")]
    BundleNotFound(String),

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("download exceeded the size cap of {limit} bytes")]
    DownloadTooLarge { limit: u64 },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("failed to fetch bundle metadata: {0}")]
    BundleMetadataFailed(String),

    #[error("bundle metadata response was malformed: {0}")]
    BundleMetadataMalformed(String),

    #[error("helper process is not ready yet")]
    HelperNotReady,

    #[error("helper process exited unexpectedly: {0}")]
    HelperExited(String),

    #[error("emulated API server is not reachable")]
    ApiUnavailable,

    #[error("kubectl exited with a non-zero status: {0}")]
    KubectlFailed(String),

    #[error("kubectl call timed out after {0:?}")]
    KubectlTimeout(std::time::Duration),

    #[error("path not found: {0}")]
    PathNotFound(PathBuf),

    #[error("path escapes the bundle sandbox: {0}")]
    InvalidPath(PathBuf),

    #[error("failed to read file: {0}")]
    ReadFileError(String),

    #[error("filesystem error: {0}")]
    FilesystemError(String),

    #[error("no active bundle")]
    NoActiveBundle,

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The taxonomy tag used as the `error.kind` field in formatted output.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "invalid_input",
            Error::BundleNotFound(_) => "bundle_not_found",
            Error::DownloadFailed(_) => "download_failed",
            Error::DownloadTooLarge { .. } => "download_too_large",
            Error::Unauthorized(_) => "unauthorized",
            Error::BundleMetadataFailed(_) => "bundle_metadata_failed",
            Error::BundleMetadataMalformed(_) => "bundle_metadata_malformed",
            Error::HelperNotReady => "helper_not_ready",
            Error::HelperExited(_) => "helper_exited",
            Error::ApiUnavailable => "api_unavailable",
            Error::KubectlFailed(_) => "kubectl_failed",
            Error::KubectlTimeout(_) => "kubectl_timeout",
            Error::PathNotFound(_) => "path_not_found",
            Error::InvalidPath(_) => "invalid_path",
            Error::ReadFileError(_) => "read_file_error",
            Error::FilesystemError(_) => "filesystem_error",
            Error::NoActiveBundle => "no_active_bundle",
            Error::Internal(_) => "internal_error",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => Error::PathNotFound(PathBuf::new()),
            _ => Error::FilesystemError(e.to_string()),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::DownloadFailed(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
