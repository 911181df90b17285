//! Error types for the doc2md service.
//!
//! Every failure a conversion can hit is a variant of [`Doc2MdError`]. The
//! variants fall into four kinds ([`ErrorKind`]) which decide how a failure
//! is reported:
//!
//! * **Validation**: the caller sent something we refuse to touch
//!   (unsupported extension, oversized payload, malformed URL). Checked
//!   before any I/O; reported as a client error.
//! * **Download**: the remote document could not be fetched within the
//!   configured time and size limits.
//! * **Conversion**: the external engine rejected or failed on the document,
//!   or could not be brought up at all.
//! * **Internal**: staging I/O, configuration, and worker failures.
//!
//! Cleanup failures (a staged file that refuses to go away) have no variant:
//! they are logged by [`crate::cleanup`] and never fail a request.

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the doc2md library.
#[derive(Debug, Error)]
pub enum Doc2MdError {
    // ── Validation errors ─────────────────────────────────────────────────
    /// The file extension is not in the configured allow-list.
    #[error("Unsupported file format '{extension}'. Supported formats: {supported}")]
    UnsupportedFormat { extension: String, supported: String },

    /// The payload is larger than the configured maximum.
    #[error("File size exceeds the limit ({})", format_mib(.limit))]
    FileTooLarge { limit: u64 },

    /// A multipart upload carried no `file` field.
    #[error("Missing file: expected a multipart field named 'file'")]
    MissingFile,

    /// The URL is not an absolute HTTP/HTTPS URL.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The request body could not be decoded.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // ── Download errors ───────────────────────────────────────────────────
    /// The remote server answered with an error or the transport failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// The remote document is larger than the configured maximum.
    #[error("Failed to download '{url}': file size exceeds the limit ({})", format_mib(.limit))]
    DownloadTooLarge { url: String, limit: u64 },

    /// The download did not finish within the configured time budget.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Conversion errors ─────────────────────────────────────────────────
    /// The external engine failed on the document.
    #[error("Conversion failed: {detail}")]
    ConversionFailed { detail: String },

    /// The caller stopped waiting for a conversion.
    #[error("Conversion did not finish within {secs}s")]
    ConversionTimeout { secs: u64 },

    /// The external engine could not be constructed.
    #[error("Conversion engine unavailable: {0}")]
    EngineInit(String),

    // ── Internal errors ───────────────────────────────────────────────────
    /// Writing the staged copy of a document failed.
    #[error("Failed to stage document in '{dir}': {source}")]
    Staging {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of a [`Doc2MdError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Download,
    Conversion,
    Internal,
}

impl Doc2MdError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Doc2MdError::UnsupportedFormat { .. }
            | Doc2MdError::FileTooLarge { .. }
            | Doc2MdError::MissingFile
            | Doc2MdError::InvalidUrl { .. }
            | Doc2MdError::InvalidRequest(_) => ErrorKind::Validation,
            Doc2MdError::DownloadFailed { .. }
            | Doc2MdError::DownloadTooLarge { .. }
            | Doc2MdError::DownloadTimeout { .. } => ErrorKind::Download,
            Doc2MdError::ConversionFailed { .. }
            | Doc2MdError::ConversionTimeout { .. }
            | Doc2MdError::EngineInit(_) => ErrorKind::Conversion,
            Doc2MdError::Staging { .. }
            | Doc2MdError::InvalidConfig(_)
            | Doc2MdError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// `true` when the caller is at fault.
    pub fn is_client_error(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }

    /// Stable snake_case identifier used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Doc2MdError::UnsupportedFormat { .. } => "unsupported_format",
            Doc2MdError::FileTooLarge { .. } => "file_too_large",
            Doc2MdError::MissingFile => "missing_file",
            Doc2MdError::InvalidUrl { .. } => "invalid_url",
            Doc2MdError::InvalidRequest(_) => "invalid_request",
            Doc2MdError::DownloadFailed { .. } => "download_failed",
            Doc2MdError::DownloadTooLarge { .. } => "download_too_large",
            Doc2MdError::DownloadTimeout { .. } => "download_timeout",
            Doc2MdError::ConversionFailed { .. } => "conversion_failed",
            Doc2MdError::ConversionTimeout { .. } => "conversion_timeout",
            Doc2MdError::EngineInit(_) => "engine_unavailable",
            Doc2MdError::Staging { .. } => "staging_failed",
            Doc2MdError::InvalidConfig(_) => "invalid_config",
            Doc2MdError::Internal(_) => "internal_error",
        }
    }
}

/// Render a byte count as mebibytes, e.g. `100.0MB`.
pub(crate) fn format_mib(bytes: &u64) -> String {
    format!("{:.1}MB", *bytes as f64 / 1024.0 / 1024.0)
}
