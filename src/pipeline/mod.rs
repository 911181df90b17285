//! The conversion request pipeline.
//!
//! ```text
//! Upload ─────────────────┐
//!                         ├─▶ validate ──▶ stage ──▶ engine.convert ──▶ release ──▶ ConversionResult
//! Url ──▶ fetch ──────────┘   (ext, size)  (scratch)  (worker pool)     (always)
//! ```
//!
//! 1. [`fetch`]: bounded streaming download for URL requests
//! 2. [`validate`]: extension allow-list and size checks, before any I/O
//! 3. [`staging`]: write the bytes to a scratch file the engine can open
//! 4. [`crate::engine`]: the blocking conversion, on a worker thread
//!
//! The staged file is released whether or not the conversion succeeds.

pub mod fetch;
pub mod staging;
pub mod validate;

use crate::config::ServiceConfig;
use crate::engine::lifecycle::EngineCell;
use crate::error::Doc2MdError;
use bytes::Bytes;
use fetch::RemoteFetcher;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Where a document comes from. Exactly one source per request.
#[derive(Debug, Clone)]
pub enum ConversionRequest {
    Upload { bytes: Bytes, filename: String },
    Url { url: String },
}

impl ConversionRequest {
    /// Upload request for a file on local disk.
    ///
    /// Extension and size are checked from the name and metadata before the
    /// file is read, so an oversized file is never loaded.
    pub async fn from_local_file(path: &Path, config: &ServiceConfig) -> Result<Self, Doc2MdError> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        validate::validate_extension(&filename, config)?;

        let unreadable = |e: std::io::Error| {
            Doc2MdError::InvalidRequest(format!("cannot read '{}': {e}", path.display()))
        };
        let metadata = tokio::fs::metadata(path).await.map_err(unreadable)?;
        validate::validate_size(metadata.len(), config.max_file_size)?;

        let bytes = tokio::fs::read(path).await.map_err(unreadable)?;
        Ok(ConversionRequest::Upload {
            bytes: bytes.into(),
            filename,
        })
    }
}

/// A finished conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionResult {
    pub markdown: String,
    /// The original document's filename.
    pub filename: String,
    /// Set for URL requests.
    pub source_url: Option<String>,
}

/// Runs [`ConversionRequest`]s end to end. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ConversionPipeline {
    config: Arc<ServiceConfig>,
    engine: Arc<EngineCell>,
    fetcher: RemoteFetcher,
}

impl ConversionPipeline {
    pub fn new(config: Arc<ServiceConfig>, engine: Arc<EngineCell>) -> Result<Self, Doc2MdError> {
        let fetcher = RemoteFetcher::from_config(&config)?;
        Ok(Self {
            config,
            engine,
            fetcher,
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<EngineCell> {
        &self.engine
    }

    /// Create both scratch directories.
    pub async fn prepare(&self) -> Result<(), Doc2MdError> {
        staging::ensure_dir(&self.config.upload_dir).await?;
        staging::ensure_dir(&self.config.temp_dir).await
    }

    pub async fn run(&self, request: ConversionRequest) -> Result<ConversionResult, Doc2MdError> {
        let started = Instant::now();

        // ── Step 1: Obtain bytes ─────────────────────────────────────────
        let (bytes, filename, source_url, scratch) = match request {
            ConversionRequest::Upload { bytes, filename } => {
                validate::validate_extension(&filename, &self.config)?;
                validate::validate_size(bytes.len() as u64, self.config.max_file_size)?;
                (bytes, filename, None, &self.config.upload_dir)
            }
            ConversionRequest::Url { url } => {
                let fetched = self.fetcher.fetch(&url).await?;
                (fetched.bytes, fetched.filename, Some(url), &self.config.temp_dir)
            }
        };

        // ── Step 2: Validate ─────────────────────────────────────────────
        let extension = validate::validate_extension(&filename, &self.config)?;
        debug!(filename = %filename, extension = %extension, bytes = bytes.len(), "Request validated");

        // ── Step 3: Engine, stage, convert, release ──────────────────────
        let engine = self.engine.get_or_create().await?;
        let staged = staging::stage(scratch, bytes, &extension).await?;
        let converted = engine.convert(staged.path()).await;
        staged.release().await;
        let markdown = converted?.into_markdown();

        info!(
            filename = %filename,
            url = source_url.as_deref().unwrap_or(""),
            markdown_bytes = markdown.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Request converted"
        );

        Ok(ConversionResult {
            markdown,
            filename,
            source_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_file_size: u64) -> ServiceConfig {
        ServiceConfig::builder()
            .max_file_size(max_file_size)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn local_file_becomes_upload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Report.DOCX");
        std::fs::write(&path, b"docx bytes").unwrap();

        match ConversionRequest::from_local_file(&path, &config(1024)).await.unwrap() {
            ConversionRequest::Upload { bytes, filename } => {
                assert_eq!(&bytes[..], b"docx bytes");
                assert_eq!(filename, "Report.DOCX");
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversized_local_file_is_rejected_from_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.pdf");
        std::fs::write(&path, vec![0u8; 64]).unwrap();

        let err = ConversionRequest::from_local_file(&path, &config(16))
            .await
            .unwrap_err();
        assert!(matches!(err, Doc2MdError::FileTooLarge { limit: 16 }), "{err:?}");
    }

    #[tokio::test]
    async fn local_file_with_unsupported_extension_is_not_read() {
        // The path does not exist: the extension check fires first.
        let err = ConversionRequest::from_local_file(Path::new("/nowhere/tool.exe"), &config(16))
            .await
            .unwrap_err();
        assert!(matches!(err, Doc2MdError::UnsupportedFormat { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn missing_local_file_is_invalid_request() {
        let err = ConversionRequest::from_local_file(Path::new("/nowhere/a.pdf"), &config(16))
            .await
            .unwrap_err();
        assert!(matches!(err, Doc2MdError::InvalidRequest(_)), "{err:?}");
    }
}
