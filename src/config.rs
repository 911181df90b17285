//! Service configuration.
//!
//! Everything the service reads at startup lives in [`ServiceConfig`], built
//! through [`ServiceConfig::builder()`]. `build()` validates and normalises the
//! values once so the rest of the crate can trust them: sizes are non-zero,
//! the worker pool has at least one slot, and every allow-listed extension is
//! lower-case with a leading dot.
//!
//! # Example
//! ```rust
//! use doc2md::ServiceConfig;
//!
//! let config = ServiceConfig::builder()
//!     .port(9000)
//!     .max_file_size(10 * 1024 * 1024)
//!     .supported_extensions(["pdf", ".DOCX"])
//!     .build()
//!     .unwrap();
//! assert!(config.is_supported(".docx"));
//! ```

use crate::engine::device::Device;
use crate::error::Doc2MdError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default allow-list of document extensions.
pub const DEFAULT_EXTENSIONS: &[&str] = &[".pdf", ".docx", ".pptx", ".xlsx", ".html", ".htm"];

const MIB: u64 = 1024 * 1024;

/// Configuration for the whole service: HTTP surface, scratch storage,
/// remote fetching and the conversion engine.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Service name reported by `/health`. Default: `Doc2MD`.
    pub app_name: String,
    /// Version reported by `/health`. Default: the crate version.
    pub app_version: String,

    pub host: String,
    pub port: u16,

    /// Largest accepted upload in bytes. Default: 100 MiB.
    pub max_file_size: u64,

    /// Scratch directory for uploaded documents. Default: `./tmp/uploads`.
    pub upload_dir: PathBuf,
    /// Scratch directory for downloaded documents. Default: `./tmp/temp`.
    pub temp_dir: PathBuf,

    /// Total time budget for one remote download in seconds. Default: 30.
    pub download_timeout_secs: u64,
    /// Largest accepted remote document in bytes. Default: 100 MiB.
    pub max_download_size: u64,

    /// Lower-case extensions with a leading dot, in configuration order.
    pub supported_extensions: Vec<String>,

    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            app_name: "Doc2MD".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_file_size: 100 * MIB,
            upload_dir: PathBuf::from("./tmp/uploads"),
            temp_dir: PathBuf::from("./tmp/temp"),
            download_timeout_secs: 30,
            max_download_size: 100 * MIB,
            supported_extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            engine: EngineConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Create a new builder seeded with the defaults.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    /// `host:port` for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    /// Whether `extension` (as produced by [`crate::pipeline::validate::file_extension`])
    /// is allow-listed.
    pub fn is_supported(&self, extension: &str) -> bool {
        self.supported_extensions
            .iter()
            .any(|e| e.eq_ignore_ascii_case(extension))
    }

    /// The allow-list as shown to callers, e.g. `.pdf,.docx`.
    pub fn supported_extensions_display(&self) -> String {
        self.supported_extensions.join(",")
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.config.app_name = name.into();
        self
    }

    pub fn app_version(mut self, version: impl Into<String>) -> Self {
        self.config.app_version = version.into();
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.config.max_file_size = bytes;
        self
    }

    pub fn upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.upload_dir = dir.into();
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_dir = dir.into();
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn max_download_size(mut self, bytes: u64) -> Self {
        self.config.max_download_size = bytes;
        self
    }

    /// Replace the allow-list. Entries are normalised in `build()`.
    pub fn supported_extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.supported_extensions = exts.into_iter().map(Into::into).collect();
        self
    }

    pub fn engine(mut self, engine: EngineConfig) -> Self {
        self.config.engine = engine;
        self
    }

    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.config.logging = logging;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(mut self) -> Result<ServiceConfig, Doc2MdError> {
        let c = &mut self.config;
        if c.max_file_size == 0 {
            return Err(Doc2MdError::InvalidConfig(
                "max_file_size must be greater than 0".into(),
            ));
        }
        if c.max_download_size == 0 {
            return Err(Doc2MdError::InvalidConfig(
                "max_download_size must be greater than 0".into(),
            ));
        }
        if c.download_timeout_secs == 0 {
            return Err(Doc2MdError::InvalidConfig(
                "download_timeout_secs must be greater than 0".into(),
            ));
        }
        if c.engine.workers == 0 {
            return Err(Doc2MdError::InvalidConfig(
                "engine workers must be ≥ 1".into(),
            ));
        }
        if c.engine.conversion_timeout_secs == Some(0) {
            return Err(Doc2MdError::InvalidConfig(
                "conversion_timeout_secs must be greater than 0 when set".into(),
            ));
        }

        let mut normalised: Vec<String> = Vec::with_capacity(c.supported_extensions.len());
        for raw in &c.supported_extensions {
            let trimmed = raw.trim().to_ascii_lowercase();
            if trimmed.is_empty() {
                continue;
            }
            let ext = if trimmed.starts_with('.') {
                trimmed
            } else {
                format!(".{trimmed}")
            };
            if ext.len() == 1 {
                return Err(Doc2MdError::InvalidConfig(format!(
                    "invalid extension '{raw}' in allow-list"
                )));
            }
            if !normalised.contains(&ext) {
                normalised.push(ext);
            }
        }
        if normalised.is_empty() {
            return Err(Doc2MdError::InvalidConfig(
                "supported_extensions must not be empty".into(),
            ));
        }
        c.supported_extensions = normalised;

        Ok(self.config)
    }
}

// ── Engine ───────────────────────────────────────────────────────────────

/// Which external engine performs the conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineBackend {
    /// The `docling` command-line tool. (default)
    #[default]
    Docling,
    /// Page rasterisation plus an OpenAI-compatible vision model.
    /// Needs the `vlm` cargo feature.
    Vlm,
}

impl fmt::Display for EngineBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EngineBackend::Docling => "docling",
            EngineBackend::Vlm => "vlm",
        })
    }
}

impl FromStr for EngineBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "docling" => Ok(EngineBackend::Docling),
            "vlm" => Ok(EngineBackend::Vlm),
            other => Err(format!("unknown engine '{other}' (expected docling or vlm)")),
        }
    }
}

/// Settings for the conversion engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub backend: EngineBackend,

    /// Requested device; resolved against the host at startup.
    pub device: Device,

    /// Ask the engine for OCR. Dropped by the fallback ladder when the
    /// installed engine cannot do it.
    pub ocr: bool,

    /// Conversions allowed to run at once. Default: 1.
    ///
    /// Each conversion occupies one blocking thread and, on GPU, a share of
    /// device memory. Raise only when the engine is known to cope.
    pub workers: usize,

    /// Give up waiting for a conversion after this many seconds. Default: none.
    pub conversion_timeout_secs: Option<u64>,

    /// Executable for the docling backend. Default: `docling` (looked up on `PATH`).
    pub docling_path: PathBuf,

    pub vlm: VlmConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: EngineBackend::default(),
            device: Device::Cpu,
            ocr: true,
            workers: 1,
            conversion_timeout_secs: None,
            docling_path: PathBuf::from("docling"),
            vlm: VlmConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn conversion_timeout(&self) -> Option<Duration> {
        self.conversion_timeout_secs.map(Duration::from_secs)
    }
}

/// Settings for the vision-model backend.
#[derive(Clone)]
pub struct VlmConfig {
    /// Base URL of an OpenAI-compatible API, e.g. `https://api.openai.com/v1`.
    pub endpoint: Option<String>,
    pub model: String,
    pub api_key: Option<String>,

    /// Pages transcribed at once. Default: 4.
    pub concurrency: usize,

    /// Retries per page on transient API failures. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    pub max_tokens: usize,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Rendering DPI for each page. Default: 150.
    pub dpi: u32,

    /// Cap on either dimension of a rendered page. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Per-request timeout for one page in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Directory holding the pdfium shared library. Default: system library.
    pub pdfium_library_dir: Option<PathBuf>,
}

impl Default for VlmConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: "gpt-4.1-nano".to_string(),
            api_key: None,
            concurrency: 4,
            max_retries: 3,
            retry_backoff_ms: 500,
            max_tokens: 4096,
            temperature: 0.1,
            dpi: 150,
            max_rendered_pixels: 2000,
            api_timeout_secs: 60,
            pdfium_library_dir: None,
        }
    }
}

impl fmt::Debug for VlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VlmConfig")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("concurrency", &self.concurrency)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("pdfium_library_dir", &self.pdfium_library_dir)
            .finish()
    }
}

// ── Logging ──────────────────────────────────────────────────────────────

/// Output format of the stderr log layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" | "text" | "pretty" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}' (expected compact or json)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset. Default: `info`.
    pub level: String,
    /// Also write logs to this file (appended, non-blocking).
    pub file: Option<PathBuf>,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            format: LogFormat::Compact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = ServiceConfig::builder().build().unwrap();
        assert_eq!(c.app_name, "Doc2MD");
        assert_eq!(c.port, 8000);
        assert_eq!(c.max_file_size, 104_857_600);
        assert_eq!(c.max_download_size, 104_857_600);
        assert_eq!(c.download_timeout_secs, 30);
        assert_eq!(c.engine.workers, 1);
        assert_eq!(c.engine.backend, EngineBackend::Docling);
        assert!(c.engine.conversion_timeout().is_none());
        assert_eq!(
            c.supported_extensions_display(),
            ".pdf,.docx,.pptx,.xlsx,.html,.htm"
        );
    }

    #[test]
    fn extensions_are_normalised() {
        let c = ServiceConfig::builder()
            .supported_extensions(["PDF", " .Docx ", ".pdf", ""])
            .build()
            .unwrap();
        assert_eq!(c.supported_extensions, vec![".pdf", ".docx"]);
        assert!(c.is_supported(".PDF"));
        assert!(!c.is_supported(".txt"));
    }

    #[test]
    fn rejects_empty_allow_list() {
        let err = ServiceConfig::builder()
            .supported_extensions(Vec::<String>::new())
            .build()
            .unwrap_err();
        assert!(matches!(err, Doc2MdError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_zero_limits() {
        assert!(ServiceConfig::builder().max_file_size(0).build().is_err());
        assert!(ServiceConfig::builder()
            .max_download_size(0)
            .build()
            .is_err());
        let engine = EngineConfig {
            workers: 0,
            ..EngineConfig::default()
        };
        assert!(ServiceConfig::builder().engine(engine).build().is_err());
    }

    #[test]
    fn api_key_is_redacted_in_debug() {
        let vlm = VlmConfig {
            api_key: Some("sk-secret".into()),
            ..VlmConfig::default()
        };
        let dbg = format!("{vlm:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn parses_backend_and_log_format() {
        assert_eq!("VLM".parse::<EngineBackend>().unwrap(), EngineBackend::Vlm);
        assert!("tesseract".parse::<EngineBackend>().is_err());
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
    }
}
