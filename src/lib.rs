//! # doc2md
//!
//! Document-to-Markdown conversion as an HTTP service.
//!
//! PDF, DOCX, PPTX, XLSX and HTML documents arrive as multipart uploads or
//! as URLs and leave as Markdown, either inside a JSON body or as a
//! downloadable `.md` file. Layout analysis, OCR and table recognition are
//! done by an external engine (the `docling` CLI by default, or a vision
//! model behind the `vlm` feature); this crate owns everything around it.
//!
//! ## Request Flow
//!
//! ```text
//! request
//!  │
//!  ├─ 1. Fetch     download URL inputs, bounded in time and size
//!  ├─ 2. Validate  extension allow-list and size limit, before any I/O
//!  ├─ 3. Stage     write bytes to a uniquely named scratch file
//!  ├─ 4. Convert   blocking engine call on a bounded worker pool
//!  ├─ 5. Release   delete the scratch file, with retries, on every path
//!  └─ 6. Respond   JSON or Markdown attachment
//! ```
//!
//! The engine is built once per process ([`EngineCell`]) and shared by all
//! requests; the server builds it before accepting connections.
//!
//! ## Library Use
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use doc2md::{ConversionPipeline, ConversionRequest, EngineCell, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(ServiceConfig::builder().build()?);
//!     let engine = Arc::new(EngineCell::from_config(config.engine.clone()));
//!     let pipeline = ConversionPipeline::new(config, engine)?;
//!     pipeline.prepare().await?;
//!
//!     let result = pipeline
//!         .run(ConversionRequest::Url { url: "https://example.com/report.pdf".into() })
//!         .await?;
//!     println!("{}", result.markdown);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | The `doc2md` binary (clap, anyhow, dotenvy) |
//! | `vlm`   | off     | Vision-model engine: pdfium rendering + OpenAI-compatible API |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod cleanup;
pub mod config;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod server;
pub mod telemetry;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    EngineBackend, EngineConfig, LogFormat, LoggingConfig, ServiceConfig, ServiceConfigBuilder,
    VlmConfig,
};
pub use engine::device::Device;
pub use engine::lifecycle::EngineCell;
pub use engine::{ConversionEngine, ConvertedDocument, DocumentEngine};
pub use error::{Doc2MdError, ErrorKind};
pub use pipeline::{ConversionPipeline, ConversionRequest, ConversionResult};
