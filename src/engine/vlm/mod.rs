//! Vision-model backend (cargo feature `vlm`).
//!
//! ```text
//! PDF ──▶ render ──▶ encode ──▶ client ──▶ postprocess ──▶ Markdown
//!        (pdfium)   (PNG/b64)  (chat API)  (cleanup)
//! ```
//!
//! Rendering and encoding run on the conversion worker thread; the page
//! requests are driven from that thread on the runtime it belongs to. The
//! device and OCR settings of a profile have no meaning here and are ignored.

pub mod client;
pub mod encode;
pub mod postprocess;
pub mod prompts;
pub mod render;

use crate::config::VlmConfig;
use crate::engine::{BuildError, ConvertedDocument, DocumentEngine, EngineFactory, EngineProfile};
use crate::error::Doc2MdError;
use crate::pipeline::validate::file_extension;
use client::VisionClient;
use render::PageRenderer;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Builds [`VlmEngine`]s from a [`VlmConfig`].
#[derive(Debug)]
pub struct VlmFactory {
    config: VlmConfig,
}

impl VlmFactory {
    pub fn new(config: VlmConfig) -> Self {
        Self { config }
    }
}

impl EngineFactory for VlmFactory {
    fn name(&self) -> &str {
        "vlm"
    }

    fn build(&self, profile: &EngineProfile) -> Result<Arc<dyn DocumentEngine>, BuildError> {
        debug!(profile = %profile, "vlm engine ignores device and OCR settings");
        let client = VisionClient::new(self.config.clone()).map_err(BuildError::Fatal)?;
        let renderer = PageRenderer::new(
            self.config.pdfium_library_dir.clone(),
            self.config.max_rendered_pixels,
        );
        renderer.probe().map_err(BuildError::Fatal)?;
        Ok(Arc::new(VlmEngine { client, renderer }))
    }
}

/// Converts PDFs by transcribing rendered pages with a vision model.
#[derive(Debug)]
pub struct VlmEngine {
    client: VisionClient,
    renderer: PageRenderer,
}

impl DocumentEngine for VlmEngine {
    fn name(&self) -> &str {
        "vlm"
    }

    fn convert(&self, path: &Path) -> Result<ConvertedDocument, Doc2MdError> {
        let name = path.to_string_lossy();
        if file_extension(&name) != ".pdf" {
            return Err(Doc2MdError::ConversionFailed {
                detail: format!("the vlm engine only converts PDF documents, got '{name}'"),
            });
        }

        let images = self.renderer.render_all(path)?;
        let pages = images
            .iter()
            .map(encode::png_data_uri)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| Doc2MdError::ConversionFailed {
                detail: format!("failed to encode page image: {e}"),
            })?;
        drop(images);

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            Doc2MdError::Internal("vlm engine must run on a tokio blocking thread".into())
        })?;
        let transcribed = runtime.block_on(self.client.transcribe_all(pages))?;

        let page_count = transcribed.len();
        let markdown =
            postprocess::join_pages(transcribed.iter().map(|p| postprocess::clean_page(p)));
        info!(pages = page_count, markdown_bytes = markdown.len(), "vlm conversion complete");
        Ok(ConvertedDocument::new(markdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_without_endpoint_is_fatal() {
        let factory = VlmFactory::new(VlmConfig::default());
        assert!(matches!(
            factory.build(&EngineProfile::default()),
            Err(BuildError::Fatal(Doc2MdError::InvalidConfig(_)))
        ));
    }

    #[tokio::test]
    async fn non_pdf_input_is_a_conversion_error() {
        let engine = VlmEngine {
            client: VisionClient::new(VlmConfig {
                endpoint: Some("http://127.0.0.1:9".into()),
                ..VlmConfig::default()
            })
            .unwrap(),
            renderer: PageRenderer::new(None, 2000),
        };
        let err = engine.convert(Path::new("/tmp/sheet.xlsx")).unwrap_err();
        assert!(matches!(err, Doc2MdError::ConversionFailed { .. }));
    }
}
