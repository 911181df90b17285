//! PDF rasterisation via pdfium.
//!
//! Runs on the conversion worker thread. pdfium handles are not `Send`, so
//! each conversion binds the library, renders every page and drops the
//! binding before returning images.
//!
//! `max_rendered_pixels` caps the longest edge regardless of physical page
//! size; an A0 poster at 150 DPI would otherwise be 12,000 × 17,000 px.

use crate::error::Doc2MdError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Bind the pdfium shared library from `dir`, or the system library.
pub fn bind_pdfium(dir: Option<&Path>) -> Result<Pdfium, Doc2MdError> {
    let bindings = match dir {
        Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| {
        Doc2MdError::EngineInit(format!(
            "failed to load the pdfium library{}: {e}",
            dir.map(|d| format!(" from '{}'", d.display()))
                .unwrap_or_default()
        ))
    })?;
    Ok(Pdfium::new(bindings))
}

/// Page rasteriser bound to one pdfium location.
#[derive(Debug, Clone)]
pub struct PageRenderer {
    library_dir: Option<PathBuf>,
    max_pixels: u32,
}

impl PageRenderer {
    pub fn new(library_dir: Option<PathBuf>, max_pixels: u32) -> Self {
        Self {
            library_dir,
            max_pixels: max_pixels.max(100),
        }
    }

    /// Check that pdfium can be loaded at all.
    pub fn probe(&self) -> Result<(), Doc2MdError> {
        bind_pdfium(self.library_dir.as_deref()).map(drop)
    }

    /// Rasterise every page of `pdf_path`, in page order.
    pub fn render_all(&self, pdf_path: &Path) -> Result<Vec<DynamicImage>, Doc2MdError> {
        let pdfium = bind_pdfium(self.library_dir.as_deref())?;

        let document = pdfium
            .load_pdf_from_file(pdf_path, None)
            .map_err(|e| Doc2MdError::ConversionFailed {
                detail: format!("could not open PDF: {e:?}"),
            })?;

        let pages = document.pages();
        info!(pages = pages.len(), path = %pdf_path.display(), "PDF loaded");

        let render_config = PdfRenderConfig::new()
            .set_target_width(self.max_pixels as i32)
            .set_maximum_height(self.max_pixels as i32);

        let mut images = Vec::with_capacity(pages.len() as usize);
        for (idx, page) in pages.iter().enumerate() {
            let bitmap = page.render_with_config(&render_config).map_err(|e| {
                Doc2MdError::ConversionFailed {
                    detail: format!("failed to render page {}: {e:?}", idx + 1),
                }
            })?;
            let image = bitmap.as_image();
            debug!(
                page = idx + 1,
                width = image.width(),
                height = image.height(),
                "Rendered page"
            );
            images.push(image);
        }
        Ok(images)
    }
}
