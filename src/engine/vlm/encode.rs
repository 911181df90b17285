//! Page images → base64 PNG data URIs for the vision API.
//!
//! PNG is lossless; JPEG artefacts around rendered glyphs hurt transcription
//! more than the larger payload does.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode `img` as `data:image/png;base64,…`.
pub fn png_data_uri(img: &DynamicImage) -> Result<String, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!(png_bytes = buf.len(), base64_bytes = b64.len(), "Encoded page image");
    Ok(format!("data:image/png;base64,{b64}"))
}
