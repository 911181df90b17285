//! Format and size checks run before any staging I/O.

use crate::config::ServiceConfig;
use crate::error::Doc2MdError;

/// Lower-cased final extension of `filename`, dot included.
///
/// `report.PDF` → `.pdf`, `archive.tar.gz` → `.gz`, `README` → `""`.
/// Only the final path component is considered, so a dot in a directory
/// name never counts.
pub fn file_extension(filename: &str) -> String {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    match name.rsplit_once('.') {
        Some((_, ext)) => format!(".{}", ext.to_ascii_lowercase()),
        None => String::new(),
    }
}

/// Reject filenames whose extension is not allow-listed.
///
/// Returns the normalised extension on success.
pub fn validate_extension(filename: &str, config: &ServiceConfig) -> Result<String, Doc2MdError> {
    let extension = file_extension(filename);
    if extension.len() > 1 && config.is_supported(&extension) {
        Ok(extension)
    } else {
        Err(Doc2MdError::UnsupportedFormat {
            extension: if extension.is_empty() {
                "(none)".to_string()
            } else {
                extension
            },
            supported: config.supported_extensions_display(),
        })
    }
}

/// Reject payloads strictly larger than `limit` bytes.
pub fn validate_size(len: u64, limit: u64) -> Result<(), Doc2MdError> {
    if len > limit {
        Err(Doc2MdError::FileTooLarge { limit })
    } else {
        Ok(())
    }
}
