//! Markdown file responses for the `/download` endpoints.

use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};

pub const MARKDOWN_CONTENT_TYPE: &str = "text/markdown; charset=utf-8";

/// `report.pdf` → `report.md`; `README` → `README.md`.
///
/// Only the final extension is replaced, and any directory part of the
/// original name is dropped.
pub fn markdown_filename(original: &str) -> String {
    let name = original.rsplit(['/', '\\']).next().unwrap_or(original);
    let stem = match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    };
    let stem = if stem.is_empty() { "document" } else { stem };
    format!("{stem}.md")
}

/// RFC 5987 `Content-Disposition` value, safe for non-ASCII names.
pub fn content_disposition(filename: &str) -> String {
    format!(
        "attachment; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}

/// Markdown body served as a download named after `original_filename`.
pub fn markdown_attachment(markdown: String, original_filename: &str) -> Response {
    let disposition = content_disposition(&markdown_filename(original_filename));
    // Percent-encoding leaves only visible ASCII, which is always a valid header value.
    let disposition = HeaderValue::from_str(&disposition)
        .unwrap_or_else(|_| HeaderValue::from_static("attachment; filename=\"document.md\""));
    (
        [
            (CONTENT_TYPE, HeaderValue::from_static(MARKDOWN_CONTENT_TYPE)),
            (CONTENT_DISPOSITION, disposition),
        ],
        markdown,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_final_extension() {
        assert_eq!(markdown_filename("report.pdf"), "report.md");
        assert_eq!(markdown_filename("archive.v2.docx"), "archive.v2.md");
        assert_eq!(markdown_filename("README"), "README.md");
        assert_eq!(markdown_filename(".hidden"), ".hidden.md");
        assert_eq!(markdown_filename("dir/sub/slides.pptx"), "slides.md");
        assert_eq!(markdown_filename(""), "document.md");
    }

    #[test]
    fn non_ascii_names_are_percent_encoded() {
        assert_eq!(
            content_disposition(&markdown_filename("报告.pdf")),
            "attachment; filename*=UTF-8''%E6%8A%A5%E5%91%8A.md"
        );
        assert_eq!(
            content_disposition("my report.md"),
            "attachment; filename*=UTF-8''my%20report.md"
        );
    }

    #[test]
    fn attachment_headers() {
        let response = markdown_attachment("# Hi\n".into(), "a.html");
        assert_eq!(
            response.headers()[CONTENT_TYPE],
            "text/markdown; charset=utf-8"
        );
        assert_eq!(
            response.headers()[CONTENT_DISPOSITION],
            "attachment; filename*=UTF-8''a.md"
        );
    }
}
