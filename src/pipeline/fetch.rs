//! Remote fetcher: download a document over HTTP(S) into memory.
//!
//! The download has a single time budget covering connect, headers and body.
//! Size is enforced twice: an advertised `Content-Length` above the limit is
//! refused before any body byte is read, and the streamed body is counted
//! chunk by chunk so a missing or lying `Content-Length` cannot push the
//! buffer past the limit.

use crate::config::ServiceConfig;
use crate::error::Doc2MdError;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Filename used when neither the response nor the URL names the document.
pub const FALLBACK_FILENAME: &str = "document";

const USER_AGENT: &str = concat!("doc2md/", env!("CARGO_PKG_VERSION"));

/// A fully downloaded remote document.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub bytes: Bytes,
    pub filename: String,
}

/// Bounded HTTP downloader. Cheap to clone; share one per process.
#[derive(Debug, Clone)]
pub struct RemoteFetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_size: u64,
}

impl RemoteFetcher {
    pub fn new(timeout: Duration, max_size: u64) -> Result<Self, Doc2MdError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Doc2MdError::Internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            timeout,
            max_size,
        })
    }

    pub fn from_config(config: &ServiceConfig) -> Result<Self, Doc2MdError> {
        Self::new(config.download_timeout(), config.max_download_size)
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Download `url`, returning its bytes and a best-effort filename.
    pub async fn fetch(&self, url: &str) -> Result<FetchedDocument, Doc2MdError> {
        let parsed = parse_http_url(url)?;
        info!(url = %parsed, "Downloading remote document");

        match tokio::time::timeout(self.timeout, self.download(url, &parsed)).await {
            Ok(result) => result,
            Err(_) => Err(self.timeout_error(url)),
        }
    }

    async fn download(&self, url: &str, parsed: &Url) -> Result<FetchedDocument, Doc2MdError> {
        let response = self
            .client
            .get(parsed.clone())
            .send()
            .await
            .map_err(|e| self.transport_error(url, e))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(Doc2MdError::DownloadFailed {
                url: url.to_string(),
                reason: format!("HTTP {status}"),
            });
        }

        if let Some(len) = response.content_length() {
            if len > self.max_size {
                debug!(content_length = len, limit = self.max_size, "Refusing oversized download");
                return Err(self.too_large(url));
            }
        }

        let filename = resolve_filename(response.headers(), parsed);

        let capacity = response
            .content_length()
            .unwrap_or(0)
            .min(self.max_size) as usize;
        let mut body = BytesMut::with_capacity(capacity);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| self.transport_error(url, e))?;
            if (body.len() + chunk.len()) as u64 > self.max_size {
                debug!(
                    received = body.len() + chunk.len(),
                    limit = self.max_size,
                    "Aborting download that outgrew the limit"
                );
                return Err(self.too_large(url));
            }
            body.extend_from_slice(&chunk);
        }

        info!(bytes = body.len(), filename = %filename, "Download complete");
        Ok(FetchedDocument {
            bytes: body.freeze(),
            filename,
        })
    }

    fn transport_error(&self, url: &str, e: reqwest::Error) -> Doc2MdError {
        if e.is_timeout() {
            self.timeout_error(url)
        } else {
            Doc2MdError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    }

    fn timeout_error(&self, url: &str) -> Doc2MdError {
        Doc2MdError::DownloadTimeout {
            url: url.to_string(),
            secs: self.timeout.as_secs(),
        }
    }

    fn too_large(&self, url: &str) -> Doc2MdError {
        Doc2MdError::DownloadTooLarge {
            url: url.to_string(),
            limit: self.max_size,
        }
    }
}

/// Parse `url`, accepting only absolute `http`/`https` URLs.
pub fn parse_http_url(url: &str) -> Result<Url, Doc2MdError> {
    let parsed = Url::parse(url.trim()).map_err(|e| Doc2MdError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(Doc2MdError::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme '{other}' (expected http or https)"),
        }),
    }
}

/// Pick a filename for a downloaded document.
///
/// Order: `Content-Disposition` `filename=` (quotes stripped), then its
/// RFC 5987 `filename*=` form, then the last non-empty URL path segment, then
/// [`FALLBACK_FILENAME`].
pub fn resolve_filename(headers: &HeaderMap, url: &Url) -> String {
    headers
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(disposition_filename)
        .or_else(|| url_filename(url))
        .unwrap_or_else(|| FALLBACK_FILENAME.to_string())
}

fn disposition_filename(value: &str) -> Option<String> {
    let params = || value.split(';').map(str::trim);

    let plain = params().find_map(|p| {
        let (key, val) = p.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("filename")
            .then(|| val.trim().trim_matches(|c: char| c == '"' || c == '\'').to_string())
    });
    let extended = || {
        params().find_map(|p| {
            let (key, val) = p.split_once('=')?;
            if !key.trim().eq_ignore_ascii_case("filename*") {
                return None;
            }
            // charset'language'percent-encoded
            let encoded = val.trim().splitn(3, '\'').nth(2)?;
            urlencoding::decode(encoded).ok().map(|s| s.into_owned())
        })
    };

    plain
        .filter(|s| !s.is_empty())
        .or_else(extended)
        .map(|s| last_component(&s).to_string())
        .filter(|s| !s.is_empty())
}

/// Last non-empty path segment, so `/docs/` names the document `docs`.
fn url_filename(url: &Url) -> Option<String> {
    let last = url.path_segments()?.rev().find(|s| !s.is_empty())?;
    let decoded = urlencoding::decode(last)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| last.to_string());
    Some(last_component(&decoded).to_string()).filter(|s| !s.is_empty())
}

fn last_component(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(disposition: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(CONTENT_DISPOSITION, HeaderValue::from_str(disposition).unwrap());
        h
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn disposition_wins_over_url() {
        let name = resolve_filename(
            &headers("attachment; filename=\"report.docx\""),
            &url("https://example.com/files/ignored.pdf"),
        );
        assert_eq!(name, "report.docx");
    }

    #[test]
    fn unquoted_and_single_quoted_disposition() {
        let u = url("https://example.com/");
        assert_eq!(resolve_filename(&headers("attachment; filename=a.pdf"), &u), "a.pdf");
        assert_eq!(resolve_filename(&headers("inline; filename='b.xlsx'; size=12"), &u), "b.xlsx");
    }

    #[test]
    fn extended_disposition_is_decoded() {
        let name = resolve_filename(
            &headers("attachment; filename*=UTF-8''%E6%8A%A5%E5%91%8A.pdf"),
            &url("https://example.com/x"),
        );
        assert_eq!(name, "报告.pdf");
    }

    #[test]
    fn disposition_path_components_are_stripped() {
        let name = resolve_filename(
            &headers("attachment; filename=\"../../etc/passwd.pdf\""),
            &url("https://example.com/"),
        );
        assert_eq!(name, "passwd.pdf");
    }

    #[test]
    fn empty_disposition_falls_back_to_url() {
        let name = resolve_filename(
            &headers("attachment; filename=\"\""),
            &url("https://example.com/docs/slides.pptx?x=1"),
        );
        assert_eq!(name, "slides.pptx");
    }

    #[test]
    fn trailing_slash_uses_the_last_named_segment() {
        assert_eq!(
            resolve_filename(&HeaderMap::new(), &url("https://example.com/docs/")),
            "docs"
        );
        assert_eq!(
            resolve_filename(&HeaderMap::new(), &url("https://example.com/a/report.pdf//")),
            "report.pdf"
        );
        assert_eq!(
            resolve_filename(&HeaderMap::new(), &url("https://example.com/x/..%2Fsecret.pdf")),
            "secret.pdf"
        );
    }

    #[test]
    fn falls_back_to_document() {
        assert_eq!(
            resolve_filename(&HeaderMap::new(), &url("https://example.com/")),
            FALLBACK_FILENAME
        );
        assert_eq!(
            resolve_filename(&HeaderMap::new(), &url("https://example.com")),
            FALLBACK_FILENAME
        );
    }

    #[test]
    fn only_http_schemes_are_accepted() {
        assert!(parse_http_url("https://example.com/a.pdf").is_ok());
        assert!(parse_http_url("http://example.com/a.pdf").is_ok());
        assert!(matches!(
            parse_http_url("ftp://example.com/a.pdf"),
            Err(Doc2MdError::InvalidUrl { .. })
        ));
        assert!(matches!(
            parse_http_url("not a url"),
            Err(Doc2MdError::InvalidUrl { .. })
        ));
    }
}
