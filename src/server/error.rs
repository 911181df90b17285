//! Error responses.
//!
//! Every failure, including on the download endpoints, is answered with
//!
//! ```json
//! {"success": false, "error": {"code": "unsupported_format", "message": "..."}}
//! ```

use crate::error::{Doc2MdError, ErrorKind};
use axum::extract::multipart::MultipartError;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{error, warn};

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

/// A [`Doc2MdError`] on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub Doc2MdError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match (&self.0, self.0.kind()) {
            (_, ErrorKind::Validation) => StatusCode::BAD_REQUEST,
            (Doc2MdError::DownloadTimeout { .. }, _) => StatusCode::GATEWAY_TIMEOUT,
            (_, ErrorKind::Download) => StatusCode::BAD_GATEWAY,
            (_, ErrorKind::Conversion) | (_, ErrorKind::Internal) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<Doc2MdError> for ApiError {
    fn from(err: Doc2MdError) -> Self {
        ApiError(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(Doc2MdError::InvalidRequest(rejection.body_text()))
    }
}

/// Malformed multipart bodies. Oversized bodies are mapped to
/// [`Doc2MdError::FileTooLarge`] by the upload handler before this applies.
impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError(Doc2MdError::InvalidRequest(format!(
            "invalid multipart body: {}",
            err.body_text()
        )))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), code = self.0.code(), error = %self.0, "Request failed");
        } else {
            warn!(status = status.as_u16(), code = self.0.code(), error = %self.0, "Request rejected");
        }

        let body = ErrorBody {
            success: false,
            error: ErrorDetail {
                code: self.0.code(),
                message: self.0.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn status_mapping() {
        let status = |e: Doc2MdError| ApiError(e).status();
        assert_eq!(status(Doc2MdError::MissingFile), StatusCode::BAD_REQUEST);
        assert_eq!(
            status(Doc2MdError::DownloadFailed {
                url: "u".into(),
                reason: "HTTP 404 Not Found".into()
            }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status(Doc2MdError::DownloadTooLarge { url: "u".into(), limit: 1 }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status(Doc2MdError::DownloadTimeout { url: "u".into(), secs: 1 }),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status(Doc2MdError::ConversionFailed { detail: "x".into() }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status(Doc2MdError::Internal("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn body_shape() {
        let response = ApiError(Doc2MdError::FileTooLarge { limit: 1024 * 1024 }).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "file_too_large");
        assert!(json["error"]["message"].as_str().unwrap().contains("1.0MB"));
    }
}
