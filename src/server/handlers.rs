//! Route handlers.

use crate::error::Doc2MdError;
use crate::pipeline::validate::{validate_extension, validate_size};
use crate::pipeline::ConversionRequest;
use crate::server::download::markdown_attachment;
use crate::server::error::ApiError;
use crate::server::models::{
    ConvertResponse, HealthResponse, SupportedFormatsResponse, UrlConvertRequest,
};
use crate::server::AppState;
use axum::extract::multipart::{Field, MultipartError};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use bytes::BytesMut;
use tracing::{debug, info};

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let config = state.pipeline.config();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: config.app_name.clone(),
        version: config.app_version.clone(),
    })
}

pub async fn supported_formats(State(state): State<AppState>) -> Json<SupportedFormatsResponse> {
    let config = state.pipeline.config();
    Json(SupportedFormatsResponse {
        formats: config.supported_extensions.clone(),
        max_file_size: config.max_file_size,
    })
}

pub async fn convert_file(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ConvertResponse>, ApiError> {
    let request = read_upload(&state, multipart).await?;
    let result = state.pipeline.run(request).await?;
    Ok(Json(result.into()))
}

pub async fn convert_file_download(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let request = read_upload(&state, multipart).await?;
    let result = state.pipeline.run(request).await?;
    Ok(markdown_attachment(result.markdown, &result.filename))
}

pub async fn convert_url(
    State(state): State<AppState>,
    payload: Result<Json<UrlConvertRequest>, JsonRejection>,
) -> Result<Json<ConvertResponse>, ApiError> {
    let Json(body) = payload?;
    let result = state.pipeline.run(ConversionRequest::Url { url: body.url }).await?;
    Ok(Json(result.into()))
}

pub async fn convert_url_download(
    State(state): State<AppState>,
    payload: Result<Json<UrlConvertRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = payload?;
    let result = state.pipeline.run(ConversionRequest::Url { url: body.url }).await?;
    Ok(markdown_attachment(result.markdown, &result.filename))
}

// ── Upload reading ───────────────────────────────────────────────────────

/// Pull the `file` field out of the form, checking its extension before
/// reading and its size while reading.
async fn read_upload(
    state: &AppState,
    mut multipart: Multipart,
) -> Result<ConversionRequest, ApiError> {
    let config = state.pipeline.config();
    let limit = config.max_file_size;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return Err(Doc2MdError::MissingFile.into()),
            Err(err) => return Err(multipart_error(err, limit)),
        };
        if field.name() != Some("file") {
            continue;
        }

        let filename = field
            .file_name()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .ok_or(Doc2MdError::MissingFile)?;
        validate_extension(&filename, config)?;

        let bytes = read_limited(field, limit).await?;
        info!(filename = %filename, bytes = bytes.len(), "Upload received");
        return Ok(ConversionRequest::Upload {
            bytes: bytes.freeze(),
            filename,
        });
    }
}

async fn read_limited(mut field: Field<'_>, limit: u64) -> Result<BytesMut, ApiError> {
    let mut buf = BytesMut::new();
    loop {
        match field.chunk().await {
            Ok(Some(chunk)) => {
                let total = (buf.len() + chunk.len()) as u64;
                if let Err(e) = validate_size(total, limit) {
                    debug!(received = total, limit, "Upload exceeded the size limit");
                    return Err(e.into());
                }
                buf.extend_from_slice(&chunk);
            }
            Ok(None) => return Ok(buf),
            Err(err) => return Err(multipart_error(err, limit)),
        }
    }
}

fn multipart_error(err: MultipartError, limit: u64) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Doc2MdError::FileTooLarge { limit }.into()
    } else {
        err.into()
    }
}
