//! OpenAI-compatible chat client for page transcription.
//!
//! One request per page: the system prompt plus the page as an `image_url`
//! content part. Transient failures (transport errors, 408, 429, 5xx) are
//! retried with exponential backoff, `retry_backoff_ms * 2^(attempt-1)`
//! capped at a minute; any other status fails the page immediately.

use crate::config::VlmConfig;
use crate::engine::vlm::prompts::PAGE_PROMPT;
use crate::error::Doc2MdError;
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

// ── Wire types ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: usize,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
enum Message<'a> {
    System { content: &'a str },
    User { content: Vec<ContentPart<'a>> },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    ImageUrl { image_url: ImageUrl<'a> },
}

#[derive(Debug, Serialize)]
struct ImageUrl<'a> {
    url: &'a str,
    detail: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

// ── Client ───────────────────────────────────────────────────────────────

enum Attempt {
    Retry(String),
    Fail(String),
}

/// Transcribes page images through a vision model.
#[derive(Debug, Clone)]
pub struct VisionClient {
    http: reqwest::Client,
    url: String,
    config: VlmConfig,
}

impl VisionClient {
    pub fn new(config: VlmConfig) -> Result<Self, Doc2MdError> {
        let endpoint = config.endpoint.as_deref().ok_or_else(|| {
            Doc2MdError::InvalidConfig("the vlm engine needs an endpoint (DOC2MD_VLM_ENDPOINT)".into())
        })?;
        let url = format!("{}/chat/completions", endpoint.trim_end_matches('/'));
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.api_timeout_secs))
            .build()
            .map_err(|e| Doc2MdError::EngineInit(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { http, url, config })
    }

    /// Transcribe every page, `concurrency` at a time, returning results in
    /// page order. The first page that exhausts its retries fails the document.
    pub async fn transcribe_all(&self, pages: Vec<String>) -> Result<Vec<String>, Doc2MdError> {
        stream::iter(pages.into_iter().enumerate())
            .map(|(idx, data_uri)| async move { self.transcribe(idx + 1, &data_uri).await })
            .buffered(self.config.concurrency.max(1))
            .try_collect()
            .await
    }

    /// Transcribe one page (1-based `page`).
    pub async fn transcribe(&self, page: usize, data_uri: &str) -> Result<String, Doc2MdError> {
        let started = Instant::now();
        let request = ChatRequest {
            model: &self.config.model,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            messages: vec![
                Message::System {
                    content: PAGE_PROMPT,
                },
                Message::User {
                    content: vec![ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: data_uri,
                            detail: "high",
                        },
                    }],
                },
            ],
        };

        let mut last_err = String::from("no attempt made");
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff = backoff_ms(self.config.retry_backoff_ms, attempt);
                warn!(
                    page,
                    attempt,
                    max_retries = self.config.max_retries,
                    backoff_ms = backoff,
                    "Retrying page transcription"
                );
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }

            match self.send(&request).await {
                Ok(response) => {
                    let usage = response.usage.unwrap_or(Usage {
                        prompt_tokens: 0,
                        completion_tokens: 0,
                    });
                    debug!(
                        page,
                        input_tokens = usage.prompt_tokens,
                        output_tokens = usage.completion_tokens,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Page transcribed"
                    );
                    return Ok(response
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|c| c.message.content)
                        .unwrap_or_default());
                }
                Err(Attempt::Retry(msg)) => {
                    warn!(page, attempt = attempt + 1, error = %msg, "Page transcription attempt failed");
                    last_err = msg;
                }
                Err(Attempt::Fail(msg)) => {
                    return Err(Doc2MdError::ConversionFailed {
                        detail: format!("page {page}: {msg}"),
                    });
                }
            }
        }

        Err(Doc2MdError::ConversionFailed {
            detail: format!(
                "page {page}: gave up after {} retries: {last_err}",
                self.config.max_retries
            ),
        })
    }

    async fn send(&self, request: &ChatRequest<'_>) -> Result<ChatResponse, Attempt> {
        let mut builder = self.http.post(&self.url).json(request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Attempt::Retry(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let msg = format!("HTTP {status}: {}", body.chars().take(500).collect::<String>());
            return Err(if is_transient(status) {
                Attempt::Retry(msg)
            } else {
                Attempt::Fail(msg)
            });
        }

        response
            .json::<ChatResponse>()
            .await
            .map_err(|e| Attempt::Fail(format!("malformed response: {e}")))
    }
}

/// Longest wait between two attempts.
const MAX_BACKOFF_MS: u64 = 60_000;

/// `base * 2^(attempt-1)`, capped at [`MAX_BACKOFF_MS`].
fn backoff_ms(base: u64, attempt: u32) -> u64 {
    let factor = 2u64.checked_pow(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    base.saturating_mul(factor).min(MAX_BACKOFF_MS)
}

fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}
