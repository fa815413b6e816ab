//! Adapter for OpenAI-compatible chat completion endpoints.
//!
//! One call, one HTTP round-trip. Retries live in [`super::ProviderGateway`].

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{ErrorContext, ProviderError};
use super::types::*;

// =============================================================================
// TRAIT
// =============================================================================

/// Trait for chat completion providers.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;
}

// =============================================================================
// ADAPTER
// =============================================================================

const PROVIDER: &str = "openai";

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Maximum allowed response body (1MB).
const MAX_RESPONSE_LEN: usize = 1_024 * 1_024;

/// OpenAI-compatible chat completions adapter.
#[derive(Debug, Clone)]
pub struct OpenAiAdapter {
    client: reqwest::Client,
    base_url: String,
}

impl OpenAiAdapter {
    /// Create from API key against the default endpoint.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ProviderError> {
        Self::with_config(api_key, DEFAULT_BASE_URL, Duration::from_secs(120))
    }

    /// Create from environment variables.
    ///
    /// `OPENAI_API_KEY` is required. `OPENAI_BASE_URL` points the adapter at a
    /// self-hosted or proxy endpoint; `OPENAI_TIMEOUT_SECONDS` bounds a single call.
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ProviderError::config("OPENAI_API_KEY not set"))?;

        let base_url =
            std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into());

        let timeout = std::env::var("OPENAI_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(120));

        Self::with_config(api_key, base_url, timeout)
    }

    /// Create with custom configuration.
    pub fn with_config(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let api_key = api_key.into();
        let base_url = base_url.into().trim_end_matches('/').to_string();

        if api_key.trim().is_empty() {
            return Err(ProviderError::config("API key is empty"));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let auth_value = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| ProviderError::config("Invalid API key format"))?;
        headers.insert(AUTHORIZATION, auth_value);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| ProviderError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn extract_request_id(headers: &HeaderMap) -> Option<String> {
        headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }

    fn retry_after_header(headers: &HeaderMap) -> Option<Duration> {
        headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<f64>().ok())
            .and_then(seconds_to_duration)
    }
}

/// Suggested wait from a rate-limit body.
///
/// Some hosted inference services answer 429 with
/// `{"detail": {"wait_seconds": 2.5}}`; that value wins over `Retry-After`.
pub fn suggested_wait_from_body(body: &str) -> Option<Duration> {
    let value: Value = serde_json::from_str(body).ok()?;
    let wait = value.get("detail")?.get("wait_seconds")?;
    let secs = match wait {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    seconds_to_duration(secs)
}

fn seconds_to_duration(secs: f64) -> Option<Duration> {
    if secs.is_finite() && secs >= 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}

// =============================================================================
// API TYPES
// =============================================================================

#[derive(Serialize)]
struct ChatApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl<'a> From<&'a Message> for ApiMessage<'a> {
    fn from(m: &'a Message) -> Self {
        Self {
            role: m.role.as_str(),
            content: &m.content,
        }
    }
}

#[derive(Deserialize)]
struct ChatApiResponse {
    choices: Option<Vec<Choice>>,
    usage: Option<Usage>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
    code: Option<Value>,
}

fn error_message(body: &str) -> (Option<String>, Option<String>) {
    match serde_json::from_str::<ChatApiResponse>(body) {
        Ok(ChatApiResponse {
            error: Some(error), ..
        }) => {
            let code = error.code.map(|c| match c {
                Value::String(s) => s,
                other => other.to_string(),
            });
            (error.message, code)
        }
        _ => (None, None),
    }
}

// =============================================================================
// CHAT PROVIDER IMPL
// =============================================================================

#[async_trait]
impl ChatProvider for OpenAiAdapter {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let start = Instant::now();

        let api_req = ChatApiRequest {
            model: &req.model,
            messages: req.messages.iter().map(ApiMessage::from).collect(),
            temperature: req.temperature,
            max_tokens: req.max_tokens,
        };

        let mut response = self
            .client
            .post(self.chat_url())
            .json(&api_req)
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        let request_id = Self::extract_request_id(&headers);

        // Stream response to enforce size limit
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            let new_len = bytes.len() + chunk.len();
            if new_len > MAX_RESPONSE_LEN {
                return Err(ProviderError::provider(
                    PROVIDER,
                    format!("Response too large: {new_len} bytes"),
                ));
            }
            bytes.extend_from_slice(&chunk);
        }

        let body = String::from_utf8_lossy(&bytes).to_string();

        let ctx = ErrorContext::new().with_status(status.as_u16());
        let ctx = match &request_id {
            Some(id) => ctx.with_request_id(id),
            None => ctx,
        };

        if !status.is_success() {
            let (message, code) = error_message(&body);
            let ctx = match code {
                Some(code) => ctx.with_code(code),
                None => ctx,
            };
            let message = message.unwrap_or_else(|| format!("HTTP {}", status.as_u16()));

            return Err(match status.as_u16() {
                429 => {
                    let wait = suggested_wait_from_body(&body)
                        .or_else(|| Self::retry_after_header(&headers));
                    ProviderError::rate_limited(wait, ctx)
                }
                401 | 403 => ProviderError::Unauthorized {
                    message,
                    context: Some(ctx),
                },
                404 => ProviderError::UnknownModel {
                    model: req.model.clone(),
                    message,
                    context: Some(ctx),
                },
                _ => ProviderError::provider_with_context(PROVIDER, message, ctx),
            });
        }

        let parsed: ChatApiResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::provider_with_context(
                PROVIDER,
                format!("Invalid JSON: {e}"),
                ctx.clone(),
            )
        })?;

        if let Some(error) = parsed.error {
            return Err(ProviderError::provider_with_context(
                PROVIDER,
                error.message.unwrap_or_default(),
                ctx,
            ));
        }

        let choice = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| {
                ProviderError::provider_with_context(PROVIDER, "No choices in response", ctx)
            })?;

        let content = choice
            .message
            .and_then(|m| m.content)
            .unwrap_or_default();

        let (input_tokens, output_tokens) = parsed
            .usage
            .map(|u| (u.prompt_tokens.unwrap_or(0), u.completion_tokens.unwrap_or(0)))
            .unwrap_or((0, 0));

        Ok(ChatResponse {
            content,
            input_tokens,
            output_tokens,
            latency: start.elapsed(),
            finish_reason: FinishReason::from(choice.finish_reason),
        })
    }
}
