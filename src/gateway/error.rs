//! Error types for the completion gateway.

use std::time::Duration;
use thiserror::Error;

/// Additional context from provider errors for debugging.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// HTTP status code from the provider.
    pub http_status: Option<u16>,
    /// Provider-specific error code (e.g. "rate_limit_exceeded").
    pub provider_code: Option<String>,
    /// Request ID from provider (x-request-id header).
    pub request_id: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }
}

/// Errors that can occur when calling the completion service.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Rate limited. `retry_after` is the service's suggested wait, if it gave one.
    #[error("rate limited, suggested wait {retry_after:?}")]
    RateLimited {
        retry_after: Option<Duration>,
        context: Option<ErrorContext>,
    },

    /// Credentials were rejected (401/403).
    #[error("unauthorized: {message}")]
    Unauthorized {
        message: String,
        context: Option<ErrorContext>,
    },

    /// The requested model does not exist on the service (404).
    #[error("unknown model '{model}': {message}")]
    UnknownModel {
        model: String,
        message: String,
        context: Option<ErrorContext>,
    },

    /// Provider error.
    #[error("{provider} error: {message}")]
    Provider {
        provider: &'static str,
        message: String,
        context: Option<ErrorContext>,
    },

    /// HTTP/network error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration error (missing API key, etc.).
    #[error("configuration error: {0}")]
    Config(String),

    /// The retry policy's attempt or deadline bound was reached.
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<ProviderError>,
    },
}

impl ProviderError {
    /// Create a rate limited error.
    pub fn rate_limited(retry_after: Option<Duration>, context: ErrorContext) -> Self {
        Self::RateLimited {
            retry_after,
            context: Some(context),
        }
    }

    /// Create a provider error.
    pub fn provider(provider: &'static str, message: impl Into<String>) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
            context: None,
        }
    }

    /// Create a provider error with context.
    pub fn provider_with_context(
        provider: &'static str,
        message: impl Into<String>,
        context: ErrorContext,
    ) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
            context: Some(context),
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether this error means the run is misconfigured (bad credentials, unknown model).
    ///
    /// The completion loop still retries these; the availability probe treats them as fatal.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized { .. } | Self::UnknownModel { .. } | Self::Config(_)
        )
    }

    /// Suggested wait reported by the service, for rate-limit errors.
    pub fn suggested_wait(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Get a short error code for logging.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::Unauthorized { .. } => "unauthorized",
            Self::UnknownModel { .. } => "unknown_model",
            Self::Provider { .. } => "provider_error",
            Self::Http(_) => "http_error",
            Self::Config(_) => "config_error",
            Self::RetriesExhausted { .. } => "retries_exhausted",
        }
    }

    /// Get the error context if available.
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::RateLimited { context, .. } => context.as_ref(),
            Self::Unauthorized { context, .. } => context.as_ref(),
            Self::UnknownModel { context, .. } => context.as_ref(),
            Self::Provider { context, .. } => context.as_ref(),
            Self::Http(_) => None,
            Self::Config(_) => None,
            Self::RetriesExhausted { last, .. } => last.context(),
        }
    }

    /// Get the request ID if available.
    pub fn request_id(&self) -> Option<&str> {
        self.context().and_then(|c| c.request_id.as_deref())
    }
}
