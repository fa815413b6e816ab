//! Completion gateway: one logical "complete these messages" operation with
//! retry and backoff in front of an OpenAI-compatible endpoint.

pub mod error;
pub mod openai;
pub mod types;
pub mod usage;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};

use openai::{ChatProvider, OpenAiAdapter};
use usage::{CallStatus, ProviderCallRecord, UsageSink as UsageSinkTrait};

pub use error::{ErrorContext, ProviderError};
pub use types::*;
pub use usage::{NoopUsageSink, StderrUsageSink, UsageSink};

#[async_trait::async_trait]
pub trait ChatGateway: Send + Sync {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError>;
}

// =============================================================================
// RETRY POLICY
// =============================================================================

/// Backoff schedule for the completion loop.
///
/// Generic failures double the delay from `initial_delay` up to `max_delay`
/// and then keep retrying at the ceiling. A rate-limit error carrying a
/// suggested wait sleeps for that wait plus `rate_limit_margin` instead, and
/// leaves the exponential schedule where it was.
///
/// `max_retries` and `deadline` are both unbounded by default: the loop only
/// exits on success. Callers that need bounded latency set one of them, or
/// wrap the call in a timeout.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub rate_limit_margin: Duration,
    /// Retries after the first attempt. `None` retries forever.
    pub max_retries: Option<u32>,
    /// Wall-clock bound on the whole loop, measured from the first attempt.
    pub deadline: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            rate_limit_margin: Duration::from_millis(100),
            max_retries: None,
            deadline: None,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// How long to sleep after `err`, given the current exponential delay.
    ///
    /// Returns the sleep and the delay to use for the next generic failure.
    pub fn next_delay(&self, current: Duration, err: &ProviderError) -> (Duration, Duration) {
        match err.suggested_wait() {
            Some(wait) => (wait + self.rate_limit_margin, current),
            None => {
                let sleep_for = current.min(self.max_delay);
                let next = current.saturating_mul(2).min(self.max_delay);
                (sleep_for, next)
            }
        }
    }

    fn allows_retry(&self, retries_done: u32, started: Instant, upcoming_sleep: Duration) -> bool {
        if let Some(max) = self.max_retries {
            if retries_done >= max {
                return false;
            }
        }
        if let Some(deadline) = self.deadline {
            if started.elapsed() + upcoming_sleep > deadline {
                return false;
            }
        }
        true
    }
}

// =============================================================================
// GATEWAY
// =============================================================================

pub struct ProviderGateway<U: UsageSinkTrait> {
    provider: Arc<dyn ChatProvider>,
    usage_sink: Arc<U>,
    policy: RetryPolicy,
}

#[async_trait::async_trait]
impl<U: UsageSinkTrait> ChatGateway for ProviderGateway<U> {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        ProviderGateway::chat(self, req).await
    }
}

impl<U: UsageSinkTrait> ProviderGateway<U> {
    /// Build from `OPENAI_*` environment variables with the default policy.
    ///
    /// Missing credentials surface here, before any batch is scheduled.
    pub fn from_env(usage_sink: Arc<U>) -> Result<Self, ProviderError> {
        let adapter = OpenAiAdapter::from_env()?;
        Ok(Self::with_config(adapter, usage_sink, RetryPolicy::default()))
    }

    pub fn with_config(
        adapter: OpenAiAdapter,
        usage_sink: Arc<U>,
        policy: RetryPolicy,
    ) -> Self {
        Self::with_provider(Arc::new(adapter), usage_sink, policy)
    }

    /// Build around any provider, e.g. a scripted one in tests.
    pub fn with_provider(
        provider: Arc<dyn ChatProvider>,
        usage_sink: Arc<U>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            usage_sink,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Complete `req`, retrying every failure per the retry policy.
    pub async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let started = Instant::now();
        let mut delay = self.policy.initial_delay;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let err = match self.provider.chat(&req).await {
                Ok(resp) => {
                    self.record_usage(&req, &resp, attempt, CallStatus::Success, None)
                        .await;
                    return Ok(resp);
                }
                Err(err) => err,
            };

            self.record_usage(&req, &ChatResponse::empty(), attempt, CallStatus::Error, Some(&err))
                .await;

            let (sleep_for, next) = self.policy.next_delay(delay, &err);
            if !self.policy.allows_retry(attempt - 1, started, sleep_for) {
                tracing::warn!(
                    model = %req.model,
                    caller = req.attribution.caller,
                    attempts = attempt,
                    error = %err,
                    "giving up on completion"
                );
                return Err(ProviderError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            tracing::debug!(
                model = %req.model,
                attempt,
                code = err.code(),
                sleep_ms = sleep_for.as_millis() as u64,
                "completion failed, retrying"
            );
            sleep(sleep_for).await;
            delay = next;
        }
    }

    /// Probe that `model` answers at all before an evaluation starts.
    ///
    /// Bad credentials and unknown models are returned immediately; anything
    /// else (service warming up, rate limits) is retried on the policy's
    /// schedule. Returns the model's reply.
    pub async fn check_availability(&self, model: &str) -> Result<String, ProviderError> {
        let req = ChatRequest::new(
            model,
            vec![Message::user("Please introduce yourself.")],
            Attribution::new("gateway::check_availability"),
        );

        let started = Instant::now();
        let mut delay = self.policy.initial_delay;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.provider.chat(&req).await {
                Ok(resp) => return Ok(resp.content),
                Err(err) if err.is_configuration() => return Err(err),
                Err(err) => {
                    let (sleep_for, next) = self.policy.next_delay(delay, &err);
                    if !self.policy.allows_retry(attempt - 1, started, sleep_for) {
                        return Err(ProviderError::RetriesExhausted {
                            attempts: attempt,
                            last: Box::new(err),
                        });
                    }
                    tracing::info!(model, error = %err, "model not available yet, waiting");
                    sleep(sleep_for).await;
                    delay = next;
                }
            }
        }
    }

    async fn record_usage(
        &self,
        req: &ChatRequest,
        resp: &ChatResponse,
        attempt: u32,
        status: CallStatus,
        error: Option<&ProviderError>,
    ) {
        let record = ProviderCallRecord::new("openai", req.model.clone(), req.attribution.caller)
            .attempt(attempt)
            .tokens(resp.input_tokens, resp.output_tokens)
            .run(req.attribution.run_id)
            .latency(resp.latency.as_millis() as u64)
            .request_id(error.and_then(|e| e.request_id()).map(str::to_string));

        let record = if status == CallStatus::Error {
            record.error(error.map(|e| e.code()).unwrap_or("provider_error"))
        } else {
            record
        };

        self.usage_sink.record(record).await;
    }
}
