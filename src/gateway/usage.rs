//! Usage tracking via the UsageSink trait.
//!
//! The gateway reports every attempt through a UsageSink, so a run can be
//! audited for retries and token spend without the gateway knowing where the
//! records go:
//! - the CLI uses NoopUsageSink or StderrUsageSink
//! - tests use NoopUsageSink or their own recording sink

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Status of a provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Success,
    Error,
}

/// Record of a single completion attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderCallRecord {
    /// Provider name.
    pub provider: &'static str,
    /// Model used.
    pub model: String,
    /// 1-based attempt number within one logical completion.
    pub attempt: u32,
    /// Input tokens consumed.
    pub input_tokens: u32,
    /// Output tokens generated.
    pub output_tokens: u32,
    /// Evaluation run this call belongs to (if any).
    pub run_id: Option<Uuid>,
    /// Latency in milliseconds.
    pub latency_ms: u64,
    /// Call status.
    pub status: CallStatus,
    /// Error code if status is Error.
    pub error_code: Option<String>,
    /// Which code path made this call.
    pub caller: &'static str,
    /// Provider request ID (for debugging).
    pub request_id: Option<String>,
    /// When the call was made.
    pub timestamp: DateTime<Utc>,
}

impl ProviderCallRecord {
    /// Create a new record with required fields, defaulting others.
    pub fn new(provider: &'static str, model: impl Into<String>, caller: &'static str) -> Self {
        Self {
            provider,
            model: model.into(),
            attempt: 1,
            input_tokens: 0,
            output_tokens: 0,
            run_id: None,
            latency_ms: 0,
            status: CallStatus::Success,
            error_code: None,
            caller,
            request_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn tokens(mut self, input: u32, output: u32) -> Self {
        self.input_tokens = input;
        self.output_tokens = output;
        self
    }

    pub fn run(mut self, run_id: Option<Uuid>) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn latency(mut self, ms: u64) -> Self {
        self.latency_ms = ms;
        self
    }

    pub fn error(mut self, code: impl Into<String>) -> Self {
        self.status = CallStatus::Error;
        self.error_code = Some(code.into());
        self
    }

    pub fn request_id(mut self, id: Option<String>) -> Self {
        self.request_id = id;
        self
    }
}

/// Trait for recording provider call usage.
///
/// Implement this trait to customize where usage data is stored.
#[async_trait]
pub trait UsageSink: Send + Sync {
    /// Record a provider call. This should be fire-and-forget:
    /// failures should be logged but not propagated.
    async fn record(&self, record: ProviderCallRecord);
}

/// No-op usage sink that discards all records.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopUsageSink;

#[async_trait]
impl UsageSink for NoopUsageSink {
    async fn record(&self, _record: ProviderCallRecord) {}
}

/// Usage sink that writes one JSON line per call to stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrUsageSink;

#[async_trait]
impl UsageSink for StderrUsageSink {
    async fn record(&self, record: ProviderCallRecord) {
        match serde_json::to_string(&record) {
            Ok(line) => eprintln!("{line}"),
            Err(e) => tracing::debug!(error = %e, "failed to serialize usage record"),
        }
    }
}
