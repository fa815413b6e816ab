#![forbid(unsafe_code)]

//! # asr-ec-harness
//!
//! Evaluate ASR error-correction strategies against a text-generation service.
//!
//! For every sample of a dataset (an n-best list of hypotheses plus a
//! reference) a pluggable [`CorrectionStrategy`] produces one corrected
//! transcription, usually by prompting a model through a [`ChatGateway`]
//! that retries rate limits and transient failures. The orchestrator in
//! [`evaluation`] fans out one unit of work per sample in bounded batches,
//! keeps results in dataset order, scores them with [`metrics`], and merges
//! them into a persisted results table ([`store`]) without overwriting
//! earlier predictions.

pub mod config;
pub mod correction;
pub mod dataset;
pub mod evaluation;
pub mod gateway;
pub mod metrics;
pub mod prompts;
pub mod store;

pub use config::{preset, ConfigError, GenerationConfig};
pub use correction::{
    CorrectionContext, CorrectionStrategy, ExamplePool, FewShot, ReferenceAccess, StrategyError,
    StrategyKind,
};
pub use dataset::{Dataset, DatasetError, Sample};
pub use evaluation::{
    evaluate, BenchmarkTable, EvaluationPipeline, PipelineError, ProgressObserver, RunOptions,
};
pub use gateway::{Attribution, ChatGateway, ProviderError, ProviderGateway, RetryPolicy, UsageSink};
pub use metrics::{MetricsAggregator, MetricsError, MetricsRecord};
pub use store::{column_name, ResultsStore, ResultsTable, StoreError};
