//! Batched concurrent evaluation of correction strategies.
//!
//! - [`runner`]: the orchestrator (`evaluate`) and its [`RunOptions`]
//! - [`progress`]: event-driven progress observers
//! - [`pipeline`]: normalize, persist and score one strategy or a suite
//! - [`report`]: the benchmark table

pub mod pipeline;
pub mod progress;
pub mod report;
pub mod runner;

pub use pipeline::{EvaluationPipeline, PipelineError, StrategyOutcome};
pub use progress::{BatchProgress, LogProgress, NoopProgress, ProgressObserver, StderrProgress};
pub use report::{csv_path_for, BenchmarkRow, BenchmarkTable};
pub use runner::{evaluate, RunOptions, DEFAULT_BATCH_SIZE};
