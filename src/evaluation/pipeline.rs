//! Per-strategy pipeline: orchestrate, normalize, review, persist, score.

use std::sync::Arc;

use rand::seq::index::sample;

use crate::config::GenerationConfig;
use crate::correction::CorrectionStrategy;
use crate::dataset::Dataset;
use crate::gateway::ChatGateway;
use crate::metrics::{
    align_words, is_reasoning_model, normalize, wer, MetricsAggregator, MetricsError,
    MetricsRecord,
};
use crate::store::{column_name, ResultsStore, StoreError, UpsertSummary};

use super::progress::{LogProgress, ProgressObserver};
use super::report::BenchmarkTable;
use super::runner::{evaluate, RunOptions};

const REVIEW_SAMPLES: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("metrics: {0}")]
    Metrics(#[from] MetricsError),
    #[error("results store: {0}")]
    Store(#[from] StoreError),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Everything produced by evaluating one strategy.
#[derive(Debug, Clone)]
pub struct StrategyOutcome {
    pub strategy: String,
    pub column: String,
    /// Normalized predictions in dataset order.
    pub predictions: Vec<String>,
    /// Samples whose unit of work produced nothing.
    pub failed: usize,
    pub metrics: MetricsRecord,
    /// `None` when nothing was persisted.
    pub saved: Option<UpsertSummary>,
}

/// Evaluates strategies for one model over one dataset.
pub struct EvaluationPipeline {
    dataset: Arc<Dataset>,
    model: String,
    gateway: Arc<dyn ChatGateway>,
    generation: GenerationConfig,
    options: RunOptions,
    progress: Arc<dyn ProgressObserver>,
    store: Option<ResultsStore>,
    aggregator: Arc<MetricsAggregator>,
    review_samples: usize,
}

impl EvaluationPipeline {
    pub fn new(
        dataset: Arc<Dataset>,
        model: impl Into<String>,
        gateway: Arc<dyn ChatGateway>,
    ) -> Self {
        Self {
            dataset,
            model: model.into(),
            gateway,
            generation: GenerationConfig::default(),
            options: RunOptions::default(),
            progress: Arc::new(LogProgress),
            store: None,
            aggregator: Arc::new(MetricsAggregator::default()),
            review_samples: REVIEW_SAMPLES,
        }
    }

    pub fn with_generation(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressObserver>) -> Self {
        self.progress = progress;
        self
    }

    /// Persist predictions here. Without a store the run is experimental.
    pub fn with_store(mut self, store: ResultsStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_aggregator(mut self, aggregator: MetricsAggregator) -> Self {
        self.aggregator = Arc::new(aggregator);
        self
    }

    pub fn with_review_samples(mut self, n: usize) -> Self {
        self.review_samples = n;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn evaluate_strategy(
        &self,
        strategy: Arc<dyn CorrectionStrategy>,
    ) -> Result<StrategyOutcome, PipelineError> {
        let name = strategy.name().to_string();
        let raw = evaluate(
            &self.dataset,
            &self.model,
            self.gateway.clone(),
            strategy,
            self.generation,
            &self.options,
            self.progress.clone(),
        )
        .await;
        let failed = raw.iter().filter(|p| p.is_empty()).count();
        if failed > 0 {
            tracing::warn!(
                strategy = %name,
                failed,
                total = raw.len(),
                "some samples produced no result"
            );
        }

        let reasoning = is_reasoning_model(&self.model);
        let predictions: Vec<String> = raw.iter().map(|p| normalize(p, reasoning)).collect();
        let references: Vec<String> = self
            .dataset
            .references()
            .iter()
            .map(|r| normalize(r, false))
            .collect();

        self.log_review(&name, &predictions, &references);

        let column = column_name(&self.model, &name);
        let saved = match &self.store {
            Some(store) => {
                let store = store.clone();
                let dataset = self.dataset.clone();
                let column = column.clone();
                let values = predictions.clone();
                let summary = tokio::task::spawn_blocking(move || {
                    store.upsert(&dataset, &column, &values)
                })
                .await??;
                Some(summary)
            }
            None => {
                tracing::info!(strategy = %name, "experimental run, results not saved");
                None
            }
        };

        let aggregator = self.aggregator.clone();
        let preds = predictions.clone();
        let metrics =
            tokio::task::spawn_blocking(move || aggregator.aggregate(&preds, &references)).await??;
        tracing::info!(
            strategy = %name,
            wer = metrics.wer,
            meteor = metrics.meteor,
            bert_f1 = metrics.bert_f1,
            "strategy scored"
        );

        Ok(StrategyOutcome {
            strategy: name,
            column,
            predictions,
            failed,
            metrics,
            saved,
        })
    }

    /// Evaluate each `(label, strategy)` in order into one benchmark table.
    pub async fn run_suite(
        &self,
        strategies: &[(String, Arc<dyn CorrectionStrategy>)],
    ) -> Result<BenchmarkTable, PipelineError> {
        let mut table = BenchmarkTable::new(self.model.clone());
        for (label, strategy) in strategies {
            tracing::info!(strategy = %label, model = %self.model, "evaluating");
            let outcome = self.evaluate_strategy(strategy.clone()).await?;
            table.push(label.clone(), outcome.metrics);
        }
        Ok(table)
    }

    /// Log a few random samples, with their word alignment, so a human can
    /// eyeball the output.
    fn log_review(&self, strategy: &str, predictions: &[String], references: &[String]) {
        let n = predictions.len().min(references.len());
        let count = self.review_samples.min(n);
        if count == 0 {
            return;
        }
        let mut rng = rand::thread_rng();
        for idx in sample(&mut rng, n, count).into_iter() {
            let alignment = align_words(&references[idx], &predictions[idx]);
            tracing::info!(
                strategy,
                sample = idx,
                wer = wer(&references[idx], &predictions[idx]),
                reference = %alignment.reference_line,
                prediction = %alignment.hypothesis_line,
                edits = %alignment.markers,
                "review sample"
            );
        }
    }
}
