//! Batch orchestrator: one concurrent unit of work per sample, in bounded
//! batches, with results kept in dataset order.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};

use crate::config::GenerationConfig;
use crate::correction::{CorrectionContext, CorrectionStrategy, ReferenceAccess, StrategyError};
use crate::dataset::Dataset;
use crate::gateway::{Attribution, ChatGateway};

use super::progress::{BatchProgress, ProgressObserver, ProgressReporter};

pub const DEFAULT_BATCH_SIZE: usize = 256;

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Units of work in flight at once. Zero is treated as one.
    pub batch_size: usize,
    /// Per-sample bound covering all retries. `None` waits indefinitely.
    pub unit_timeout: Option<Duration>,
    pub attribution: Attribution,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            unit_timeout: None,
            attribution: Attribution::new("evaluation::runner"),
        }
    }
}

impl RunOptions {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_unit_timeout(mut self, timeout: Duration) -> Self {
        self.unit_timeout = Some(timeout);
        self
    }

    pub fn with_attribution(mut self, attribution: Attribution) -> Self {
        self.attribution = attribution;
        self
    }

    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.max(1)
    }
}

#[derive(Debug, thiserror::Error)]
enum UnitError {
    #[error(transparent)]
    Strategy(#[from] StrategyError),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Run `strategy` over every sample and return one result per sample, in
/// dataset order.
///
/// Samples are processed in batches of `options.batch_size`; each batch is
/// awaited completely before the next one starts. A sample whose unit fails,
/// times out or panics yields `""` and never aborts the run.
pub async fn evaluate(
    dataset: &Dataset,
    model: &str,
    gateway: Arc<dyn ChatGateway>,
    strategy: Arc<dyn CorrectionStrategy>,
    generation: GenerationConfig,
    options: &RunOptions,
    progress: Arc<dyn ProgressObserver>,
) -> Vec<String> {
    let samples = dataset.samples();
    let n = samples.len();
    let batch_size = options.effective_batch_size();
    let batch_count = n.div_ceil(batch_size);
    let pass_reference = strategy.reference_access() == ReferenceAccess::Required;

    let mut results: Vec<Option<String>> = vec![None; n];
    let reporter = ProgressReporter::spawn(progress);

    for (batch_index, start) in (0..n).step_by(batch_size).enumerate() {
        let end = (start + batch_size).min(n);
        let total = end - start;
        tracing::info!(
            strategy = strategy.name(),
            batch = batch_index + 1,
            batches = batch_count,
            samples = total,
            "starting batch"
        );

        let mut pending = FuturesUnordered::new();
        for (idx, sample) in samples.iter().enumerate().take(end).skip(start) {
            let gateway = gateway.clone();
            let strategy = strategy.clone();
            let model = model.to_string();
            let hypotheses = sample.hypotheses.clone();
            let reference = if pass_reference {
                sample.reference.clone()
            } else {
                None
            };
            let attribution = options.attribution.clone();
            let unit_timeout = options.unit_timeout;

            let handle = tokio::spawn(async move {
                let ctx = CorrectionContext {
                    gateway: gateway.as_ref(),
                    model: &model,
                    generation,
                    attribution,
                };
                let unit = strategy.correct(&ctx, &hypotheses, reference.as_deref());
                match unit_timeout {
                    Some(limit) => match tokio::time::timeout(limit, unit).await {
                        Ok(result) => result.map_err(UnitError::from),
                        Err(_) => Err(UnitError::Timeout(limit)),
                    },
                    None => unit.await.map_err(UnitError::from),
                }
            });
            pending.push(async move { (idx, handle.await) });
        }

        let mut completed = 0;
        while let Some((idx, joined)) = pending.next().await {
            let output = match joined {
                Ok(Ok(text)) => text,
                Ok(Err(err)) => {
                    tracing::warn!(
                        strategy = strategy.name(),
                        sample = idx,
                        error = %err,
                        "sample failed, recording empty result"
                    );
                    String::new()
                }
                Err(err) => {
                    tracing::warn!(
                        strategy = strategy.name(),
                        sample = idx,
                        error = %err,
                        "sample task panicked, recording empty result"
                    );
                    String::new()
                }
            };
            results[idx] = Some(output);
            completed += 1;
            reporter.publish(BatchProgress {
                batch_index,
                batch_count,
                completed,
                total,
                batches_completed: batch_index,
            });
        }

        reporter.publish(BatchProgress {
            batch_index,
            batch_count,
            completed,
            total,
            batches_completed: batch_index + 1,
        });
    }

    reporter.finish().await;
    results.into_iter().map(Option::unwrap_or_default).collect()
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::correction::Top1Selection;
    use crate::dataset::Sample;
    use crate::evaluation::NoopProgress;
    use crate::gateway::{ChatRequest, ChatResponse, ProviderError};

    struct NoGateway;

    #[async_trait]
    impl ChatGateway for NoGateway {
        async fn chat(&self, _req: ChatRequest) -> Result<ChatResponse, ProviderError> {
            Err(ProviderError::config("no gateway in this test"))
        }
    }

    fn dataset(n: usize) -> Dataset {
        Dataset::from_samples(
            (0..n)
                .map(|i| Sample::new(vec![format!("hyp {i}")], Some(format!("ref {i}"))))
                .collect(),
        )
    }

    #[test]
    fn zero_batch_size_is_one() {
        assert_eq!(RunOptions::default().with_batch_size(0).effective_batch_size(), 1);
        assert_eq!(RunOptions::default().effective_batch_size(), DEFAULT_BATCH_SIZE);
    }

    #[tokio::test]
    async fn top1_over_uneven_batches_keeps_order() {
        let out = evaluate(
            &dataset(5),
            "m",
            Arc::new(NoGateway),
            Arc::new(Top1Selection),
            GenerationConfig::default(),
            &RunOptions::default().with_batch_size(2),
            Arc::new(NoopProgress),
        )
        .await;
        assert_eq!(out, vec!["hyp 0", "hyp 1", "hyp 2", "hyp 3", "hyp 4"]);
    }

    #[tokio::test]
    async fn empty_dataset_yields_empty_results() {
        let out = evaluate(
            &dataset(0),
            "m",
            Arc::new(NoGateway),
            Arc::new(Top1Selection),
            GenerationConfig::default(),
            &RunOptions::default(),
            Arc::new(NoopProgress),
        )
        .await;
        assert!(out.is_empty());
    }
}
