#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use asr_ec_harness::config::{preset, GenerationConfig, PRESETS};
use asr_ec_harness::correction::{CorrectionStrategy, ExamplePool, FewShot, StrategyKind};
use asr_ec_harness::dataset::Dataset;
use asr_ec_harness::evaluation::{
    csv_path_for, EvaluationPipeline, LogProgress, NoopProgress, ProgressObserver, RunOptions,
    StderrProgress,
};
use asr_ec_harness::gateway::openai::OpenAiAdapter;
use asr_ec_harness::gateway::{
    Attribution, ChatGateway, ChatRequest, ChatResponse, NoopUsageSink, ProviderError,
    ProviderGateway, RetryPolicy, StderrUsageSink, UsageSink,
};
use asr_ec_harness::metrics::{is_reasoning_model, normalize, MetricsAggregator};
use asr_ec_harness::store::{ResultsStore, ResultsTable};

#[derive(Parser)]
#[command(name = "asr-ec", version, about = "ASR error-correction evaluation harness")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run correction strategies over a dataset and score them
    Evaluate {
        /// JSON or JSONL dataset
        #[arg(long)]
        dataset: PathBuf,
        /// Results table to merge predictions into
        #[arg(long)]
        results: PathBuf,
        #[arg(long)]
        model: String,
        /// Generation preset (see `asr-ec presets`)
        #[arg(long)]
        preset: Option<String>,
        #[arg(long)]
        max_tokens: Option<u32>,
        #[arg(long)]
        temperature: Option<f32>,
        /// Comma-separated; defaults to every strategy
        #[arg(long, value_enum, value_delimiter = ',')]
        strategies: Vec<StrategyKind>,
        #[arg(long, default_value_t = 256)]
        batch_size: usize,
        /// Worked examples to embed in model-backed prompts
        #[arg(long, default_value_t = 0)]
        few_shot: usize,
        /// JSON example pool; defaults to the bundled pool for --preset
        #[arg(long)]
        examples: Option<PathBuf>,
        /// Bound retries per completion (unbounded by default)
        #[arg(long)]
        max_retries: Option<u32>,
        /// Give up on a sample after this many seconds
        #[arg(long)]
        unit_timeout_secs: Option<u64>,
        /// Only evaluate the first N samples
        #[arg(long)]
        limit: Option<usize>,
        /// Score without writing the results table or benchmark CSV
        #[arg(long)]
        experimental: bool,
        /// Skip the availability probe
        #[arg(long)]
        skip_check: bool,
        #[arg(long, value_enum, default_value_t = ProgressMode::Log)]
        progress: ProgressMode,
        /// Emit one JSON usage record per completion attempt on stderr
        #[arg(long)]
        usage_log: bool,
    },
    /// Score an existing prediction column of a results table
    Score {
        #[arg(long)]
        results: PathBuf,
        #[arg(long)]
        column: String,
        /// Strip reasoning traces as for this model
        #[arg(long)]
        model: Option<String>,
    },
    /// List generation presets
    Presets,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressMode {
    Log,
    Stderr,
    None,
}

/// Stand-in when only selection strategies run.
struct OfflineGateway;

#[async_trait]
impl ChatGateway for OfflineGateway {
    async fn chat(&self, _req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        Err(ProviderError::config("no model-backed strategy selected"))
    }
}

async fn connect<U: UsageSink + 'static>(
    usage_sink: Arc<U>,
    policy: RetryPolicy,
    model: &str,
    skip_check: bool,
) -> Result<Arc<dyn ChatGateway>, ProviderError> {
    let gateway = ProviderGateway::with_config(OpenAiAdapter::from_env()?, usage_sink, policy);
    if !skip_check {
        let reply = gateway.check_availability(model).await?;
        tracing::info!(model, reply = %reply.trim(), "model is available");
    }
    Ok(Arc::new(gateway))
}

fn label_for(kind: StrategyKind, few_shot: bool) -> String {
    let label = kind.label();
    if few_shot && kind.needs_model() {
        label.replacen("Zero-shot", "Few-shot", 1)
    } else {
        label.to_string()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Evaluate {
            dataset,
            results,
            model,
            preset: preset_name,
            max_tokens,
            temperature,
            strategies,
            batch_size,
            few_shot,
            examples,
            max_retries,
            unit_timeout_secs,
            limit,
            experimental,
            skip_check,
            progress,
            usage_log,
        } => {
            let mut generation = match &preset_name {
                Some(name) => preset(name)?,
                None => GenerationConfig::default(),
            };
            if let Some(max_tokens) = max_tokens {
                generation.max_tokens = max_tokens;
            }
            if let Some(temperature) = temperature {
                generation.temperature = temperature;
            }
            generation.validate()?;

            let mut data = Dataset::load(&dataset)?;
            if let Some(limit) = limit {
                data.truncate(limit);
            }
            if data.is_empty() {
                return Err(format!("dataset {} has no samples", dataset.display()).into());
            }

            let pool = match (&examples, &preset_name) {
                (Some(path), _) => ExamplePool::from_path(path)?,
                (None, Some(name)) => ExamplePool::builtin(name).unwrap_or_default(),
                (None, None) => ExamplePool::default(),
            };
            if few_shot > 0 && pool.is_empty() {
                return Err(
                    "--few-shot needs a non-empty example pool \
                     (--examples or a preset with bundled examples)"
                        .into(),
                );
            }
            let few = FewShot::new(pool, few_shot);

            let kinds = if strategies.is_empty() {
                StrategyKind::ALL.to_vec()
            } else {
                strategies
            };

            let mut policy = RetryPolicy::default();
            if let Some(max) = max_retries {
                policy = policy.with_max_retries(max);
            }
            let gateway: Arc<dyn ChatGateway> = if kinds.iter().any(StrategyKind::needs_model) {
                if usage_log {
                    connect(Arc::new(StderrUsageSink), policy, &model, skip_check).await?
                } else {
                    connect(Arc::new(NoopUsageSink), policy, &model, skip_check).await?
                }
            } else {
                Arc::new(OfflineGateway)
            };

            let run_id = Uuid::new_v4();
            let mut options = RunOptions::default()
                .with_batch_size(batch_size)
                .with_attribution(Attribution::new("evaluation::runner").with_run(run_id));
            if let Some(secs) = unit_timeout_secs {
                options = options.with_unit_timeout(Duration::from_secs(secs));
            }
            let observer: Arc<dyn ProgressObserver> = match progress {
                ProgressMode::Log => Arc::new(LogProgress),
                ProgressMode::Stderr => Arc::new(StderrProgress),
                ProgressMode::None => Arc::new(NoopProgress),
            };

            tracing::info!(
                %run_id,
                model = %model,
                samples = data.len(),
                max_tokens = generation.max_tokens,
                temperature = generation.temperature,
                few_shot,
                "starting evaluation"
            );

            let mut pipeline = EvaluationPipeline::new(Arc::new(data), model.clone(), gateway)
                .with_generation(generation)
                .with_options(options)
                .with_progress(observer);
            if !experimental {
                pipeline = pipeline.with_store(ResultsStore::new(&results));
            }

            let suite: Vec<(String, Arc<dyn CorrectionStrategy>)> = kinds
                .iter()
                .map(|k| (label_for(*k, few.is_active()), k.build(&few)))
                .collect();
            let table = pipeline.run_suite(&suite).await?;

            println!("{}", table.to_markdown());
            if !experimental {
                let csv_path = csv_path_for(&results, &model);
                table.write_csv(&csv_path)?;
                println!("wrote {}", csv_path.display());
            }
        }
        Commands::Score {
            results,
            column,
            model,
        } => {
            let table = ResultsTable::load(&results)?;
            let dataset = Dataset::from_records(table.rows().to_vec())?;
            if !table.has_column(&column) {
                return Err(format!("column '{column}' not found in {}", results.display()).into());
            }
            let reasoning = model.as_deref().is_some_and(is_reasoning_model);
            let predictions: Vec<String> = (0..table.len())
                .map(|i| {
                    let text = table
                        .cell(i, &column)
                        .and_then(|v| v.as_str())
                        .unwrap_or_default();
                    normalize(text, reasoning)
                })
                .collect();
            let references: Vec<String> = dataset
                .references()
                .iter()
                .map(|r| normalize(r, false))
                .collect();
            let metrics = MetricsAggregator::default().aggregate(&predictions, &references)?;
            println!("{}", serde_json::to_string_pretty(&metrics)?);
        }
        Commands::Presets => {
            println!("name,max_tokens,temperature");
            for (name, config) in PRESETS {
                println!("{name},{},{}", config.max_tokens, config.temperature);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn few_shot_relabels_model_backed_rows_only() {
        assert_eq!(label_for(StrategyKind::ZeroShotConstrained, true), "Few-shot Constr");
        assert_eq!(label_for(StrategyKind::ZeroShotConstrained, false), "Zero-shot Constr");
        assert_eq!(label_for(StrategyKind::Oracle, true), "Oracle");
    }
}
