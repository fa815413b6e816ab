use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use asr_ec_harness::config::GenerationConfig;
use asr_ec_harness::correction::{
    CorrectionContext, CorrectionStrategy, FewShot, ReferenceAccess, StrategyError, StrategyKind,
};
use asr_ec_harness::dataset::{Dataset, Sample};
use asr_ec_harness::evaluation::{
    evaluate, BatchProgress, NoopProgress, ProgressObserver, RunOptions,
};
use asr_ec_harness::gateway::openai::ChatProvider;
use asr_ec_harness::gateway::{
    ChatGateway, ChatRequest, ChatResponse, ErrorContext, NoopUsageSink, ProviderError,
    ProviderGateway, RetryPolicy,
};

// =============================================================================
// Fixtures
// =============================================================================

fn dataset(n: usize) -> Dataset {
    Dataset::from_samples(
        (0..n)
            .map(|i| {
                Sample::new(
                    vec![format!("sample {i}"), format!("alt {i}")],
                    Some(format!("reference {i}")),
                )
            })
            .collect(),
    )
}

fn index_of(hypotheses: &[String]) -> usize {
    hypotheses[0]
        .trim_start_matches("sample ")
        .parse()
        .unwrap()
}

/// Echoes the last line of the user prompt's first hypothesis tag.
struct EchoGateway {
    calls: AtomicUsize,
}

#[async_trait]
impl ChatGateway for EchoGateway {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let user = &req.messages[1].content;
        let start = user.find("<hypothesis1>").unwrap() + "<hypothesis1>".len();
        let end = user.find("</hypothesis1>").unwrap();
        let text = user[start..end].trim();
        Ok(ChatResponse::text(format!("<transcription>{text}</transcription>")))
    }
}

fn echo() -> Arc<EchoGateway> {
    Arc::new(EchoGateway {
        calls: AtomicUsize::new(0),
    })
}

/// Sleeps a random few milliseconds, then returns the first hypothesis.
struct Jittery;

#[async_trait]
impl CorrectionStrategy for Jittery {
    fn name(&self) -> &str {
        "jittery"
    }

    async fn correct(
        &self,
        _ctx: &CorrectionContext<'_>,
        hypotheses: &[String],
        _reference: Option<&str>,
    ) -> Result<String, StrategyError> {
        let ms = rand::thread_rng().gen_range(0..25);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(hypotheses[0].clone())
    }
}

#[derive(Default)]
struct RecordingProgress {
    snapshots: Mutex<Vec<BatchProgress>>,
    batches: Mutex<Vec<(usize, usize)>>,
}

impl ProgressObserver for RecordingProgress {
    fn on_progress(&self, progress: &BatchProgress) {
        self.snapshots.lock().unwrap().push(*progress);
    }

    fn on_batch_complete(&self, batch_index: usize, batch_count: usize) {
        self.batches.lock().unwrap().push((batch_index, batch_count));
    }
}

// =============================================================================
// Order preservation
// =============================================================================

#[tokio::test]
async fn results_follow_dataset_order_under_random_delays() {
    let data = dataset(40);
    for batch_size in [1, 7, 40, 256] {
        let out = evaluate(
            &data,
            "m",
            echo(),
            Arc::new(Jittery),
            GenerationConfig::default(),
            &RunOptions::default().with_batch_size(batch_size),
            Arc::new(NoopProgress),
        )
        .await;
        let expected: Vec<String> = (0..40).map(|i| format!("sample {i}")).collect();
        assert_eq!(out, expected, "batch size {batch_size}");
    }
}

// =============================================================================
// Three samples, batch size two
// =============================================================================

/// Records start/end events and the peak number of units in flight. Sample 0
/// is slow so sample 1 finishes first.
struct Tracked {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    events: Mutex<Vec<String>>,
}

#[async_trait]
impl CorrectionStrategy for Tracked {
    fn name(&self) -> &str {
        "tracked"
    }

    async fn correct(
        &self,
        _ctx: &CorrectionContext<'_>,
        hypotheses: &[String],
        _reference: Option<&str>,
    ) -> Result<String, StrategyError> {
        let idx = index_of(hypotheses);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.events.lock().unwrap().push(format!("start {idx}"));

        let ms = if idx == 0 { 80 } else { 5 };
        tokio::time::sleep(Duration::from_millis(ms)).await;

        self.events.lock().unwrap().push(format!("end {idx}"));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(hypotheses[0].clone())
    }
}

#[tokio::test]
async fn three_samples_in_batches_of_two() {
    let strategy = Arc::new(Tracked {
        in_flight: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
        events: Mutex::new(Vec::new()),
    });
    let progress = Arc::new(RecordingProgress::default());

    let out = evaluate(
        &dataset(3),
        "m",
        echo(),
        strategy.clone(),
        GenerationConfig::default(),
        &RunOptions::default().with_batch_size(2),
        progress.clone(),
    )
    .await;

    assert_eq!(out, vec!["sample 0", "sample 1", "sample 2"]);
    assert_eq!(strategy.peak.load(Ordering::SeqCst), 2);

    let events = strategy.events.lock().unwrap().clone();
    let pos = |e: &str| events.iter().position(|x| x == e).unwrap();
    assert!(pos("end 1") < pos("end 0"), "{events:?}");
    assert!(pos("start 2") > pos("end 0"), "{events:?}");
    assert!(pos("start 2") > pos("end 1"), "{events:?}");

    assert_eq!(*progress.batches.lock().unwrap(), vec![(0, 2), (1, 2)]);
    let last = *progress.snapshots.lock().unwrap().last().unwrap();
    assert_eq!(last.batch_index, 1);
    assert_eq!(last.completed, 1);
    assert_eq!(last.total, 1);
}

// =============================================================================
// Reference isolation
// =============================================================================

/// Wraps a real strategy and flags any reference it is handed despite not
/// asking for one.
struct Guarded {
    inner: Arc<dyn CorrectionStrategy>,
    leaked: AtomicBool,
    seen_reference: AtomicUsize,
}

#[async_trait]
impl CorrectionStrategy for Guarded {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn reference_access(&self) -> ReferenceAccess {
        self.inner.reference_access()
    }

    async fn correct(
        &self,
        ctx: &CorrectionContext<'_>,
        hypotheses: &[String],
        reference: Option<&str>,
    ) -> Result<String, StrategyError> {
        if reference.is_some() {
            self.seen_reference.fetch_add(1, Ordering::SeqCst);
            if self.inner.reference_access() == ReferenceAccess::None {
                self.leaked.store(true, Ordering::SeqCst);
                panic!("reference passed to {}", self.inner.name());
            }
        }
        self.inner.correct(ctx, hypotheses, reference).await
    }
}

#[tokio::test]
async fn only_reference_requiring_strategies_see_the_reference() {
    let data = dataset(6);
    for kind in StrategyKind::ALL {
        let guarded = Arc::new(Guarded {
            inner: kind.build(&FewShot::default()),
            leaked: AtomicBool::new(false),
            seen_reference: AtomicUsize::new(0),
        });
        let out = evaluate(
            &data,
            "m",
            echo(),
            guarded.clone(),
            GenerationConfig::default(),
            &RunOptions::default().with_batch_size(4),
            Arc::new(NoopProgress),
        )
        .await;

        assert!(!guarded.leaked.load(Ordering::SeqCst), "{kind:?} saw a reference");
        assert!(out.iter().all(|o| !o.is_empty()), "{kind:?}: {out:?}");
        let expected_seen = if kind == StrategyKind::Oracle { 6 } else { 0 };
        assert_eq!(guarded.seen_reference.load(Ordering::SeqCst), expected_seen, "{kind:?}");
    }
}

// =============================================================================
// Failure handling
// =============================================================================

/// Odd samples fail, sample 4 panics, sample 2 hangs.
struct Flaky;

#[async_trait]
impl CorrectionStrategy for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn correct(
        &self,
        _ctx: &CorrectionContext<'_>,
        hypotheses: &[String],
        _reference: Option<&str>,
    ) -> Result<String, StrategyError> {
        match index_of(hypotheses) {
            4 => panic!("boom"),
            2 => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok("too late".to_string())
            }
            i if i % 2 == 1 => Err(StrategyError::NoHypotheses),
            _ => Ok(hypotheses[0].clone()),
        }
    }
}

#[tokio::test]
async fn failures_timeouts_and_panics_become_empty_results() {
    let out = evaluate(
        &dataset(7),
        "m",
        echo(),
        Arc::new(Flaky),
        GenerationConfig::default(),
        &RunOptions::default()
            .with_batch_size(3)
            .with_unit_timeout(Duration::from_millis(100)),
        Arc::new(NoopProgress),
    )
    .await;

    assert_eq!(out, vec!["sample 0", "", "", "", "", "", "sample 6"]);
}

#[tokio::test]
async fn oracle_without_references_degrades_per_sample() {
    let data = Dataset::from_samples(vec![
        Sample::new(vec!["a".into(), "b".into()], Some("b".into())),
        Sample::new(vec!["c".into()], None),
    ]);
    let out = evaluate(
        &data,
        "m",
        echo(),
        StrategyKind::Oracle.build(&FewShot::default()),
        GenerationConfig::default(),
        &RunOptions::default(),
        Arc::new(NoopProgress),
    )
    .await;
    assert_eq!(out, vec!["b", ""]);
}

// =============================================================================
// Through the retrying gateway
// =============================================================================

/// Rate-limits every other call, answers the rest.
struct Throttled {
    calls: AtomicUsize,
}

#[async_trait]
impl ChatProvider for Throttled {
    async fn chat(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n % 2 == 0 {
            return Err(ProviderError::rate_limited(
                Some(Duration::from_millis(10)),
                ErrorContext::new().with_status(429),
            ));
        }
        let user = &req.messages[1].content;
        let start = user.find("<hypothesis1>").unwrap() + "<hypothesis1>".len();
        let end = user.find("</hypothesis1>").unwrap();
        Ok(ChatResponse::text(user[start..end].trim().to_string()))
    }
}

#[tokio::test]
async fn model_backed_strategy_survives_rate_limits() {
    let provider = Arc::new(Throttled {
        calls: AtomicUsize::new(0),
    });
    let gateway = Arc::new(ProviderGateway::with_provider(
        provider.clone(),
        Arc::new(NoopUsageSink),
        RetryPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            rate_limit_margin: Duration::from_millis(1),
            ..RetryPolicy::default()
        },
    ));

    let out = evaluate(
        &dataset(5),
        "m",
        gateway,
        StrategyKind::ZeroShotUnconstrained.build(&FewShot::default()),
        GenerationConfig::default(),
        &RunOptions::default().with_batch_size(2),
        Arc::new(NoopProgress),
    )
    .await;

    let expected: Vec<String> = (0..5).map(|i| format!("sample {i}")).collect();
    assert_eq!(out, expected);
    assert!(provider.calls.load(Ordering::SeqCst) >= 5);
}
