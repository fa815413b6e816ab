//! Scoring of corrected transcriptions.
//!
//! Predictions and references are normalized the same way before scoring:
//! reasoning traces removed (for models that emit them), lower-cased,
//! punctuation stripped, cut at the first line break.
//!
//! WER and METEOR are computed here. BERTScore needs an embedding model, so
//! it sits behind [`BertScorer`]; [`LexicalBertScorer`] is the built-in
//! stand-in that scores with exact-token similarity.

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum MetricsError {
    #[error("cannot aggregate metrics over empty input")]
    EmptyInput,
    #[error("predictions ({predictions}) and references ({references}) differ in length")]
    LengthMismatch {
        predictions: usize,
        references: usize,
    },
    #[error("scorer failed: {0}")]
    Scorer(String),
}

// =============================================================================
// Normalization
// =============================================================================

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

/// Whether `model` wraps its answer in a `<think>` reasoning trace.
pub fn is_reasoning_model(model: &str) -> bool {
    model.to_lowercase().contains("deepseek")
}

/// Remove every complete `<think>...</think>` block and the whitespace after it.
pub fn strip_reasoning(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find(THINK_OPEN) {
        let after_open = &rest[open + THINK_OPEN.len()..];
        let Some(close) = after_open.find(THINK_CLOSE) else {
            break;
        };
        out.push_str(&rest[..open]);
        rest = after_open[close + THINK_CLOSE.len()..].trim_start();
    }
    out.push_str(rest);
    out
}

pub fn remove_punctuation(text: &str) -> String {
    text.chars().filter(|c| !c.is_ascii_punctuation()).collect()
}

/// Keep the first line only (models sometimes append an explanation), trimmed.
pub fn first_line(text: &str) -> &str {
    text.split(|c: char| c == '\n' || c == '\r')
        .next()
        .unwrap_or("")
        .trim()
}

/// Normalization applied to both sides before scoring.
pub fn normalize(text: &str, reasoning: bool) -> String {
    let text = if reasoning {
        strip_reasoning(text)
    } else {
        text.to_string()
    };
    let cleaned = remove_punctuation(&text.to_lowercase());
    first_line(&cleaned).to_string()
}

// =============================================================================
// Distances
// =============================================================================

fn levenshtein<T: PartialEq>(a: &[T], b: &[T]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for (i, x) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, y) in b.iter().enumerate() {
            let cost = usize::from(x != y);
            curr[j + 1] = (prev[j + 1] + 1) // deletion
                .min(curr[j] + 1) // insertion
                .min(prev[j] + cost); // substitution
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Character-level Levenshtein distance.
pub fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    levenshtein(&a, &b)
}

/// Word error rate of `hypothesis` against `reference`.
///
/// An empty reference scores 0.0 against an empty hypothesis and 1.0 otherwise.
pub fn wer(reference: &str, hypothesis: &str) -> f64 {
    let ref_words: Vec<&str> = reference.split_whitespace().collect();
    let hyp_words: Vec<&str> = hypothesis.split_whitespace().collect();
    if ref_words.is_empty() {
        return if hyp_words.is_empty() { 0.0 } else { 1.0 };
    }
    levenshtein(&ref_words, &hyp_words) as f64 / ref_words.len() as f64
}

// =============================================================================
// Alignment
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOp {
    Match,
    Substitute,
    Insert,
    Delete,
}

impl EditOp {
    fn marker(self) -> char {
        match self {
            EditOp::Match => ' ',
            EditOp::Substitute => 'S',
            EditOp::Insert => 'I',
            EditOp::Delete => 'D',
        }
    }
}

/// Word-level alignment of a hypothesis against its reference.
///
/// `reference_line` and `hypothesis_line` hold the aligned words, with `***`
/// standing in for a missing word; `markers` puts `S`, `I` or `D` under each
/// edited column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alignment {
    pub ops: Vec<EditOp>,
    pub reference_line: String,
    pub hypothesis_line: String,
    pub markers: String,
}

impl std::fmt::Display for Alignment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "REF: {}", self.reference_line)?;
        writeln!(f, "HYP: {}", self.hypothesis_line)?;
        write!(f, "     {}", self.markers)
    }
}

/// Align by backtracing a full word-level edit table. Ties prefer the
/// diagonal, then deletion, then insertion.
pub fn align_words(reference: &str, hypothesis: &str) -> Alignment {
    let r: Vec<&str> = reference.split_whitespace().collect();
    let h: Vec<&str> = hypothesis.split_whitespace().collect();

    let mut dp = vec![vec![0usize; h.len() + 1]; r.len() + 1];
    for (i, row) in dp.iter_mut().enumerate() {
        row[0] = i;
    }
    for (j, cell) in dp[0].iter_mut().enumerate() {
        *cell = j;
    }
    for i in 1..=r.len() {
        for j in 1..=h.len() {
            let cost = usize::from(r[i - 1] != h[j - 1]);
            dp[i][j] = (dp[i - 1][j] + 1)
                .min(dp[i][j - 1] + 1)
                .min(dp[i - 1][j - 1] + cost);
        }
    }

    let mut columns: Vec<(EditOp, Option<&str>, Option<&str>)> = Vec::new();
    let (mut i, mut j) = (r.len(), h.len());
    while i > 0 || j > 0 {
        if i > 0 && j > 0 {
            let same = r[i - 1] == h[j - 1];
            if dp[i][j] == dp[i - 1][j - 1] + usize::from(!same) {
                let op = if same { EditOp::Match } else { EditOp::Substitute };
                columns.push((op, Some(r[i - 1]), Some(h[j - 1])));
                i -= 1;
                j -= 1;
                continue;
            }
        }
        if i > 0 && dp[i][j] == dp[i - 1][j] + 1 {
            columns.push((EditOp::Delete, Some(r[i - 1]), None));
            i -= 1;
        } else {
            columns.push((EditOp::Insert, None, Some(h[j - 1])));
            j -= 1;
        }
    }
    columns.reverse();

    const GAP: &str = "***";
    let mut reference_line = Vec::with_capacity(columns.len());
    let mut hypothesis_line = Vec::with_capacity(columns.len());
    let mut markers = Vec::with_capacity(columns.len());
    for &(op, rw, hw) in &columns {
        let rw = rw.unwrap_or(GAP);
        let hw = hw.unwrap_or(GAP);
        let width = rw.chars().count().max(hw.chars().count());
        reference_line.push(format!("{rw:<width$}"));
        hypothesis_line.push(format!("{hw:<width$}"));
        markers.push(format!("{:<width$}", op.marker()));
    }

    Alignment {
        ops: columns.iter().map(|(op, _, _)| *op).collect(),
        reference_line: reference_line.join(" ").trim_end().to_string(),
        hypothesis_line: hypothesis_line.join(" ").trim_end().to_string(),
        markers: markers.join(" ").trim_end().to_string(),
    }
}

// =============================================================================
// METEOR
// =============================================================================

const METEOR_ALPHA: f64 = 0.9;
const METEOR_BETA: f64 = 3.0;
const METEOR_GAMMA: f64 = 0.5;

/// Sentence METEOR with exact unigram matching.
pub fn meteor(reference: &str, hypothesis: &str) -> f64 {
    let ref_words: Vec<&str> = reference.split_whitespace().collect();
    let hyp_words: Vec<&str> = hypothesis.split_whitespace().collect();
    if ref_words.is_empty() || hyp_words.is_empty() {
        return 0.0;
    }

    // Align each hypothesis word to the earliest unused identical reference word.
    let mut used = vec![false; ref_words.len()];
    let mut alignment: Vec<(usize, usize)> = Vec::new();
    for (h, hw) in hyp_words.iter().enumerate() {
        if let Some(r) = (0..ref_words.len()).find(|&r| !used[r] && ref_words[r] == *hw) {
            used[r] = true;
            alignment.push((h, r));
        }
    }

    let matches = alignment.len();
    if matches == 0 {
        return 0.0;
    }

    let precision = matches as f64 / hyp_words.len() as f64;
    let recall = matches as f64 / ref_words.len() as f64;
    let fmean = precision * recall / (METEOR_ALPHA * precision + (1.0 - METEOR_ALPHA) * recall);

    let mut chunks = 1;
    for pair in alignment.windows(2) {
        let (h0, r0) = pair[0];
        let (h1, r1) = pair[1];
        if h1 != h0 + 1 || r1 != r0 + 1 {
            chunks += 1;
        }
    }
    let fragmentation = chunks as f64 / matches as f64;
    let penalty = METEOR_GAMMA * fragmentation.powf(METEOR_BETA);

    fmean * (1.0 - penalty)
}

pub fn mean_meteor(references: &[String], hypotheses: &[String]) -> Result<f64, MetricsError> {
    check_aligned(hypotheses, references)?;
    let total: f64 = references
        .iter()
        .zip(hypotheses)
        .map(|(r, h)| meteor(r, h))
        .sum();
    Ok(total / references.len() as f64)
}

// =============================================================================
// BERTScore
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BertScore {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

/// Corpus-level BERTScore. Implementations must be pure.
pub trait BertScorer: Send + Sync {
    fn score(
        &self,
        hypotheses: &[String],
        references: &[String],
    ) -> Result<BertScore, MetricsError>;
}

/// BERTScore's greedy matching with exact-token similarity in place of
/// contextual embeddings. Identical sentences score 1.0.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicalBertScorer;

impl LexicalBertScorer {
    fn sentence(hypothesis: &str, reference: &str) -> BertScore {
        let hyp: Vec<&str> = hypothesis.split_whitespace().collect();
        let reference: Vec<&str> = reference.split_whitespace().collect();
        match (hyp.is_empty(), reference.is_empty()) {
            (true, true) => {
                return BertScore {
                    precision: 1.0,
                    recall: 1.0,
                    f1: 1.0,
                }
            }
            (true, false) | (false, true) => {
                return BertScore {
                    precision: 0.0,
                    recall: 0.0,
                    f1: 0.0,
                }
            }
            _ => {}
        }
        let precision =
            hyp.iter().filter(|t| reference.contains(t)).count() as f64 / hyp.len() as f64;
        let recall =
            reference.iter().filter(|t| hyp.contains(t)).count() as f64 / reference.len() as f64;
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        BertScore {
            precision,
            recall,
            f1,
        }
    }
}

impl BertScorer for LexicalBertScorer {
    fn score(
        &self,
        hypotheses: &[String],
        references: &[String],
    ) -> Result<BertScore, MetricsError> {
        check_aligned(hypotheses, references)?;
        let n = hypotheses.len() as f64;
        let (p, r, f) = hypotheses.iter().zip(references).fold(
            (0.0, 0.0, 0.0),
            |(p, r, f), (h, refr)| {
                let s = Self::sentence(h, refr);
                (p + s.precision, r + s.recall, f + s.f1)
            },
        );
        Ok(BertScore {
            precision: p / n,
            recall: r / n,
            f1: f / n,
        })
    }
}

// =============================================================================
// Aggregation
// =============================================================================

/// One row of the benchmark table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    #[serde(rename = "WER")]
    pub wer: f64,
    #[serde(rename = "METEOR")]
    pub meteor: f64,
    #[serde(rename = "BERT Precision")]
    pub bert_precision: f64,
    #[serde(rename = "BERT Recall")]
    pub bert_recall: f64,
    #[serde(rename = "BERT F1")]
    pub bert_f1: f64,
}

impl MetricsRecord {
    pub const COLUMNS: [&'static str; 5] =
        ["WER", "METEOR", "BERT Precision", "BERT Recall", "BERT F1"];

    pub fn values(&self) -> [f64; 5] {
        [
            self.wer,
            self.meteor,
            self.bert_precision,
            self.bert_recall,
            self.bert_f1,
        ]
    }
}

fn check_aligned(predictions: &[String], references: &[String]) -> Result<(), MetricsError> {
    if predictions.len() != references.len() {
        return Err(MetricsError::LengthMismatch {
            predictions: predictions.len(),
            references: references.len(),
        });
    }
    if predictions.is_empty() {
        return Err(MetricsError::EmptyInput);
    }
    Ok(())
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

/// Reduces aligned, already-normalized predictions and references into a [`MetricsRecord`].
pub struct MetricsAggregator {
    bert: Box<dyn BertScorer>,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new(Box::new(LexicalBertScorer))
    }
}

impl MetricsAggregator {
    pub fn new(bert: Box<dyn BertScorer>) -> Self {
        Self { bert }
    }

    pub fn aggregate(
        &self,
        predictions: &[String],
        references: &[String],
    ) -> Result<MetricsRecord, MetricsError> {
        check_aligned(predictions, references)?;

        let mean_wer = references
            .iter()
            .zip(predictions)
            .map(|(r, p)| wer(r, p))
            .sum::<f64>()
            / predictions.len() as f64;
        let meteor = mean_meteor(references, predictions)?;
        let bert = self.bert.score(predictions, references)?;
        for (name, value) in [
            ("precision", bert.precision),
            ("recall", bert.recall),
            ("f1", bert.f1),
        ] {
            if !(-1e-9..=1.0 + 1e-9).contains(&value) {
                return Err(MetricsError::Scorer(format!(
                    "BERTScore {name} {value} outside [0, 1]"
                )));
            }
        }

        Ok(MetricsRecord {
            wer: round3(mean_wer),
            meteor: round3(meteor),
            bert_precision: round3(bert.precision),
            bert_recall: round3(bert.recall),
            bert_f1: round3(bert.f1),
        })
    }
}
