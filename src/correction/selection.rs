//! Selection strategies that pick one of the hypotheses without asking a model.

use async_trait::async_trait;

use crate::metrics::{edit_distance, normalize, wer};

use super::{
    ensure_hypotheses, CorrectionContext, CorrectionStrategy, ReferenceAccess, StrategyError,
};

/// Index of the first element with the smallest score.
fn argmin_by<F>(hypotheses: &[String], mut score: F) -> Option<usize>
where
    F: FnMut(&str) -> f64,
{
    let mut best: Option<(usize, f64)> = None;
    for (i, h) in hypotheses.iter().enumerate() {
        let s = score(h);
        match best {
            Some((_, b)) if s >= b => {}
            _ => best = Some((i, s)),
        }
    }
    best.map(|(i, _)| i)
}

/// The hypothesis with the smallest character edit distance to `target`
/// (first one wins ties).
pub fn closest_hypothesis<'a>(hypotheses: &'a [String], target: &str) -> Option<&'a str> {
    argmin_by(hypotheses, |h| edit_distance(h, target) as f64).map(|i| hypotheses[i].as_str())
}

/// Upper-bound baseline: the hypothesis with the lowest WER against the
/// reference (first one wins ties).
#[derive(Debug, Clone, Copy, Default)]
pub struct OracleSelection;

#[async_trait]
impl CorrectionStrategy for OracleSelection {
    fn name(&self) -> &str {
        "oracle"
    }

    fn reference_access(&self) -> ReferenceAccess {
        ReferenceAccess::Required
    }

    async fn correct(
        &self,
        _ctx: &CorrectionContext<'_>,
        hypotheses: &[String],
        reference: Option<&str>,
    ) -> Result<String, StrategyError> {
        ensure_hypotheses(hypotheses)?;
        let reference =
            reference.ok_or_else(|| StrategyError::MissingReference(self.name().to_string()))?;
        // Compared in scoring form so casing and punctuation don't pick the winner.
        let reference = normalize(reference, false);
        let best = argmin_by(hypotheses, |h| wer(&reference, &normalize(h, false))).unwrap_or(0);
        Ok(hypotheses[best].clone())
    }
}

/// The ASR system's own best guess: the first hypothesis.
#[derive(Debug, Clone, Copy, Default)]
pub struct Top1Selection;

#[async_trait]
impl CorrectionStrategy for Top1Selection {
    fn name(&self) -> &str {
        "top1"
    }

    async fn correct(
        &self,
        _ctx: &CorrectionContext<'_>,
        hypotheses: &[String],
        _reference: Option<&str>,
    ) -> Result<String, StrategyError> {
        ensure_hypotheses(hypotheses)?;
        Ok(hypotheses[0].clone())
    }
}
