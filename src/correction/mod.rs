//! Correction strategies: policies that turn one sample's hypotheses into a
//! single corrected transcription.
//!
//! Each strategy states up front whether it reads the ground-truth reference
//! ([`ReferenceAccess`]). The orchestrator hands the reference only to those
//! that declare [`ReferenceAccess::Required`], so non-oracle evaluation can
//! never see it.

pub mod few_shot;
pub mod llm;
pub mod selection;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::GenerationConfig;
use crate::gateway::{Attribution, ChatGateway, ProviderError};

pub use few_shot::{ExamplePool, FewShot, WorkedExample};
pub use llm::{parse_constrained_reply, ZeroShotClosest, ZeroShotConstrained, ZeroShotUnconstrained};
pub use selection::{closest_hypothesis, OracleSelection, Top1Selection};

#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    #[error("sample has no hypotheses")]
    NoHypotheses,
    #[error("strategy '{0}' needs a reference but the sample has none")]
    MissingReference(String),
    #[error("completion failed: {0}")]
    Provider(#[from] ProviderError),
    #[error("example pool: {0}")]
    ExamplePool(String),
}

/// Whether a strategy is allowed to read the reference transcription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceAccess {
    None,
    Required,
}

/// Everything a strategy may use besides the sample itself.
pub struct CorrectionContext<'a> {
    pub gateway: &'a dyn ChatGateway,
    pub model: &'a str,
    pub generation: GenerationConfig,
    pub attribution: Attribution,
}

/// One correction policy. Implementations hold no mutable state, so a single
/// instance serves every concurrent unit of work.
#[async_trait]
pub trait CorrectionStrategy: Send + Sync {
    /// Stable name, used as the results column suffix.
    fn name(&self) -> &str;

    fn reference_access(&self) -> ReferenceAccess {
        ReferenceAccess::None
    }

    /// Produce one transcription. `reference` is `None` unless the strategy
    /// declared [`ReferenceAccess::Required`].
    async fn correct(
        &self,
        ctx: &CorrectionContext<'_>,
        hypotheses: &[String],
        reference: Option<&str>,
    ) -> Result<String, StrategyError>;
}

/// The built-in strategies, for configuration and the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    ZeroShotUnconstrained,
    ZeroShotConstrained,
    ZeroShotClosest,
    Oracle,
    Top1,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 5] = [
        StrategyKind::ZeroShotUnconstrained,
        StrategyKind::ZeroShotConstrained,
        StrategyKind::ZeroShotClosest,
        StrategyKind::Oracle,
        StrategyKind::Top1,
    ];

    /// Row label in the benchmark table.
    pub fn label(&self) -> &'static str {
        match self {
            StrategyKind::ZeroShotUnconstrained => "Zero-shot Uncon",
            StrategyKind::ZeroShotConstrained => "Zero-shot Constr",
            StrategyKind::ZeroShotClosest => "Zero-shot Closest",
            StrategyKind::Oracle => "Oracle",
            StrategyKind::Top1 => "Top 1",
        }
    }

    /// Whether the strategy calls the completion service.
    pub fn needs_model(&self) -> bool {
        matches!(
            self,
            StrategyKind::ZeroShotUnconstrained
                | StrategyKind::ZeroShotConstrained
                | StrategyKind::ZeroShotClosest
        )
    }

    pub fn build(&self, few_shot: &FewShot) -> Arc<dyn CorrectionStrategy> {
        match self {
            StrategyKind::ZeroShotUnconstrained => Arc::new(ZeroShotUnconstrained::new(few_shot)),
            StrategyKind::ZeroShotConstrained => Arc::new(ZeroShotConstrained::new(few_shot)),
            StrategyKind::ZeroShotClosest => Arc::new(ZeroShotClosest::new(few_shot)),
            StrategyKind::Oracle => Arc::new(OracleSelection),
            StrategyKind::Top1 => Arc::new(Top1Selection),
        }
    }
}

pub(crate) fn ensure_hypotheses(hypotheses: &[String]) -> Result<(), StrategyError> {
    if hypotheses.is_empty() {
        Err(StrategyError::NoHypotheses)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_oracle_reads_the_reference() {
        let few = FewShot::default();
        for kind in StrategyKind::ALL {
            let strategy = kind.build(&few);
            let expected = if kind == StrategyKind::Oracle {
                ReferenceAccess::Required
            } else {
                ReferenceAccess::None
            };
            assert_eq!(strategy.reference_access(), expected, "{kind:?}");
        }
    }

    #[test]
    fn built_names_are_distinct() {
        let few = FewShot::default();
        let mut names: Vec<String> = StrategyKind::ALL
            .iter()
            .map(|k| k.build(&few).name().to_string())
            .collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), StrategyKind::ALL.len());
    }

    #[test]
    fn few_shot_changes_model_backed_names_only() {
        let few = FewShot::new(ExamplePool::builtin("cv").unwrap(), 2);
        assert_eq!(
            StrategyKind::ZeroShotClosest.build(&few).name(),
            "few_shot_closest"
        );
        assert_eq!(StrategyKind::Top1.build(&few).name(), "top1");
    }
}
