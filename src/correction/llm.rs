//! Model-backed strategies. Each sends one prompt built from the hypotheses
//! (plus any few-shot examples fixed at construction) through the gateway.

use async_trait::async_trait;

use crate::gateway::ChatRequest;
use crate::metrics::strip_reasoning;
use crate::prompts::{PromptTemplate, CONSTRAINED_PROMPT, UNCONSTRAINED_PROMPT};

use super::few_shot::FewShot;
use super::selection::closest_hypothesis;
use super::{ensure_hypotheses, CorrectionContext, CorrectionStrategy, StrategyError};

/// Prompt plus pre-rendered examples shared by the model-backed strategies.
#[derive(Debug, Clone)]
struct PromptedCall {
    template: PromptTemplate,
    examples: Vec<String>,
}

impl PromptedCall {
    fn new(template: PromptTemplate, few_shot: &FewShot) -> Self {
        Self {
            template,
            examples: few_shot.rendered(),
        }
    }

    fn prefix(&self) -> &'static str {
        if self.examples.is_empty() {
            "zero_shot"
        } else {
            "few_shot"
        }
    }

    /// Reply text with any complete `<think>` blocks removed.
    async fn complete(
        &self,
        ctx: &CorrectionContext<'_>,
        hypotheses: &[String],
    ) -> Result<String, StrategyError> {
        ensure_hypotheses(hypotheses)?;
        let prompt = self.template.render(hypotheses, &self.examples);
        tracing::debug!(
            prompt = self.template.slug,
            examples = self.examples.len(),
            model = ctx.model,
            "requesting correction"
        );
        let req = ChatRequest::new(ctx.model, prompt.to_messages(), ctx.attribution.clone())
            .temperature(ctx.generation.temperature)
            .max_tokens(ctx.generation.max_tokens);
        let resp = ctx.gateway.chat(req).await?;
        Ok(strip_reasoning(&resp.content).trim().to_string())
    }
}

/// Content of the first `<transcription>...</transcription>` pair, or the
/// raw reply when the tags are missing or empty.
pub fn parse_constrained_reply(reply: &str) -> String {
    const OPEN: &str = "<transcription>";
    const CLOSE: &str = "</transcription>";

    let inner = reply.find(OPEN).and_then(|start| {
        let body = &reply[start + OPEN.len()..];
        body.find(CLOSE).map(|end| body[..end].trim())
    });

    match inner {
        Some(text) if !text.is_empty() => text.to_string(),
        _ => reply.trim().to_string(),
    }
}

// =============================================================================
// STRATEGIES
// =============================================================================

/// Trust the model's free-form reply verbatim.
#[derive(Debug, Clone)]
pub struct ZeroShotUnconstrained {
    call: PromptedCall,
    name: String,
}

impl ZeroShotUnconstrained {
    pub fn new(few_shot: &FewShot) -> Self {
        let call = PromptedCall::new(UNCONSTRAINED_PROMPT, few_shot);
        let name = format!("{}_unconstrained", call.prefix());
        Self { call, name }
    }
}

#[async_trait]
impl CorrectionStrategy for ZeroShotUnconstrained {
    fn name(&self) -> &str {
        &self.name
    }

    async fn correct(
        &self,
        ctx: &CorrectionContext<'_>,
        hypotheses: &[String],
        _reference: Option<&str>,
    ) -> Result<String, StrategyError> {
        self.call.complete(ctx, hypotheses).await
    }
}

/// Ask for a tagged, single-line answer and extract it.
#[derive(Debug, Clone)]
pub struct ZeroShotConstrained {
    call: PromptedCall,
    name: String,
}

impl ZeroShotConstrained {
    pub fn new(few_shot: &FewShot) -> Self {
        let call = PromptedCall::new(CONSTRAINED_PROMPT, few_shot);
        let name = format!("{}_constrained", call.prefix());
        Self { call, name }
    }
}

#[async_trait]
impl CorrectionStrategy for ZeroShotConstrained {
    fn name(&self) -> &str {
        &self.name
    }

    async fn correct(
        &self,
        ctx: &CorrectionContext<'_>,
        hypotheses: &[String],
        _reference: Option<&str>,
    ) -> Result<String, StrategyError> {
        let reply = self.call.complete(ctx, hypotheses).await?;
        Ok(parse_constrained_reply(&reply))
    }
}

/// Use the model's guess only to pick the nearest existing hypothesis.
#[derive(Debug, Clone)]
pub struct ZeroShotClosest {
    call: PromptedCall,
    name: String,
}

impl ZeroShotClosest {
    pub fn new(few_shot: &FewShot) -> Self {
        let call = PromptedCall::new(UNCONSTRAINED_PROMPT, few_shot);
        let name = format!("{}_closest", call.prefix());
        Self { call, name }
    }
}

#[async_trait]
impl CorrectionStrategy for ZeroShotClosest {
    fn name(&self) -> &str {
        &self.name
    }

    async fn correct(
        &self,
        ctx: &CorrectionContext<'_>,
        hypotheses: &[String],
        _reference: Option<&str>,
    ) -> Result<String, StrategyError> {
        let guess = self.call.complete(ctx, hypotheses).await?;
        let picked =
            closest_hypothesis(hypotheses, &guess).ok_or(StrategyError::NoHypotheses)?;
        Ok(picked.to_string())
    }
}
