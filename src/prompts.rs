//! Prompt templates for model-backed correction.
//!
//! Domain logic for rendering correction prompts. Provider-agnostic.

use crate::gateway::Message;

/// Rendered prompt ready for the model.
#[derive(Debug, Clone)]
pub struct PromptInstance {
    pub system: String,
    pub user: String,
}

impl PromptInstance {
    pub fn to_messages(&self) -> Vec<Message> {
        vec![Message::system(&self.system), Message::user(&self.user)]
    }
}

/// Escape XML special characters to prevent prompt injection via tag breaking.
fn escape_xml_chars(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Render hypotheses as numbered tags, in ranking order.
pub fn render_hypotheses(hypotheses: &[String]) -> String {
    hypotheses
        .iter()
        .enumerate()
        .map(|(i, h)| {
            let n = i + 1;
            format!("<hypothesis{n}> {} </hypothesis{n}>", escape_xml_chars(h.trim()))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// A prompt template with `{hypotheses}` and `{examples}` placeholders.
#[derive(Debug, Clone, Copy)]
pub struct PromptTemplate {
    pub slug: &'static str,
    pub system: &'static str,
    pub user: &'static str,
}

impl PromptTemplate {
    /// Render with the given hypotheses and worked examples (may be empty).
    ///
    /// Examples come from a curated pool and are inserted verbatim.
    pub fn render(&self, hypotheses: &[String], examples: &[String]) -> PromptInstance {
        let examples_block = if examples.is_empty() {
            String::new()
        } else {
            format!(
                "Here are some examples:\n{}\n\nNow the transcription to correct:",
                examples
                    .iter()
                    .map(|e| e.trim())
                    .collect::<Vec<_>>()
                    .join("\n\n")
            )
        };

        let user = self
            .user
            .replace("{examples}", &examples_block)
            .replace("{hypotheses}", &render_hypotheses(hypotheses));

        PromptInstance {
            system: self.system.trim().to_string(),
            user: user.trim().to_string(),
        }
    }
}

// =============================================================================
// Standard prompts
// =============================================================================

pub const UNCONSTRAINED_PROMPT: PromptTemplate = PromptTemplate {
    slug: "unconstrained_v1",
    system: r#"You are an expert at correcting automatic speech recognition output. You receive the n-best hypotheses an ASR system produced for one utterance, best first. Work out what was actually said."#,
    user: r#"{examples}

{hypotheses}

Reply with the corrected transcription only.
Your output:"#,
};

pub const CONSTRAINED_PROMPT: PromptTemplate = PromptTemplate {
    slug: "constrained_v1",
    system: r#"You are an expert at correcting automatic speech recognition output. You receive the n-best hypotheses an ASR system produced for one utterance, best first. Choose the most plausible hypothesis, repairing individual words only where the hypotheses clearly disagree.

Rules:
- Write the transcription in lower case, without punctuation, on a single line.
- Do not add words that no hypothesis supports.
- Enclose the answer in <transcription></transcription> tags and output nothing else."#,
    user: r#"{examples}

{hypotheses}

Your output:"#,
};

// =============================================================================
// TESTS
// =============================================================================
