//! Grounded answer synthesis.
//!
//! Retrieved passages are numbered in rank order and packed into a context
//! block under a character budget. The generator is asked to answer only
//! from that context and to cite passages as `[n]`, where `n` matches the
//! `rank` of the corresponding [`Source`].

use std::sync::Arc;
use std::time::Duration;

use crate::config::SynthesisConfig;
use crate::error::{CapabilityError, SynthesisError};
use crate::generation::Generator;
use crate::models::{Answer, RetrievalResult, ScoredChunk, Source};

/// Answer returned without calling the generator when retrieval found nothing.
pub const NO_RELEVANT_ANSWER: &str =
    "I couldn't find anything relevant to that question in the indexed documents.";

/// Numbered passages packed under a character budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
    pub text: String,
    /// How many top-ranked hits made it into `text`.
    pub passages: usize,
}

/// Pack hits into `[n] label\ntext` blocks in rank order.
///
/// Blocks are added while the total stays within `budget_chars`; the first
/// block that does not fit ends the context. A top passage that alone
/// exceeds the budget is truncated to fit.
pub fn build_context(hits: &[ScoredChunk], budget_chars: usize) -> Context {
    let mut text = String::new();
    let mut used = 0usize;
    let mut passages = 0usize;

    for (i, hit) in hits.iter().enumerate() {
        let block = format!("[{}] {}\n{}", i + 1, hit.document.label(), hit.chunk.text);
        let block_len = block.chars().count();
        let sep = if i == 0 { 0 } else { 2 };

        if used + sep + block_len <= budget_chars {
            if i > 0 {
                text.push_str("\n\n");
            }
            text.push_str(&block);
            used += sep + block_len;
            passages += 1;
            continue;
        }

        if i == 0 && budget_chars > 0 {
            text.extend(block.chars().take(budget_chars));
            passages = 1;
        }
        break;
    }

    Context { text, passages }
}

/// Prompt asking for an answer grounded in `context` with `[n]` citations.
pub fn build_prompt(question: &str, context: &str) -> String {
    format!(
        "You are a research assistant. Answer the question using only the numbered \
context passages below. Cite the passages you rely on with their numbers in square \
brackets, for example [1] or [2][3]. If the context does not contain enough \
information to answer, say that you don't know instead of guessing.\n\n\
Context:\n{context}\n\n\
Question: {question}\n\n\
Answer:"
    )
}

pub struct Synthesizer {
    generator: Arc<dyn Generator>,
    config: SynthesisConfig,
    deadline: Duration,
}

impl Synthesizer {
    pub fn new(generator: Arc<dyn Generator>, config: SynthesisConfig, deadline: Duration) -> Self {
        Self {
            generator,
            config,
            deadline,
        }
    }

    /// Every retrieved hit as a [`Source`], in rank order.
    pub fn sources(&self, hits: &[ScoredChunk]) -> Vec<Source> {
        hits.iter()
            .enumerate()
            .map(|(i, hit)| Source::from_hit(i + 1, hit, self.config.excerpt_chars))
            .collect()
    }

    pub async fn answer(
        &self,
        question: &str,
        retrieved: &RetrievalResult,
    ) -> Result<Answer, SynthesisError> {
        if retrieved.is_empty() {
            return Ok(Answer {
                text: NO_RELEVANT_ANSWER.to_string(),
                sources: Vec::new(),
            });
        }

        let context = build_context(&retrieved.hits, self.config.context_budget_chars);
        let prompt = build_prompt(question, &context.text);
        tracing::debug!(
            passages = context.passages,
            context_chars = context.text.chars().count(),
            model = self.generator.model_name(),
            "generating answer"
        );

        let output = tokio::time::timeout(self.deadline, self.generator.generate(&prompt))
            .await
            .map_err(|_| {
                SynthesisError::Generation(CapabilityError::timeout(
                    self.generator.provider(),
                    self.deadline.as_secs(),
                ))
            })?
            .map_err(SynthesisError::Generation)?;

        let text = output.trim();
        if text.is_empty() {
            return Err(SynthesisError::EmptyOutput);
        }

        Ok(Answer {
            text: text.to_string(),
            sources: self.sources(&retrieved.hits[..context.passages]),
        })
    }
}
