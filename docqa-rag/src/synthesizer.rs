//! Answer synthesis: prompt assembly and the single call to the generation model.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::ContextPolicy;
use crate::document::SearchResult;
use crate::error::{RagError, Result};

/// Instructions sent with every generation request.
pub const DEFAULT_INSTRUCTIONS: &str = "You answer questions using only the context you are \
given. If the context does not contain the answer, say that the context does not contain \
the information instead of guessing.";

/// Default user-turn template. `{context}` and `{question}` are substituted.
pub const DEFAULT_TEMPLATE: &str = "Answer the user's question based only on the following \
context:\n<context>\n{context}\n</context>\n\nQuestion: {question}";

/// A single request to a text-generation model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationRequest {
    /// System-level instructions constraining the model.
    pub instructions: String,
    /// The rendered user turn: context passages followed by the question.
    pub prompt: String,
    /// The raw context passages, in retrieval order.
    pub context: Vec<String>,
    /// The raw question.
    pub question: String,
}

/// A text-generation model reached over some request/response interface.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::Generator;
///
/// let text = generator.generate(&request).await?;
/// ```
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate the answer text for one request.
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;

    /// A short name used in logs and error messages.
    fn name(&self) -> &str;
}

/// A passage an answer was grounded on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    /// Index entry id.
    pub id: u64,
    /// Source identifier of the passage's document, if recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Similarity of the passage to the question.
    pub score: f32,
}

/// The answer to one question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    /// The generated answer text.
    pub text: String,
    /// The passages supplied as context, most similar first.
    pub sources: Vec<Source>,
}

/// Turns a question and its retrieved passages into an answer.
#[derive(Clone)]
pub struct AnswerSynthesizer {
    generator: Arc<dyn Generator>,
    policy: ContextPolicy,
    timeout: Duration,
    instructions: String,
    template: String,
}

impl AnswerSynthesizer {
    /// Create a synthesizer with the default instructions and template.
    pub fn new(generator: Arc<dyn Generator>, policy: ContextPolicy, timeout: Duration) -> Self {
        Self {
            generator,
            policy,
            timeout,
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            template: DEFAULT_TEMPLATE.to_string(),
        }
    }

    /// Replace the system instructions.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = instructions.into();
        self
    }

    /// Replace the user-turn template.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] if the template lacks `{context}` or `{question}`.
    pub fn with_template(mut self, template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        for placeholder in ["{context}", "{question}"] {
            if !template.contains(placeholder) {
                return Err(RagError::Config(format!(
                    "prompt template must contain the {placeholder} placeholder"
                )));
            }
        }
        self.template = template;
        Ok(self)
    }

    /// The configured context policy.
    pub fn policy(&self) -> ContextPolicy {
        self.policy
    }

    /// Build the generation request for `question` grounded on `passages`.
    pub fn build_request(&self, question: &str, passages: &[SearchResult]) -> GenerationRequest {
        let context = passages.iter().map(|p| p.text.clone()).collect::<Vec<_>>();
        let rendered_context = passages
            .iter()
            .enumerate()
            .map(|(i, p)| match p.source() {
                Some(source) => format!("[{}] (source: {source})\n{}", i + 1, p.text),
                None => format!("[{}]\n{}", i + 1, p.text),
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let prompt = render(&self.template, &rendered_context, question);

        GenerationRequest {
            instructions: self.instructions.clone(),
            prompt,
            context,
            question: question.to_string(),
        }
    }

    /// Send exactly one generation request and return the answer.
    ///
    /// # Errors
    ///
    /// - [`RagError::EmptyContext`] if `passages` is empty under [`ContextPolicy::Strict`]
    /// - [`RagError::GenerationTimeout`] if the model exceeds the timeout
    /// - [`RagError::GenerationService`] if the call fails or the answer is empty
    pub async fn synthesize(&self, question: &str, passages: &[SearchResult]) -> Result<Answer> {
        if passages.is_empty() && self.policy == ContextPolicy::Strict {
            debug!("no relevant context, refusing to generate");
            return Err(RagError::EmptyContext);
        }

        let request = self.build_request(question, passages);
        let provider = self.generator.name();

        let text = tokio::time::timeout(self.timeout, self.generator.generate(&request))
            .await
            .map_err(|_| {
                error!(provider, timeout = ?self.timeout, "generation timed out");
                RagError::GenerationTimeout { provider: provider.to_string(), timeout: self.timeout }
            })??;

        let text = text.trim();
        if text.is_empty() {
            error!(provider, "generation returned no answer");
            return Err(RagError::GenerationService {
                provider: provider.to_string(),
                message: "response contained no answer".to_string(),
            });
        }

        let sources = passages
            .iter()
            .map(|p| Source { id: p.id, source: p.source().map(str::to_string), score: p.score })
            .collect();

        debug!(provider, answer_len = text.len(), "answer generated");
        Ok(Answer { text: text.to_string(), sources })
    }
}

/// Substitute placeholders in one pass over the template, so placeholder-like
/// text inside the passages or the question is left alone.
fn render(template: &str, context: &str, question: &str) -> String {
    let placeholders = [("{context}", context), ("{question}", question)];
    let mut out = String::with_capacity(template.len() + context.len() + question.len());
    let mut rest = template;
    while let Some((pos, placeholder, value)) = placeholders
        .iter()
        .filter_map(|(p, v)| rest.find(p).map(|pos| (pos, *p, *v)))
        .min_by_key(|(pos, ..)| *pos)
    {
        out.push_str(&rest[..pos]);
        out.push_str(value);
        rest = &rest[pos + placeholder.len()..];
    }
    out.push_str(rest);
    out
}
