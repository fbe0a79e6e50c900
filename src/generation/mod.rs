// Generation module
// Text generation backends and the support assistant that falls back to static replies

pub mod ollama;


use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::Result;
use crate::prompt::{ChatTurn, PromptAssembler, Scenario};

pub use ollama::OllamaGenerator;

/// Model label on replies that were substituted after a generation failure
pub const FALLBACK_MODEL: &str = "fallback";

/// Output of one completion call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Generation {
    pub content: String,
    pub token_estimate: usize,
}

impl Generation {
    #[inline]
    pub fn new(content: impl Into<String>) -> Self {
        let content = content.into();
        let token_estimate = estimate_response_tokens(&content);
        Self {
            content,
            token_estimate,
        }
    }
}

/// Rough token count of generated text: 1.3 tokens per word, rounded down
#[inline]
pub fn estimate_response_tokens(text: &str) -> usize {
    text.split_whitespace().count() * 13 / 10
}

/// Opaque prompt-in, text-out completion service
#[async_trait]
pub trait TextGenerator: Send + Sync {
    fn model_name(&self) -> String;

    async fn generate(&self, prompt: &str) -> Result<Generation>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssistantReply {
    pub content: String,
    pub model: String,
    pub token_estimate: usize,
    /// Titles of the knowledge entries quoted in the prompt
    pub sources: Vec<String>,
    pub knowledge_ids: Vec<i64>,
}

impl AssistantReply {
    #[inline]
    pub fn is_fallback(&self) -> bool {
        self.model == FALLBACK_MODEL
    }

    fn fallback(content: String) -> Self {
        Self {
            content,
            model: FALLBACK_MODEL.to_string(),
            token_estimate: 0,
            sources: Vec::new(),
            knowledge_ids: Vec::new(),
        }
    }
}

/// Answers customer messages with retrieval-augmented prompts.
///
/// Never fails: any error while assembling the prompt or generating the answer
/// is logged and replaced by the scenario's static fallback message.
pub struct SupportAssistant {
    assembler: PromptAssembler,
    generator: Arc<dyn TextGenerator>,
}

impl std::fmt::Debug for SupportAssistant {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupportAssistant")
            .field("assembler", &self.assembler)
            .field("generator", &self.generator.model_name())
            .finish()
    }
}

impl SupportAssistant {
    #[inline]
    pub fn new(assembler: PromptAssembler, generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            assembler,
            generator,
        }
    }

    #[inline]
    pub fn assembler(&self) -> &PromptAssembler {
        &self.assembler
    }

    #[inline]
    pub async fn respond(
        &self,
        scenario_id: &str,
        message: &str,
        history: &[ChatTurn],
    ) -> AssistantReply {
        let scenario = self.assembler.catalog().resolve(scenario_id);

        match self.try_respond(&scenario, message, history).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("Support assistant error for {}: {}", scenario, e);
                AssistantReply::fallback(self.assembler.catalog().fallback_message(&scenario))
            }
        }
    }

    async fn try_respond(
        &self,
        scenario: &Scenario,
        message: &str,
        history: &[ChatTurn],
    ) -> Result<AssistantReply> {
        let business_context = self.business_context(scenario).await;
        let assembled = self
            .assembler
            .build_with_sources(scenario, message, history, business_context.as_deref())
            .await?;

        let generation = self.generator.generate(&assembled.prompt).await?;
        info!(
            "Generated reply for {} with {} ({} tokens, {} sources)",
            scenario,
            self.generator.model_name(),
            generation.token_estimate,
            assembled.sources.len()
        );

        Ok(AssistantReply {
            content: generation.content,
            model: self.generator.model_name(),
            token_estimate: generation.token_estimate,
            sources: assembled
                .sources
                .iter()
                .map(|entry| entry.title.clone())
                .collect(),
            knowledge_ids: assembled.sources.iter().map(|entry| entry.id).collect(),
        })
    }

    /// Configured context of a custom scenario, else its uploaded documents
    async fn business_context(&self, scenario: &Scenario) -> Option<String> {
        let configured = match scenario {
            Scenario::Custom(id) => self
                .assembler
                .catalog()
                .custom(id)
                .and_then(|custom| custom.business_context.clone()),
            Scenario::BuiltIn(_) => None,
        };
        if configured.is_some() {
            return configured;
        }

        self.assembler
            .business_context_for(scenario)
            .await
            .unwrap_or_else(|e| {
                warn!("Failed to load business context for {}: {}", scenario, e);
                None
            })
    }
}
