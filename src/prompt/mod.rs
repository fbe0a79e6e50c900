// Prompt module
// Scenario resolution and retrieval-augmented prompt assembly

pub mod scenario;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Result;
use crate::database::sqlite::KnowledgeEntry;
use crate::knowledge::KnowledgeStore;

pub use scenario::{
    CustomScenario, GENERIC_SYSTEM_PROMPT, Scenario, ScenarioCatalog, ScenarioKind,
    ScenarioProfile, ScenarioSource, TemplateStatus, business_context_category,
};

/// Number of category entries folded into the business context section
const BUSINESS_CONTEXT_ENTRIES: usize = 3;

const CLOSING_INSTRUCTION: &str = "Please provide a helpful, accurate response based on the above \
context. If you don't have enough information to provide a complete answer, say so and suggest \
next steps.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    #[serde(alias = "USER", alias = "customer")]
    User,
    #[serde(alias = "ASSISTANT")]
    Assistant,
}

impl ChatRole {
    #[inline]
    pub fn label(self) -> &'static str {
        match self {
            Self::User => "Customer",
            Self::Assistant => "Assistant",
        }
    }
}

/// One message of an earlier conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    #[inline]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    #[inline]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// A finished prompt and the knowledge entries quoted in it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssembledPrompt {
    pub prompt: String,
    pub sources: Vec<KnowledgeEntry>,
}

/// Which of a scenario's topics a conversation touches
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextGaps {
    pub mentioned_keywords: Vec<String>,
    pub suggested_context: String,
    /// Percentage of the scenario keywords mentioned so far
    pub context_coverage: f64,
}

/// Builds generation prompts from a scenario, retrieved knowledge and chat history
#[derive(Debug, Clone)]
pub struct PromptAssembler {
    store: Arc<KnowledgeStore>,
    catalog: ScenarioCatalog,
    top_k: usize,
    history_window: usize,
}

impl PromptAssembler {
    #[inline]
    pub fn new(store: Arc<KnowledgeStore>, catalog: ScenarioCatalog) -> Self {
        let top_k = store.retrieval().prompt_top_k;
        let history_window = store.retrieval().history_window;
        Self {
            store,
            catalog,
            top_k,
            history_window,
        }
    }

    #[inline]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    #[inline]
    pub fn with_history_window(mut self, history_window: usize) -> Self {
        self.history_window = history_window;
        self
    }

    #[inline]
    pub fn catalog(&self) -> &ScenarioCatalog {
        &self.catalog
    }

    #[inline]
    pub fn store(&self) -> &Arc<KnowledgeStore> {
        &self.store
    }

    #[inline]
    pub async fn build(
        &self,
        scenario: &Scenario,
        user_message: &str,
        history: &[ChatTurn],
        business_context: Option<&str>,
    ) -> Result<String> {
        Ok(self
            .build_with_sources(scenario, user_message, history, business_context)
            .await?
            .prompt)
    }

    /// Compose the prompt in a fixed order: system instructions, business
    /// context, the best knowledge matches in the scenario's category, the
    /// recent history, and finally the query with the closing instruction.
    /// Sections with nothing to show are left out entirely.
    #[inline]
    pub async fn build_with_sources(
        &self,
        scenario: &Scenario,
        user_message: &str,
        history: &[ChatTurn],
        business_context: Option<&str>,
    ) -> Result<AssembledPrompt> {
        let mut sections = vec![self.catalog.system_prompt(scenario).trim_end().to_string()];

        if let Some(context) = business_context.map(str::trim).filter(|c| !c.is_empty()) {
            sections.push(format!("## Business Context\n{}", context));
        }

        let category = scenario.business_context_category();
        let sources = self
            .store
            .search(user_message, self.top_k, Some(&category))
            .await?;
        if !sources.is_empty() {
            sections.push(self.knowledge_section(&sources));
        }

        let window = history.len().saturating_sub(self.history_window);
        let recent = history.get(window..).unwrap_or_default();
        if !recent.is_empty() {
            sections.push(format!(
                "## Previous Conversation\n{}",
                recent
                    .iter()
                    .map(|turn| format!("{}: {}", turn.role.label(), turn.content))
                    .join("\n")
            ));
        }

        sections.push(format!(
            "## Current Customer Query\nCustomer: {}\n\n{}",
            user_message, CLOSING_INSTRUCTION
        ));

        debug!(
            "Assembled prompt for {} with {} knowledge sources and {} history turns",
            scenario,
            sources.len(),
            recent.len()
        );

        Ok(AssembledPrompt {
            prompt: sections.join("\n\n"),
            sources,
        })
    }

    /// Up to three entries of the scenario's business-context category, rendered
    /// as `**title**` blocks. `None` when the category is empty.
    #[inline]
    pub async fn business_context_for(&self, scenario: &Scenario) -> Result<Option<String>> {
        let entries = self
            .store
            .by_category(
                &scenario.business_context_category(),
                BUSINESS_CONTEXT_ENTRIES,
            )
            .await?;

        Ok((!entries.is_empty()).then(|| {
            entries
                .iter()
                .map(|entry| format!("**{}**\n{}", entry.title, entry.content))
                .join("\n\n")
        }))
    }

    fn knowledge_section(&self, sources: &[KnowledgeEntry]) -> String {
        let blocks = sources
            .iter()
            .enumerate()
            .map(|(i, entry)| format!("**Source {}: {}**\n{}", i + 1, entry.title, entry.content))
            .join("\n\n---\n\n");
        format!(
            "## Relevant Business Context (Top {} Matches)\n\n{}",
            self.top_k, blocks
        )
    }
}

/// Compare a conversation against a built-in scenario's topic keywords
#[inline]
pub fn analyze_context_gaps(history: &[ChatTurn], kind: ScenarioKind) -> ContextGaps {
    let conversation = history
        .iter()
        .map(|turn| turn.content.as_str())
        .join(" ")
        .to_lowercase();

    let keywords = kind.keywords();
    let mentioned_keywords: Vec<String> = keywords
        .iter()
        .filter(|keyword| conversation.contains(**keyword))
        .map(|keyword| (*keyword).to_string())
        .collect();

    let context_coverage = if keywords.is_empty() {
        0.0
    } else {
        mentioned_keywords.len() as f64 / keywords.len() as f64 * 100.0
    };

    ContextGaps {
        suggested_context: format!(
            "Consider uploading business documentation about: {}",
            keywords.join(", ")
        ),
        mentioned_keywords,
        context_coverage,
    }
}
