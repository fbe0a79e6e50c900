
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use super::{Generation, TextGenerator};
use crate::config::GenerationConfig;
use crate::{RagError, Result};

/// Non-streaming completions from an Ollama `/api/generate` endpoint
#[derive(Debug, Clone)]
pub struct OllamaGenerator {
    base_url: Url,
    model: String,
    agent: ureq::Agent,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaGenerator {
    #[inline]
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let base_url = config
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?;

        Ok(Self {
            base_url,
            model: config.model.clone(),
            agent: build_agent(Duration::from_secs(config.timeout_secs)),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self.timeout = timeout;
        self
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn call_generate_api(&self, prompt: &str) -> Result<Generation> {
        let url = self
            .base_url
            .join("/api/generate")
            .map_err(|e| RagError::Configuration(format!("Failed to build generate URL: {}", e)))?;

        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
        };
        let request_json = serde_json::to_string(&request)
            .map_err(|e| RagError::Generation(format!("Failed to serialize request: {}", e)))?;

        debug!(
            "Requesting completion from {} ({} prompt characters)",
            self.model,
            prompt.len()
        );

        let response_text = self
            .agent
            .post(url.as_str())
            .header("Content-Type", "application/json")
            .send(&request_json)
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .map_err(|e| match e {
                ureq::Error::StatusCode(status) => {
                    RagError::Generation(format!("Ollama returned HTTP {}", status))
                }
                other => RagError::Generation(format!("Request to Ollama failed: {}", other)),
            })?;

        let response: GenerateResponse = serde_json::from_str(&response_text).map_err(|e| {
            RagError::Generation(format!("Failed to parse generate response: {}", e))
        })?;

        if response.response.trim().is_empty() {
            return Err(RagError::Generation(
                "Ollama returned an empty completion".to_string(),
            ));
        }

        Ok(Generation::new(response.response))
    }
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    #[inline]
    fn model_name(&self) -> String {
        self.model.clone()
    }

    #[inline]
    async fn generate(&self, prompt: &str) -> Result<Generation> {
        let generator = self.clone();
        let prompt = prompt.to_string();
        let call = tokio::task::spawn_blocking(move || generator.call_generate_api(&prompt));

        match tokio::time::timeout(self.timeout, call).await {
            Ok(joined) => joined.context("Generation task failed")?,
            Err(_) => {
                warn!(
                    "Completion from {} timed out after {:?}",
                    self.model, self.timeout
                );
                Err(RagError::Generation(format!(
                    "Timed out after {:?}",
                    self.timeout
                )))
            }
        }
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}
