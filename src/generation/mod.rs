//! Generative model capability
//!
//! A [`Generator`] turns one assembled prompt into one completion under fixed
//! [`GenerationParams`]. [`OllamaGenerator`] serves completions from a local
//! Ollama instance with a bounded per-call deadline.


use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::config::{GenerationConfig, OllamaConfig};
use crate::embeddings::OllamaClient;
use crate::{RagError, Result};

/// Generation options recognized by every backend
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    /// Caps generation length
    pub max_output_tokens: u32,
    /// Sampling randomness, 0 is deterministic
    pub temperature: f32,
}

impl Default for GenerationParams {
    #[inline]
    fn default() -> Self {
        Self {
            max_output_tokens: 512,
            temperature: 0.7,
        }
    }
}

#[async_trait]
pub trait Generator: Send + Sync {
    /// Produce a completion for `prompt`
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String>;
}

/// [`Generator`] backed by an Ollama completion model
#[derive(Debug, Clone)]
pub struct OllamaGenerator {
    client: OllamaClient,
    model: String,
}

impl OllamaGenerator {
    /// Build a generator whose requests are bounded by the generation timeout
    #[inline]
    pub fn new(ollama: &OllamaConfig, config: &GenerationConfig) -> Result<Self> {
        let client = OllamaClient::new(ollama)
            .map_err(|e| RagError::Config(format!("{:#}", e)))?
            .with_timeout(Duration::from_secs(config.timeout_seconds));
        Ok(Self::with_client(client, config.model.clone()))
    }

    #[inline]
    pub fn with_client(client: OllamaClient, model: String) -> Self {
        Self { client, model }
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    #[inline]
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        debug!(
            "Generating with {} (max {} tokens, temperature {})",
            self.model, params.max_output_tokens, params.temperature
        );

        let client = self.client.clone();
        let model = self.model.clone();
        let prompt = prompt.to_string();
        let params = *params;
        tokio::task::spawn_blocking(move || client.generate(&model, &prompt, &params))
            .await
            .map_err(|e| RagError::Generation(format!("Generation task failed: {}", e)))?
            .map_err(|e| RagError::Generation(format!("{:#}", e)))
    }
}
