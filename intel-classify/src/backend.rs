//! Embedding backends
//!
//! Supports OpenAI-compatible embedding APIs and an offline hashing embedder.

use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::ClassifierError;

/// Generic embedding backend trait
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed each input, preserving order
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ClassifierError>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Thread-safe reference to an embedder
pub type SharedEmbedder = Arc<dyn Embedder>;

#[async_trait]
impl<E: Embedder + ?Sized> Embedder for Arc<E> {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ClassifierError> {
        (**self).embed(inputs).await
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

/// OpenAI-compatible embeddings configuration
#[derive(Debug, Clone)]
pub struct OpenAiEmbedderConfig {
    /// API key
    pub api_key: String,
    /// Base URL (for OpenRouter, local servers, etc.)
    pub base_url: Option<String>,
    /// Model name
    pub model: String,
}

impl Default for OpenAiEmbedderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: None,
            model: "text-embedding-3-small".to_string(),
        }
    }
}

impl OpenAiEmbedderConfig {
    pub fn openai(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            ..Default::default()
        }
    }

    pub fn local(base_url: &str, model: &str) -> Self {
        Self {
            api_key: "sk-local".to_string(),
            base_url: Some(base_url.to_string()),
            model: model.to_string(),
        }
    }
}

/// OpenAI-compatible embeddings backend
pub struct OpenAiEmbedder {
    client: Client<OpenAIConfig>,
    config: OpenAiEmbedderConfig,
}

impl OpenAiEmbedder {
    pub fn new(config: OpenAiEmbedderConfig) -> Result<Self, ClassifierError> {
        if config.api_key.is_empty() {
            return Err(ClassifierError::Config("embedding API key is empty".to_string()));
        }

        let mut openai_config = OpenAIConfig::new().with_api_key(&config.api_key);
        if let Some(base_url) = &config.base_url {
            openai_config = openai_config.with_api_base(base_url);
        }

        Ok(Self {
            client: Client::with_config(openai_config),
            config,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ClassifierError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.config.model)
            .input(inputs.to_vec())
            .build()
            .map_err(|e| ClassifierError::Backend(e.to_string()))?;

        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| ClassifierError::Backend(e.to_string()))?;

        let mut data = response.data;
        data.sort_by_key(|e| e.index);
        if data.len() != inputs.len() {
            return Err(ClassifierError::Backend(format!(
                "expected {} embeddings, got {}",
                inputs.len(),
                data.len()
            )));
        }
        Ok(data.into_iter().map(|e| e.embedding).collect())
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Offline embedder using signed feature hashing of word tokens
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self { dimensions: 512 }
    }
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    /// L2-normalized vector of one text
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimensions];

        for token in tokenize(text) {
            // Crude stem so "phishing" and "phish" share a feature
            let stem: String = token.chars().take(5).collect();
            for feature in [token.as_str(), stem.as_str()] {
                let digest = Sha256::digest(feature.as_bytes());
                let mut index_bytes = [0u8; 8];
                index_bytes.copy_from_slice(&digest[..8]);
                let index = (u64::from_le_bytes(index_bytes) % self.dimensions as u64) as usize;
                let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
                vector[index] += sign;
            }
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ClassifierError> {
        Ok(inputs.iter().map(|text| self.embed_one(text)).collect())
    }

    fn model_name(&self) -> &str {
        "feature-hashing"
    }
}

/// Lowercase alphanumeric tokens
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Create a shared OpenAI-compatible embedder
pub fn create_openai_embedder(config: OpenAiEmbedderConfig) -> Result<SharedEmbedder, ClassifierError> {
    Ok(Arc::new(OpenAiEmbedder::new(config)?))
}
