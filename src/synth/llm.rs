//! The LLM service contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::cost::TokenUsage;
use crate::Result;

/// One structured completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmRequest {
    pub model: String,
    pub system: Option<String>,
    pub prompt: String,
    pub temperature: f32,
    /// Ask the service for a bare JSON object.
    pub json_mode: bool,
}

impl LlmRequest {
    pub fn json(model: impl Into<String>, prompt: impl Into<String>, temperature: f32) -> Self {
        Self {
            model: model.into(),
            system: None,
            prompt: prompt.into(),
            temperature,
            json_mode: true,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmCompletion {
    pub text: String,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub tokens: u64,
}

/// External LLM: chat completion plus text embedding.
#[async_trait]
pub trait LlmService: Send + Sync + 'static {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmCompletion>;

    async fn embed(&self, model: &str, text: &str) -> Result<Embedding>;
}

#[async_trait]
impl<L: LlmService + ?Sized> LlmService for std::sync::Arc<L> {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmCompletion> {
        (**self).complete(request).await
    }

    async fn embed(&self, model: &str, text: &str) -> Result<Embedding> {
        (**self).embed(model, text).await
    }
}
