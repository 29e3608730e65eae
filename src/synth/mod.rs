//! # Semantic Synthesis
//!
//! Dossier in, validated [`SemanticProfile`] out. One synthesis is a pure
//! request/response exchange with the LLM service: render the prompt,
//! validate the reply against the response schema, embed the summary.
//! Any failure along that path (transport, timeout, malformed reply, wrong
//! embedding width) consumes one attempt; after the last attempt the entity
//! is unresolved.

pub mod cost;
pub mod llm;
pub mod prompt;
pub mod scripted;
pub mod taxonomy;
#[cfg(feature = "openai")]
pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::config::{GenesisConfig, ModelConfig, PricingConfig};
use crate::model::{EvidenceDossier, SemanticProfile};
use crate::retry::{with_timeout, Backoff};
use crate::{Error, Result};

pub use cost::{CostEstimate, TokenUsage, UsageKind, UsageReport, UsageTracker};
pub use llm::{Embedding, LlmCompletion, LlmRequest, LlmService};
pub use scripted::{HashingEmbedder, ScriptedLlm};
pub use taxonomy::{ErpTaxonomy, StereotypeTaxonomy};
#[cfg(feature = "openai")]
pub use openai::OpenAiClient;

pub struct SemanticSynthesizer {
    llm: Arc<dyn LlmService>,
    taxonomy: Arc<dyn StereotypeTaxonomy>,
    models: ModelConfig,
    pricing: PricingConfig,
    backoff: Backoff,
    llm_timeout: Duration,
    usage: Arc<UsageTracker>,
}

impl SemanticSynthesizer {
    pub fn new(
        llm: Arc<dyn LlmService>,
        taxonomy: Arc<dyn StereotypeTaxonomy>,
        config: &GenesisConfig,
        usage: Arc<UsageTracker>,
    ) -> Self {
        Self {
            llm,
            taxonomy,
            models: config.models.clone(),
            pricing: config.pricing.clone(),
            backoff: Backoff::new(&config.retry),
            llm_timeout: config.timeouts.llm(),
            usage,
        }
    }

    pub fn taxonomy(&self) -> &dyn StereotypeTaxonomy {
        self.taxonomy.as_ref()
    }

    /// Estimated spend for synthesizing `dossiers`. Makes no calls.
    pub fn estimate(&self, dossiers: &[&EvidenceDossier]) -> CostEstimate {
        let prompts: Vec<String> = dossiers
            .iter()
            .map(|d| format!("{}\n{}", prompt::SYSTEM_PROMPT, prompt::render_prompt(d, self.taxonomy.as_ref())))
            .collect();
        CostEstimate::for_prompts(prompts.iter().map(String::as_str), &self.pricing)
    }

    /// Synthesize one profile, retrying with backoff. Fails with
    /// `Error::Synthesis` once every attempt is spent.
    pub async fn synthesize(&self, dossier: &EvidenceDossier) -> Result<SemanticProfile> {
        let digest = dossier.digest()?;
        let prompt = prompt::render_prompt(dossier, self.taxonomy.as_ref());
        let attempts = self.backoff.max_attempts();
        let mut reason = String::new();

        for attempt in 1..=attempts {
            match self.attempt(dossier, &prompt, &digest).await {
                Ok(profile) => {
                    debug!(entity = %dossier.entity, attempt, stereotype = %profile.stereotype, "profile synthesized");
                    return Ok(profile);
                }
                Err(e) => {
                    reason = e;
                    if attempt < attempts {
                        let wait = self.backoff.delay(attempt);
                        warn!(
                            entity = %dossier.entity,
                            attempt,
                            wait_ms = wait.as_millis() as u64,
                            %reason,
                            "synthesis attempt failed, retrying"
                        );
                        tokio::time::sleep(wait).await;
                    }
                }
            }
        }

        warn!(entity = %dossier.entity, attempts, %reason, "synthesis unresolved");
        Err(Error::Synthesis { entity: dossier.entity.to_string(), attempts, reason })
    }

    async fn attempt(
        &self,
        dossier: &EvidenceDossier,
        prompt: &str,
        digest: &str,
    ) -> std::result::Result<SemanticProfile, String> {
        let request = LlmRequest::json(&self.models.synthesis_model, prompt, self.models.temperature)
            .with_system(prompt::SYSTEM_PROMPT);
        let completion = with_timeout(self.llm_timeout, "synthesis completion", self.llm.complete(&request))
            .await
            .map_err(|e| e.to_string())?;
        self.usage.record(UsageKind::Synthesis, completion.usage);

        let parsed = prompt::parse_response(&completion.text, self.taxonomy.as_ref())?;

        let embedding = with_timeout(
            self.llm_timeout,
            "summary embedding",
            self.llm.embed(&self.models.embedding_model, &parsed.summary),
        )
        .await
        .map_err(|e| e.to_string())?;
        self.usage.record(UsageKind::Embedding, TokenUsage::new(embedding.tokens, 0));

        if embedding.vector.len() != self.models.embedding_dimensions {
            return Err(format!(
                "embedding has {} dimensions, expected {}",
                embedding.vector.len(),
                self.models.embedding_dimensions
            ));
        }
        if embedding.vector.iter().any(|x| !x.is_finite()) {
            return Err("embedding contains non-finite values".into());
        }

        Ok(SemanticProfile {
            entity: dossier.entity.clone(),
            purpose: parsed.purpose,
            business_logic: parsed.business_logic,
            stereotype: parsed.stereotype,
            summary: parsed.summary,
            confidence: parsed.confidence,
            embedding: embedding.vector,
            model: self.models.synthesis_model.clone(),
            dossier_digest: digest.to_string(),
            synthesized_at: Utc::now(),
        })
    }
}
