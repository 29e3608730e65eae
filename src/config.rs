//! Run configuration.
//!
//! One explicit value, loaded from TOML, validated once, and handed to the
//! controller which threads it to every stage. Secrets are not part of it:
//! credentials reach the collaborators through their own constructors.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenesisConfig {
    pub source: SourceConfig,
    pub graph: GraphConfig,
    pub llm: LlmConfig,
    pub sampling: SamplingConfig,
    pub discovery: DiscoveryConfig,
    pub retry: RetryConfig,
    pub workers: WorkerConfig,
    pub models: ModelConfig,
    pub pricing: PricingConfig,
    pub timeouts: TimeoutConfig,
    pub naming: NamingConfig,
    pub checkpoint: CheckpointConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Connection URL without password; the password comes from the environment.
    pub url: Option<String>,
    pub schema: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self { url: None, schema: "public".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub url: Option<String>,
    pub user: String,
    pub database: String,
    /// Vector index name for `:Table` embeddings.
    pub index_name: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            url: None,
            user: "neo4j".to_string(),
            database: "neo4j".to_string(),
            index_name: "table_embeddings".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self { base_url: "https://api.openai.com/v1".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Entities to process; `None` means every extracted table.
    pub sample_size: Option<usize>,
    /// Fixes both entity selection and row sampling.
    pub seed: Option<u64>,
    /// Rows inspected per table for statistical evidence.
    pub rows_per_table: usize,
    /// Explicit entity list (`schema.table` or bare table names); overrides `sample_size`.
    pub entities: Option<Vec<String>>,
    /// Entities per gated synthesis batch; `None` gates the whole sample once.
    pub batch_size: Option<usize>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            sample_size: None,
            seed: None,
            rows_per_table: 5,
            entities: None,
            batch_size: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationMode {
    Heuristic,
    Llm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Candidates need similarity strictly above this.
    pub similarity_threshold: f32,
    /// Candidates kept per entity.
    pub top_m: usize,
    pub confirmation: ConfirmationMode,
    /// Minimum model confidence when `confirmation = "llm"`.
    pub min_confidence: f64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.80,
            top_m: 5,
            confirmation: ConfirmationMode::Heuristic,
            min_confidence: 0.85,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per call, the first one included.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            multiplier: 2.0,
            max_backoff_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub concurrency: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { concurrency: 4 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub synthesis_model: String,
    pub embedding_model: String,
    pub confirmation_model: String,
    pub embedding_dimensions: usize,
    pub temperature: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            synthesis_model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            confirmation_model: "gpt-4o-mini".to_string(),
            embedding_dimensions: 1536,
            temperature: 0.2,
        }
    }
}

/// Prices in USD per million tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    pub synthesis_input: f64,
    pub synthesis_output: f64,
    pub embedding_input: f64,
    pub confirmation_input: f64,
    pub confirmation_output: f64,
    /// Expected completion tokens per synthesis call.
    pub estimated_output_tokens: u64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            synthesis_input: 0.15,
            synthesis_output: 0.60,
            embedding_input: 0.02,
            confirmation_input: 0.15,
            confirmation_output: 0.60,
            estimated_output_tokens: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub query_secs: u64,
    pub llm_secs: u64,
    pub graph_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { query_secs: 30, llm_secs: 120, graph_secs: 30 }
    }
}

impl TimeoutConfig {
    pub fn query(&self) -> Duration { Duration::from_secs(self.query_secs) }
    pub fn llm(&self) -> Duration { Duration::from_secs(self.llm_secs) }
    pub fn graph(&self) -> Duration { Duration::from_secs(self.graph_secs) }
}

/// Extra naming rule appended to the stock lexicon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamingRuleConfig {
    pub tag: String,
    /// `prefix`, `suffix`, `exact` or `contains`.
    pub kind: String,
    pub patterns: Vec<String>,
    /// `table` or `column`.
    #[serde(default = "default_rule_scope")]
    pub scope: String,
    #[serde(default = "default_rule_weight")]
    pub weight: f64,
}

fn default_rule_scope() -> String { "column".to_string() }
fn default_rule_weight() -> f64 { 1.0 }

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConfig {
    pub rules: Vec<NamingRuleConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// JSON checkpoint file, relative to the working directory unless absolute.
    pub path: PathBuf,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self { path: PathBuf::from(DEFAULT_CHECKPOINT_PATH) }
    }
}

pub const DEFAULT_CHECKPOINT_PATH: &str = ".genesis/checkpoints.json";

impl GenesisConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: GenesisConfig = toml::from_str(contents)
            .map_err(|e| Error::Config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file, or defaults when it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        let d = &self.discovery;
        if !(-1.0..=1.0).contains(&d.similarity_threshold) {
            return Err(Error::Config("discovery.similarity_threshold must be within [-1, 1]".into()));
        }
        if d.top_m == 0 {
            return Err(Error::Config("discovery.top_m must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&d.min_confidence) {
            return Err(Error::Config("discovery.min_confidence must be within [0, 1]".into()));
        }
        if self.workers.concurrency == 0 {
            return Err(Error::Config("workers.concurrency must be at least 1".into()));
        }
        if self.models.embedding_dimensions == 0 {
            return Err(Error::Config("models.embedding_dimensions must be at least 1".into()));
        }
        if self.retry.multiplier < 1.0 {
            return Err(Error::Config("retry.multiplier must be >= 1.0".into()));
        }
        if self.sampling.batch_size == Some(0) {
            return Err(Error::Config("sampling.batch_size must be at least 1".into()));
        }
        for rule in &self.naming.rules {
            if !matches!(rule.kind.as_str(), "prefix" | "suffix" | "exact" | "contains") {
                return Err(Error::Config(format!("naming rule '{}': unknown kind '{}'", rule.tag, rule.kind)));
            }
            if !matches!(rule.scope.as_str(), "table" | "column") {
                return Err(Error::Config(format!("naming rule '{}': unknown scope '{}'", rule.tag, rule.scope)));
            }
        }
        Ok(())
    }
}
