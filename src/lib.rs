//! # genesis — relational schema → semantic graph twin
//!
//! The Genesis Engine reads a relational catalog and a bounded sample of its
//! data, asks an LLM what every table means, discovers relations the schema
//! never declared, and merges the result into a property graph with a vector
//! index over the semantic embeddings.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: every external collaborator (`RelationalSource`,
//!    `LlmService`, `GraphStore`, `CheckpointStore`, `ConfirmationGate`) is a
//!    contract with an in-memory reference implementation.
//! 2. **Clean DTOs**: descriptors, dossiers, profiles and candidates are plain
//!    data in [`model`] and cross every stage boundary.
//! 3. **Synthesis is a pure function**: dossier in, validated profile out, with
//!    explicit retry/backoff and no hidden conversational state.
//! 4. **Merge, never insert**: graph writes are keyed by stable names, so every
//!    run converges on the same graph for the same inputs.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use genesis::{GenesisConfig, PipelineController};
//! use genesis::source::MemorySource;
//! use genesis::storage::MemoryGraph;
//! use genesis::synth::ScriptedLlm;
//! use genesis::checkpoint::MemoryCheckpoints;
//! use genesis::pipeline::AutoApprove;
//!
//! # async fn example(source: MemorySource) -> genesis::Result<()> {
//! let config = GenesisConfig::default();
//! let controller = PipelineController::new(
//!     config,
//!     source,
//!     MemoryGraph::new(),
//!     ScriptedLlm::offline(1536),
//!     MemoryCheckpoints::new(),
//!     AutoApprove,
//! );
//! let summary = controller.run().await?;
//! println!("{summary}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Collaborators
//!
//! | Concern | In-memory | Feature |
//! |---------|-----------|---------|
//! | Relational source | `MemorySource` | `postgres` → `PostgresSource` |
//! | LLM service | `ScriptedLlm` | `openai` → `OpenAiClient` |
//! | Graph store | `MemoryGraph` | `neo4j` → `Neo4jHttpStore` |
//! | Checkpoints | `MemoryCheckpoints` | `FileCheckpoints` (always) |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod config;
pub mod source;
pub mod introspect;
pub mod evidence;
pub mod synth;
pub mod discover;
pub mod storage;
pub mod tx;
pub mod index;
pub mod cypher;
pub mod export;
pub mod materialize;
pub mod checkpoint;
pub mod pipeline;
pub mod retry;

// ============================================================================
// Re-exports: Model (the DTOs)
// ============================================================================

pub use model::{
    Node, Relationship, Value, PropertyMap, NodeId, RelId, EdgeKey, Provenance,
    QualifiedName, TableDescriptor, ColumnDescriptor, ColumnStats, ForeignKey,
    ReferentialAction, EvidenceDossier, SemanticProfile, Stereotype,
    CandidateRelation, ValidationStatus,
};

// ============================================================================
// Re-exports: Stages
// ============================================================================

pub use config::GenesisConfig;
pub use introspect::{SchemaIntrospector, Extraction};
pub use evidence::EvidenceAggregator;
pub use synth::SemanticSynthesizer;
pub use discover::RelationDiscoverer;
pub use materialize::{GraphMaterializer, WriteOutcome};
pub use pipeline::{PipelineController, RunSummary};

// ============================================================================
// Re-exports: Contracts
// ============================================================================

pub use source::RelationalSource;
pub use synth::{LlmService, StereotypeTaxonomy};
pub use evidence::NamingLexicon;
pub use discover::RelationConfirmer;
pub use storage::GraphStore;
pub use checkpoint::CheckpointStore;
pub use pipeline::ConfirmationGate;
pub use tx::{Transaction, TxMode, TxId};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Relational source or graph store unreachable. Aborts the run.
    #[error("Connection error ({target}): {message}")]
    Connection { target: String, message: String },

    /// One table's catalog metadata is malformed. The table is excluded.
    #[error("Schema anomaly in {table}: {reason}")]
    SchemaAnomaly { table: String, reason: String },

    /// LLM output stayed invalid after every retry. The entity is unresolved.
    #[error("Synthesis failed for {entity} after {attempts} attempt(s): {reason}")]
    Synthesis { entity: String, attempts: u32, reason: String },

    /// A candidate relation failed validation. Dropped silently.
    #[error("Relation {from} -> {to} rejected: {reason}")]
    RelationValidation { from: String, to: String, reason: String },

    /// A merge write kept failing. The entity is left for a later run.
    #[error("Graph write failed for {entity}: {message}")]
    GraphWrite { entity: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("LLM service error: {0}")]
    Llm(String),

    #[error("Relational source error: {0}")]
    Source(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timed out after {secs}s: {operation}")]
    Timeout { operation: String, secs: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn connection(target: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Error::Connection { target: target.into(), message: message.to_string() }
    }

    /// Only connectivity to either datastore ends a run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Connection { .. })
    }

    /// Worth another attempt after backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Llm(_) | Error::Timeout { .. } | Error::Storage(_) | Error::Source(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connection_errors_are_fatal() {
        assert!(Error::connection("graph", "refused").is_fatal());
        assert!(!Error::Synthesis { entity: "public.a".into(), attempts: 3, reason: "x".into() }.is_fatal());
        assert!(!Error::GraphWrite { entity: "public.a".into(), message: "x".into() }.is_fatal());
        assert!(!Error::SchemaAnomaly { table: "public.a".into(), reason: "x".into() }.is_fatal());
    }
}
