//! Semantic profile: the validated output of synthesis for one entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::schema::QualifiedName;

/// Functional-role classification, drawn from a closed set.
///
/// Values are only produced by a `StereotypeTaxonomy`, which owns the set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Stereotype(String);

impl Stereotype {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Stereotype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticProfile {
    pub entity: QualifiedName,
    pub purpose: String,
    pub business_logic: Option<String>,
    pub stereotype: Stereotype,
    /// Dense text the embedding was computed from.
    pub summary: String,
    pub confidence: f64,
    pub embedding: Vec<f32>,
    pub model: String,
    pub dossier_digest: String,
    pub synthesized_at: DateTime<Utc>,
}
