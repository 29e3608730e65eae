//! Candidate relations found by embedding similarity.

use serde::{Deserialize, Serialize};

use super::schema::QualifiedName;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Pending,
    Validated,
    Rejected,
}

/// A hypothesised relation between two entities.
///
/// Only `Validated` candidates are ever promoted to graph edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRelation {
    pub source: QualifiedName,
    pub target: QualifiedName,
    pub similarity: f32,
    pub status: ValidationStatus,
    pub relation_type: Option<String>,
    /// Referencing column on `source` and referenced column on `target`.
    pub via: Option<(String, String)>,
    pub confidence: Option<f64>,
    pub justification: Option<String>,
}

impl CandidateRelation {
    pub fn pending(source: QualifiedName, target: QualifiedName, similarity: f32) -> Self {
        Self {
            source,
            target,
            similarity,
            status: ValidationStatus::Pending,
            relation_type: None,
            via: None,
            confidence: None,
            justification: None,
        }
    }

    pub fn is_validated(&self) -> bool {
        self.status == ValidationStatus::Validated
    }

    /// Order-independent pair key.
    pub fn pair(&self) -> (QualifiedName, QualifiedName) {
        if self.source <= self.target {
            (self.source.clone(), self.target.clone())
        } else {
            (self.target.clone(), self.source.clone())
        }
    }
}
