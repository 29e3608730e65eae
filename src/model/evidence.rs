//! Evidence dossier: everything known about one entity before synthesis.
//!
//! The dossier is pure data built from ordered collections only, so its
//! JSON form (and therefore its digest) is stable for fixed inputs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::schema::{ColumnStats, QualifiedName};

/// Column shape as seen by the structural facet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnShape {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub is_primary_key: bool,
    pub is_foreign_key: bool,
    pub comment: Option<String>,
}

/// One foreign key as seen from the owning table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FkSummary {
    pub columns: Vec<String>,
    pub target: String,
    pub target_columns: Vec<String>,
    pub on_delete: String,
    pub on_update: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralEvidence {
    pub column_count: usize,
    pub primary_key: Vec<String>,
    pub columns: Vec<ColumnShape>,
    pub foreign_keys: Vec<FkSummary>,
    pub indexes: Vec<String>,
    pub unique_constraints: Vec<String>,
    pub is_junction: bool,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationalEvidence {
    /// Distinct tables referencing this entity.
    pub fan_in: usize,
    /// Distinct tables this entity references.
    pub fan_out: usize,
    pub referenced_by: Vec<String>,
    pub references: Vec<String>,
    /// Junction tables that link this entity to another.
    pub junctions: Vec<String>,
}

/// A lexicon hit on a name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamingTag {
    pub tag: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamingEvidence {
    pub lexicon: String,
    pub table_tokens: Vec<String>,
    pub table_tags: Vec<NamingTag>,
    /// Column name → tags, only columns with at least one hit.
    pub column_tags: BTreeMap<String, Vec<NamingTag>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticalEvidence {
    pub row_count: u64,
    pub sample_size: usize,
    pub seed: u64,
    pub columns: BTreeMap<String, ColumnStats>,
}

/// Aggregated evidence for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceDossier {
    pub entity: QualifiedName,
    pub structural: StructuralEvidence,
    pub relational: RelationalEvidence,
    pub naming: NamingEvidence,
    pub statistical: StatisticalEvidence,
}

impl EvidenceDossier {
    /// Canonical JSON form.
    pub fn canonical_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Hex SHA-256 of the canonical JSON form, without the sampling seed.
    ///
    /// The seed only says how rows were picked; the rows themselves are in
    /// the column statistics.
    pub fn digest(&self) -> crate::Result<String> {
        let mut value = serde_json::to_value(self)?;
        if let Some(statistical) = value.get_mut("statistical").and_then(|s| s.as_object_mut()) {
            statistical.remove("seed");
        }
        let json = serde_json::to_string(&value)?;
        Ok(hex::encode(Sha256::digest(json.as_bytes())))
    }
}
