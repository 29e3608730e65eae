//! Relationship (edge) in the property graph.

use serde::{Deserialize, Serialize};
use super::{NodeId, PropertyMap};

/// Opaque relationship identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelId(pub u64);

impl std::fmt::Display for RelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Merge key of an edge: `(source key, target key, type)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeKey {
    pub src: String,
    pub dst: String,
    pub rel_type: String,
}

impl EdgeKey {
    pub fn new(src: impl Into<String>, dst: impl Into<String>, rel_type: impl Into<String>) -> Self {
        Self { src: src.into(), dst: dst.into(), rel_type: rel_type.into() }
    }
}

impl std::fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({})-[:{}]->({})", self.src, self.rel_type, self.dst)
    }
}

/// Where an edge came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Declared foreign key in the relational catalog.
    ExplicitFk,
    /// Column ownership (`HAS_COLUMN`).
    Structural,
    /// Validated embedding-similarity candidate.
    Discovered,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::ExplicitFk => "explicit_fk",
            Provenance::Structural => "structural",
            Provenance::Discovered => "discovered",
        }
    }
}

/// A relationship (directed edge) in the property graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: RelId,
    pub src: NodeId,
    pub dst: NodeId,
    pub rel_type: String,
    pub properties: PropertyMap,
}

impl Relationship {
    pub fn new(id: RelId, src: NodeId, dst: NodeId, rel_type: impl Into<String>) -> Self {
        Self {
            id,
            src,
            dst,
            rel_type: rel_type.into(),
            properties: PropertyMap::new(),
        }
    }
}
