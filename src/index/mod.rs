//! Vector index definitions.

use serde::{Deserialize, Serialize};

/// Similarity function of a vector index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Similarity {
    Cosine,
    Euclidean,
}

impl Similarity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Similarity::Cosine => "cosine",
            Similarity::Euclidean => "euclidean",
        }
    }
}

/// A native similarity index over one vector property of one label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorIndexSpec {
    pub name: String,
    pub label: String,
    pub property: String,
    pub dimensions: usize,
    pub similarity: Similarity,
}

impl VectorIndexSpec {
    /// Cosine index over `label.property`.
    pub fn cosine(name: impl Into<String>, label: impl Into<String>, property: impl Into<String>, dimensions: usize) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            property: property.into(),
            dimensions,
            similarity: Similarity::Cosine,
        }
    }
}
