//! # Data Model
//!
//! Clean DTOs that cross every boundary of the pipeline:
//! source → introspector → aggregator → synthesizer → discoverer → graph store.
//!
//! This module is pure data — no I/O, no state, no async.

pub mod node;
pub mod relationship;
pub mod value;
pub mod property_map;
pub mod schema;
pub mod evidence;
pub mod profile;
pub mod relation;

pub use node::{Node, NodeId};
pub use relationship::{Relationship, RelId, EdgeKey, Provenance};
pub use value::Value;
pub use property_map::{PropertyMap, props};
pub use schema::{
    QualifiedName, TableDescriptor, ColumnDescriptor, ColumnStats,
    ForeignKey, ReferentialAction, IndexDescriptor,
};
pub use evidence::{
    EvidenceDossier, StructuralEvidence, RelationalEvidence, NamingEvidence,
    StatisticalEvidence, NamingTag, ColumnShape, FkSummary,
};
pub use profile::{SemanticProfile, Stereotype};
pub use relation::{CandidateRelation, ValidationStatus};
