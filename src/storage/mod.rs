//! # Graph Store Trait
//!
//! The contract between the materializer and any property-graph store.
//! Every write is a merge keyed by stable identifiers: nodes by
//! `(label, key)`, edges by `(source key, target key, type)`. Writes are
//! staged in a transaction and applied together on commit.
//!
//! ## Implementations
//!
//! | Store | Module | Description |
//! |-------|--------|-------------|
//! | `MemoryGraph` | `memory` | In-memory, for tests and dry runs |
//! | `Neo4jHttpStore` | `neo4j_http` | Neo4j via the HTTP transaction API (`neo4j` feature) |

pub mod memory;
#[cfg(feature = "neo4j")]
pub mod neo4j_http;

use std::sync::Arc;

use async_trait::async_trait;

use crate::index::VectorIndexSpec;
use crate::model::*;
use crate::tx::{Transaction, TxMode, WriteOp};
use crate::Result;

pub use memory::{MemoryGraph, MemoryTx};
#[cfg(feature = "neo4j")]
pub use neo4j_http::{Neo4jHttpStore, Neo4jHttpTx};

/// Property every merged node is keyed on.
pub const KEY_PROPERTY: &str = "key";

// ============================================================================
// GraphStore Trait
// ============================================================================

#[async_trait]
pub trait GraphStore: Send + Sync + 'static {
    /// The transaction type for this store.
    type Tx: Transaction;

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Cheap round trip; `Error::Connection` when the store is unreachable.
    async fn ping(&self) -> Result<()>;

    // ========================================================================
    // Transactions
    // ========================================================================

    async fn begin_tx(&self, mode: TxMode) -> Result<Self::Tx>;

    /// Apply every staged write, all or nothing.
    async fn commit_tx(&self, tx: Self::Tx) -> Result<()>;

    /// Discard staged writes.
    async fn rollback_tx(&self, tx: Self::Tx) -> Result<()>;

    // ========================================================================
    // Merge writes
    // ========================================================================

    /// `MERGE (n:label {key}) SET n += props, n:extra...`
    async fn merge_node(
        &self,
        tx: &mut Self::Tx,
        label: &str,
        key: &str,
        extra_labels: &[&str],
        props: PropertyMap,
    ) -> Result<()> {
        tx.stage(WriteOp::MergeNode {
            label: label.to_string(),
            key: key.to_string(),
            extra_labels: extra_labels.iter().map(|l| l.to_string()).collect(),
            props,
        })
    }

    /// `MERGE (a)-[r:type]->(b) SET r += props` between two merged nodes.
    async fn merge_relationship(
        &self,
        tx: &mut Self::Tx,
        edge: EdgeKey,
        src_label: &str,
        dst_label: &str,
        props: PropertyMap,
    ) -> Result<()> {
        tx.stage(WriteOp::MergeEdge {
            edge,
            src_label: src_label.to_string(),
            dst_label: dst_label.to_string(),
            props,
        })
    }

    // ========================================================================
    // Schema
    // ========================================================================

    /// Uniqueness of `key` per label. Default: nothing to do.
    async fn ensure_key_constraint(&self, _label: &str) -> Result<()> {
        Ok(())
    }

    /// Create the index if absent; refresh it otherwise.
    async fn create_vector_index(&self, spec: &VectorIndexSpec) -> Result<()>;

    // ========================================================================
    // Reads
    // ========================================================================

    async fn node_by_key(&self, label: &str, key: &str) -> Result<Option<Node>>;

    async fn all_nodes(&self) -> Result<Vec<Node>>;

    async fn all_relationships(&self) -> Result<Vec<Relationship>>;

    async fn node_count(&self) -> Result<u64> {
        Ok(self.all_nodes().await?.len() as u64)
    }

    async fn relationship_count(&self) -> Result<u64> {
        Ok(self.all_relationships().await?.len() as u64)
    }

    /// Top-`k` nodes of the index by similarity to `query`, best first.
    async fn vector_query(&self, index_name: &str, k: usize, query: &[f32]) -> Result<Vec<(Node, f64)>>;
}

#[async_trait]
impl<G: GraphStore> GraphStore for Arc<G> {
    type Tx = G::Tx;

    async fn ping(&self) -> Result<()> {
        (**self).ping().await
    }

    async fn begin_tx(&self, mode: TxMode) -> Result<Self::Tx> {
        (**self).begin_tx(mode).await
    }

    async fn commit_tx(&self, tx: Self::Tx) -> Result<()> {
        (**self).commit_tx(tx).await
    }

    async fn rollback_tx(&self, tx: Self::Tx) -> Result<()> {
        (**self).rollback_tx(tx).await
    }

    async fn merge_node(
        &self,
        tx: &mut Self::Tx,
        label: &str,
        key: &str,
        extra_labels: &[&str],
        props: PropertyMap,
    ) -> Result<()> {
        (**self).merge_node(tx, label, key, extra_labels, props).await
    }

    async fn merge_relationship(
        &self,
        tx: &mut Self::Tx,
        edge: EdgeKey,
        src_label: &str,
        dst_label: &str,
        props: PropertyMap,
    ) -> Result<()> {
        (**self).merge_relationship(tx, edge, src_label, dst_label, props).await
    }

    async fn ensure_key_constraint(&self, label: &str) -> Result<()> {
        (**self).ensure_key_constraint(label).await
    }

    async fn create_vector_index(&self, spec: &VectorIndexSpec) -> Result<()> {
        (**self).create_vector_index(spec).await
    }

    async fn node_by_key(&self, label: &str, key: &str) -> Result<Option<Node>> {
        (**self).node_by_key(label, key).await
    }

    async fn all_nodes(&self) -> Result<Vec<Node>> {
        (**self).all_nodes().await
    }

    async fn all_relationships(&self) -> Result<Vec<Relationship>> {
        (**self).all_relationships().await
    }

    async fn node_count(&self) -> Result<u64> {
        (**self).node_count().await
    }

    async fn relationship_count(&self) -> Result<u64> {
        (**self).relationship_count().await
    }

    async fn vector_query(&self, index_name: &str, k: usize, query: &[f32]) -> Result<Vec<(Node, f64)>> {
        (**self).vector_query(index_name, k, query).await
    }
}
