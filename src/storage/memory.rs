//! In-memory graph store.
//!
//! This is the reference implementation of `GraphStore`. The whole graph sits
//! behind one `RwLock`, so a commit is applied atomically: readers see either
//! none or all of a transaction's merges.
//!
//! ## Fault injection
//!
//! Tests can mark the store unreachable (every call fails with
//! `Error::Connection`) or make the next N commits fail with a transient
//! `Error::Storage`, to exercise the materializer's retry path.
//!
//! Use this store for:
//! - Testing the materializer and the pipeline end to end
//! - Dry runs that print a Cypher dump instead of touching a server

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::GraphStore;
use crate::discover::cosine_similarity;
use crate::index::VectorIndexSpec;
use crate::model::*;
use crate::tx::{Transaction, TxId, TxMode, WriteBuffer, WriteOp};
use crate::{Error, Result};

// ============================================================================
// MemoryGraph
// ============================================================================

/// In-memory property graph with merge semantics.
#[derive(Clone, Default)]
pub struct MemoryGraph {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    state: RwLock<GraphState>,
    next_tx_id: AtomicU64,
    unreachable: AtomicBool,
    failing_commits: AtomicU32,
    commits: AtomicU64,
}

#[derive(Default)]
struct GraphState {
    nodes: HashMap<NodeId, Node>,
    relationships: HashMap<RelId, Relationship>,
    /// (primary label, key) → node
    node_keys: HashMap<(String, String), NodeId>,
    /// (src, dst, type) → relationship
    edge_keys: HashMap<(NodeId, NodeId, String), RelId>,
    indexes: HashMap<String, VectorIndexSpec>,
    /// Index name → times it was created or refreshed.
    index_refreshes: HashMap<String, u64>,
    next_node_id: u64,
    next_rel_id: u64,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every later call fails with `Error::Connection` while set.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// The next `n` commits fail with a transient storage error.
    pub fn fail_next_commits(&self, n: u32) {
        self.inner.failing_commits.store(n, Ordering::SeqCst);
    }

    /// Successful commits so far.
    pub fn commits(&self) -> u64 {
        self.inner.commits.load(Ordering::SeqCst)
    }

    pub fn index(&self, name: &str) -> Option<VectorIndexSpec> {
        self.inner.state.read().indexes.get(name).cloned()
    }

    pub fn index_refreshes(&self, name: &str) -> u64 {
        self.inner.state.read().index_refreshes.get(name).copied().unwrap_or(0)
    }

    fn check_reachable(&self) -> Result<()> {
        if self.inner.unreachable.load(Ordering::SeqCst) {
            return Err(Error::connection("graph store", "memory graph marked unreachable"));
        }
        Ok(())
    }
}

impl GraphState {
    fn node_id(&self, label: &str, key: &str) -> Option<NodeId> {
        self.node_keys.get(&(label.to_string(), key.to_string())).copied()
    }

    /// Reject the batch before touching anything if an edge has no endpoint.
    fn check(&self, ops: &[WriteOp]) -> Result<()> {
        let mut staged: HashSet<(&str, &str)> = HashSet::new();
        for op in ops {
            match op {
                WriteOp::MergeNode { label, key, .. } => {
                    if key.is_empty() {
                        return Err(Error::Storage(format!("empty merge key for :{label}")));
                    }
                    staged.insert((label.as_str(), key.as_str()));
                }
                WriteOp::MergeEdge { edge, src_label, dst_label, .. } => {
                    for (label, key) in [(src_label, &edge.src), (dst_label, &edge.dst)] {
                        let known = staged.contains(&(label.as_str(), key.as_str())) || self.node_id(label, key).is_some();
                        if !known {
                            return Err(Error::Storage(format!("{edge}: no :{label} node with key {key}")));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn apply(&mut self, op: WriteOp) {
        match op {
            WriteOp::MergeNode { label, key, extra_labels, props } => {
                let id = match self.node_id(&label, &key) {
                    Some(id) => id,
                    None => {
                        self.next_node_id += 1;
                        let id = NodeId(self.next_node_id);
                        let node = Node::new(id, key.clone()).with_labels([label.clone()]);
                        self.nodes.insert(id, node);
                        self.node_keys.insert((label, key), id);
                        id
                    }
                };
                if let Some(node) = self.nodes.get_mut(&id) {
                    for extra in extra_labels {
                        if !node.has_label(&extra) {
                            node.labels.push(extra);
                        }
                    }
                    node.properties.extend(props);
                }
            }
            WriteOp::MergeEdge { edge, src_label, dst_label, props } => {
                let (Some(src), Some(dst)) = (self.node_id(&src_label, &edge.src), self.node_id(&dst_label, &edge.dst))
                else {
                    return;
                };
                let slot = (src, dst, edge.rel_type.clone());
                let id = match self.edge_keys.get(&slot) {
                    Some(id) => *id,
                    None => {
                        self.next_rel_id += 1;
                        let id = RelId(self.next_rel_id);
                        self.relationships.insert(id, Relationship::new(id, src, dst, edge.rel_type));
                        self.edge_keys.insert(slot, id);
                        id
                    }
                };
                if let Some(rel) = self.relationships.get_mut(&id) {
                    rel.properties.extend(props);
                }
            }
        }
    }
}

// ============================================================================
// MemoryTx
// ============================================================================

/// Staged writes of one in-memory transaction.
pub struct MemoryTx {
    id: TxId,
    mode: TxMode,
    buffer: WriteBuffer,
}

impl Transaction for MemoryTx {
    fn mode(&self) -> TxMode { self.mode }
    fn id(&self) -> TxId { self.id }
    fn buffer(&self) -> &WriteBuffer { &self.buffer }
    fn buffer_mut(&mut self) -> &mut WriteBuffer { &mut self.buffer }
}

// ============================================================================
// GraphStore impl
// ============================================================================

#[async_trait]
impl GraphStore for MemoryGraph {
    type Tx = MemoryTx;

    async fn ping(&self) -> Result<()> {
        self.check_reachable()
    }

    async fn begin_tx(&self, mode: TxMode) -> Result<MemoryTx> {
        self.check_reachable()?;
        let id = TxId(self.inner.next_tx_id.fetch_add(1, Ordering::Relaxed) + 1);
        Ok(MemoryTx { id, mode, buffer: WriteBuffer::default() })
    }

    async fn commit_tx(&self, mut tx: MemoryTx) -> Result<()> {
        self.check_reachable()?;
        let failing = self.inner.failing_commits.load(Ordering::SeqCst);
        if failing > 0 {
            self.inner.failing_commits.store(failing - 1, Ordering::SeqCst);
            return Err(Error::Storage(format!("injected commit failure (tx {})", tx.id.0)));
        }

        let ops = tx.buffer.drain();
        let mut state = self.inner.state.write();
        state.check(&ops)?;
        for op in ops {
            state.apply(op);
        }
        self.inner.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback_tx(&self, mut tx: MemoryTx) -> Result<()> {
        tx.buffer.drain();
        Ok(())
    }

    async fn create_vector_index(&self, spec: &VectorIndexSpec) -> Result<()> {
        self.check_reachable()?;
        let mut state = self.inner.state.write();
        if let Some(existing) = state.indexes.get(&spec.name) {
            if existing != spec {
                return Err(Error::Storage(format!(
                    "index {} already exists with a different definition",
                    spec.name
                )));
            }
        }
        state.indexes.insert(spec.name.clone(), spec.clone());
        *state.index_refreshes.entry(spec.name.clone()).or_default() += 1;
        Ok(())
    }

    async fn node_by_key(&self, label: &str, key: &str) -> Result<Option<Node>> {
        self.check_reachable()?;
        let state = self.inner.state.read();
        Ok(state.node_id(label, key).and_then(|id| state.nodes.get(&id).cloned()))
    }

    async fn all_nodes(&self) -> Result<Vec<Node>> {
        self.check_reachable()?;
        let mut nodes: Vec<Node> = self.inner.state.read().nodes.values().cloned().collect();
        nodes.sort_by_key(|n| n.id);
        Ok(nodes)
    }

    async fn all_relationships(&self) -> Result<Vec<Relationship>> {
        self.check_reachable()?;
        let mut rels: Vec<Relationship> = self.inner.state.read().relationships.values().cloned().collect();
        rels.sort_by_key(|r| r.id);
        Ok(rels)
    }

    async fn node_count(&self) -> Result<u64> {
        self.check_reachable()?;
        Ok(self.inner.state.read().nodes.len() as u64)
    }

    async fn relationship_count(&self) -> Result<u64> {
        self.check_reachable()?;
        Ok(self.inner.state.read().relationships.len() as u64)
    }

    async fn vector_query(&self, index_name: &str, k: usize, query: &[f32]) -> Result<Vec<(Node, f64)>> {
        self.check_reachable()?;
        let state = self.inner.state.read();
        let spec = state
            .indexes
            .get(index_name)
            .ok_or_else(|| Error::NotFound(format!("vector index {index_name}")))?;
        if query.len() != spec.dimensions {
            return Err(Error::Storage(format!(
                "query has {} dimensions, index {} expects {}",
                query.len(),
                spec.name,
                spec.dimensions
            )));
        }

        let mut hits: Vec<(Node, f64)> = state
            .nodes
            .values()
            .filter(|n| n.has_label(&spec.label))
            .filter_map(|n| {
                let v = n.get(&spec.property)?.as_vector()?;
                (v.len() == spec.dimensions).then(|| (n.clone(), cosine_similarity(query, v) as f64))
            })
            .collect();
        hits.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.key.cmp(&b.0.key)));
        hits.truncate(k);
        Ok(hits)
    }
}
