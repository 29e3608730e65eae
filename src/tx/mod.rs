//! Graph-store transactions.
//!
//! A write transaction buffers merge operations; the store applies the whole
//! buffer on commit, so a worker never leaves half an entity in the graph.

use serde::{Deserialize, Serialize};

use crate::model::{EdgeKey, PropertyMap};
use crate::{Error, Result};

/// Transaction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxMode {
    ReadOnly,
    ReadWrite,
}

/// Opaque transaction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxId(pub u64);

/// One buffered merge.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Merge on `(label, key)`, add `extra_labels`, overwrite `props`.
    MergeNode {
        label: String,
        key: String,
        extra_labels: Vec<String>,
        props: PropertyMap,
    },
    /// Merge on `(src, dst, type)` between two already-merged nodes.
    MergeEdge {
        edge: EdgeKey,
        src_label: String,
        dst_label: String,
        props: PropertyMap,
    },
}

/// Pending writes of one transaction, in submission order.
#[derive(Debug, Default)]
pub struct WriteBuffer {
    ops: Vec<WriteOp>,
}

impl WriteBuffer {
    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn drain(&mut self) -> Vec<WriteOp> {
        std::mem::take(&mut self.ops)
    }
}

/// Transaction trait that all graph stores implement.
pub trait Transaction: Send + Sync {
    fn mode(&self) -> TxMode;
    fn id(&self) -> TxId;
    fn buffer(&self) -> &WriteBuffer;
    fn buffer_mut(&mut self) -> &mut WriteBuffer;

    /// Buffer a write; read-only transactions refuse it.
    fn stage(&mut self, op: WriteOp) -> Result<()> {
        if self.mode() == TxMode::ReadOnly {
            return Err(Error::Storage(format!("transaction {} is read-only", self.id().0)));
        }
        self.buffer_mut().push(op);
        Ok(())
    }
}
