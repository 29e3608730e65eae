//! In-memory relational source.
//!
//! Holds a fixed catalog plus row data per table. Sampling picks row
//! indices with a ChaCha generator seeded from the run seed and the table
//! name, so the same seed always returns the same rows.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use hashbrown::HashMap;
use parking_lot::RwLock;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::{RawTable, RelationalSource, Row};
use crate::model::QualifiedName;
use crate::{Error, Result};

struct TableData {
    columns: Vec<String>,
    rows: Vec<Row>,
}

struct MemorySourceInner {
    tables: RwLock<Vec<RawTable>>,
    data: RwLock<HashMap<QualifiedName, TableData>>,
    unreachable: AtomicBool,
    sample_queries: AtomicU64,
}

/// In-memory relational source. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MemorySource {
    inner: Arc<MemorySourceInner>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemorySourceInner {
                tables: RwLock::new(Vec::new()),
                data: RwLock::new(HashMap::new()),
                unreachable: AtomicBool::new(false),
                sample_queries: AtomicU64::new(0),
            }),
        }
    }

    pub fn with_table(self, table: RawTable) -> Self {
        self.add_table(table);
        self
    }

    /// Add or replace a table's catalog entry.
    pub fn add_table(&self, table: RawTable) {
        let mut tables = self.inner.tables.write();
        tables.retain(|t| t.name != table.name);
        tables.push(table);
        tables.sort_by(|a, b| a.name.cmp(&b.name));
    }

    /// Set the rows of a table. Each row is aligned with `columns`.
    pub fn with_rows(self, table: &QualifiedName, columns: &[&str], rows: Vec<Row>) -> Self {
        self.inner.data.write().insert(
            table.clone(),
            TableData {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows,
            },
        );
        self
    }

    /// Simulate an outage: every call fails with `Error::Connection`.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Number of `sample_rows` calls served so far.
    pub fn sample_queries(&self) -> u64 {
        self.inner.sample_queries.load(Ordering::SeqCst)
    }

    fn check_reachable(&self) -> Result<()> {
        if self.inner.unreachable.load(Ordering::SeqCst) {
            return Err(Error::connection("relational source", "connection refused"));
        }
        Ok(())
    }
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

/// FNV-1a over the table name, mixed into the run seed.
fn table_seed(seed: u64, table: &QualifiedName) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in table.to_string().bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash ^ seed
}

#[async_trait]
impl RelationalSource for MemorySource {
    async fn ping(&self) -> Result<()> {
        self.check_reachable()
    }

    async fn catalog(&self, schema: &str) -> Result<Vec<RawTable>> {
        self.check_reachable()?;
        Ok(self
            .inner
            .tables
            .read()
            .iter()
            .filter(|t| t.name.schema == schema)
            .cloned()
            .collect())
    }

    async fn row_count(&self, table: &QualifiedName) -> Result<u64> {
        self.check_reachable()?;
        Ok(self
            .inner
            .data
            .read()
            .get(table)
            .map(|d| d.rows.len() as u64)
            .unwrap_or(0))
    }

    async fn sample_rows(
        &self,
        table: &QualifiedName,
        columns: &[String],
        limit: usize,
        seed: u64,
    ) -> Result<Vec<Row>> {
        self.check_reachable()?;
        self.inner.sample_queries.fetch_add(1, Ordering::SeqCst);

        let data = self.inner.data.read();
        let Some(table_data) = data.get(table) else {
            return Ok(Vec::new());
        };

        let positions: Vec<Option<usize>> = columns
            .iter()
            .map(|c| table_data.columns.iter().position(|have| have == c))
            .collect();

        let total = table_data.rows.len();
        let mut picked: Vec<usize> = if total <= limit {
            (0..total).collect()
        } else {
            let mut rng = ChaCha8Rng::seed_from_u64(table_seed(seed, table));
            rand::seq::index::sample(&mut rng, total, limit).into_vec()
        };
        picked.sort_unstable();

        Ok(picked
            .into_iter()
            .map(|i| {
                let row = &table_data.rows[i];
                positions
                    .iter()
                    .map(|p| p.and_then(|p| row.get(p).cloned().flatten()))
                    .collect()
            })
            .collect())
    }
}
