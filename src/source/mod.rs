//! # Relational Source
//!
//! The read-only contract between the pipeline and the relational database
//! it enriches. Two kinds of query exist: catalog metadata (no data rows)
//! and bounded, seeded row samples.
//!
//! | Source | Module | Description |
//! |--------|--------|-------------|
//! | `MemorySource` | `memory` | Fixed catalog and rows, for tests and embedding |
//! | `PostgresSource` | `postgres` | PostgreSQL via sqlx (`postgres` feature) |

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::{IndexDescriptor, QualifiedName};
use crate::Result;

pub use memory::MemorySource;
#[cfg(feature = "postgres")]
pub use postgres::PostgresSource;

// ============================================================================
// Raw catalog shapes
// ============================================================================

/// One column as the catalog reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawColumn {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub comment: Option<String>,
}

/// One foreign-key constraint as the catalog reports it. Referential
/// actions are left unparsed; the introspector rejects shapes it does not
/// understand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawForeignKey {
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub target: QualifiedName,
    pub target_columns: Vec<String>,
    pub on_delete: String,
    pub on_update: String,
}

/// Catalog metadata of one table, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTable {
    pub name: QualifiedName,
    pub comment: Option<String>,
    pub columns: Vec<RawColumn>,
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<RawForeignKey>,
    pub indexes: Vec<IndexDescriptor>,
    pub unique_constraints: Vec<IndexDescriptor>,
}

impl RawTable {
    pub fn new(schema: &str, table: &str) -> Self {
        Self {
            name: QualifiedName::new(schema, table),
            comment: None,
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
            unique_constraints: Vec::new(),
        }
    }

    pub fn column(mut self, name: &str, data_type: &str, nullable: bool) -> Self {
        self.columns.push(RawColumn {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable,
            comment: None,
        });
        self
    }

    pub fn primary_key<'a>(mut self, columns: impl IntoIterator<Item = &'a str>) -> Self {
        self.primary_key = columns.into_iter().map(str::to_string).collect();
        self
    }

    /// Add a `NO ACTION` foreign key to `target` (`schema.table`, or a bare
    /// name in this table's schema).
    pub fn foreign_key<'a>(
        self,
        columns: impl IntoIterator<Item = &'a str>,
        target: &str,
        target_columns: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        self.foreign_key_with_actions(columns, target, target_columns, "NO ACTION", "NO ACTION")
    }

    pub fn foreign_key_with_actions<'a>(
        mut self,
        columns: impl IntoIterator<Item = &'a str>,
        target: &str,
        target_columns: impl IntoIterator<Item = &'a str>,
        on_delete: &str,
        on_update: &str,
    ) -> Self {
        let columns: Vec<String> = columns.into_iter().map(str::to_string).collect();
        let name = format!("{}_{}_fkey", self.name.table, columns.join("_"));
        self.foreign_keys.push(RawForeignKey {
            name: Some(name),
            columns,
            target: QualifiedName::parse(target, &self.name.schema),
            target_columns: target_columns.into_iter().map(str::to_string).collect(),
            on_delete: on_delete.to_string(),
            on_update: on_update.to_string(),
        });
        self
    }

    pub fn comment(mut self, comment: &str) -> Self {
        self.comment = Some(comment.to_string());
        self
    }

    pub fn unique<'a>(mut self, name: &str, columns: impl IntoIterator<Item = &'a str>) -> Self {
        self.unique_constraints.push(IndexDescriptor {
            name: name.to_string(),
            columns: columns.into_iter().map(str::to_string).collect(),
            unique: true,
        });
        self
    }
}

/// A sampled row, aligned with the requested columns. Values are rendered
/// as text; `None` is SQL NULL.
pub type Row = Vec<Option<String>>;

// ============================================================================
// RelationalSource Trait
// ============================================================================

/// Read-only access to a relational database.
#[async_trait]
pub trait RelationalSource: Send + Sync + 'static {
    /// Check connectivity. Fails with `Error::Connection` when unreachable.
    async fn ping(&self) -> Result<()>;

    /// Catalog metadata of every base table in `schema`, ordered by name.
    async fn catalog(&self, schema: &str) -> Result<Vec<RawTable>>;

    /// Number of rows in a table (estimate allowed).
    async fn row_count(&self, table: &QualifiedName) -> Result<u64>;

    /// At most `limit` rows, chosen deterministically from `seed`.
    async fn sample_rows(
        &self,
        table: &QualifiedName,
        columns: &[String],
        limit: usize,
        seed: u64,
    ) -> Result<Vec<Row>>;
}

#[async_trait]
impl<S: RelationalSource + ?Sized> RelationalSource for std::sync::Arc<S> {
    async fn ping(&self) -> Result<()> {
        (**self).ping().await
    }

    async fn catalog(&self, schema: &str) -> Result<Vec<RawTable>> {
        (**self).catalog(schema).await
    }

    async fn row_count(&self, table: &QualifiedName) -> Result<u64> {
        (**self).row_count(table).await
    }

    async fn sample_rows(
        &self,
        table: &QualifiedName,
        columns: &[String],
        limit: usize,
        seed: u64,
    ) -> Result<Vec<Row>> {
        (**self).sample_rows(table, columns, limit, seed).await
    }
}
