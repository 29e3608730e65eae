//! Structural descriptors of the relational source.
//!
//! Produced by the introspector from catalog metadata only; the column
//! statistics are attached later by the evidence aggregator.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Schema-qualified table name (`schema.table`). Unique within a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QualifiedName {
    pub schema: String,
    pub table: String,
}

impl QualifiedName {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self { schema: schema.into(), table: table.into() }
    }

    /// Parse `schema.table`; a bare name lands in `default_schema`.
    pub fn parse(raw: &str, default_schema: &str) -> Self {
        match raw.split_once('.') {
            Some((schema, table)) => Self::new(schema, table),
            None => Self::new(default_schema, raw),
        }
    }

    /// Merge key for a column node of this table.
    pub fn column_key(&self, column: &str) -> String {
        format!("{self}.{column}")
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Referential action of a foreign key on delete / update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferentialAction {
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ReferentialAction {
    /// Parse the catalog spelling (`CASCADE`, `SET NULL`, ...), or the
    /// single-letter `pg_constraint` codes.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().replace('_', " ").as_str() {
            "NO ACTION" | "A" => Some(Self::NoAction),
            "RESTRICT" | "R" => Some(Self::Restrict),
            "CASCADE" | "C" => Some(Self::Cascade),
            "SET NULL" | "N" => Some(Self::SetNull),
            "SET DEFAULT" | "D" => Some(Self::SetDefault),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::Restrict => "RESTRICT",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
        }
    }
}

impl fmt::Display for ReferentialAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observed statistics of one column over a bounded sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    /// Rows in the table (catalog estimate or exact count).
    pub row_count: u64,
    /// Rows actually inspected.
    pub sampled_rows: u64,
    pub null_ratio: f64,
    /// Distinct non-null values in the sample.
    pub distinct_estimate: u64,
    /// Representative non-null values, in sample order, deduplicated.
    pub sample_values: Vec<String>,
    /// Low-cardinality column: the distinct values seen in the sample.
    pub categorical_values: Option<Vec<String>>,
}

/// One column of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub comment: Option<String>,
    /// Filled in by the evidence aggregator.
    pub stats: Option<ColumnStats>,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
            comment: None,
            stats: None,
        }
    }
}

/// Declared foreign key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub name: Option<String>,
    pub columns: Vec<String>,
    pub target: QualifiedName,
    pub target_columns: Vec<String>,
    pub on_delete: ReferentialAction,
    pub on_update: ReferentialAction,
}

/// Catalog index (also used for unique constraints).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// Structural description of one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: QualifiedName,
    pub columns: Vec<ColumnDescriptor>,
    pub primary_key: BTreeSet<String>,
    pub foreign_keys: Vec<ForeignKey>,
    pub indexes: Vec<IndexDescriptor>,
    pub unique_constraints: Vec<IndexDescriptor>,
    pub comment: Option<String>,
    pub is_junction: bool,
}

impl TableDescriptor {
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Every column that takes part in some foreign key.
    pub fn fk_columns(&self) -> BTreeSet<&str> {
        self.foreign_keys
            .iter()
            .flat_map(|fk| fk.columns.iter().map(String::as_str))
            .collect()
    }

    /// Distinct tables this table references.
    pub fn referenced_tables(&self) -> BTreeSet<&QualifiedName> {
        self.foreign_keys.iter().map(|fk| &fk.target).collect()
    }

    /// The primary key when it is a single column.
    pub fn single_pk(&self) -> Option<&ColumnDescriptor> {
        if self.primary_key.len() != 1 {
            return None;
        }
        self.primary_key.iter().next().and_then(|c| self.column(c))
    }

    /// True when an explicit FK links the two tables in either direction.
    pub fn is_fk_linked(&self, other: &TableDescriptor) -> bool {
        self.foreign_keys.iter().any(|fk| fk.target == other.name)
            || other.foreign_keys.iter().any(|fk| fk.target == self.name)
    }
}
