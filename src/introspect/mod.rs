//! # Schema Introspection
//!
//! Turns raw catalog metadata into validated [`TableDescriptor`]s. Reads
//! catalog queries only, never data rows.
//!
//! A table with a malformed shape is reported as a schema anomaly and left
//! out; the rest of the extraction continues. An unreachable source aborts.

mod junction;

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::model::{ColumnDescriptor, ForeignKey, QualifiedName, ReferentialAction, TableDescriptor};
use crate::retry::with_timeout;
use crate::source::{RawTable, RelationalSource};
use crate::{Error, Result};

pub use junction::is_junction;

/// A table left out of the extraction, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anomaly {
    pub table: QualifiedName,
    pub reason: String,
}

impl Anomaly {
    pub fn into_error(self) -> Error {
        Error::SchemaAnomaly { table: self.table.to_string(), reason: self.reason }
    }
}

/// Result of one extraction.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Valid tables, ordered by qualified name.
    pub tables: Vec<TableDescriptor>,
    pub anomalies: Vec<Anomaly>,
    /// Foreign keys dropped because their target is outside the extraction.
    pub dangling_foreign_keys: usize,
}

impl Extraction {
    pub fn get(&self, name: &QualifiedName) -> Option<&TableDescriptor> {
        self.tables.iter().find(|t| &t.name == name)
    }
}

pub struct SchemaIntrospector {
    schema: String,
    query_timeout: Duration,
}

impl SchemaIntrospector {
    pub fn new(schema: impl Into<String>, query_timeout: Duration) -> Self {
        Self { schema: schema.into(), query_timeout }
    }

    /// Extract every table of the configured schema.
    pub async fn extract<S: RelationalSource + ?Sized>(&self, source: &S) -> Result<Extraction> {
        let raw = with_timeout(self.query_timeout, "catalog", source.catalog(&self.schema))
            .await
            .map_err(|e| match e {
                Error::Timeout { .. } => Error::connection("relational source", e),
                other => other,
            })?;
        info!(schema = %self.schema, tables = raw.len(), "catalog metadata read");
        Ok(build_extraction(raw))
    }
}

/// Validate raw catalog tables and resolve their foreign keys.
pub fn build_extraction(raw: Vec<RawTable>) -> Extraction {
    let mut extraction = Extraction::default();
    let mut valid: BTreeMap<QualifiedName, TableDescriptor> = BTreeMap::new();

    for table in raw {
        let name = table.name.clone();
        if valid.contains_key(&name) {
            warn!(table = %name, "duplicate table in catalog");
            extraction.anomalies.push(Anomaly { table: name, reason: "duplicate table".into() });
            continue;
        }
        match validate_table(table) {
            Ok(descriptor) => {
                valid.insert(name, descriptor);
            }
            Err(reason) => {
                warn!(table = %name, %reason, "schema anomaly, table excluded");
                extraction.anomalies.push(Anomaly { table: name, reason });
            }
        }
    }

    // Every surviving FK must land on a surviving table and its columns.
    let columns_of: BTreeMap<QualifiedName, BTreeSet<String>> = valid
        .iter()
        .map(|(name, t)| (name.clone(), t.columns.iter().map(|c| c.name.clone()).collect()))
        .collect();
    for table in valid.values_mut() {
        let before = table.foreign_keys.len();
        table.foreign_keys.retain(|fk| match columns_of.get(&fk.target) {
            Some(cols) if fk.target_columns.iter().all(|c| cols.contains(c)) => true,
            _ => {
                warn!(table = %table.name, target = %fk.target, "foreign key target outside extraction, dropped");
                false
            }
        });
        extraction.dangling_foreign_keys += before - table.foreign_keys.len();
    }

    for table in valid.values_mut() {
        table.is_junction = is_junction(table);
        if table.is_junction {
            debug!(table = %table.name, "junction table");
        }
    }

    extraction.tables = valid.into_values().collect();
    extraction
}

fn validate_table(raw: RawTable) -> std::result::Result<TableDescriptor, String> {
    if raw.columns.is_empty() {
        return Err("no columns".into());
    }

    let mut seen = BTreeSet::new();
    for column in &raw.columns {
        if column.name.is_empty() {
            return Err("column with empty name".into());
        }
        if column.data_type.is_empty() {
            return Err(format!("column {} has no declared type", column.name));
        }
        if !seen.insert(column.name.as_str()) {
            return Err(format!("duplicate column {}", column.name));
        }
    }

    let mut primary_key = BTreeSet::new();
    for column in &raw.primary_key {
        if !seen.contains(column.as_str()) {
            return Err(format!("primary key column {column} does not exist"));
        }
        primary_key.insert(column.clone());
    }

    let mut foreign_keys = Vec::with_capacity(raw.foreign_keys.len());
    for fk in raw.foreign_keys {
        let label = fk.name.clone().unwrap_or_else(|| fk.columns.join(","));
        if fk.columns.is_empty() {
            return Err(format!("foreign key {label} has no columns"));
        }
        if fk.columns.len() != fk.target_columns.len() {
            return Err(format!(
                "foreign key {label} maps {} column(s) onto {}",
                fk.columns.len(),
                fk.target_columns.len()
            ));
        }
        if let Some(missing) = fk.columns.iter().find(|c| !seen.contains(c.as_str())) {
            return Err(format!("foreign key {label} uses missing column {missing}"));
        }
        if fk.target.table.is_empty() {
            return Err(format!("foreign key {label} has no target table"));
        }
        let on_delete = ReferentialAction::parse(&fk.on_delete)
            .ok_or_else(|| format!("foreign key {label}: unsupported ON DELETE action '{}'", fk.on_delete))?;
        let on_update = ReferentialAction::parse(&fk.on_update)
            .ok_or_else(|| format!("foreign key {label}: unsupported ON UPDATE action '{}'", fk.on_update))?;
        foreign_keys.push(ForeignKey {
            name: fk.name,
            columns: fk.columns,
            target: fk.target,
            target_columns: fk.target_columns,
            on_delete,
            on_update,
        });
    }

    let known = |cols: &[String]| !cols.is_empty() && cols.iter().all(|c| seen.contains(c.as_str()));
    let indexes = raw.indexes.into_iter().filter(|i| known(&i.columns)).collect();
    let unique_constraints = raw.unique_constraints.into_iter().filter(|i| known(&i.columns)).collect();

    let columns = raw
        .columns
        .into_iter()
        .map(|c| {
            let mut descriptor = ColumnDescriptor::new(c.name, c.data_type, c.nullable);
            descriptor.comment = c.comment;
            descriptor
        })
        .collect();

    Ok(TableDescriptor {
        name: raw.name,
        columns,
        primary_key,
        foreign_keys,
        indexes,
        unique_constraints,
        comment: raw.comment,
        is_junction: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use pretty_assertions::assert_eq;

    fn shop() -> Vec<RawTable> {
        vec![
            RawTable::new("public", "orders")
                .column("id", "integer", false)
                .column("partner_id", "integer", true)
                .primary_key(["id"])
                .foreign_key_with_actions(["partner_id"], "partners", ["id"], "CASCADE", "NO ACTION"),
            RawTable::new("public", "partners").column("id", "integer", false).primary_key(["id"]),
            RawTable::new("public", "products").column("id", "integer", false).primary_key(["id"]),
            RawTable::new("public", "orders_lines")
                .column("order_id", "integer", false)
                .column("product_id", "integer", false)
                .primary_key(["order_id", "product_id"])
                .foreign_key(["order_id"], "orders", ["id"])
                .foreign_key(["product_id"], "products", ["id"]),
        ]
    }

    #[test]
    fn test_valid_catalog() {
        let ex = build_extraction(shop());
        assert!(ex.anomalies.is_empty());
        let names: Vec<String> = ex.tables.iter().map(|t| t.name.to_string()).collect();
        assert_eq!(
            names,
            vec!["public.orders", "public.orders_lines", "public.partners", "public.products"]
        );
        let orders = ex.get(&QualifiedName::new("public", "orders")).unwrap();
        assert_eq!(orders.foreign_keys[0].on_delete, ReferentialAction::Cascade);
        assert!(!orders.is_junction);
        assert!(ex.get(&QualifiedName::new("public", "orders_lines")).unwrap().is_junction);
    }

    #[test]
    fn test_malformed_table_is_excluded() {
        let mut raw = shop();
        raw.push(
            RawTable::new("public", "broken")
                .column("id", "integer", false)
                .column("id", "text", true),
        );
        raw.push(
            RawTable::new("public", "bad_action")
                .column("id", "integer", false)
                .column("partner_id", "integer", false)
                .foreign_key_with_actions(["partner_id"], "partners", ["id"], "EXPLODE", "NO ACTION"),
        );
        raw.push(RawTable::new("public", "empty"));
        let ex = build_extraction(raw);
        assert_eq!(ex.tables.len(), 4);
        assert_eq!(ex.anomalies.len(), 3);
        assert!(ex.anomalies.iter().any(|a| a.reason.contains("duplicate column")));
    }

    #[test]
    fn test_dangling_fk_is_dropped() {
        let mut raw = shop();
        raw.retain(|t| t.name.table != "partners");
        let ex = build_extraction(raw);
        let orders = ex.get(&QualifiedName::new("public", "orders")).unwrap();
        assert!(orders.foreign_keys.is_empty());
        assert_eq!(ex.dangling_foreign_keys, 1);
        for table in &ex.tables {
            for fk in &table.foreign_keys {
                assert!(ex.get(&fk.target).is_some());
            }
        }
    }

    #[tokio::test]
    async fn test_extract_from_source() {
        let source = shop().into_iter().fold(MemorySource::new(), MemorySource::with_table);
        let introspector = SchemaIntrospector::new("public", Duration::from_secs(5));
        let ex = introspector.extract(&source).await.unwrap();
        assert_eq!(ex.tables.len(), 4);
        assert_eq!(source.sample_queries(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_source_is_fatal() {
        let source = MemorySource::new();
        source.set_unreachable(true);
        let introspector = SchemaIntrospector::new("public", Duration::from_secs(5));
        let err = introspector.extract(&source).await.unwrap_err();
        assert!(err.is_fatal());
    }
}
