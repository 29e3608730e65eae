//! # Evidence Aggregation
//!
//! Builds the [`EvidenceDossier`] of one entity from four facets:
//!
//! - **structural**: the entity's own descriptor
//! - **relational**: FK fan-in / fan-out and junction participation, from the
//!   full descriptor set
//! - **naming**: lexicon tags on the table and column names
//! - **statistical**: column statistics over a seeded row sample
//!
//! For fixed inputs and seed the dossier (and its digest) is byte-identical
//! across runs.

pub mod naming;
pub mod stats;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::GenesisConfig;
use crate::model::{
    ColumnShape, EvidenceDossier, FkSummary, NamingEvidence, QualifiedName, RelationalEvidence,
    StatisticalEvidence, StructuralEvidence, TableDescriptor,
};
use crate::retry::with_timeout;
use crate::source::RelationalSource;
use crate::{Error, Result};

pub use naming::{ErpLexicon, NamingLexicon};

pub struct EvidenceAggregator {
    lexicon: Arc<dyn NamingLexicon>,
    rows_per_table: usize,
    seed: u64,
    query_timeout: Duration,
}

impl EvidenceAggregator {
    pub fn new(lexicon: Arc<dyn NamingLexicon>, rows_per_table: usize, seed: u64, query_timeout: Duration) -> Self {
        Self { lexicon, rows_per_table, seed, query_timeout }
    }

    /// Stock ERP lexicon plus the configured rules; `seed` is the run seed.
    pub fn from_config(config: &GenesisConfig, seed: u64) -> Self {
        let lexicon = ErpLexicon::stock().with_rules(&config.naming.rules);
        Self::new(Arc::new(lexicon), config.sampling.rows_per_table, seed, config.timeouts.query())
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Gather the dossier of `entity`, which must be one of `all`.
    pub async fn gather<S: RelationalSource + ?Sized>(
        &self,
        entity: &QualifiedName,
        all: &[TableDescriptor],
        source: &S,
    ) -> Result<EvidenceDossier> {
        let table = all
            .iter()
            .find(|t| &t.name == entity)
            .ok_or_else(|| Error::NotFound(format!("table descriptor {entity}")))?;

        let structural = structural(table);
        let relational = relational(table, all);
        let naming = self.naming(table);
        let statistical = self.statistical(table, source).await?;

        debug!(entity = %entity, fan_in = relational.fan_in, fan_out = relational.fan_out, "dossier gathered");
        Ok(EvidenceDossier { entity: entity.clone(), structural, relational, naming, statistical })
    }

    fn naming(&self, table: &TableDescriptor) -> NamingEvidence {
        let column_tags = table
            .columns
            .iter()
            .filter_map(|c| {
                let tags = self.lexicon.column_tags(&c.name);
                (!tags.is_empty()).then(|| (c.name.clone(), tags))
            })
            .collect();
        NamingEvidence {
            lexicon: self.lexicon.name().to_string(),
            table_tokens: naming::tokenize(&table.name.table).into_vec(),
            table_tags: self.lexicon.table_tags(&table.name.table),
            column_tags,
        }
    }

    async fn statistical<S: RelationalSource + ?Sized>(
        &self,
        table: &TableDescriptor,
        source: &S,
    ) -> Result<StatisticalEvidence> {
        let row_count = with_timeout(self.query_timeout, "row count", source.row_count(&table.name)).await?;
        let columns: Vec<String> = table.columns.iter().map(|c| c.name.clone()).collect();
        let rows = with_timeout(
            self.query_timeout,
            "row sample",
            source.sample_rows(&table.name, &columns, self.rows_per_table, self.seed),
        )
        .await?;

        let columns = columns
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), stats::column_stats(&rows, i, row_count)))
            .collect();

        Ok(StatisticalEvidence { row_count, sample_size: rows.len(), seed: self.seed, columns })
    }
}

fn structural(table: &TableDescriptor) -> StructuralEvidence {
    let fk_columns = table.fk_columns();
    let columns = table
        .columns
        .iter()
        .map(|c| ColumnShape {
            name: c.name.clone(),
            data_type: c.data_type.clone(),
            nullable: c.nullable,
            is_primary_key: table.primary_key.contains(&c.name),
            is_foreign_key: fk_columns.contains(c.name.as_str()),
            comment: c.comment.clone(),
        })
        .collect();
    let foreign_keys = table
        .foreign_keys
        .iter()
        .map(|fk| FkSummary {
            columns: fk.columns.clone(),
            target: fk.target.to_string(),
            target_columns: fk.target_columns.clone(),
            on_delete: fk.on_delete.to_string(),
            on_update: fk.on_update.to_string(),
        })
        .collect();
    let render = |name: &str, cols: &[String], unique: bool| {
        format!("{name}({}){}", cols.join(", "), if unique { " UNIQUE" } else { "" })
    };

    StructuralEvidence {
        column_count: table.columns.len(),
        primary_key: table.primary_key.iter().cloned().collect(),
        columns,
        foreign_keys,
        indexes: table.indexes.iter().map(|i| render(&i.name, &i.columns, i.unique)).collect(),
        unique_constraints: table.unique_constraints.iter().map(|u| render(&u.name, &u.columns, true)).collect(),
        is_junction: table.is_junction,
        comment: table.comment.clone(),
    }
}

fn relational(table: &TableDescriptor, all: &[TableDescriptor]) -> RelationalEvidence {
    let references: BTreeSet<String> = table.referenced_tables().into_iter().map(|t| t.to_string()).collect();
    let referencing: Vec<&TableDescriptor> = all
        .iter()
        .filter(|t| t.foreign_keys.iter().any(|fk| fk.target == table.name))
        .collect();
    let referenced_by: BTreeSet<String> = referencing.iter().map(|t| t.name.to_string()).collect();

    // Junctions linking this entity, with the entity on the other side.
    let mut junctions: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for junction in referencing.iter().filter(|t| t.is_junction) {
        let others = junction
            .foreign_keys
            .iter()
            .filter(|fk| fk.target != table.name)
            .map(|fk| fk.target.to_string());
        junctions.entry(junction.name.to_string()).or_default().extend(others);
    }
    let junctions = junctions
        .into_iter()
        .map(|(j, others)| {
            if others.is_empty() {
                j
            } else {
                format!("{j} -> {}", others.into_iter().collect::<Vec<_>>().join(", "))
            }
        })
        .collect();

    RelationalEvidence {
        fan_in: referenced_by.len(),
        fan_out: references.len(),
        referenced_by: referenced_by.into_iter().collect(),
        references: references.into_iter().collect(),
        junctions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspect::build_extraction;
    use crate::source::{MemorySource, RawTable};
    use pretty_assertions::assert_eq;

    fn fixture() -> (MemorySource, Vec<TableDescriptor>) {
        let raw = vec![
            RawTable::new("public", "res_partner")
                .column("id", "integer", false)
                .column("name", "varchar", false)
                .column("state", "varchar", true)
                .primary_key(["id"]),
            RawTable::new("public", "sale_order")
                .column("id", "integer", false)
                .column("partner_id", "integer", false)
                .column("amount_total", "numeric", true)
                .primary_key(["id"])
                .foreign_key(["partner_id"], "res_partner", ["id"]),
            RawTable::new("public", "res_partner_category").column("id", "integer", false).primary_key(["id"]),
            RawTable::new("public", "res_partner_res_partner_category_rel")
                .column("partner_id", "integer", false)
                .column("category_id", "integer", false)
                .primary_key(["partner_id", "category_id"])
                .foreign_key(["partner_id"], "res_partner", ["id"])
                .foreign_key(["category_id"], "res_partner_category", ["id"]),
        ];
        let mut source = raw.iter().cloned().fold(MemorySource::new(), MemorySource::with_table);
        let partner_rows = (0..60)
            .map(|i| {
                vec![
                    Some(i.to_string()),
                    Some(format!("Partner {i}")),
                    if i % 10 == 0 { None } else { Some(["active", "archived"][i % 2].to_string()) },
                ]
            })
            .collect();
        source = source.with_rows(&QualifiedName::new("public", "res_partner"), &["id", "name", "state"], partner_rows);
        (source, build_extraction(raw).tables)
    }

    #[tokio::test]
    async fn test_relational_facet() {
        let (source, all) = fixture();
        let agg = EvidenceAggregator::new(Arc::new(ErpLexicon::stock()), 5, 7, Duration::from_secs(5));
        let d = agg.gather(&QualifiedName::new("public", "res_partner"), &all, &source).await.unwrap();
        assert_eq!(d.relational.fan_in, 2);
        assert_eq!(d.relational.fan_out, 0);
        assert_eq!(
            d.relational.junctions,
            vec!["public.res_partner_res_partner_category_rel -> public.res_partner_category".to_string()]
        );
        assert_eq!(d.naming.table_tokens, vec!["res", "partner"]);
        assert_eq!(d.statistical.sample_size, 5);
        assert_eq!(d.statistical.row_count, 60);
    }

    #[tokio::test]
    async fn test_dossier_is_deterministic_for_a_seed() {
        let (source, all) = fixture();
        let name = QualifiedName::new("public", "res_partner");
        let agg = EvidenceAggregator::new(Arc::new(ErpLexicon::stock()), 5, 42, Duration::from_secs(5));
        let a = agg.gather(&name, &all, &source).await.unwrap();
        let b = agg.gather(&name, &all, &source).await.unwrap();
        assert_eq!(a.canonical_json().unwrap(), b.canonical_json().unwrap());
        assert_eq!(a.digest().unwrap(), b.digest().unwrap());

        let other = EvidenceAggregator::new(Arc::new(ErpLexicon::stock()), 5, 43, Duration::from_secs(5));
        let c = other.gather(&name, &all, &source).await.unwrap();
        assert_ne!(a.digest().unwrap(), c.digest().unwrap());
    }

    #[tokio::test]
    async fn test_unknown_entity_has_no_dossier() {
        let (source, all) = fixture();
        let agg = EvidenceAggregator::new(Arc::new(ErpLexicon::stock()), 5, 1, Duration::from_secs(5));
        let err = agg.gather(&QualifiedName::new("public", "ghost"), &all, &source).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_structural_facet_marks_keys() {
        let (_, all) = fixture();
        let order = all.iter().find(|t| t.name.table == "sale_order").unwrap();
        let s = structural(order);
        let partner = s.columns.iter().find(|c| c.name == "partner_id").unwrap();
        assert!(partner.is_foreign_key && !partner.is_primary_key);
        assert_eq!(s.foreign_keys[0].target, "public.res_partner");
        assert_eq!(s.primary_key, vec!["id"]);
    }
}
