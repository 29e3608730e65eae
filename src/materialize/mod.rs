//! # Graph Materialization
//!
//! Writes the semantic twin. One entity is one transaction: its `:Table`
//! node (plus `:JunctionTable` for junctions), its `:Column` nodes with
//! `HAS_COLUMN` edges, and an `EXPLICIT_FK_TO` edge per referenced table.
//! Validated candidates become `IMPLICIT_RELATION_TO` edges. Everything is a
//! merge on a stable key, so rewriting any subset converges on the same
//! graph.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::GenesisConfig;
use crate::index::VectorIndexSpec;
use crate::model::*;
use crate::retry::{retry, with_timeout, Backoff};
use crate::storage::GraphStore;
use crate::tx::{Transaction, TxMode};
use crate::{Error, Result};

pub const TABLE_LABEL: &str = "Table";
pub const JUNCTION_LABEL: &str = "JunctionTable";
pub const COLUMN_LABEL: &str = "Column";
pub const HAS_COLUMN: &str = "HAS_COLUMN";
pub const EXPLICIT_FK_TO: &str = "EXPLICIT_FK_TO";
pub const IMPLICIT_RELATION_TO: &str = "IMPLICIT_RELATION_TO";
pub const EMBEDDING_PROPERTY: &str = "embedding";

/// Totals of one `upsert` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteOutcome {
    pub nodes_merged: usize,
    pub edges_merged: usize,
    pub entities_written: Vec<QualifiedName>,
    pub relations_written: usize,
    /// Entity or edge, with the last error.
    pub failed: Vec<(String, String)>,
    pub index_refreshed: bool,
}

impl WriteOutcome {
    fn absorb(&mut self, (nodes, edges): (usize, usize)) {
        self.nodes_merged += nodes;
        self.edges_merged += edges;
    }
}

pub struct GraphMaterializer<G: GraphStore> {
    store: G,
    backoff: Backoff,
    timeout: Duration,
    index: VectorIndexSpec,
}

impl<G: GraphStore> GraphMaterializer<G> {
    pub fn new(store: G, config: &GenesisConfig) -> Self {
        Self {
            store,
            backoff: Backoff::new(&config.retry),
            timeout: config.timeouts.graph(),
            index: VectorIndexSpec::cosine(
                config.graph.index_name.clone(),
                TABLE_LABEL,
                EMBEDDING_PROPERTY,
                config.models.embedding_dimensions,
            ),
        }
    }

    pub fn store(&self) -> &G {
        &self.store
    }

    pub fn index_spec(&self) -> &VectorIndexSpec {
        &self.index
    }

    /// Write descriptors (enriched where a profile exists), validated
    /// relations, then refresh the vector index.
    ///
    /// Per-entity write failures are collected in the outcome; only a
    /// connection failure aborts.
    pub async fn upsert(
        &self,
        descriptors: &[TableDescriptor],
        profiles: &[SemanticProfile],
        relations: &[CandidateRelation],
    ) -> Result<WriteOutcome> {
        self.ensure_schema().await?;
        let by_entity: BTreeMap<&QualifiedName, &SemanticProfile> = profiles.iter().map(|p| (&p.entity, p)).collect();

        let mut outcome = WriteOutcome::default();
        for table in descriptors {
            match self.upsert_entity(table, by_entity.get(&table.name).copied()).await {
                Ok(counts) => {
                    outcome.absorb(counts);
                    outcome.entities_written.push(table.name.clone());
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => outcome.failed.push((table.name.to_string(), e.to_string())),
            }
        }
        self.upsert_relations(relations, &mut outcome).await?;
        outcome.index_refreshed = self.refresh_index().await?;
        info!(
            nodes = outcome.nodes_merged,
            edges = outcome.edges_merged,
            failed = outcome.failed.len(),
            "materialization complete"
        );
        Ok(outcome)
    }

    /// Key uniqueness for every label this materializer writes.
    pub async fn ensure_schema(&self) -> Result<()> {
        for label in [TABLE_LABEL, COLUMN_LABEL] {
            with_timeout(self.timeout, "key constraint", self.store.ensure_key_constraint(label)).await?;
        }
        Ok(())
    }

    /// One entity in one transaction, retried with backoff. Returns
    /// `(nodes, edges)` merged; `Error::GraphWrite` once retries run out.
    pub async fn upsert_entity(&self, table: &TableDescriptor, profile: Option<&SemanticProfile>) -> Result<(usize, usize)> {
        let result = retry(&self.backoff, "entity write", |_| self.write_entity(table, profile)).await;
        match result {
            Ok(counts) => {
                debug!(entity = %table.name, nodes = counts.0, edges = counts.1, enriched = profile.is_some(), "entity merged");
                Ok(counts)
            }
            Err((e, _)) if e.is_fatal() => Err(e),
            Err((e, attempts)) => {
                warn!(entity = %table.name, attempts, error = %e, "entity write failed");
                Err(Error::GraphWrite { entity: table.name.to_string(), message: e.to_string() })
            }
        }
    }

    /// Write every validated relation; others are ignored.
    pub async fn upsert_relations(&self, relations: &[CandidateRelation], outcome: &mut WriteOutcome) -> Result<()> {
        for relation in relations.iter().filter(|r| r.is_validated()) {
            match retry(&self.backoff, "relation write", |_| self.write_relation(relation)).await {
                Ok(counts) => {
                    outcome.absorb(counts);
                    outcome.relations_written += 1;
                }
                Err((e, _)) if e.is_fatal() => return Err(e),
                Err((e, attempts)) => {
                    let edge = format!("{} -> {}", relation.source, relation.target);
                    warn!(%edge, attempts, error = %e, "relation write failed");
                    outcome.failed.push((edge, e.to_string()));
                }
            }
        }
        Ok(())
    }

    /// Create or refresh the vector index. `false` when it kept failing.
    pub async fn refresh_index(&self) -> Result<bool> {
        let result = retry(&self.backoff, "vector index", |_| {
            with_timeout(self.timeout, "vector index", self.store.create_vector_index(&self.index))
        })
        .await;
        match result {
            Ok(()) => {
                debug!(index = %self.index.name, dims = self.index.dimensions, "vector index refreshed");
                Ok(true)
            }
            Err((e, _)) if e.is_fatal() => Err(e),
            Err((e, _)) => {
                warn!(index = %self.index.name, error = %e, "vector index refresh failed");
                Ok(false)
            }
        }
    }

    async fn write_entity(&self, table: &TableDescriptor, profile: Option<&SemanticProfile>) -> Result<(usize, usize)> {
        let mut tx = self.store.begin_tx(TxMode::ReadWrite).await?;
        let key = table.name.to_string();
        let extra: &[&str] = if table.is_junction { &[JUNCTION_LABEL] } else { &[] };

        let mut node_props = table_props(table);
        if let Some(p) = profile {
            node_props.extend(enrichment_props(p));
        }
        self.store.merge_node(&mut tx, TABLE_LABEL, &key, extra, node_props).await?;

        let fk_columns = table.fk_columns();
        for (ordinal, column) in table.columns.iter().enumerate() {
            let column_key = table.name.column_key(&column.name);
            let props = column_props(table, column, ordinal, fk_columns.contains(column.name.as_str()));
            self.store.merge_node(&mut tx, COLUMN_LABEL, &column_key, &[], props).await?;
            self.store
                .merge_relationship(
                    &mut tx,
                    EdgeKey::new(key.as_str(), column_key.as_str(), HAS_COLUMN),
                    TABLE_LABEL,
                    COLUMN_LABEL,
                    props_with_provenance(PropertyMap::new(), Provenance::Structural),
                )
                .await?;
        }

        let mut by_target: BTreeMap<&QualifiedName, Vec<&ForeignKey>> = BTreeMap::new();
        for fk in &table.foreign_keys {
            by_target.entry(&fk.target).or_default().push(fk);
        }
        for (target, fks) in &by_target {
            let target_key = target.to_string();
            if *target != &table.name {
                self.store.merge_node(&mut tx, TABLE_LABEL, &target_key, &[], scaffold_props(target)).await?;
            }
            self.store
                .merge_relationship(
                    &mut tx,
                    EdgeKey::new(key.as_str(), target_key.as_str(), EXPLICIT_FK_TO),
                    TABLE_LABEL,
                    TABLE_LABEL,
                    fk_props(fks),
                )
                .await?;
        }

        let staged = tx.buffer().ops().len();
        let edges = table.columns.len() + by_target.len();
        with_timeout(self.timeout, "graph commit", self.store.commit_tx(tx)).await?;
        Ok((staged - edges, edges))
    }

    async fn write_relation(&self, relation: &CandidateRelation) -> Result<(usize, usize)> {
        let mut tx = self.store.begin_tx(TxMode::ReadWrite).await?;
        let (src, dst) = (relation.source.to_string(), relation.target.to_string());
        self.store.merge_node(&mut tx, TABLE_LABEL, &src, &[], scaffold_props(&relation.source)).await?;
        self.store.merge_node(&mut tx, TABLE_LABEL, &dst, &[], scaffold_props(&relation.target)).await?;
        self.store
            .merge_relationship(
                &mut tx,
                EdgeKey::new(src.as_str(), dst.as_str(), IMPLICIT_RELATION_TO),
                TABLE_LABEL,
                TABLE_LABEL,
                relation_props(relation),
            )
            .await?;
        with_timeout(self.timeout, "graph commit", self.store.commit_tx(tx)).await?;
        Ok((2, 1))
    }
}

// ============================================================================
// Property sets
// ============================================================================

fn scaffold_props(name: &QualifiedName) -> PropertyMap {
    props([("schema", name.schema.as_str()), ("name", name.table.as_str())])
}

fn table_props(t: &TableDescriptor) -> PropertyMap {
    let mut p = scaffold_props(&t.name);
    p.insert("column_count".into(), Value::from(t.columns.len()));
    p.insert("primary_key".into(), Value::from(t.primary_key.iter().cloned().collect::<Vec<_>>()));
    p.insert("is_junction".into(), Value::from(t.is_junction));
    p.insert("comment".into(), Value::from(t.comment.clone()));
    let indexes: Vec<String> = t.indexes.iter().map(|i| format!("{}({})", i.name, i.columns.join(", "))).collect();
    p.insert("indexes".into(), Value::from(indexes));
    let uniques: Vec<String> = t.unique_constraints.iter().map(|u| format!("{}({})", u.name, u.columns.join(", "))).collect();
    p.insert("unique_constraints".into(), Value::from(uniques));
    p
}

fn enrichment_props(profile: &SemanticProfile) -> PropertyMap {
    let mut p = PropertyMap::new();
    p.insert("is_enriched".into(), Value::from(true));
    p.insert("last_enriched_at".into(), Value::from(profile.synthesized_at));
    p.insert("stereotype".into(), Value::from(profile.stereotype.as_str()));
    p.insert("purpose".into(), Value::from(profile.purpose.as_str()));
    p.insert("business_logic".into(), Value::from(profile.business_logic.clone()));
    p.insert("summary".into(), Value::from(profile.summary.as_str()));
    p.insert("confidence".into(), Value::from(profile.confidence));
    p.insert(EMBEDDING_PROPERTY.into(), Value::Vector(profile.embedding.clone()));
    p.insert("dossier_digest".into(), Value::from(profile.dossier_digest.as_str()));
    p.insert("model".into(), Value::from(profile.model.as_str()));
    p
}

fn column_props(t: &TableDescriptor, c: &ColumnDescriptor, ordinal: usize, is_fk: bool) -> PropertyMap {
    let mut p = props([
        ("table", Value::from(t.name.to_string())),
        ("name", Value::from(c.name.as_str())),
        ("data_type", Value::from(c.data_type.as_str())),
        ("is_nullable", Value::from(c.nullable)),
        ("is_primary_key", Value::from(t.primary_key.contains(&c.name))),
        ("is_foreign_key", Value::from(is_fk)),
        ("ordinal", Value::from(ordinal)),
        ("comment", Value::from(c.comment.clone())),
    ]);
    if let Some(stats) = &c.stats {
        p.insert("null_ratio".into(), Value::from(stats.null_ratio));
        p.insert("distinct_estimate".into(), Value::from(stats.distinct_estimate));
        p.insert("categorical_values".into(), Value::from(stats.categorical_values.clone()));
    }
    p
}

fn fk_props(fks: &[&ForeignKey]) -> PropertyMap {
    let joined = |cols: &[String]| cols.join(", ");
    let mut p = PropertyMap::new();
    p.insert("constraint_names".into(), Value::from(fks.iter().map(|f| f.name.clone().unwrap_or_default()).collect::<Vec<_>>()));
    p.insert("constrained_columns".into(), Value::from(fks.iter().map(|f| joined(&f.columns)).collect::<Vec<_>>()));
    p.insert("referred_columns".into(), Value::from(fks.iter().map(|f| joined(&f.target_columns)).collect::<Vec<_>>()));
    p.insert("on_delete".into(), Value::from(fks.iter().map(|f| f.on_delete.as_str().to_string()).collect::<Vec<_>>()));
    p.insert("on_update".into(), Value::from(fks.iter().map(|f| f.on_update.as_str().to_string()).collect::<Vec<_>>()));
    props_with_provenance(p, Provenance::ExplicitFk)
}

fn relation_props(r: &CandidateRelation) -> PropertyMap {
    let mut p = PropertyMap::new();
    p.insert("relation_type".into(), Value::from(r.relation_type.clone()));
    p.insert("similarity".into(), Value::from(r.similarity as f64));
    p.insert("confidence".into(), Value::from(r.confidence));
    p.insert("justification".into(), Value::from(r.justification.clone()));
    if let Some((column, referenced)) = &r.via {
        p.insert("via_column".into(), Value::from(column.as_str()));
        p.insert("referenced_column".into(), Value::from(referenced.as_str()));
    }
    props_with_provenance(p, Provenance::Discovered)
}

fn props_with_provenance(mut p: PropertyMap, provenance: Provenance) -> PropertyMap {
    p.insert("provenance".into(), Value::from(provenance.as_str()));
    p
}
