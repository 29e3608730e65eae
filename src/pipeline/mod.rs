//! # Pipeline
//!
//! [`PipelineController`] runs the stages in dependency order for every
//! sampled entity:
//!
//! ```text
//! introspect → sample → gather → [gate] → synthesize → materialize → discover → index
//! ```
//!
//! Gathering and graph writes run one entity at a time; synthesis and
//! relation confirmation fan out over `workers.concurrency` tasks. Every
//! entity's progress lands in the [`CheckpointStore`] so a rerun picks up
//! where the last one stopped.

pub mod gate;
pub mod sample;
pub mod summary;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use futures_util::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::checkpoint::{Checkpoint, CheckpointStore, EntityState};
use crate::config::GenesisConfig;
use crate::discover::RelationDiscoverer;
use crate::evidence::{EvidenceAggregator, NamingLexicon};
use crate::introspect::{Extraction, SchemaIntrospector};
use crate::materialize::{GraphMaterializer, WriteOutcome};
use crate::model::{EvidenceDossier, SemanticProfile};
use crate::retry::with_timeout;
use crate::source::RelationalSource;
use crate::storage::GraphStore;
use crate::synth::{ErpTaxonomy, LlmService, SemanticSynthesizer, StereotypeTaxonomy, UsageTracker};
use crate::{Error, Result};

pub use gate::{AutoApprove, AutoDecline, BudgetGate, ConfirmationGate};
pub use sample::{resolve_seed, select_sample};
pub use summary::RunSummary;

/// A dossier waiting for synthesis, and whether the entity already has a
/// checkpoint from an earlier run.
struct Pending {
    dossier: EvidenceDossier,
    checkpointed: bool,
}

pub struct PipelineController<S, G, C>
where
    S: RelationalSource,
    G: GraphStore,
    C: CheckpointStore,
{
    config: GenesisConfig,
    source: S,
    materializer: GraphMaterializer<G>,
    llm: Arc<dyn LlmService>,
    checkpoints: C,
    gate: Box<dyn ConfirmationGate>,
    lexicon: Option<Arc<dyn NamingLexicon>>,
    taxonomy: Arc<dyn StereotypeTaxonomy>,
}

impl<S, G, C> PipelineController<S, G, C>
where
    S: RelationalSource,
    G: GraphStore,
    C: CheckpointStore,
{
    pub fn new(
        config: GenesisConfig,
        source: S,
        graph: G,
        llm: impl LlmService,
        checkpoints: C,
        gate: impl ConfirmationGate + 'static,
    ) -> Self {
        let materializer = GraphMaterializer::new(graph, &config);
        Self {
            config,
            source,
            materializer,
            llm: Arc::new(llm),
            checkpoints,
            gate: Box::new(gate),
            lexicon: None,
            taxonomy: Arc::new(ErpTaxonomy),
        }
    }

    /// Replace the stock ERP naming lexicon (and the configured rules).
    pub fn with_lexicon(mut self, lexicon: Arc<dyn NamingLexicon>) -> Self {
        self.lexicon = Some(lexicon);
        self
    }

    pub fn with_taxonomy(mut self, taxonomy: Arc<dyn StereotypeTaxonomy>) -> Self {
        self.taxonomy = taxonomy;
        self
    }

    pub fn config(&self) -> &GenesisConfig {
        &self.config
    }

    pub fn graph(&self) -> &G {
        self.materializer.store()
    }

    pub fn checkpoints(&self) -> &C {
        &self.checkpoints
    }

    /// Run once over a fresh sample.
    ///
    /// Only a connection failure to either datastore returns `Err`; every
    /// per-entity failure is reported in the summary instead.
    pub async fn run(&self) -> Result<RunSummary> {
        let started = Instant::now();
        self.config.validate()?;
        self.connect().await?;

        let schema = self.config.source.schema.as_str();
        let extraction = SchemaIntrospector::new(schema, self.config.timeouts.query())
            .extract(&self.source)
            .await?;
        for anomaly in &extraction.anomalies {
            warn!(table = %anomaly.table, reason = %anomaly.reason, "table excluded");
        }

        let recorded = self.checkpoints.run_seed().await?;
        let seed = resolve_seed(self.config.sampling.seed, recorded);
        if recorded.is_none() {
            self.checkpoints.save_run_seed(seed).await?;
        }
        let sample = select_sample(&extraction.tables, &self.config.sampling, schema, seed)?;
        info!(
            seed,
            tables = extraction.tables.len(),
            anomalies = extraction.anomalies.len(),
            sampled = sample.len(),
            "sample selected"
        );

        let mut summary = RunSummary {
            seed,
            sampled: sample.len(),
            anomalies: extraction.anomalies.clone(),
            ..RunSummary::default()
        };

        match self.materializer.ensure_schema().await {
            Ok(()) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => warn!(error = %e, "key constraints not ensured"),
        }

        let aggregator = match &self.lexicon {
            Some(lexicon) => EvidenceAggregator::new(
                lexicon.clone(),
                self.config.sampling.rows_per_table,
                seed,
                self.config.timeouts.query(),
            ),
            None => EvidenceAggregator::from_config(&self.config, seed),
        };

        // Gather evidence and sort entities by what is left to do.
        let mut pending = Vec::new();
        let mut reused = Vec::new();
        for entity in &sample {
            let dossier = match aggregator.gather(entity, &extraction.tables, &self.source).await {
                Ok(dossier) => dossier,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(entity = %entity, error = %e, "evidence unavailable");
                    summary.unresolved.push((entity.clone(), format!("evidence unavailable: {e}")));
                    continue;
                }
            };
            let digest = dossier.digest()?;
            match self.checkpoints.load(entity).await? {
                Some(cp) if cp.is_done_for(&digest) => {
                    debug!(entity = %entity, "already materialized, skipped");
                    summary.skipped.push(entity.clone());
                }
                Some(cp) => match cp.reusable_profile(&digest) {
                    Some(profile) => reused.push(profile.clone()),
                    None => pending.push(Pending { dossier, checkpointed: true }),
                },
                None => pending.push(Pending { dossier, checkpointed: false }),
            }
        }
        info!(pending = pending.len(), reused = reused.len(), skipped = summary.skipped.len(), "evidence gathered");

        for profile in reused {
            self.materialize(&extraction, profile, &mut summary).await?;
        }

        let usage = Arc::new(UsageTracker::new(self.config.pricing.clone()));
        let synthesizer = SemanticSynthesizer::new(self.llm.clone(), self.taxonomy.clone(), &self.config, usage.clone());
        let batch_size = self.config.sampling.batch_size.unwrap_or(pending.len()).max(1);
        let batches: Vec<&[Pending]> = pending.chunks(batch_size).collect();
        let mut declined = false;

        for (index, batch) in batches.iter().enumerate() {
            let dossiers: Vec<&EvidenceDossier> = batch.iter().map(|p| &p.dossier).collect();
            let estimate = synthesizer.estimate(&dossiers);
            info!(batch = index + 1, of = batches.len(), %estimate, "awaiting cost confirmation");

            if !self.gate.confirm(&estimate).await {
                warn!(batch = index + 1, "declined at the cost gate, stopping");
                for rest in &batches[index..] {
                    self.decline(rest, &mut summary).await?;
                }
                declined = true;
                break;
            }
            summary.estimated_usd += estimate.usd;

            let results: Vec<(&EvidenceDossier, Result<SemanticProfile>)> = stream::iter(dossiers)
                .map(|dossier| {
                    let synthesizer = &synthesizer;
                    async move { (dossier, synthesizer.synthesize(dossier).await) }
                })
                .buffer_unordered(self.config.workers.concurrency.max(1))
                .collect()
                .await;

            for (dossier, result) in results {
                let entity = dossier.entity.clone();
                match result {
                    Ok(profile) => {
                        let state = EntityState::Synthesized { profile: profile.clone() };
                        self.checkpoints.save(Checkpoint::new(entity, state)).await?;
                        self.materialize(&extraction, profile, &mut summary).await?;
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        let (attempts, reason) = match e {
                            Error::Synthesis { attempts, reason, .. } => (attempts, reason),
                            other => (0, other.to_string()),
                        };
                        let state = EntityState::Unresolved { attempts, reason: reason.clone() };
                        self.checkpoints.save(Checkpoint::new(entity.clone(), state)).await?;
                        summary.unresolved.push((entity, reason));
                    }
                }
            }
        }

        if !declined && !summary.succeeded.is_empty() {
            self.discover(&extraction, usage.clone(), &mut summary).await?;
        }

        summary.index_refreshed = self.materializer.refresh_index().await?;
        summary.usage = usage.snapshot();
        summary.elapsed = started.elapsed();
        summary.sort();
        info!(
            succeeded = summary.succeeded_count(),
            skipped = summary.skipped_count(),
            failed = summary.failed_count(),
            declined = summary.declined.len(),
            usd = summary.usage.usd,
            "run complete"
        );
        Ok(summary)
    }

    /// Both datastores must answer before anything else happens.
    async fn connect(&self) -> Result<()> {
        let fatal = |target: &'static str| move |e: Error| if e.is_fatal() { e } else { Error::connection(target, e) };
        with_timeout(self.config.timeouts.query(), "source ping", self.source.ping())
            .await
            .map_err(fatal("relational source"))?;
        with_timeout(self.config.timeouts.graph(), "graph ping", self.materializer.store().ping())
            .await
            .map_err(fatal("graph store"))?;
        Ok(())
    }

    /// Propose relations over every materialized profile, gate the
    /// confirmation spend, and write what validates.
    async fn discover(&self, extraction: &Extraction, usage: Arc<UsageTracker>, summary: &mut RunSummary) -> Result<()> {
        let universe = self.discovery_universe(extraction).await?;
        let discoverer = RelationDiscoverer::from_config(&self.config, self.llm.clone(), usage);

        if let Some(estimate) = discoverer.estimate(&universe, &extraction.tables, &self.config.pricing) {
            info!(%estimate, "awaiting cost confirmation for relation checks");
            if !self.gate.confirm(&estimate).await {
                warn!("relation checks declined at the cost gate, discovery skipped");
                summary.relations_declined = true;
                return Ok(());
            }
            summary.estimated_usd += estimate.usd;
        }

        let discovery = discoverer.discover(&universe, &extraction.tables).await;
        let mut outcome = WriteOutcome::default();
        self.materializer.upsert_relations(&discovery.relations, &mut outcome).await?;
        summary.relations_discovered = outcome.relations_written;
        summary.nodes_merged += outcome.nodes_merged;
        summary.edges_merged += outcome.edges_merged;
        info!(
            profiles = universe.len(),
            proposed = discovery.proposed,
            implausible = discovery.implausible,
            rejected = discovery.rejected,
            written = outcome.relations_written,
            "relations written"
        );
        Ok(())
    }

    async fn materialize(&self, extraction: &Extraction, profile: SemanticProfile, summary: &mut RunSummary) -> Result<()> {
        let entity = profile.entity.clone();
        let Some(table) = extraction.get(&entity) else {
            return Err(Error::NotFound(format!("table descriptor {entity}")));
        };
        let state = match self.materializer.upsert_entity(table, Some(&profile)).await {
            Ok((nodes, edges)) => {
                summary.nodes_merged += nodes;
                summary.edges_merged += edges;
                summary.succeeded.push(entity.clone());
                EntityState::Materialized { profile }
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                summary.write_failed.push((entity.clone(), e.to_string()));
                EntityState::WriteFailed { profile, reason: e.to_string() }
            }
        };
        self.checkpoints.save(Checkpoint::new(entity, state)).await
    }

    async fn decline(&self, batch: &[Pending], summary: &mut RunSummary) -> Result<()> {
        for pending in batch {
            let entity = pending.dossier.entity.clone();
            // An earlier checkpoint says more than "declined"; keep it.
            if !pending.checkpointed {
                self.checkpoints.save(Checkpoint::new(entity.clone(), EntityState::Declined)).await?;
            }
            summary.declined.push(entity);
        }
        Ok(())
    }

    /// Every materialized profile whose table is still in the schema.
    async fn discovery_universe(&self, extraction: &Extraction) -> Result<Vec<SemanticProfile>> {
        let present: BTreeSet<_> = extraction.tables.iter().map(|t| &t.name).collect();
        Ok(self
            .checkpoints
            .all()
            .await?
            .into_iter()
            .filter_map(|cp| match cp.state {
                EntityState::Materialized { profile } if present.contains(&profile.entity) => Some(profile),
                _ => None,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpoints;
    use crate::source::{MemorySource, RawTable};
    use crate::storage::MemoryGraph;
    use crate::synth::ScriptedLlm;

    fn config() -> GenesisConfig {
        let mut config = GenesisConfig::default();
        config.sampling.seed = Some(11);
        config.models.embedding_dimensions = 32;
        config.retry.initial_backoff_ms = 1;
        config.retry.max_backoff_ms = 2;
        config
    }

    fn source() -> MemorySource {
        MemorySource::new()
            .with_table(RawTable::new("public", "customers").column("id", "integer", false).column("name", "text", true).primary_key(["id"]))
            .with_table(
                RawTable::new("public", "orders")
                    .column("id", "integer", false)
                    .column("customer_id", "integer", false)
                    .primary_key(["id"])
                    .foreign_key(["customer_id"], "customers", ["id"]),
            )
    }

    #[tokio::test]
    async fn test_run_materializes_every_entity() {
        let llm = Arc::new(ScriptedLlm::offline(32));
        let graph = MemoryGraph::new();
        let controller = PipelineController::new(config(), source(), graph.clone(), llm.clone(), MemoryCheckpoints::new(), AutoApprove);

        let summary = controller.run().await.unwrap();
        assert_eq!(summary.succeeded_count(), 2);
        assert_eq!(summary.failed_count(), 0);
        assert!(summary.index_refreshed);
        assert_eq!(llm.completions(), 2);
        assert!(graph.node_by_key("Table", "public.orders").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unreachable_source_is_fatal() {
        let source = source();
        source.set_unreachable(true);
        let controller = PipelineController::new(
            config(),
            source,
            MemoryGraph::new(),
            ScriptedLlm::offline(32),
            MemoryCheckpoints::new(),
            AutoApprove,
        );
        let err = controller.run().await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_unreachable_graph_is_fatal_before_spend() {
        let graph = MemoryGraph::new();
        graph.set_unreachable(true);
        let llm = Arc::new(ScriptedLlm::offline(32));
        let controller = PipelineController::new(config(), source(), graph, llm.clone(), MemoryCheckpoints::new(), AutoApprove);
        assert!(controller.run().await.unwrap_err().is_fatal());
        assert_eq!(llm.calls(), 0);
    }

    #[tokio::test]
    async fn test_batches_are_gated_separately() {
        let mut cfg = config();
        cfg.sampling.batch_size = Some(1);
        let gate = BudgetGate { max_usd: 10.0 };
        let controller =
            PipelineController::new(cfg, source(), MemoryGraph::new(), ScriptedLlm::offline(32), MemoryCheckpoints::new(), gate);
        let summary = controller.run().await.unwrap();
        assert_eq!(summary.succeeded_count(), 2);
        assert!(summary.estimated_usd > 0.0);
    }
}
