//! # Relation Discovery
//!
//! Finds relations the schema never declared. Every unordered pair of
//! profiled entities without an explicit foreign key between them is scored
//! by cosine similarity of their embeddings; pairs strictly above the
//! threshold survive if they rank in the top M for at least one of the two
//! entities. Survivors then pass a structural plausibility check and a
//! [`RelationConfirmer`]. Only validated candidates leave this module.

pub mod validate;

use std::cmp::Ordering;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use hashbrown::HashMap;
use tracing::{debug, info};

use crate::config::{ConfirmationMode, GenesisConfig, PricingConfig};
use crate::model::{CandidateRelation, QualifiedName, SemanticProfile, TableDescriptor, ValidationStatus};
use crate::synth::{CostEstimate, LlmService, UsageTracker};
use crate::Error;

pub use validate::{
    plausible_references, type_family, ConfirmationContext, HeuristicConfirmer, LlmConfirmer, Reference,
    RelationConfirmer, TypeFamily, Verdict, RELATION_CHECK_MARKER,
};

/// Cosine similarity; 0.0 for mismatched lengths or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

/// Result of one discovery pass.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    /// Candidates that cleared threshold and top-M.
    pub proposed: usize,
    /// Candidates with no structurally plausible link.
    pub implausible: usize,
    /// Candidates the confirmer refused or failed on.
    pub rejected: usize,
    /// Validated relations, strongest first.
    pub relations: Vec<CandidateRelation>,
}

pub struct RelationDiscoverer {
    threshold: f32,
    top_m: usize,
    concurrency: usize,
    confirmer: Arc<dyn RelationConfirmer>,
}

impl RelationDiscoverer {
    pub fn new(threshold: f32, top_m: usize, concurrency: usize, confirmer: Arc<dyn RelationConfirmer>) -> Self {
        Self { threshold, top_m: top_m.max(1), concurrency: concurrency.max(1), confirmer }
    }

    /// Discoverer configured from `[discovery]`, with the confirmer it names.
    pub fn from_config(config: &GenesisConfig, llm: Arc<dyn LlmService>, usage: Arc<UsageTracker>) -> Self {
        let d = &config.discovery;
        let confirmer: Arc<dyn RelationConfirmer> = match d.confirmation {
            ConfirmationMode::Heuristic => Arc::new(HeuristicConfirmer),
            ConfirmationMode::Llm => Arc::new(LlmConfirmer::new(
                llm,
                config.models.confirmation_model.clone(),
                config.models.temperature,
                d.min_confidence,
                config.timeouts.llm(),
                usage,
            )),
        };
        Self::new(d.similarity_threshold, d.top_m, config.workers.concurrency, confirmer)
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Pending candidates: not FK-linked, similarity > T, top M per entity.
    ///
    /// Profiles without a matching descriptor are ignored.
    pub fn propose(&self, profiles: &[SemanticProfile], tables: &[TableDescriptor]) -> Vec<CandidateRelation> {
        let by_name: HashMap<&QualifiedName, &TableDescriptor> = tables.iter().map(|t| (&t.name, t)).collect();
        let mut entities: Vec<(&SemanticProfile, &TableDescriptor)> = profiles
            .iter()
            .filter_map(|p| by_name.get(&p.entity).map(|t| (p, *t)))
            .collect();
        entities.sort_by(|a, b| a.0.entity.cmp(&b.0.entity));
        entities.dedup_by(|a, b| a.0.entity == b.0.entity);

        let mut pairs: Vec<(usize, usize, f32)> = Vec::new();
        for i in 0..entities.len() {
            for j in (i + 1)..entities.len() {
                let (pi, ti) = entities[i];
                let (pj, tj) = entities[j];
                if ti.is_fk_linked(tj) {
                    continue;
                }
                let sim = cosine_similarity(&pi.embedding, &pj.embedding);
                if sim > self.threshold {
                    pairs.push((i, j, sim));
                }
            }
        }

        let mut per_entity: Vec<Vec<usize>> = vec![Vec::new(); entities.len()];
        for (k, (i, j, _)) in pairs.iter().enumerate() {
            per_entity[*i].push(k);
            per_entity[*j].push(k);
        }
        let mut kept = vec![false; pairs.len()];
        for list in &mut per_entity {
            list.sort_by(|a, b| rank(&pairs[*a], &pairs[*b]));
            for k in list.iter().take(self.top_m) {
                kept[*k] = true;
            }
        }

        let mut candidates: Vec<CandidateRelation> = pairs
            .iter()
            .zip(kept)
            .filter(|(_, keep)| *keep)
            .map(|((i, j, sim), _)| {
                CandidateRelation::pending(entities[*i].0.entity.clone(), entities[*j].0.entity.clone(), *sim)
            })
            .collect();
        candidates.sort_by(order);
        debug!(pairs = pairs.len(), kept = candidates.len(), threshold = self.threshold, "candidates proposed");
        candidates
    }

    /// Estimated spend of confirming every plausible candidate, or `None`
    /// when the confirmer asks no model or nothing would be asked.
    pub fn estimate(
        &self,
        profiles: &[SemanticProfile],
        tables: &[TableDescriptor],
        pricing: &PricingConfig,
    ) -> Option<CostEstimate> {
        let candidates = self.propose(profiles, tables);
        let by_table: HashMap<&QualifiedName, &TableDescriptor> = tables.iter().map(|t| (&t.name, t)).collect();
        let by_profile: HashMap<&QualifiedName, &SemanticProfile> = profiles.iter().map(|p| (&p.entity, p)).collect();

        let mut prompts = Vec::new();
        for candidate in &candidates {
            let Some((ts, tt, ps, pt)) = resolve(candidate, &by_table, &by_profile) else { continue };
            let references = plausible_references(ts, tt);
            if references.is_empty() {
                continue;
            }
            let ctx = ConfirmationContext { candidate, references: &references, source: (ts, ps), target: (tt, pt) };
            if let Some(prompt) = self.confirmer.prompt(&ctx) {
                prompts.push(prompt);
            }
        }
        (!prompts.is_empty()).then(|| CostEstimate::for_confirmations(prompts.iter().map(String::as_str), pricing))
    }

    /// Propose, then validate with bounded parallelism.
    pub async fn discover(&self, profiles: &[SemanticProfile], tables: &[TableDescriptor]) -> Discovery {
        let candidates = self.propose(profiles, tables);
        let proposed = candidates.len();
        let by_table: HashMap<&QualifiedName, &TableDescriptor> = tables.iter().map(|t| (&t.name, t)).collect();
        let by_profile: HashMap<&QualifiedName, &SemanticProfile> = profiles.iter().map(|p| (&p.entity, p)).collect();

        let outcomes: Vec<Outcome> = stream::iter(candidates)
            .map(|c| self.validate(c, &by_table, &by_profile))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut discovery = Discovery { proposed, ..Default::default() };
        for outcome in outcomes {
            match outcome {
                Outcome::Validated(c) => discovery.relations.push(c),
                Outcome::Implausible => discovery.implausible += 1,
                Outcome::Rejected(e) => {
                    debug!(error = %e, "candidate dropped");
                    discovery.rejected += 1;
                }
            }
        }
        discovery.relations.sort_by(order);
        info!(
            proposed,
            validated = discovery.relations.len(),
            implausible = discovery.implausible,
            rejected = discovery.rejected,
            "relation discovery complete"
        );
        discovery
    }

    async fn validate(
        &self,
        mut candidate: CandidateRelation,
        tables: &HashMap<&QualifiedName, &TableDescriptor>,
        profiles: &HashMap<&QualifiedName, &SemanticProfile>,
    ) -> Outcome {
        let Some((ts, tt, ps, pt)) = resolve(&candidate, tables, profiles) else {
            return Outcome::Implausible;
        };

        let references = plausible_references(ts, tt);
        if references.is_empty() {
            return Outcome::Implausible;
        }

        let ctx = ConfirmationContext { candidate: &candidate, references: &references, source: (ts, ps), target: (tt, pt) };
        let verdict = match self.confirmer.confirm(&ctx).await {
            Ok(v) => v,
            Err(e) => return Outcome::Rejected(rejection(&candidate, e.to_string())),
        };
        if !verdict.accepted {
            return Outcome::Rejected(rejection(&candidate, verdict.justification));
        }

        if let Some(reference) = verdict.reference {
            candidate.source = reference.referencing;
            candidate.target = reference.referenced;
            candidate.via = Some((reference.column, reference.referenced_column));
        }
        candidate.status = ValidationStatus::Validated;
        candidate.relation_type = Some(verdict.relation_type);
        candidate.confidence = Some(verdict.confidence);
        candidate.justification = Some(verdict.justification);
        Outcome::Validated(candidate)
    }
}

enum Outcome {
    Validated(CandidateRelation),
    Implausible,
    Rejected(Error),
}

/// Descriptors and profiles of both sides of `candidate`.
fn resolve<'a>(
    candidate: &CandidateRelation,
    tables: &HashMap<&QualifiedName, &'a TableDescriptor>,
    profiles: &HashMap<&QualifiedName, &'a SemanticProfile>,
) -> Option<(&'a TableDescriptor, &'a TableDescriptor, &'a SemanticProfile, &'a SemanticProfile)> {
    Some((
        *tables.get(&candidate.source)?,
        *tables.get(&candidate.target)?,
        *profiles.get(&candidate.source)?,
        *profiles.get(&candidate.target)?,
    ))
}

fn rejection(c: &CandidateRelation, reason: String) -> Error {
    Error::RelationValidation { from: c.source.to_string(), to: c.target.to_string(), reason }
}

/// Higher similarity first; lower pair index breaks ties.
fn rank(a: &(usize, usize, f32), b: &(usize, usize, f32)) -> Ordering {
    b.2.total_cmp(&a.2).then_with(|| (a.0, a.1).cmp(&(b.0, b.1)))
}

fn order(a: &CandidateRelation, b: &CandidateRelation) -> Ordering {
    b.similarity
        .total_cmp(&a.similarity)
        .then_with(|| a.source.cmp(&b.source))
        .then_with(|| a.target.cmp(&b.target))
}
