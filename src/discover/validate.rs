//! Candidate validation: structural plausibility, then a confirmer.
//!
//! A pair is plausible when one side R has a column (not already a foreign
//! key, not R's sole primary key) of the same type family as the other
//! side D's single-column primary key. R → D is then a many-to-one link.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::evidence::naming::{singular, tokenize};
use crate::model::{CandidateRelation, QualifiedName, SemanticProfile, TableDescriptor};
use crate::retry::with_timeout;
use crate::synth::prompt::extract_json_object;
use crate::synth::{LlmRequest, LlmService, UsageKind, UsageTracker};
use crate::{Error, Result};

/// Marks a relation-confirmation prompt.
pub const RELATION_CHECK_MARKER: &str = "### RELATION CHECK";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFamily {
    Integer,
    Text,
    Uuid,
    Numeric,
    Temporal,
    Boolean,
}

/// Family of a declared SQL type; `None` for types never used as keys
/// (json, bytea, arrays, ...).
pub fn type_family(declared: &str) -> Option<TypeFamily> {
    let lower = declared.trim().to_ascii_lowercase();
    if lower.ends_with("[]") {
        return None;
    }
    let base = lower.split('(').next().unwrap_or("").trim();
    let family = match base {
        "int" | "integer" | "bigint" | "smallint" | "int2" | "int4" | "int8" | "serial" | "bigserial"
        | "smallserial" => TypeFamily::Integer,
        "text" | "varchar" | "character varying" | "char" | "character" | "bpchar" | "citext" | "name"
        | "string" => TypeFamily::Text,
        "uuid" => TypeFamily::Uuid,
        "numeric" | "decimal" | "real" | "double precision" | "float" | "float4" | "float8" | "money" => {
            TypeFamily::Numeric
        }
        "bool" | "boolean" => TypeFamily::Boolean,
        b if b.starts_with("timestamp") || b.starts_with("time") || b == "date" || b.starts_with("interval") => {
            TypeFamily::Temporal
        }
        _ => return None,
    };
    Some(family)
}

/// One structurally plausible way `referencing` could point at `referenced`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Reference {
    pub referencing: QualifiedName,
    pub column: String,
    pub referenced: QualifiedName,
    pub referenced_column: String,
}

fn references_from(r: &TableDescriptor, d: &TableDescriptor) -> Vec<Reference> {
    let Some(pk) = d.single_pk() else { return Vec::new() };
    let Some(pk_family) = type_family(&pk.data_type) else { return Vec::new() };
    let fk_columns = r.fk_columns();
    let sole_pk = r.single_pk().map(|c| c.name.as_str());

    r.columns
        .iter()
        .filter(|c| !fk_columns.contains(c.name.as_str()))
        .filter(|c| Some(c.name.as_str()) != sole_pk)
        .filter(|c| type_family(&c.data_type) == Some(pk_family))
        .map(|c| Reference {
            referencing: r.name.clone(),
            column: c.name.clone(),
            referenced: d.name.clone(),
            referenced_column: pk.name.clone(),
        })
        .collect()
}

/// Every plausible reference between `a` and `b`, in both directions.
pub fn plausible_references(a: &TableDescriptor, b: &TableDescriptor) -> Vec<Reference> {
    let mut refs = references_from(a, b);
    refs.extend(references_from(b, a));
    refs.sort();
    refs
}

/// What a confirmer sees about one candidate.
pub struct ConfirmationContext<'a> {
    pub candidate: &'a CandidateRelation,
    pub references: &'a [Reference],
    pub source: (&'a TableDescriptor, &'a SemanticProfile),
    pub target: (&'a TableDescriptor, &'a SemanticProfile),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub accepted: bool,
    pub reference: Option<Reference>,
    pub relation_type: String,
    pub confidence: f64,
    pub justification: String,
}

impl Verdict {
    pub fn reject(justification: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reference: None,
            relation_type: String::new(),
            confidence: 0.0,
            justification: justification.into(),
        }
    }
}

/// Secondary check on a structurally plausible candidate.
#[async_trait]
pub trait RelationConfirmer: Send + Sync {
    async fn confirm(&self, ctx: &ConfirmationContext<'_>) -> Result<Verdict>;

    /// The prompt `confirm` would send for `ctx`; `None` when no model is
    /// asked.
    fn prompt(&self, _ctx: &ConfirmationContext<'_>) -> Option<String> {
        None
    }
}

/// Name affinity: the referencing column's tokens (without `id`) must share
/// a token with the referenced table's singularised name.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicConfirmer;

const NOISE_TOKENS: &[&str] = &["id", "ids", "fk", "ref", "key", "code", "no"];

fn affinity(reference: &Reference) -> (Vec<String>, usize) {
    let column: BTreeSet<String> = tokenize(&reference.column)
        .into_iter()
        .filter(|t| !NOISE_TOKENS.contains(&t.as_str()))
        .map(|t| singular(&t))
        .collect();
    let table: BTreeSet<String> = tokenize(&reference.referenced.table).into_iter().map(|t| singular(&t)).collect();
    let shared: Vec<String> = column.intersection(&table).cloned().collect();
    (shared, column.len())
}

#[async_trait]
impl RelationConfirmer for HeuristicConfirmer {
    async fn confirm(&self, ctx: &ConfirmationContext<'_>) -> Result<Verdict> {
        let best = ctx
            .references
            .iter()
            .map(|r| (r, affinity(r)))
            .filter(|(_, (shared, _))| !shared.is_empty())
            .max_by(|(ra, (sa, na)), (rb, (sb, nb))| {
                let score_a = sa.len() as f64 / (*na).max(1) as f64;
                let score_b = sb.len() as f64 / (*nb).max(1) as f64;
                score_a.total_cmp(&score_b).then_with(|| rb.cmp(ra))
            });

        Ok(match best {
            Some((reference, (shared, total))) => Verdict {
                accepted: true,
                reference: Some(reference.clone()),
                relation_type: "REFERENCES".to_string(),
                confidence: shared.len() as f64 / total.max(1) as f64,
                justification: format!(
                    "{}.{} shares name token(s) [{}] with {}",
                    reference.referencing,
                    reference.column,
                    shared.join(", "),
                    reference.referenced
                ),
            },
            None => Verdict::reject("no referencing column with name affinity"),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ConfirmationReply {
    relationship_exists: bool,
    #[serde(default)]
    relationship_type: Option<String>,
    confidence_score: f64,
    #[serde(default)]
    justification: Option<String>,
}

/// Asks the confirmation model; accepts only confident positive answers.
pub struct LlmConfirmer {
    llm: Arc<dyn LlmService>,
    model: String,
    temperature: f32,
    min_confidence: f64,
    timeout: Duration,
    usage: Arc<UsageTracker>,
}

impl LlmConfirmer {
    pub fn new(
        llm: Arc<dyn LlmService>,
        model: impl Into<String>,
        temperature: f32,
        min_confidence: f64,
        timeout: Duration,
        usage: Arc<UsageTracker>,
    ) -> Self {
        Self { llm, model: model.into(), temperature, min_confidence, timeout, usage }
    }

    fn render_prompt(ctx: &ConfirmationContext<'_>) -> String {
        let describe = |(t, p): (&TableDescriptor, &SemanticProfile)| {
            let columns: Vec<String> = t.columns.iter().map(|c| format!("{} {}", c.name, c.data_type)).collect();
            format!(
                "{} [{}]\npurpose: {}\nsummary: {}\ncolumns: {}",
                t.name,
                p.stereotype,
                p.purpose,
                p.summary,
                columns.join(", ")
            )
        };
        let options: Vec<String> = ctx
            .references
            .iter()
            .map(|r| format!("- {}.{} -> {}.{}", r.referencing, r.column, r.referenced, r.referenced_column))
            .collect();
        format!(
            "{RELATION_CHECK_MARKER}\n\
             Two tables have semantically similar descriptions (cosine similarity {:.3}) but no declared foreign key.\n\n\
             ## Table A\n{}\n\n## Table B\n{}\n\n## Structurally possible links\n{}\n\n\
             Is there a real business relationship between A and B? Answer with one JSON object:\n\
             {{\"relationship_exists\": true, \"relationship_type\": \"UPPER_SNAKE_CASE\", \"confidence_score\": 0.0, \"justification\": \"...\"}}\n",
            ctx.candidate.similarity,
            describe(ctx.source),
            describe(ctx.target),
            options.join("\n")
        )
    }
}

#[async_trait]
impl RelationConfirmer for LlmConfirmer {
    async fn confirm(&self, ctx: &ConfirmationContext<'_>) -> Result<Verdict> {
        let request = LlmRequest::json(&self.model, Self::render_prompt(ctx), self.temperature);
        let completion = with_timeout(self.timeout, "relation confirmation", self.llm.complete(&request)).await?;
        self.usage.record(UsageKind::Confirmation, completion.usage);

        let raw = extract_json_object(&completion.text)
            .ok_or_else(|| Error::Llm("no JSON object in confirmation reply".into()))?;
        let reply: ConfirmationReply = serde_json::from_str(raw)?;

        let accepted = reply.relationship_exists && reply.confidence_score >= self.min_confidence;
        let relation_type = reply
            .relationship_type
            .filter(|t| !t.trim().is_empty())
            .map(|t| t.trim().to_ascii_uppercase().replace([' ', '-'], "_"))
            .unwrap_or_else(|| "RELATED_TO".to_string());
        Ok(Verdict {
            accepted,
            reference: ctx.references.first().cloned(),
            relation_type,
            confidence: reply.confidence_score,
            justification: reply.justification.unwrap_or_default(),
        })
    }

    fn prompt(&self, ctx: &ConfirmationContext<'_>) -> Option<String> {
        Some(Self::render_prompt(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspect::build_extraction;
    use crate::model::Stereotype;
    use crate::source::RawTable;
    use crate::synth::ScriptedLlm;
    use chrono::Utc;

    fn tables() -> Vec<TableDescriptor> {
        build_extraction(vec![
            RawTable::new("public", "res_partner").column("id", "integer", false).primary_key(["id"]),
            RawTable::new("public", "crm_lead")
                .column("id", "integer", false)
                .column("partner_id", "integer", true)
                .column("priority", "integer", true)
                .column("name", "varchar", false)
                .primary_key(["id"]),
            RawTable::new("public", "doc_blob").column("id", "uuid", false).column("body", "bytea", true).primary_key(["id"]),
        ])
        .tables
    }

    fn profile(name: &QualifiedName) -> SemanticProfile {
        SemanticProfile {
            entity: name.clone(),
            purpose: "p".into(),
            business_logic: None,
            stereotype: Stereotype::new("master_data"),
            summary: "s".into(),
            confidence: 0.9,
            embedding: vec![1.0],
            model: "m".into(),
            dossier_digest: "d".into(),
            synthesized_at: Utc::now(),
        }
    }

    #[test]
    fn test_type_family() {
        assert_eq!(type_family("character varying(64)"), Some(TypeFamily::Text));
        assert_eq!(type_family("timestamp without time zone"), Some(TypeFamily::Temporal));
        assert_eq!(type_family("BIGINT"), Some(TypeFamily::Integer));
        assert_eq!(type_family("jsonb"), None);
        assert_eq!(type_family("integer[]"), None);
    }

    #[test]
    fn test_plausible_references() {
        let t = tables();
        let lead = &t[0];
        let partner = &t[2];
        assert_eq!(lead.name.table, "crm_lead");
        let refs = plausible_references(lead, partner);
        let columns: Vec<&str> = refs.iter().map(|r| r.column.as_str()).collect();
        assert_eq!(columns, vec!["partner_id", "priority"]);
        assert!(refs.iter().all(|r| r.referenced == partner.name));
        // uuid key against integer columns: nothing fits.
        assert!(plausible_references(&t[1], partner).is_empty());
    }

    #[tokio::test]
    async fn test_heuristic_picks_name_affinity() {
        let t = tables();
        let (lead, partner) = (&t[0], &t[2]);
        let refs = plausible_references(lead, partner);
        let candidate = CandidateRelation::pending(lead.name.clone(), partner.name.clone(), 0.9);
        let (pl, pp) = (profile(&lead.name), profile(&partner.name));
        let ctx = ConfirmationContext { candidate: &candidate, references: &refs, source: (lead, &pl), target: (partner, &pp) };
        let verdict = HeuristicConfirmer.confirm(&ctx).await.unwrap();
        assert!(verdict.accepted);
        assert_eq!(verdict.reference.unwrap().column, "partner_id");
        assert_eq!(verdict.relation_type, "REFERENCES");
    }

    #[tokio::test]
    async fn test_llm_confirmer_threshold() {
        let t = tables();
        let (lead, partner) = (&t[0], &t[2]);
        let refs = plausible_references(lead, partner);
        let candidate = CandidateRelation::pending(lead.name.clone(), partner.name.clone(), 0.9);
        let (pl, pp) = (profile(&lead.name), profile(&partner.name));
        let ctx = ConfirmationContext { candidate: &candidate, references: &refs, source: (lead, &pl), target: (partner, &pp) };
        let usage = Arc::new(UsageTracker::new(Default::default()));

        let weak = ScriptedLlm::offline(4).with_confirmation(
            r#"{"relationship_exists": true, "relationship_type": "owned by", "confidence_score": 0.6}"#,
        );
        let c = LlmConfirmer::new(Arc::new(weak), "m", 0.0, 0.85, Duration::from_secs(5), usage.clone());
        let v = c.confirm(&ctx).await.unwrap();
        assert!(!v.accepted);
        assert_eq!(v.relation_type, "OWNED_BY");

        let c = LlmConfirmer::new(Arc::new(ScriptedLlm::offline(4)), "m", 0.0, 0.85, Duration::from_secs(5), usage.clone());
        assert!(c.confirm(&ctx).await.unwrap().accepted);
        assert_eq!(usage.snapshot().calls, 2);
    }
}
