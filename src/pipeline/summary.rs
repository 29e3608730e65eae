//! Final run report.

use std::fmt;
use std::time::Duration;

use crate::introspect::Anomaly;
use crate::model::QualifiedName;
use crate::synth::UsageReport;

/// What a run did, entity by entity.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Seed used for sampling; replaying it reproduces the sample.
    pub seed: u64,
    /// Entities selected for this run.
    pub sampled: usize,
    /// Tables excluded at introspection.
    pub anomalies: Vec<Anomaly>,
    /// Synthesized (or reused) and written to the graph.
    pub succeeded: Vec<QualifiedName>,
    /// Already materialized for the same evidence by an earlier run.
    pub skipped: Vec<QualifiedName>,
    /// Synthesis ran out of attempts; no profile exists.
    pub unresolved: Vec<(QualifiedName, String)>,
    /// Evidence or graph write failed; left for a later run.
    pub write_failed: Vec<(QualifiedName, String)>,
    /// Never synthesized because the gate declined their batch.
    pub declined: Vec<QualifiedName>,
    /// The gate declined the relation-confirmation calls.
    pub relations_declined: bool,
    pub relations_discovered: usize,
    pub nodes_merged: usize,
    pub edges_merged: usize,
    pub index_refreshed: bool,
    /// Sum of the estimates shown at the gate.
    pub estimated_usd: f64,
    pub usage: UsageReport,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn succeeded_count(&self) -> usize {
        self.succeeded.len()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    /// Unresolved plus failed writes.
    pub fn failed_count(&self) -> usize {
        self.unresolved.len() + self.write_failed.len()
    }

    pub fn was_declined(&self) -> bool {
        !self.declined.is_empty() || self.relations_declined
    }

    pub(crate) fn sort(&mut self) {
        self.succeeded.sort();
        self.skipped.sort();
        self.unresolved.sort();
        self.write_failed.sort();
        self.declined.sort();
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Genesis run (seed {}, {} sampled, {:.1}s)", self.seed, self.sampled, self.elapsed.as_secs_f64())?;
        writeln!(f, "  succeeded:    {}", self.succeeded.len())?;
        writeln!(f, "  skipped:      {}", self.skipped.len())?;
        writeln!(f, "  anomalies:    {}", self.anomalies.len())?;
        writeln!(f, "  unresolved:   {}", self.unresolved.len())?;
        writeln!(f, "  write failed: {}", self.write_failed.len())?;
        if !self.declined.is_empty() {
            writeln!(f, "  declined:     {}", self.declined.len())?;
        }
        if self.relations_declined {
            writeln!(f, "  relations:    declined")?;
        } else {
            writeln!(f, "  relations:    {}", self.relations_discovered)?;
        }
        writeln!(f, "  merged:       {} nodes, {} edges", self.nodes_merged, self.edges_merged)?;
        writeln!(f, "  vector index: {}", if self.index_refreshed { "refreshed" } else { "not refreshed" })?;
        writeln!(f, "  estimated:    ${:.4}", self.estimated_usd)?;
        write!(f, "  actual:       {}", self.usage)?;

        for anomaly in &self.anomalies {
            write!(f, "\n  [anomaly] {}: {}", anomaly.table, anomaly.reason)?;
        }
        for (entity, reason) in &self.unresolved {
            write!(f, "\n  [unresolved] {entity}: {reason}")?;
        }
        for (entity, reason) in &self.write_failed {
            write!(f, "\n  [write failed] {entity}: {reason}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_display() {
        let summary = RunSummary {
            seed: 7,
            sampled: 4,
            succeeded: vec![QualifiedName::new("public", "orders")],
            skipped: vec![QualifiedName::new("public", "customers")],
            unresolved: vec![(QualifiedName::new("public", "lines"), "missing stereotype".into())],
            write_failed: vec![(QualifiedName::new("public", "notes"), "timeout".into())],
            ..RunSummary::default()
        };
        assert_eq!(summary.succeeded_count(), 1);
        assert_eq!(summary.skipped_count(), 1);
        assert_eq!(summary.failed_count(), 2);
        assert!(!summary.was_declined());

        let text = summary.to_string();
        assert!(text.contains("seed 7"));
        assert!(text.contains("[unresolved] public.lines: missing stereotype"));
        assert!(text.contains("[write failed] public.notes: timeout"));
        assert!(!text.contains("declined"));
    }

    #[test]
    fn test_declines_are_reported_on_the_summary() {
        let batch = RunSummary { declined: vec![QualifiedName::new("public", "orders")], ..RunSummary::default() };
        assert!(batch.was_declined());

        let relations = RunSummary { relations_declined: true, ..RunSummary::default() };
        assert!(relations.was_declined());
        assert!(relations.to_string().contains("relations:    declined"));
    }
}
