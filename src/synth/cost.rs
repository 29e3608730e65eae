//! Cost estimation and usage tracking.
//!
//! Estimates count prompt tokens at roughly four characters per token, add
//! the configured completion estimate per call, and price both from
//! `[pricing]` (USD per million tokens).

use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::PricingConfig;

/// Token usage of one or more calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self { input_tokens, output_tokens }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Rough token count: ~4 characters per token.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

fn price(tokens: u64, per_million: f64) -> f64 {
    tokens as f64 / 1_000_000.0 * per_million
}

/// Estimated spend of one batch of model calls, shown at the confirmation
/// gate: synthesis of `entities`, or confirmation of `relation_checks`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub entities: usize,
    #[serde(default)]
    pub relation_checks: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub embedding_tokens: u64,
    pub usd: f64,
}

impl CostEstimate {
    /// Estimate for one synthesis call per prompt plus one embedding each.
    pub fn for_prompts<'a>(prompts: impl IntoIterator<Item = &'a str>, pricing: &PricingConfig) -> Self {
        let mut estimate = CostEstimate::default();
        for prompt in prompts {
            estimate.entities += 1;
            estimate.input_tokens += estimate_tokens(prompt);
            estimate.output_tokens += pricing.estimated_output_tokens;
            // The embedded summary is part of the completion.
            estimate.embedding_tokens += pricing.estimated_output_tokens;
        }
        estimate.usd = price(estimate.input_tokens, pricing.synthesis_input)
            + price(estimate.output_tokens, pricing.synthesis_output)
            + price(estimate.embedding_tokens, pricing.embedding_input);
        estimate
    }

    /// Estimate for one confirmation call per prompt.
    pub fn for_confirmations<'a>(prompts: impl IntoIterator<Item = &'a str>, pricing: &PricingConfig) -> Self {
        let mut estimate = CostEstimate::default();
        for prompt in prompts {
            estimate.relation_checks += 1;
            estimate.input_tokens += estimate_tokens(prompt);
            estimate.output_tokens += pricing.estimated_output_tokens;
        }
        estimate.usd = price(estimate.input_tokens, pricing.confirmation_input)
            + price(estimate.output_tokens, pricing.confirmation_output);
        estimate
    }
}

impl fmt::Display for CostEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.relation_checks > 0 {
            return write!(
                f,
                "{} relation checks, ~{} input + ~{} output tokens, estimated ${:.4}",
                self.relation_checks, self.input_tokens, self.output_tokens, self.usd
            );
        }
        write!(
            f,
            "{} entities, ~{} input + ~{} output tokens, ~{} embedding tokens, estimated ${:.4}",
            self.entities, self.input_tokens, self.output_tokens, self.embedding_tokens, self.usd
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageKind {
    Synthesis,
    Embedding,
    Confirmation,
}

/// Actual usage reported by the service over a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageReport {
    pub synthesis: TokenUsage,
    pub embedding_tokens: u64,
    pub confirmation: TokenUsage,
    pub calls: u64,
    pub usd: f64,
}

impl fmt::Display for UsageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} calls, {} synthesis tokens, {} embedding tokens, {} confirmation tokens, ${:.4}",
            self.calls,
            self.synthesis.total(),
            self.embedding_tokens,
            self.confirmation.total(),
            self.usd
        )
    }
}

/// Thread-safe accumulator shared by every worker.
#[derive(Debug)]
pub struct UsageTracker {
    pricing: PricingConfig,
    report: Mutex<UsageReport>,
}

impl UsageTracker {
    pub fn new(pricing: PricingConfig) -> Self {
        Self { pricing, report: Mutex::new(UsageReport::default()) }
    }

    pub fn record(&self, kind: UsageKind, usage: TokenUsage) {
        let p = &self.pricing;
        let cost = match kind {
            UsageKind::Synthesis => price(usage.input_tokens, p.synthesis_input) + price(usage.output_tokens, p.synthesis_output),
            UsageKind::Embedding => price(usage.input_tokens, p.embedding_input),
            UsageKind::Confirmation => {
                price(usage.input_tokens, p.confirmation_input) + price(usage.output_tokens, p.confirmation_output)
            }
        };
        let mut report = self.report.lock();
        match kind {
            UsageKind::Synthesis => report.synthesis.add(usage),
            UsageKind::Embedding => report.embedding_tokens += usage.input_tokens,
            UsageKind::Confirmation => report.confirmation.add(usage),
        }
        report.calls += 1;
        report.usd += cost;
    }

    pub fn snapshot(&self) -> UsageReport {
        self.report.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_batch_estimate() {
        let pricing = PricingConfig {
            synthesis_input: 1.0,
            synthesis_output: 2.0,
            embedding_input: 0.5,
            estimated_output_tokens: 100,
            ..PricingConfig::default()
        };
        let prompt = "x".repeat(4000);
        let est = CostEstimate::for_prompts([prompt.as_str(), prompt.as_str()], &pricing);
        assert_eq!(est.entities, 2);
        assert_eq!(est.input_tokens, 2000);
        assert_eq!(est.output_tokens, 200);
        let expected = 2000.0 / 1e6 * 1.0 + 200.0 / 1e6 * 2.0 + 200.0 / 1e6 * 0.5;
        assert!((est.usd - expected).abs() < 1e-12);
        assert!(est.to_string().contains("2 entities"));
    }

    #[test]
    fn test_confirmation_estimate_uses_confirmation_prices() {
        let pricing = PricingConfig {
            confirmation_input: 4.0,
            confirmation_output: 8.0,
            estimated_output_tokens: 50,
            ..PricingConfig::default()
        };
        let prompt = "y".repeat(400);
        let est = CostEstimate::for_confirmations([prompt.as_str()], &pricing);
        assert_eq!(est.relation_checks, 1);
        assert_eq!(est.entities, 0);
        assert_eq!(est.embedding_tokens, 0);
        let expected = 100.0 / 1e6 * 4.0 + 50.0 / 1e6 * 8.0;
        assert!((est.usd - expected).abs() < 1e-12);
        assert!(est.to_string().starts_with("1 relation checks"));
    }

    #[test]
    fn test_usage_tracker() {
        let tracker = UsageTracker::new(PricingConfig::default());
        tracker.record(UsageKind::Synthesis, TokenUsage::new(1000, 100));
        tracker.record(UsageKind::Embedding, TokenUsage::new(50, 0));
        let report = tracker.snapshot();
        assert_eq!(report.calls, 2);
        assert_eq!(report.synthesis.total(), 1100);
        assert_eq!(report.embedding_tokens, 50);
        assert!(report.usd > 0.0);
    }
}
