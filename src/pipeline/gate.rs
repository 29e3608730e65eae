//! Cost confirmation gate: the only cancellation point before AI spend.

use std::sync::Arc;

use async_trait::async_trait;

use crate::synth::CostEstimate;

/// Decides whether a batch of model calls may run: each synthesis batch,
/// then the relation checks. Called before any call of that batch.
#[async_trait]
pub trait ConfirmationGate: Send + Sync {
    async fn confirm(&self, estimate: &CostEstimate) -> bool;
}

#[async_trait]
impl<T: ConfirmationGate + ?Sized> ConfirmationGate for Arc<T> {
    async fn confirm(&self, estimate: &CostEstimate) -> bool {
        (**self).confirm(estimate).await
    }
}

/// Approves every batch (unattended runs, `--yes`).
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl ConfirmationGate for AutoApprove {
    async fn confirm(&self, _estimate: &CostEstimate) -> bool {
        true
    }
}

/// Declines every batch.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoDecline;

#[async_trait]
impl ConfirmationGate for AutoDecline {
    async fn confirm(&self, _estimate: &CostEstimate) -> bool {
        false
    }
}

/// Approves while the estimate stays within a spend ceiling.
#[derive(Debug, Clone, Copy)]
pub struct BudgetGate {
    pub max_usd: f64,
}

#[async_trait]
impl ConfirmationGate for BudgetGate {
    async fn confirm(&self, estimate: &CostEstimate) -> bool {
        estimate.usd <= self.max_usd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_gates() {
        let estimate = CostEstimate { entities: 2, usd: 0.5, ..CostEstimate::default() };
        assert!(AutoApprove.confirm(&estimate).await);
        assert!(!AutoDecline.confirm(&estimate).await);
        assert!(BudgetGate { max_usd: 1.0 }.confirm(&estimate).await);
        assert!(!BudgetGate { max_usd: 0.1 }.confirm(&estimate).await);
    }
}
