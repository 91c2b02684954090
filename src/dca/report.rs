use rust_decimal::Decimal;
use std::fmt;
use tracing::{error, info};

use crate::exchange::Pair;

#[derive(Debug, Clone, PartialEq)]
pub enum OutcomeStatus {
    Placed { order_id: String, spend: Decimal },
    Simulated { spend: Decimal },
    Skipped { reason: String },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderOutcome {
    pub strategy: String,
    pub exchange: String,
    pub pair: Pair,
    pub status: OutcomeStatus,
}

impl OrderOutcome {
    pub fn spend(&self) -> Decimal {
        match &self.status {
            OutcomeStatus::Placed { spend, .. } | OutcomeStatus::Simulated { spend } => *spend,
            OutcomeStatus::Skipped { .. } | OutcomeStatus::Failed { .. } => Decimal::ZERO,
        }
    }
}

impl fmt::Display for OrderOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} {}: ", self.strategy, self.exchange, self.pair)?;
        match &self.status {
            OutcomeStatus::Placed { order_id, spend } => {
                write!(f, "bought with {} {} (order {})", spend, self.pair.base, order_id)
            }
            OutcomeStatus::Simulated { spend } => {
                write!(f, "would buy with {} {}", spend, self.pair.base)
            }
            OutcomeStatus::Skipped { reason } => write!(f, "skipped ({})", reason),
            OutcomeStatus::Failed { error } => write!(f, "failed: {}", error),
        }
    }
}

/// Everything that happened during one pass over the strategies.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    outcomes: Vec<OrderOutcome>,
}

impl RunReport {
    pub fn push(&mut self, outcome: OrderOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn outcomes(&self) -> &[OrderOutcome] {
        &self.outcomes
    }

    pub fn placed(&self) -> usize {
        self.count(|s| matches!(s, OutcomeStatus::Placed { .. }))
    }

    pub fn simulated(&self) -> usize {
        self.count(|s| matches!(s, OutcomeStatus::Simulated { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, OutcomeStatus::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, OutcomeStatus::Failed { .. }))
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    /// Base asset spent (or simulated) on one exchange.
    pub fn total_spent(&self, exchange: &str, base: &str) -> Decimal {
        self.outcomes
            .iter()
            .filter(|o| o.exchange == exchange && o.pair.base == base)
            .map(OrderOutcome::spend)
            .sum()
    }

    pub fn log_summary(&self) {
        for outcome in &self.outcomes {
            match outcome.status {
                OutcomeStatus::Failed { .. } => error!("{}", outcome),
                _ => info!("{}", outcome),
            }
        }
        info!(
            "Run finished: {} placed, {} simulated, {} skipped, {} failed",
            self.placed(),
            self.simulated(),
            self.skipped(),
            self.failed()
        );
    }

    fn count(&self, predicate: impl Fn(&OutcomeStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| predicate(&o.status)).count()
    }
}
