mod engine;
mod report;

pub use engine::DcaEngine;
pub use report::{OrderOutcome, OutcomeStatus, RunReport};

use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpendPlan {
    /// What will actually be spent.
    pub spend: Decimal,
    /// `amount - spend`; zero when the balance covers the full amount.
    pub shortfall: Decimal,
}

/// Caps the configured `amount` at what the balance allows.
pub fn plan_spend(amount: Decimal, available: Decimal) -> SpendPlan {
    let spend = amount.min(available.max(Decimal::ZERO));
    SpendPlan {
        spend,
        shortfall: amount - spend,
    }
}
