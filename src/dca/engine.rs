use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

use crate::config::Strategy;
use crate::exchange::{Exchange, ExchangeError, ExchangeSet, Pair};
use crate::hooks::{AlwaysBuy, BalanceNotifier, BuyContext, BuyTiming, LogNotifier};

use super::report::{OrderOutcome, OutcomeStatus, RunReport};
use super::plan_spend;

/// Base asset already committed by simulated orders, per (exchange, base asset).
type Ledger = HashMap<(String, String), Decimal>;

pub struct DcaEngine {
    strategies: Vec<Strategy>,
    exchanges: ExchangeSet,
    notifier: Box<dyn BalanceNotifier>,
    timing: Box<dyn BuyTiming>,
    dry_run: bool,
}

impl DcaEngine {
    pub fn new(strategies: Vec<Strategy>, exchanges: ExchangeSet) -> Self {
        Self {
            strategies,
            exchanges,
            notifier: Box::new(LogNotifier),
            timing: Box::new(AlwaysBuy),
            dry_run: false,
        }
    }

    pub fn with_notifier(mut self, notifier: Box<dyn BalanceNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_timing(mut self, timing: Box<dyn BuyTiming>) -> Self {
        self.timing = timing;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// One pass over every strategy, exchange and asset. Failures are
    /// recorded in the report and never abort the remaining iterations.
    pub async fn run_once(&self) -> RunReport {
        let mut report = RunReport::default();
        let mut ledger = Ledger::new();

        info!(
            "Running {} strategies across {} exchanges",
            self.strategies.len(),
            self.exchanges.len()
        );

        for strategy in &self.strategies {
            for exchange_id in &strategy.exchanges {
                self.run_on_exchange(strategy, exchange_id, &mut ledger, &mut report)
                    .await;
            }
        }

        report
    }

    async fn run_on_exchange(
        &self,
        strategy: &Strategy,
        exchange_id: &str,
        ledger: &mut Ledger,
        report: &mut RunReport,
    ) {
        let name = strategy.to_string();
        let pairs = strategy.pairs();

        let fail_all = |report: &mut RunReport, error: String| {
            for pair in &pairs {
                report.push(OrderOutcome {
                    strategy: name.clone(),
                    exchange: exchange_id.to_string(),
                    pair: pair.clone(),
                    status: OutcomeStatus::Failed {
                        error: error.clone(),
                    },
                });
            }
        };

        let exchange = match self.exchanges.get(exchange_id) {
            Ok(exchange) => exchange,
            Err(e) => {
                error!("[{}] {}: {}", name, exchange_id, e);
                fail_all(report, e.to_string());
                return;
            }
        };

        let mut available = match exchange.free_balance(&strategy.base_asset).await {
            Ok(balance) => balance,
            Err(e) => {
                error!(
                    "[{}] {}: failed to fetch {} balance: {}",
                    name, exchange_id, strategy.base_asset, e
                );
                fail_all(report, e.to_string());
                return;
            }
        };

        let ledger_key = (exchange_id.to_string(), strategy.base_asset.clone());
        if self.dry_run {
            if let Some(committed) = ledger.get(&ledger_key) {
                available -= *committed;
            }
        }

        info!(
            "[{}] {}: {} {} available for {:?}",
            name,
            exchange_id,
            available,
            strategy.base_asset,
            pairs.iter().map(Pair::to_string).collect::<Vec<_>>()
        );

        for pair in &pairs {
            let status = self
                .buy(strategy, &name, exchange, pair, &mut available)
                .await;

            if let OutcomeStatus::Simulated { spend } = &status {
                *ledger.entry(ledger_key.clone()).or_default() += *spend;
            }

            report.push(OrderOutcome {
                strategy: name.clone(),
                exchange: exchange_id.to_string(),
                pair: pair.clone(),
                status,
            });
        }
    }

    async fn buy(
        &self,
        strategy: &Strategy,
        name: &str,
        exchange: &dyn Exchange,
        pair: &Pair,
        available: &mut Decimal,
    ) -> OutcomeStatus {
        let plan = plan_spend(strategy.amount, *available);

        if plan.shortfall > Decimal::ZERO {
            self.notifier
                .insufficient_balance(exchange.id(), &pair.asset, plan.shortfall);
        }

        if plan.spend.is_zero() {
            return OutcomeStatus::Skipped {
                reason: format!("no {} available", pair.base),
            };
        }

        let ctx = BuyContext {
            strategy: name.to_string(),
            exchange: exchange.id().to_string(),
            pair: pair.clone(),
            spend: plan.spend,
            available: *available,
        };

        if !self.timing.should_buy(&ctx) {
            debug!("[{}] {} {}: buy timing declined", name, exchange.id(), pair);
            return OutcomeStatus::Skipped {
                reason: "buy timing declined".to_string(),
            };
        }

        if self.dry_run {
            info!(
                "[DRY RUN] [{}] Would BUY {} on {} with {} {}",
                name,
                pair,
                exchange.id(),
                plan.spend,
                pair.base
            );
            *available -= plan.spend;
            return OutcomeStatus::Simulated { spend: plan.spend };
        }

        info!(
            "[{}] Placing BUY order: {} on {} with {} {}",
            name,
            pair,
            exchange.id(),
            plan.spend,
            pair.base
        );

        match exchange.market_buy(pair, plan.spend).await {
            Ok(receipt) => {
                info!(
                    "Order placed successfully: ID={}, Status={}",
                    receipt.order_id, receipt.status
                );
                *available -= receipt.spend;
                OutcomeStatus::Placed {
                    order_id: receipt.order_id,
                    spend: receipt.spend,
                }
            }
            Err(ExchangeError::InsufficientFunds(msg)) => {
                warn!(
                    "[{}] {} rejected {} for insufficient funds: {}",
                    name,
                    exchange.id(),
                    pair,
                    msg
                );
                self.notifier
                    .insufficient_balance(exchange.id(), &pair.asset, plan.spend);
                // The venue knows better than our balance read.
                *available = Decimal::ZERO;
                OutcomeStatus::Failed {
                    error: ExchangeError::InsufficientFunds(msg).to_string(),
                }
            }
            Err(e) => {
                error!("[{}] Failed to place order for {}: {}", name, pair, e);
                OutcomeStatus::Failed {
                    error: e.to_string(),
                }
            }
        }
    }
}
