//! Extension points consulted by the DCA engine.
//!
//! Both hooks are synchronous and must not panic. Implementations that need
//! I/O (e.g. sending a chat message) should do it on their own terms and
//! swallow their errors.

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::exchange::Pair;

/// Called when an exchange holds less of the base asset than a strategy
/// wants to spend on one asset.
#[cfg_attr(test, mockall::automock)]
pub trait BalanceNotifier: Send + Sync {
    fn insufficient_balance(&self, exchange: &str, asset: &str, shortfall: Decimal);
}

/// Everything known about an order right before it is placed.
#[derive(Debug, Clone)]
pub struct BuyContext {
    pub strategy: String,
    pub exchange: String,
    pub pair: Pair,
    pub spend: Decimal,
    /// Base asset left on the exchange before this order.
    pub available: Decimal,
}

/// Decides whether an order should be placed now.
#[cfg_attr(test, mockall::automock)]
pub trait BuyTiming: Send + Sync {
    fn should_buy(&self, ctx: &BuyContext) -> bool;
}

/// Default notifier: logs the shortfall.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl BalanceNotifier for LogNotifier {
    fn insufficient_balance(&self, exchange: &str, asset: &str, shortfall: Decimal) {
        warn!(
            "{}: insufficient balance to buy {}, short by {}",
            exchange, asset, shortfall
        );
    }
}

/// Default timing: always buy.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysBuy;

impl BuyTiming for AlwaysBuy {
    fn should_buy(&self, _ctx: &BuyContext) -> bool {
        true
    }
}

/// Skips orders whose spend falls below an exchange minimum, e.g. Binance's
/// 5 USDT notional filter.
#[derive(Debug, Clone, Copy)]
pub struct MinimumSpend {
    pub minimum: Decimal,
}

impl BuyTiming for MinimumSpend {
    fn should_buy(&self, ctx: &BuyContext) -> bool {
        if ctx.spend < self.minimum {
            info!(
                "{}: {} spend {} is below minimum {}, skipping",
                ctx.exchange, ctx.pair, ctx.spend, self.minimum
            );
            return false;
        }
        true
    }
}
