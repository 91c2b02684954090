use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    pub can_trade: bool,
    pub balances: Vec<Balance>,
}

impl AccountInfo {
    pub fn free(&self, asset: &str) -> Decimal {
        self.balances
            .iter()
            .find(|b| b.asset.eq_ignore_ascii_case(asset))
            .map(Balance::free_decimal)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub free: String,
}

impl Balance {
    pub fn free_decimal(&self) -> Decimal {
        self.free.parse().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    Buy,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
        }
    }
}

/// Binance order that spends a fixed amount of the quote currency.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quote_order_qty: Decimal,
}

impl OrderRequest {
    pub fn market_buy(symbol: &str, quote_order_qty: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            quote_order_qty,
        }
    }

    pub fn params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("symbol", self.symbol.clone()),
            ("side", self.side.to_string()),
            ("type", self.order_type.to_string()),
            ("quoteOrderQty", self.quote_order_qty.normalize().to_string()),
        ]
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub symbol: String,
    pub order_id: u64,
    pub client_order_id: String,
    pub transact_time: u64,
    pub executed_qty: String,
    #[serde(default)]
    pub cummulative_quote_qty: Option<String>,
    pub status: String,
}

impl OrderResponse {
    /// Quote currency actually spent, when Binance reports it.
    pub fn quote_spent(&self) -> Option<Decimal> {
        self.cummulative_quote_qty
            .as_deref()
            .and_then(|qty| qty.parse().ok())
    }
}

/// Error body returned by Binance on non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct BinanceApiError {
    pub code: i64,
    pub msg: String,
}

/// Every Kraken REST response is wrapped in `{"error": [...], "result": ...}`.
#[derive(Debug, Clone, Deserialize)]
pub struct KrakenResponse<T> {
    #[serde(default)]
    pub error: Vec<String>,
    pub result: Option<T>,
}

/// One entry of `BalanceEx`. `hold_trade` is reserved by open orders.
#[derive(Debug, Clone, Deserialize)]
pub struct KrakenExtendedBalance {
    pub balance: String,
    #[serde(default)]
    pub hold_trade: Option<String>,
}

impl KrakenExtendedBalance {
    pub fn free(&self) -> Decimal {
        let balance: Decimal = self.balance.parse().unwrap_or_default();
        let held: Decimal = self
            .hold_trade
            .as_deref()
            .and_then(|h| h.parse().ok())
            .unwrap_or_default();
        (balance - held).max(Decimal::ZERO)
    }
}

pub type KrakenBalances = HashMap<String, KrakenExtendedBalance>;

#[derive(Debug, Clone, Deserialize)]
pub struct KrakenTicker {
    /// Last trade closed: `[price, lot volume]`.
    pub c: Vec<String>,
}

impl KrakenTicker {
    pub fn last_price(&self) -> Option<Decimal> {
        self.c.first().and_then(|p| p.parse().ok())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct KrakenAddOrder {
    pub descr: KrakenOrderDescription,
    #[serde(default)]
    pub txid: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KrakenOrderDescription {
    pub order: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_account_free_balance() {
        let json = r#"{
            "makerCommission": 10,
            "canTrade": true,
            "balances": [
                {"asset": "BTC", "free": "0.5", "locked": "0.1"},
                {"asset": "USDT", "free": "120.25", "locked": "0.00"}
            ]
        }"#;
        let account: AccountInfo = serde_json::from_str(json).unwrap();
        assert_eq!(account.free("usdt"), dec!(120.25));
        assert_eq!(account.free("BTC"), dec!(0.5));
        assert_eq!(account.free("ETH"), Decimal::ZERO);
    }

    #[test]
    fn test_order_params() {
        let order = OrderRequest::market_buy("BTCUSDT", dec!(50.00));
        let params = order.params();
        assert_eq!(params[1], ("side", "BUY".to_string()));
        assert_eq!(params[2], ("type", "MARKET".to_string()));
        assert_eq!(params[3], ("quoteOrderQty", "50".to_string()));
    }

    #[test]
    fn test_quote_spent_prefers_reported_fill() {
        let json = r#"{
            "symbol": "BTCUSDT",
            "orderId": 28,
            "clientOrderId": "6gCrw2kRUAF9CvJDGP16IP",
            "transactTime": 1507725176595,
            "executedQty": "0.00040000",
            "cummulativeQuoteQty": "19.99800000",
            "status": "EXPIRED"
        }"#;
        let response: OrderResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.quote_spent(), Some(dec!(19.998)));

        let json = r#"{
            "symbol": "BTCUSDT",
            "orderId": 29,
            "clientOrderId": "x",
            "transactTime": 1507725176595,
            "executedQty": "0",
            "status": "NEW"
        }"#;
        let response: OrderResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.quote_spent(), None);
    }

    #[test]
    fn test_kraken_extended_balance_subtracts_holds() {
        let json = r#"{"error": [], "result": {
            "ZUSD": {"balance": "100.0000", "hold_trade": "60.0000"},
            "XXBT": {"balance": "0.5"}
        }}"#;
        let response: KrakenResponse<KrakenBalances> = serde_json::from_str(json).unwrap();
        let balances = response.result.unwrap();
        assert_eq!(balances["ZUSD"].free(), dec!(40));
        assert_eq!(balances["XXBT"].free(), dec!(0.5));
    }

    #[test]
    fn test_kraken_envelope() {
        let json = r#"{"error": [], "result": {"XXBTZUSD": {"a": ["1"], "c": ["30000.1", "0.01"]}}}"#;
        let response: KrakenResponse<HashMap<String, KrakenTicker>> =
            serde_json::from_str(json).unwrap();
        let ticker = response.result.unwrap().remove("XXBTZUSD").unwrap();
        assert_eq!(ticker.last_price(), Some(dec!(30000.1)));
    }
}
