use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::{Decimal, RoundingStrategy};
use sha2::{Digest, Sha256, Sha512};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::{debug, instrument};

use crate::config::{Environment, ExchangeCredentials};

use super::models::*;
use super::{Exchange, ExchangeError, OrderReceipt, Pair};

type HmacSha512 = Hmac<Sha512>;

const API_URL: &str = "https://api.kraken.com";

/// Kraken spot client. Kraken offers no spot sandbox, so only live mode is
/// accepted.
pub struct KrakenClient {
    client: Client,
    credentials: ExchangeCredentials,
    secret: Vec<u8>,
    base_url: String,
    last_nonce: AtomicI64,
}

impl KrakenClient {
    pub fn new(
        credentials: ExchangeCredentials,
        environment: Environment,
    ) -> Result<Self, ExchangeError> {
        if environment == Environment::Sandbox {
            return Err(ExchangeError::SandboxUnsupported("kraken".to_string()));
        }

        let secret = base64::engine::general_purpose::STANDARD
            .decode(credentials.secret())
            .map_err(|e| ExchangeError::InvalidCredentials(format!("secret is not base64: {}", e)))?;

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            credentials,
            secret,
            base_url: API_URL.to_string(),
            last_nonce: AtomicI64::new(0),
        })
    }

    /// Kraken's own codes for a few assets.
    pub fn asset_code(asset: &str) -> String {
        match asset.to_uppercase().as_str() {
            "BTC" => "XBT".to_string(),
            "DOGE" => "XDG".to_string(),
            other => other.to_string(),
        }
    }

    /// `BTC/USDT` -> `XBTUSDT`
    pub fn pair_name(pair: &Pair) -> String {
        format!(
            "{}{}",
            Self::asset_code(&pair.asset),
            Self::asset_code(&pair.base)
        )
    }

    /// Strictly increasing millisecond nonce.
    fn next_nonce(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let mut last = self.last_nonce.load(Ordering::SeqCst);
        loop {
            let next = now.max(last + 1);
            match self
                .last_nonce
                .compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(current) => last = current,
            }
        }
    }

    fn sign(secret: &[u8], path: &str, nonce: &str, body: &str) -> Result<String, ExchangeError> {
        let mut sha = Sha256::new();
        sha.update(nonce.as_bytes());
        sha.update(body.as_bytes());
        let digest = sha.finalize();

        let mut mac = HmacSha512::new_from_slice(secret)
            .map_err(|e| ExchangeError::InvalidCredentials(e.to_string()))?;
        mac.update(path.as_bytes());
        mac.update(&digest);

        Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
    }

    fn unwrap_result<T>(response: KrakenResponse<T>) -> Result<T, ExchangeError> {
        if !response.error.is_empty() {
            return Err(classify_errors(&response.error));
        }
        response
            .result
            .ok_or_else(|| ExchangeError::Parse("response has no result".to_string()))
    }

    async fn read_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ExchangeError> {
        let status = response.status();
        let text = response.text().await?;

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ExchangeError::RateLimited(text));
        }

        let envelope: KrakenResponse<T> = serde_json::from_str(&text).map_err(|e| {
            if status.is_success() {
                ExchangeError::Parse(e.to_string())
            } else {
                ExchangeError::Api {
                    status: status.as_u16(),
                    message: text.clone(),
                }
            }
        })?;

        Self::unwrap_result(envelope)
    }

    async fn private<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        let path = format!("/0/private/{}", method);
        let nonce = self.next_nonce().to_string();

        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("nonce", &nonce)
            .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())))
            .finish();

        let signature = Self::sign(&self.secret, &path, &nonce, &body)?;

        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("API-Key", self.credentials.api_key())
            .header("API-Sign", signature)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;

        Self::read_response(response).await
    }

    #[instrument(skip(self))]
    pub async fn get_balances(&self) -> Result<KrakenBalances, ExchangeError> {
        debug!("Fetching extended balances");
        self.private("BalanceEx", &[]).await
    }

    #[instrument(skip(self))]
    pub async fn get_ticker_price(&self, pair_name: &str) -> Result<Decimal, ExchangeError> {
        let url = format!("{}/0/public/Ticker?pair={}", self.base_url, pair_name);

        debug!("Fetching ticker price for {}", pair_name);

        let response = self.client.get(&url).send().await?;
        let tickers: HashMap<String, KrakenTicker> = Self::read_response(response).await?;

        // Result is keyed by Kraken's canonical pair name, which may differ
        // from the requested alias (XBTUSD -> XXBTZUSD).
        tickers
            .values()
            .next()
            .and_then(KrakenTicker::last_price)
            .ok_or_else(|| ExchangeError::Parse(format!("no ticker price for {}", pair_name)))
    }

    #[instrument(skip(self))]
    pub async fn add_market_buy(
        &self,
        pair_name: &str,
        volume: Decimal,
    ) -> Result<KrakenAddOrder, ExchangeError> {
        let params = [
            ("ordertype", "market".to_string()),
            ("type", "buy".to_string()),
            ("volume", volume.normalize().to_string()),
            ("pair", pair_name.to_string()),
        ];

        debug!("Placing market buy of {} {}", volume, pair_name);

        self.private("AddOrder", &params).await
    }
}

#[async_trait]
impl Exchange for KrakenClient {
    fn id(&self) -> &'static str {
        "kraken"
    }

    fn environment(&self) -> Environment {
        Environment::Live
    }

    async fn free_balance(&self, asset: &str) -> Result<Decimal, ExchangeError> {
        let balances = self.get_balances().await?;
        Ok(lookup_balance(&balances, asset))
    }

    async fn market_buy(&self, pair: &Pair, spend: Decimal) -> Result<OrderReceipt, ExchangeError> {
        let pair_name = Self::pair_name(pair);
        let price = self.get_ticker_price(&pair_name).await?;
        let volume = volume_for_spend(spend, price).ok_or_else(|| {
            ExchangeError::OrderTooSmall(format!(
                "{} {} buys no {} at {}",
                spend, pair.base, pair.asset, price
            ))
        })?;

        let order = self.add_market_buy(&pair_name, volume).await?;

        Ok(OrderReceipt {
            order_id: order.txid.join(","),
            pair: pair.clone(),
            spend,
            status: order.descr.order,
        })
    }
}

/// Converts a spend into an 8 dp volume, rounded down. `None` when nothing
/// can be bought.
fn volume_for_spend(spend: Decimal, price: Decimal) -> Option<Decimal> {
    if price <= Decimal::ZERO {
        return None;
    }
    let volume = (spend / price).round_dp_with_strategy(8, RoundingStrategy::ToZero);
    (volume > Decimal::ZERO).then_some(volume)
}

/// Free balance net of open-order holds. Kraken reports legacy assets with
/// an `X` (crypto) or `Z` (fiat) prefix.
fn lookup_balance(balances: &KrakenBalances, asset: &str) -> Decimal {
    let code = KrakenClient::asset_code(asset);
    [code.clone(), format!("X{}", code), format!("Z{}", code)]
        .iter()
        .find_map(|key| balances.get(key))
        .map(KrakenExtendedBalance::free)
        .unwrap_or_default()
}

fn classify_errors(errors: &[String]) -> ExchangeError {
    let message = errors.join("; ");
    let has = |needle: &str| errors.iter().any(|e| e.contains(needle));

    if has("Insufficient funds") {
        ExchangeError::InsufficientFunds(message)
    } else if has("Rate limit exceeded") || has("Too many requests") {
        ExchangeError::RateLimited(message)
    } else if has("Invalid key") || has("Invalid signature") || has("Permission denied") {
        ExchangeError::Authentication(message)
    } else {
        ExchangeError::Api {
            status: 200,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const DOC_SECRET: &str =
        "kQH5HW/8p1uGOVjbgWA7FunAmGO8lsSUXNsu3eow76sz84Q18fWxnyRzBHCd3pd5nE9qa99HAZtuZuj6F1huXg==";

    #[test]
    fn test_sandbox_rejected() {
        let creds = ExchangeCredentials::new("key", DOC_SECRET);
        let result = KrakenClient::new(creds, Environment::Sandbox);
        assert!(matches!(result, Err(ExchangeError::SandboxUnsupported(_))));
    }

    #[test]
    fn test_secret_must_be_base64() {
        let creds = ExchangeCredentials::new("key", "not base64!");
        let result = KrakenClient::new(creds, Environment::Live);
        assert!(matches!(result, Err(ExchangeError::InvalidCredentials(_))));
    }

    #[test]
    fn test_signature_matches_documented_example() {
        let secret = base64::engine::general_purpose::STANDARD
            .decode(DOC_SECRET)
            .unwrap();
        let nonce = "1616492376594";
        let body = "nonce=1616492376594&ordertype=limit&pair=XBTUSD&price=37500&type=buy&volume=1.25";
        assert_eq!(
            KrakenClient::sign(&secret, "/0/private/AddOrder", nonce, body).unwrap(),
            "4/dpxb3iT4tp/ZCVEwSnEsLxx0bqyhLpdfOpc6fn7OR8+UClSV5n9E6aSS8MPtnRfp32bAb0nmbRn6H8ndwLUQ=="
        );
    }

    #[test]
    fn test_pair_name() {
        assert_eq!(KrakenClient::pair_name(&Pair::new("btc", "usdt")), "XBTUSDT");
        assert_eq!(KrakenClient::pair_name(&Pair::new("ETH", "EUR")), "ETHEUR");
    }

    #[test]
    fn test_nonce_is_strictly_increasing() {
        let client =
            KrakenClient::new(ExchangeCredentials::new("key", DOC_SECRET), Environment::Live)
                .unwrap();
        let first = client.next_nonce();
        let second = client.next_nonce();
        assert!(second > first);
    }

    fn extended(balance: &str, hold_trade: Option<&str>) -> KrakenExtendedBalance {
        KrakenExtendedBalance {
            balance: balance.to_string(),
            hold_trade: hold_trade.map(str::to_string),
        }
    }

    #[test]
    fn test_lookup_balance_prefixes() {
        let balances: KrakenBalances = [
            ("XXBT".to_string(), extended("0.25", None)),
            ("ZUSD".to_string(), extended("100.5", Some("0"))),
            ("USDT".to_string(), extended("42", None)),
        ]
        .into_iter()
        .collect();

        assert_eq!(lookup_balance(&balances, "BTC"), dec!(0.25));
        assert_eq!(lookup_balance(&balances, "usd"), dec!(100.5));
        assert_eq!(lookup_balance(&balances, "USDT"), dec!(42));
        assert_eq!(lookup_balance(&balances, "ETH"), Decimal::ZERO);
    }

    #[test]
    fn test_lookup_balance_excludes_open_order_holds() {
        // 60 USD reserved by a resting limit order is not spendable.
        let balances: KrakenBalances = [("ZUSD".to_string(), extended("100", Some("60")))]
            .into_iter()
            .collect();

        let available = lookup_balance(&balances, "USD");
        assert_eq!(available, dec!(40));

        let first = crate::dca::plan_spend(dec!(50), available);
        assert_eq!(first.spend, dec!(40));
        assert_eq!(first.shortfall, dec!(10));
    }

    #[test]
    fn test_volume_for_spend() {
        assert_eq!(volume_for_spend(dec!(50), dec!(25000)), Some(dec!(0.002)));
        assert_eq!(
            volume_for_spend(dec!(10), dec!(3)),
            Some(dec!(3.33333333))
        );
        assert_eq!(volume_for_spend(dec!(0.0000001), dec!(50000)), None);
        assert_eq!(volume_for_spend(dec!(10), Decimal::ZERO), None);
    }

    #[test]
    fn test_classify_errors() {
        assert!(matches!(
            classify_errors(&["EOrder:Insufficient funds".to_string()]),
            ExchangeError::InsufficientFunds(_)
        ));
        assert!(matches!(
            classify_errors(&["EAPI:Invalid key".to_string()]),
            ExchangeError::Authentication(_)
        ));
        assert!(matches!(
            classify_errors(&["EAPI:Rate limit exceeded".to_string()]),
            ExchangeError::RateLimited(_)
        ));
        assert!(matches!(
            classify_errors(&["EQuery:Unknown asset pair".to_string()]),
            ExchangeError::Api { .. }
        ));
    }

    #[test]
    fn test_unwrap_result_surfaces_errors() {
        let json = r#"{"error": ["EOrder:Insufficient funds"]}"#;
        let response: KrakenResponse<KrakenAddOrder> = serde_json::from_str(json).unwrap();
        assert!(matches!(
            KrakenClient::unwrap_result(response),
            Err(ExchangeError::InsufficientFunds(_))
        ));

        let json = r#"{"error": [], "result": {"descr": {"order": "buy 0.002 XBTUSDT @ market"}, "txid": ["OABC-123"]}}"#;
        let response: KrakenResponse<KrakenAddOrder> = serde_json::from_str(json).unwrap();
        let order = KrakenClient::unwrap_result(response).unwrap();
        assert_eq!(order.txid, vec!["OABC-123"]);
    }
}
