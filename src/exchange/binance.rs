use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, StatusCode};
use rust_decimal::{Decimal, RoundingStrategy};
use sha2::Sha256;
use tracing::{debug, instrument};

use crate::config::{Environment, ExchangeCredentials};

use super::models::*;
use super::{Exchange, ExchangeError, OrderReceipt, Pair};

type HmacSha256 = Hmac<Sha256>;

const LIVE_URL: &str = "https://api.binance.com";
const TESTNET_URL: &str = "https://testnet.binance.vision";

pub struct BinanceClient {
    client: Client,
    credentials: ExchangeCredentials,
    environment: Environment,
    base_url: String,
}

impl BinanceClient {
    pub fn new(
        credentials: ExchangeCredentials,
        environment: Environment,
    ) -> Result<Self, ExchangeError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            credentials,
            environment,
            base_url: Self::base_url_for(environment).to_string(),
        })
    }

    pub fn base_url_for(environment: Environment) -> &'static str {
        match environment {
            Environment::Sandbox => TESTNET_URL,
            Environment::Live => LIVE_URL,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `BTC/USDT` -> `BTCUSDT`
    pub fn symbol(pair: &Pair) -> String {
        format!("{}{}", pair.asset, pair.base)
    }

    fn timestamp() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn sign(secret: &str, query: &str) -> Result<String, ExchangeError> {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| ExchangeError::InvalidCredentials(e.to_string()))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn build_signed_query(&self, params: &[(&str, String)]) -> Result<String, ExchangeError> {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())))
            .append_pair("timestamp", &Self::timestamp().to_string())
            .finish();

        let signature = Self::sign(self.credentials.secret(), &query)?;
        Ok(format!("{}&signature={}", query, signature))
    }

    async fn read_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ExchangeError> {
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(classify_error(status, &text));
        }

        serde_json::from_str(&text).map_err(|e| ExchangeError::Parse(e.to_string()))
    }

    #[instrument(skip(self))]
    pub async fn get_account_info(&self) -> Result<AccountInfo, ExchangeError> {
        let query = self.build_signed_query(&[])?;
        let url = format!("{}/api/v3/account?{}", self.base_url, query);

        debug!("Fetching account info");

        let response = self
            .client
            .get(&url)
            .header("X-MBX-APIKEY", self.credentials.api_key())
            .send()
            .await?;

        Self::read_response(response).await
    }

    #[instrument(skip(self))]
    pub async fn place_order(&self, order: &OrderRequest) -> Result<OrderResponse, ExchangeError> {
        let query = self.build_signed_query(&order.params())?;
        let url = format!("{}/api/v3/order?{}", self.base_url, query);

        debug!("Placing order: {:?}", order);

        let response = self
            .client
            .post(&url)
            .header("X-MBX-APIKEY", self.credentials.api_key())
            .send()
            .await?;

        Self::read_response(response).await
    }
}

#[async_trait]
impl Exchange for BinanceClient {
    fn id(&self) -> &'static str {
        "binance"
    }

    fn environment(&self) -> Environment {
        self.environment
    }

    async fn free_balance(&self, asset: &str) -> Result<Decimal, ExchangeError> {
        let account = self.get_account_info().await?;
        if !account.can_trade {
            return Err(ExchangeError::Authentication(
                "account is not permitted to trade".to_string(),
            ));
        }
        Ok(account.free(asset))
    }

    async fn market_buy(&self, pair: &Pair, spend: Decimal) -> Result<OrderReceipt, ExchangeError> {
        let spend = spend.round_dp_with_strategy(8, RoundingStrategy::ToZero);
        let order = OrderRequest::market_buy(&Self::symbol(pair), spend);
        let response = self.place_order(&order).await?;

        Ok(receipt_from_response(pair, spend, response))
    }
}

/// A market order can fill partially (e.g. `EXPIRED` on thin books), so the
/// reported quote quantity wins over the requested one.
fn receipt_from_response(pair: &Pair, requested: Decimal, response: OrderResponse) -> OrderReceipt {
    OrderReceipt {
        order_id: response.order_id.to_string(),
        pair: pair.clone(),
        spend: response.quote_spent().unwrap_or(requested),
        status: response.status,
    }
}

fn classify_error(status: StatusCode, body: &str) -> ExchangeError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
        return ExchangeError::RateLimited(body.to_string());
    }

    let Ok(api_error) = serde_json::from_str::<BinanceApiError>(body) else {
        return ExchangeError::Api {
            status: status.as_u16(),
            message: body.to_string(),
        };
    };

    match api_error.code {
        -2010 if api_error.msg.to_lowercase().contains("insufficient balance") => {
            ExchangeError::InsufficientFunds(api_error.msg)
        }
        -1022 | -2014 | -2015 => ExchangeError::Authentication(api_error.msg),
        _ if status == StatusCode::UNAUTHORIZED => ExchangeError::Authentication(api_error.msg),
        code => ExchangeError::Api {
            status: status.as_u16(),
            message: format!("{} ({})", api_error.msg, code),
        },
    }
}
