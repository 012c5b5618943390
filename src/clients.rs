use crate::config::{PolymarketCredentials, PolymarketSettings, PredictFunCredentials, PredictFunSettings};
use crate::error::VenueError;
use crate::market::{Instrument, OrderKind, OrderbookSnapshot, Outcome, Side, Venue};
use crate::signing::{self, CtfOrder, ExchangeDomain, OrderSide, SignedOrder};
use crate::venue::{Balance, CancelOutcome, OrderReport, OrderRequest, OrderState, VenueClient};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use ethers::providers::{Http, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, U256};
use parking_lot::{Mutex, RwLock};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

const CTF_EXCHANGE: &str = "0x4bFb41d5B3570DeFd03C39a9A4D8dE6Bd8B8982E";
const NEG_RISK_CTF_EXCHANGE: &str = "0xC5d563A36AE78145C45a50134d48A1215220f80a";
const POLYMARKET_EXCHANGE_NAME: &str = "Polymarket CTF Exchange";
const USDC_DECIMALS: u32 = 6;
const PREDICT_DECIMALS: u32 = 18;

fn http_client(timeout_ms: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_millis(timeout_ms))
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(90))
        .build()
        .context("Failed to build HTTP client")
}

/// Send and decode, turning HTTP failures into venue errors.
async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, VenueError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => VenueError::Auth(body),
            StatusCode::NOT_FOUND => VenueError::UnknownOrder(body),
            StatusCode::TOO_MANY_REQUESTS => VenueError::Network(format!("rate limited: {}", body)),
            s if s.is_server_error() => VenueError::Network(format!("{}: {}", s, body)),
            _ => VenueError::from_rejection(body),
        });
    }
    response.json::<T>().await.map_err(VenueError::from)
}

/// Order hashes signed but not yet answered by the venue, by client order id.
/// An entry outlives a post that was abandoned mid-flight.
#[derive(Default)]
struct UnconfirmedOrders(Mutex<HashMap<Uuid, String>>);

impl UnconfirmedOrders {
    fn insert(&self, order: &OrderRequest, hash: &str) {
        self.0.lock().insert(order.client_order_id, hash.to_string());
    }

    fn take(&self, order: &OrderRequest) -> Option<String> {
        self.0.lock().remove(&order.client_order_id)
    }
}

/// Venue APIs mix JSON numbers and numeric strings.
fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_token_id(instrument: &Instrument) -> Result<U256, VenueError> {
    U256::from_dec_str(&instrument.token_id)
        .map_err(|_| VenueError::RejectedByVenue(format!("token id is not numeric: {}", instrument.token_id)))
}

fn order_side(side: Side) -> OrderSide {
    match side {
        Side::Buy => OrderSide::Buy,
        Side::Sell => OrderSide::Sell,
    }
}

fn order_amounts(order: &OrderRequest, decimals: u32) -> (U256, U256) {
    let (cost, shares) = signing::buy_amounts(order.price, order.size, decimals);
    match order.side {
        Side::Buy => (cost, shares),
        Side::Sell => (shares, cost),
    }
}

fn order_payload(signed: &SignedOrder) -> Value {
    let order = &signed.order;
    json!({
        "salt": order.salt,
        "maker": signing::checksum(order.maker),
        "signer": signing::checksum(order.signer),
        "taker": signing::checksum(order.taker),
        "tokenId": order.token_id.to_string(),
        "makerAmount": order.maker_amount.to_string(),
        "takerAmount": order.taker_amount.to_string(),
        "expiration": order.expiration.to_string(),
        "nonce": order.nonce.to_string(),
        "feeRateBps": order.fee_rate_bps.to_string(),
        "side": order.side,
        "signatureType": order.signature_type,
        "signature": signed.signature,
    })
}

// Polymarket CLOB client
#[derive(Debug, Clone, Deserialize)]
struct ApiCreds {
    #[serde(rename = "apiKey")]
    api_key: String,
    secret: String,
    passphrase: String,
}

#[derive(Debug, Deserialize)]
struct BookLevel {
    price: String,
    size: String,
}

#[derive(Debug, Deserialize)]
struct ClobBook {
    #[serde(default)]
    bids: Vec<BookLevel>,
    #[serde(default)]
    asks: Vec<BookLevel>,
}

#[derive(Debug, Deserialize)]
struct PostOrderResponse {
    #[serde(default)]
    success: bool,
    #[serde(rename = "errorMsg", default)]
    error_msg: String,
    #[serde(rename = "orderID", default)]
    order_id: String,
    #[serde(default)]
    status: String,
    #[serde(rename = "takingAmount", default)]
    taking_amount: Value,
    #[serde(rename = "makingAmount", default)]
    making_amount: Value,
}

#[derive(Debug, Deserialize)]
struct ClobOrder {
    id: String,
    status: String,
    #[serde(default)]
    original_size: Value,
    #[serde(default)]
    size_matched: Value,
    #[serde(default)]
    price: Value,
}

#[derive(Debug, Deserialize)]
struct CancelResponse {
    #[serde(default)]
    canceled: Vec<String>,
    #[serde(default)]
    not_canceled: HashMap<String, String>,
}

pub struct PolymarketClient {
    http_client: Client,
    settings: PolymarketSettings,
    wallet: LocalWallet,
    /// Order maker: the proxy wallet when trading through one, else the signer.
    funder: Address,
    signature_type: u8,
    neg_risk_tokens: HashSet<String>,
    configured_creds: Option<ApiCreds>,
    creds: RwLock<Option<ApiCreds>>,
    unconfirmed: UnconfirmedOrders,
}

impl PolymarketClient {
    pub fn new(settings: PolymarketSettings, credentials: &PolymarketCredentials) -> Result<Self> {
        let wallet = signing::parse_wallet(&credentials.private_key, settings.chain_id)?;
        let (funder, signature_type) = match &credentials.proxy_address {
            Some(proxy) => (signing::parse_address(proxy)?, settings.signature_type),
            None => (wallet.address(), 0),
        };

        let configured_creds = match (&credentials.api_key, &credentials.api_secret, &credentials.api_passphrase) {
            (Some(api_key), Some(secret), Some(passphrase)) => Some(ApiCreds {
                api_key: api_key.clone(),
                secret: secret.clone(),
                passphrase: passphrase.clone(),
            }),
            _ => None,
        };

        Ok(Self {
            http_client: http_client(settings.request_timeout_ms)?,
            settings,
            wallet,
            funder,
            signature_type,
            neg_risk_tokens: HashSet::new(),
            configured_creds,
            creds: RwLock::new(None),
            unconfirmed: UnconfirmedOrders::default(),
        })
    }

    /// Tokens that settle through the neg-risk exchange.
    pub fn with_neg_risk_tokens(mut self, tokens: impl IntoIterator<Item = String>) -> Self {
        self.neg_risk_tokens.extend(tokens);
        self
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.host.trim_end_matches('/'), path)
    }

    fn domain(&self, token_id: &str) -> Result<ExchangeDomain, VenueError> {
        let contract = if self.neg_risk_tokens.contains(token_id) {
            NEG_RISK_CTF_EXCHANGE
        } else {
            CTF_EXCHANGE
        };
        Ok(ExchangeDomain {
            name: POLYMARKET_EXCHANGE_NAME.to_string(),
            version: "1".to_string(),
            chain_id: self.settings.chain_id,
            verifying_contract: signing::parse_address(contract).map_err(|e| VenueError::Auth(e.to_string()))?,
        })
    }

    /// L1 headers: an EIP-712 `ClobAuth` signature proving wallet ownership.
    async fn l1_headers(&self) -> Result<HeaderMap, VenueError> {
        let timestamp = Utc::now().timestamp();
        let signature = signing::sign_clob_auth(&self.wallet, timestamp, 0)
            .await
            .map_err(|e| VenueError::Auth(e.to_string()))?;

        let mut headers = HeaderMap::new();
        insert_header(&mut headers, "POLY_ADDRESS", &signing::checksum(self.wallet.address()))?;
        insert_header(&mut headers, "POLY_SIGNATURE", &signature)?;
        insert_header(&mut headers, "POLY_TIMESTAMP", &timestamp.to_string())?;
        insert_header(&mut headers, "POLY_NONCE", "0")?;
        Ok(headers)
    }

    /// L2 headers: HMAC over the request with the API secret.
    fn l2_headers(&self, method: &Method, path: &str, body: Option<&str>) -> Result<HeaderMap, VenueError> {
        let creds = self.creds.read().clone().ok_or(VenueError::NotConnected)?;
        let timestamp = Utc::now().timestamp();
        let signature = signing::l2_signature(&creds.secret, timestamp, method.as_str(), path, body)
            .map_err(|e| VenueError::Auth(e.to_string()))?;

        let mut headers = HeaderMap::new();
        insert_header(&mut headers, "POLY_ADDRESS", &signing::checksum(self.wallet.address()))?;
        insert_header(&mut headers, "POLY_SIGNATURE", &signature)?;
        insert_header(&mut headers, "POLY_TIMESTAMP", &timestamp.to_string())?;
        insert_header(&mut headers, "POLY_API_KEY", &creds.api_key)?;
        insert_header(&mut headers, "POLY_PASSPHRASE", &creds.passphrase)?;
        Ok(headers)
    }

    async fn authed<T: DeserializeOwned>(&self, method: Method, path: &str, body: Option<String>) -> Result<T, VenueError> {
        let headers = self.l2_headers(&method, path, body.as_deref())?;
        let mut request = self.http_client.request(method, self.url(path)).headers(headers);
        if let Some(body) = body {
            request = request.header(CONTENT_TYPE, "application/json").body(body);
        }
        send_json(request).await
    }

    async fn derive_api_creds(&self) -> Result<ApiCreds, VenueError> {
        let derived = send_json::<ApiCreds>(
            self.http_client
                .get(self.url("/auth/derive-api-key"))
                .headers(self.l1_headers().await?),
        )
        .await;

        match derived {
            Ok(creds) => Ok(creds),
            Err(e) => {
                debug!(error = %e, "No API key to derive, creating one");
                send_json::<ApiCreds>(
                    self.http_client
                        .post(self.url("/auth/api-key"))
                        .headers(self.l1_headers().await?),
                )
                .await
            }
        }
    }
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) -> Result<(), VenueError> {
    let value = HeaderValue::from_str(value).map_err(|e| VenueError::Auth(format!("invalid {} header: {}", name, e)))?;
    headers.insert(name, value);
    Ok(())
}

#[async_trait]
impl VenueClient for PolymarketClient {
    fn venue(&self) -> Venue {
        Venue::Polymarket
    }

    fn supports_fok(&self) -> bool {
        true
    }

    async fn connect(&self) -> Result<(), VenueError> {
        info!(address = %signing::checksum(self.address()), "Connecting to Polymarket");

        let creds = match &self.configured_creds {
            Some(creds) => {
                debug!("Using provided API credentials");
                creds.clone()
            }
            None => {
                let creds = self.derive_api_creds().await?;
                debug!("Derived API credentials");
                creds
            }
        };
        *self.creds.write() = Some(creds);

        info!("Connected to Polymarket successfully");
        Ok(())
    }

    async fn get_orderbook(&self, instrument: &Instrument) -> Result<OrderbookSnapshot, VenueError> {
        let book: ClobBook = send_json(
            self.http_client
                .get(self.url("/book"))
                .query(&[("token_id", instrument.token_id.as_str())]),
        )
        .await?;

        let levels = |levels: &[BookLevel]| -> Vec<(f64, f64)> {
            levels
                .iter()
                .filter_map(|l| Some((l.price.parse().ok()?, l.size.parse().ok()?)))
                .collect()
        };

        Ok(OrderbookSnapshot::from_levels(
            instrument.clone(),
            &levels(book.bids.as_slice()),
            &levels(book.asks.as_slice()),
            Utc::now(),
        ))
    }

    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderReport, VenueError> {
        let creds = self.creds.read().clone().ok_or(VenueError::NotConnected)?;
        let (maker_amount, taker_amount) = order_amounts(order, USDC_DECIMALS);
        let unsigned = CtfOrder {
            salt: signing::order_salt(),
            maker: self.funder,
            signer: self.wallet.address(),
            taker: Address::zero(),
            token_id: parse_token_id(&order.instrument)?,
            maker_amount,
            taker_amount,
            expiration: 0,
            nonce: 0,
            fee_rate_bps: 0,
            side: order_side(order.side),
            signature_type: self.signature_type,
        };
        let signed = signing::sign_order(&self.wallet, &self.domain(&order.instrument.token_id)?, unsigned)
            .await
            .map_err(|e| VenueError::Auth(e.to_string()))?;

        let order_type = match order.kind {
            OrderKind::Fok => "FOK",
            OrderKind::AggressiveLimit => "GTC",
        };
        let body = json!({
            "order": order_payload(&signed),
            "owner": creds.api_key,
            "orderType": order_type,
        })
        .to_string();

        debug!(token = %order.instrument.token_id, order_type, price = order.price, size = order.size, "Posting Polymarket order");
        self.unconfirmed.insert(order, &signed.hash);
        let response = self.authed::<PostOrderResponse>(Method::POST, "/order", Some(body)).await;
        self.unconfirmed.take(order);
        let response = response?;

        if !response.success || !response.error_msg.is_empty() {
            return Err(VenueError::from_rejection(response.error_msg));
        }

        let order_id = if response.order_id.is_empty() { signed.hash } else { response.order_id };
        let taking = as_f64(&response.taking_amount).unwrap_or(0.0);
        let making = as_f64(&response.making_amount).unwrap_or(0.0);

        let report = match response.status.to_lowercase().as_str() {
            "matched" => {
                // For a buy the taker side is the shares received
                let (shares, paid) = match order.side {
                    Side::Buy => (taking, making),
                    Side::Sell => (making, taking),
                };
                let filled_size = if shares > 0.0 { shares } else { order.size };
                OrderReport {
                    order_id,
                    filled_size,
                    avg_price: if shares > 0.0 && paid > 0.0 { Some(paid / shares) } else { Some(order.price) },
                    state: OrderState::Filled,
                }
            }
            "unmatched" if order.kind == OrderKind::Fok => OrderReport {
                order_id,
                filled_size: 0.0,
                avg_price: None,
                state: OrderState::Closed,
            },
            _ => OrderReport {
                order_id,
                filled_size: 0.0,
                avg_price: None,
                state: OrderState::Open,
            },
        };
        Ok(report)
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderReport, VenueError> {
        let path = format!("/data/order/{}", order_id);
        let order: Option<ClobOrder> = self.authed(Method::GET, &path, None).await?;
        let order = order.ok_or_else(|| VenueError::UnknownOrder(order_id.to_string()))?;

        let original = as_f64(&order.original_size).unwrap_or(0.0);
        let matched = as_f64(&order.size_matched).unwrap_or(0.0);
        let state = match order.status.to_uppercase().as_str() {
            "MATCHED" => OrderState::Filled,
            "LIVE" if original > 0.0 && matched >= original => OrderState::Filled,
            "LIVE" | "DELAYED" | "UNMATCHED" => OrderState::Open,
            _ => OrderState::Closed,
        };

        Ok(OrderReport {
            order_id: order.id,
            filled_size: matched,
            avg_price: if matched > 0.0 { as_f64(&order.price) } else { None },
            state,
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<CancelOutcome, VenueError> {
        info!(order = %order_id, "Cancelling Polymarket order");
        let body = json!({ "orderID": order_id }).to_string();
        let response: CancelResponse = self.authed(Method::DELETE, "/order", Some(body)).await?;

        if response.canceled.iter().any(|id| id == order_id) {
            return Ok(CancelOutcome::Acknowledged);
        }
        let reason = response
            .not_canceled
            .get(order_id)
            .cloned()
            .unwrap_or_default()
            .to_lowercase();
        if reason.contains("matched") || reason.contains("filled") || reason.contains("already canceled") {
            Ok(CancelOutcome::AlreadyFilled)
        } else {
            warn!(order = %order_id, %reason, "Cancel not confirmed");
            Ok(CancelOutcome::UnknownOrder)
        }
    }

    async fn cancel_unconfirmed(&self, order: &OrderRequest) -> Result<CancelOutcome, VenueError> {
        // The CLOB order id is the signed order hash
        match self.unconfirmed.take(order) {
            Some(hash) => self.cancel_order(&hash).await,
            None => Ok(CancelOutcome::UnknownOrder),
        }
    }

    async fn get_balance(&self) -> Result<Balance, VenueError> {
        let headers = self.l2_headers(&Method::GET, "/balance-allowance", None)?;
        let signature_type = self.signature_type.to_string();
        let response: Value = send_json(
            self.http_client
                .get(self.url("/balance-allowance"))
                .headers(headers)
                .query(&[("asset_type", "COLLATERAL"), ("signature_type", signature_type.as_str())]),
        )
        .await?;

        let raw = response
            .get("balance")
            .and_then(as_f64)
            .ok_or_else(|| VenueError::Decode("missing balance".to_string()))?;
        let available = raw / 10f64.powi(USDC_DECIMALS as i32);
        debug!(balance = available, "Polymarket USDC balance");

        Ok(Balance {
            asset: "USDC".to_string(),
            available,
        })
    }
}

// Predict.fun client

/// JWTs last 24 hours; refresh when less than five minutes remain.
const JWT_LIFETIME_SECS: i64 = 86_400;
const JWT_REFRESH_THRESHOLD_SECS: i64 = 300;

#[derive(Debug, Clone)]
struct JwtSession {
    token: String,
    refresh_at: DateTime<Utc>,
}

impl JwtSession {
    fn new(token: String, issued_at: DateTime<Utc>) -> Self {
        Self {
            token,
            refresh_at: issued_at + ChronoDuration::seconds(JWT_LIFETIME_SECS - JWT_REFRESH_THRESHOLD_SECS),
        }
    }

    fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.refresh_at
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: Option<bool>,
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
}

impl<T> Envelope<T> {
    fn into_data(self) -> Result<T, VenueError> {
        if self.success == Some(false) {
            return Err(VenueError::from_rejection(self.message.unwrap_or_default()));
        }
        self.data
            .ok_or_else(|| VenueError::Decode(self.message.unwrap_or_else(|| "missing data".to_string())))
    }
}

#[derive(Debug, Deserialize)]
struct AuthMessage {
    message: String,
}

#[derive(Debug, Deserialize)]
struct AuthToken {
    token: String,
}

#[derive(Debug, Deserialize)]
struct PredictBook {
    #[serde(default)]
    bids: Vec<(Value, Value)>,
    #[serde(default)]
    asks: Vec<(Value, Value)>,
}

#[derive(Debug, Deserialize)]
struct PlacedOrder {
    #[serde(rename = "orderHash", default)]
    order_hash: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PredictOrder {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    status: String,
    #[serde(rename = "amountFilled", default)]
    amount_filled: Value,
    #[serde(default)]
    order: Value,
}

impl PredictOrder {
    fn hash(&self) -> Option<&str> {
        self.order.get("hash").and_then(Value::as_str)
    }

    fn internal_id(&self) -> Option<String> {
        match &self.id {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

pub struct PredictFunClient {
    http_client: Client,
    settings: PredictFunSettings,
    api_key: String,
    wallet: LocalWallet,
    domain: ExchangeDomain,
    provider: Provider<Http>,
    usdt: Address,
    balance_owner: Address,
    session: RwLock<Option<JwtSession>>,
    auth_lock: tokio::sync::Mutex<()>,
    unconfirmed: UnconfirmedOrders,
}

impl PredictFunClient {
    pub fn new(settings: PredictFunSettings, credentials: &PredictFunCredentials) -> Result<Self> {
        let wallet = signing::parse_wallet(&credentials.private_key, settings.chain_id)?;
        let exchange = settings
            .exchange_address
            .as_deref()
            .context("venues.predict_fun.exchange_address is required for order signing")?;
        let domain = ExchangeDomain {
            name: settings.exchange_name.clone(),
            version: "1".to_string(),
            chain_id: settings.chain_id,
            verifying_contract: signing::parse_address(exchange)?,
        };
        let provider = Provider::<Http>::try_from(settings.rpc_url.as_str()).context("Failed to create BNB chain provider")?;
        let usdt = signing::parse_address(&settings.usdt_address)?;
        let balance_owner = match &credentials.smart_wallet {
            Some(smart_wallet) => signing::parse_address(smart_wallet)?,
            None => wallet.address(),
        };

        Ok(Self {
            http_client: http_client(settings.request_timeout_ms)?,
            settings,
            api_key: credentials.api_key.clone(),
            wallet,
            domain,
            provider,
            usdt,
            balance_owner,
            session: RwLock::new(None),
            auth_lock: tokio::sync::Mutex::new(()),
            unconfirmed: UnconfirmedOrders::default(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.base_url.trim_end_matches('/'), path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http_client
            .request(method, self.url(path))
            .header("X-API-Key", self.api_key.as_str())
    }

    async fn authenticate(&self) -> Result<JwtSession, VenueError> {
        debug!("Authenticating with Predict.fun");

        let message = send_json::<Envelope<AuthMessage>>(self.request(Method::GET, "/auth/message"))
            .await?
            .into_data()?
            .message;
        let signature = signing::sign_message(&self.wallet, &message)
            .await
            .map_err(|e| VenueError::Auth(e.to_string()))?;

        let body = json!({
            "message": message,
            "signature": signature,
            "signer": signing::checksum(self.wallet.address()),
        });
        let token = send_json::<Envelope<AuthToken>>(self.request(Method::POST, "/auth").json(&body))
            .await?
            .into_data()
            .map_err(|e| VenueError::Auth(e.to_string()))?
            .token;

        info!("JWT token obtained successfully");
        Ok(JwtSession::new(token, Utc::now()))
    }

    fn cached_token(&self) -> Option<String> {
        let session = self.session.read();
        session
            .as_ref()
            .filter(|s| s.is_valid_at(Utc::now()))
            .map(|s| s.token.clone())
    }

    /// Current JWT, refreshed first when close to expiry.
    async fn token(&self) -> Result<String, VenueError> {
        if let Some(token) = self.cached_token() {
            return Ok(token);
        }

        let _guard = self.auth_lock.lock().await;
        // Another task may have refreshed while we waited
        if let Some(token) = self.cached_token() {
            return Ok(token);
        }

        info!("JWT token expired or expiring soon, refreshing");
        let session = self.authenticate().await?;
        let token = session.token.clone();
        *self.session.write() = Some(session);
        Ok(token)
    }

    async fn authed(&self, method: Method, path: &str) -> Result<RequestBuilder, VenueError> {
        let token = self.token().await?;
        Ok(self.request(method, path).bearer_auth(token))
    }

    async fn post_order(&self, body: &Value) -> Result<PlacedOrder, VenueError> {
        send_json::<Envelope<PlacedOrder>>(self.authed(Method::POST, "/orders").await?.json(body))
            .await?
            .into_data()
    }

    async fn open_orders(&self) -> Result<Vec<PredictOrder>, VenueError> {
        send_json::<Envelope<Vec<PredictOrder>>>(self.authed(Method::GET, "/orders").await?)
            .await?
            .into_data()
    }
}

/// The venue quotes one book per market in Yes terms. The No book is its
/// mirror: No asks come from Yes bids at `1 - price`, and vice versa.
fn mirror_levels(levels: &[(f64, f64)]) -> Vec<(f64, f64)> {
    levels.iter().map(|(price, size)| (1.0 - price, *size)).collect()
}

#[async_trait]
impl VenueClient for PredictFunClient {
    fn venue(&self) -> Venue {
        Venue::PredictFun
    }

    fn supports_fok(&self) -> bool {
        false
    }

    async fn connect(&self) -> Result<(), VenueError> {
        info!(address = %signing::checksum(self.wallet.address()), "Connecting to Predict.fun");
        let _guard = self.auth_lock.lock().await;
        let session = self.authenticate().await?;
        *self.session.write() = Some(session);
        info!("Connected to Predict.fun successfully");
        Ok(())
    }

    async fn get_orderbook(&self, instrument: &Instrument) -> Result<OrderbookSnapshot, VenueError> {
        let path = format!("/markets/{}/orderbook", instrument.market_id);
        let book = send_json::<Envelope<PredictBook>>(self.authed(Method::GET, &path).await?)
            .await?
            .into_data()?;

        let levels = |levels: &[(Value, Value)]| -> Vec<(f64, f64)> {
            levels
                .iter()
                .filter_map(|(price, size)| Some((as_f64(price)?, as_f64(size)?)))
                .collect()
        };
        let bids = levels(book.bids.as_slice());
        let asks = levels(book.asks.as_slice());

        let snapshot = match instrument.outcome {
            Outcome::Yes => OrderbookSnapshot::from_levels(instrument.clone(), &bids, &asks, Utc::now()),
            Outcome::No => OrderbookSnapshot::from_levels(
                instrument.clone(),
                &mirror_levels(&asks),
                &mirror_levels(&bids),
                Utc::now(),
            ),
        };
        Ok(snapshot)
    }

    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderReport, VenueError> {
        let (maker_amount, taker_amount) = order_amounts(order, PREDICT_DECIMALS);
        let unsigned = CtfOrder {
            salt: signing::order_salt(),
            maker: self.wallet.address(),
            signer: self.wallet.address(),
            taker: Address::zero(),
            token_id: parse_token_id(&order.instrument)?,
            maker_amount,
            taker_amount,
            expiration: 0,
            nonce: 0,
            fee_rate_bps: self.settings.fee_rate_bps,
            side: order_side(order.side),
            signature_type: 0,
        };
        let signed = signing::sign_order(&self.wallet, &self.domain, unsigned)
            .await
            .map_err(|e| VenueError::Auth(e.to_string()))?;

        let mut payload = order_payload(&signed);
        payload["hash"] = json!(signed.hash);
        let body = json!({
            "data": {
                "pricePerShare": signing::to_base_units(order.price, PREDICT_DECIMALS).to_string(),
                "strategy": "LIMIT",
                "slippageBps": "0",
                "order": payload,
            }
        });

        debug!(token = %order.instrument.token_id, price = order.price, size = order.size, "Posting Predict.fun order");
        self.unconfirmed.insert(order, &signed.hash);
        let placed = self.post_order(&body).await;
        self.unconfirmed.take(order);
        let placed = placed?;

        Ok(OrderReport {
            order_id: placed.order_hash.unwrap_or(signed.hash),
            filled_size: 0.0,
            avg_price: None,
            state: OrderState::Open,
        })
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderReport, VenueError> {
        let path = format!("/orders/{}", order_id);
        let order = send_json::<Envelope<PredictOrder>>(self.authed(Method::GET, &path).await?)
            .await?
            .into_data()?;

        let filled_size = match &order.amount_filled {
            Value::String(wei) => signing::parse_base_units(wei, PREDICT_DECIMALS).unwrap_or(0.0),
            other => as_f64(other).unwrap_or(0.0),
        };
        let state = match order.status.to_uppercase().as_str() {
            "FILLED" => OrderState::Filled,
            "OPEN" | "PENDING" | "PARTIALLY_FILLED" => OrderState::Open,
            _ => OrderState::Closed,
        };

        Ok(OrderReport {
            order_id: order_id.to_string(),
            filled_size,
            avg_price: None,
            state,
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<CancelOutcome, VenueError> {
        info!(order = %order_id, "Cancelling Predict.fun order");

        // Removal takes the venue's internal id, not the order hash
        let orders = self.open_orders().await?;
        let Some(internal_id) = orders
            .iter()
            .find(|o| o.hash() == Some(order_id))
            .and_then(PredictOrder::internal_id)
        else {
            warn!(order = %order_id, "Order not found among open orders");
            return Ok(CancelOutcome::UnknownOrder);
        };

        let body = json!({ "data": { "ids": [internal_id] } });
        let result: Value = send_json(self.authed(Method::POST, "/orders/remove").await?.json(&body)).await?;

        let non_empty = |key: &str| result.get(key).and_then(Value::as_array).is_some_and(|a| !a.is_empty());
        if result.get("success").and_then(Value::as_bool) == Some(false) {
            return Err(VenueError::from_rejection(result.to_string()));
        }
        if non_empty("removed") {
            Ok(CancelOutcome::Acknowledged)
        } else if non_empty("noop") {
            Ok(CancelOutcome::AlreadyFilled)
        } else {
            warn!(order = %order_id, response = %result, "Cancel returned nothing removed");
            Ok(CancelOutcome::UnknownOrder)
        }
    }

    async fn cancel_unconfirmed(&self, order: &OrderRequest) -> Result<CancelOutcome, VenueError> {
        match self.unconfirmed.take(order) {
            Some(hash) => self.cancel_order(&hash).await,
            None => Ok(CancelOutcome::UnknownOrder),
        }
    }

    async fn get_balance(&self) -> Result<Balance, VenueError> {
        let available = signing::erc20_balance(&self.provider, self.usdt, self.balance_owner, PREDICT_DECIMALS)
            .await
            .map_err(|e| VenueError::Network(format!("{:#}", e)))?;
        debug!(balance = available, "Predict.fun USDT balance");

        Ok(Balance {
            asset: "USDT".to_string(),
            available,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mirror_levels_for_no_book() {
        let yes_bids = vec![(0.45, 10.0), (0.44, 20.0)];
        let yes_asks = vec![(0.48, 5.0)];
        let instrument = Instrument::new(Venue::PredictFun, "42", Outcome::No, "2");

        let snapshot =
            OrderbookSnapshot::from_levels(instrument, &mirror_levels(&yes_asks), &mirror_levels(&yes_bids), Utc::now());

        assert!((snapshot.best_ask - 0.55).abs() < 1e-9);
        assert_eq!(snapshot.ask_size, 10.0);
        assert!((snapshot.best_bid - 0.52).abs() < 1e-9);
        assert_eq!(snapshot.bid_size, 5.0);
    }

    #[test]
    fn test_jwt_refreshes_before_expiry() {
        let issued = Utc::now();
        let session = JwtSession::new("t".to_string(), issued);

        assert!(session.is_valid_at(issued + ChronoDuration::hours(23)));
        assert!(!session.is_valid_at(issued + ChronoDuration::seconds(JWT_LIFETIME_SECS - 299)));
    }

    #[test]
    fn test_as_f64_accepts_strings_and_numbers() {
        assert_eq!(as_f64(&json!("0.45")), Some(0.45));
        assert_eq!(as_f64(&json!(12)), Some(12.0));
        assert_eq!(as_f64(&json!(null)), None);
    }

    #[test]
    fn test_envelope_failure_is_rejection() {
        let envelope: Envelope<AuthToken> =
            serde_json::from_value(json!({ "success": false, "message": "insufficient collateral" })).unwrap();
        assert!(matches!(envelope.into_data(), Err(VenueError::InsufficientBalance { .. })));
    }

    #[test]
    fn test_sell_amounts_swap_maker_and_taker() {
        let instrument = Instrument::new(Venue::Polymarket, "m", Outcome::Yes, "1");
        let buy = OrderRequest::buy(instrument.clone(), 0.5, 10.0, OrderKind::Fok);
        let sell = OrderRequest { side: Side::Sell, ..buy.clone() };

        let (maker, taker) = order_amounts(&buy, USDC_DECIMALS);
        assert_eq!((maker, taker), (U256::from(5_000_000u64), U256::from(10_000_000u64)));
        assert_eq!(order_amounts(&sell, USDC_DECIMALS), (taker, maker));
    }

    #[test]
    fn test_unconfirmed_hash_taken_once() {
        let instrument = Instrument::new(Venue::PredictFun, "42", Outcome::Yes, "1");
        let order = OrderRequest::buy(instrument.clone(), 0.5, 10.0, OrderKind::AggressiveLimit);
        let other = OrderRequest::buy(instrument, 0.5, 10.0, OrderKind::AggressiveLimit);
        let unconfirmed = UnconfirmedOrders::default();

        unconfirmed.insert(&order, "0xfeed");

        assert_eq!(unconfirmed.take(&other), None);
        assert_eq!(unconfirmed.take(&order).as_deref(), Some("0xfeed"));
        assert_eq!(unconfirmed.take(&order), None);
    }

    #[test]
    fn test_clob_order_parses() {
        let order: ClobOrder = serde_json::from_value(json!({
            "id": "0xabc",
            "status": "LIVE",
            "original_size": "10",
            "size_matched": "4",
            "price": "0.51"
        }))
        .unwrap();
        assert_eq!(as_f64(&order.size_matched), Some(4.0));
        assert_eq!(as_f64(&order.price), Some(0.51));
    }
}
