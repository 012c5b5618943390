#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use polymarket_predictfun_arbitrage_bot::arbitrage_engine::{ArbitrageEngine, ArbitrageOpportunity};
use polymarket_predictfun_arbitrage_bot::config::ArbitrageConfig;
use polymarket_predictfun_arbitrage_bot::error::VenueError;
use polymarket_predictfun_arbitrage_bot::market::{Instrument, OrderbookSnapshot, Venue};
use polymarket_predictfun_arbitrage_bot::market_registry::{MarketPair, MarketRegistry, VenueMarket};
use polymarket_predictfun_arbitrage_bot::orderbook_cache::OrderbookCache;
use polymarket_predictfun_arbitrage_bot::venue::{
    Balance, CancelOutcome, OrderReport, OrderRequest, OrderState, VenueClient, VenueClients,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// How the fake answers the next submitted order.
#[derive(Debug, Clone)]
pub enum Fill {
    /// Fill the whole order at its limit price.
    Full,
    /// Fill this much, then close.
    Partial(f64),
    /// Fill this much and keep the rest resting until cancelled.
    Rest(f64),
    Reject(VenueError),
    /// Never answer.
    Hang,
}

/// Scripted venue. Orders are answered from the script in submission order;
/// once the script runs out every order fills in full.
pub struct FakeVenue {
    venue: Venue,
    fok: bool,
    script: Mutex<VecDeque<Fill>>,
    submitted: Mutex<Vec<OrderRequest>>,
    orders: Mutex<HashMap<String, OrderReport>>,
    cancels: Mutex<Vec<String>>,
    books: Mutex<HashMap<String, (f64, f64, f64)>>,
    latency: Mutex<Duration>,
}

impl FakeVenue {
    pub fn new(venue: Venue, fok: bool) -> Self {
        Self {
            venue,
            fok,
            script: Mutex::new(VecDeque::new()),
            submitted: Mutex::new(Vec::new()),
            orders: Mutex::new(HashMap::new()),
            cancels: Mutex::new(Vec::new()),
            books: Mutex::new(HashMap::new()),
            latency: Mutex::new(Duration::ZERO),
        }
    }

    pub fn polymarket() -> Arc<Self> {
        Arc::new(Self::new(Venue::Polymarket, true))
    }

    pub fn predict_fun() -> Arc<Self> {
        Arc::new(Self::new(Venue::PredictFun, false))
    }

    pub fn push(&self, fill: Fill) {
        self.script.lock().push_back(fill);
    }

    /// Quote served by `get_orderbook` for a token.
    pub fn quote(&self, token_id: &str, bid: f64, ask: f64, size: f64) {
        self.books.lock().insert(token_id.to_string(), (bid, ask, size));
    }

    /// Delay before every order is answered.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn submitted(&self) -> Vec<OrderRequest> {
        self.submitted.lock().clone()
    }

    pub fn cancels(&self) -> Vec<String> {
        self.cancels.lock().clone()
    }
}

#[async_trait]
impl VenueClient for FakeVenue {
    fn venue(&self) -> Venue {
        self.venue
    }

    fn supports_fok(&self) -> bool {
        self.fok
    }

    async fn connect(&self) -> Result<(), VenueError> {
        Ok(())
    }

    async fn get_orderbook(&self, instrument: &Instrument) -> Result<OrderbookSnapshot, VenueError> {
        let quote = self.books.lock().get(&instrument.token_id).copied();
        match quote {
            Some((bid, ask, size)) => Ok(OrderbookSnapshot::new(instrument.clone(), bid, ask, size, size, Utc::now())),
            None => Err(VenueError::RejectedByVenue(format!("no book for {}", instrument.token_id))),
        }
    }

    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderReport, VenueError> {
        self.submitted.lock().push(order.clone());
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let fill = self.script.lock().pop_front().unwrap_or(Fill::Full);
        let order_id = format!("{}-{}", self.venue, self.submitted.lock().len());

        let report = match fill {
            Fill::Full => OrderReport {
                order_id,
                filled_size: order.size,
                avg_price: Some(order.price),
                state: OrderState::Filled,
            },
            Fill::Partial(filled) => OrderReport {
                order_id,
                filled_size: filled.min(order.size),
                avg_price: Some(order.price),
                state: OrderState::Closed,
            },
            Fill::Rest(filled) => OrderReport {
                order_id,
                filled_size: filled.min(order.size),
                avg_price: (filled > 0.0).then_some(order.price),
                state: OrderState::Open,
            },
            Fill::Reject(e) => return Err(e),
            Fill::Hang => {
                futures::future::pending::<()>().await;
                unreachable!()
            }
        };

        self.orders.lock().insert(report.order_id.clone(), report.clone());
        Ok(report)
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderReport, VenueError> {
        self.orders
            .lock()
            .get(order_id)
            .cloned()
            .ok_or_else(|| VenueError::UnknownOrder(order_id.to_string()))
    }

    async fn cancel_order(&self, order_id: &str) -> Result<CancelOutcome, VenueError> {
        self.cancels.lock().push(order_id.to_string());
        let mut orders = self.orders.lock();
        match orders.get_mut(order_id) {
            Some(report) if report.state == OrderState::Open => {
                report.state = OrderState::Closed;
                Ok(CancelOutcome::Acknowledged)
            }
            Some(_) => Ok(CancelOutcome::AlreadyFilled),
            None => Ok(CancelOutcome::UnknownOrder),
        }
    }

    async fn cancel_unconfirmed(&self, order: &OrderRequest) -> Result<CancelOutcome, VenueError> {
        self.cancels.lock().push(order.client_order_id.to_string());
        let seen = self
            .submitted
            .lock()
            .iter()
            .any(|o| o.client_order_id == order.client_order_id);
        Ok(if seen { CancelOutcome::Acknowledged } else { CancelOutcome::UnknownOrder })
    }

    async fn get_balance(&self) -> Result<Balance, VenueError> {
        Ok(Balance {
            asset: "USD".to_string(),
            available: 1_000.0,
        })
    }
}

pub fn clients(a: &Arc<FakeVenue>, b: &Arc<FakeVenue>) -> VenueClients {
    let mut clients = VenueClients::new();
    clients.insert(a.venue(), a.clone() as Arc<dyn VenueClient>);
    clients.insert(b.venue(), b.clone() as Arc<dyn VenueClient>);
    clients
}

/// Polymarket on side A (no fee), Predict.fun on side B (1% fee), gas 0.01.
pub fn pair(id: &str) -> MarketPair {
    MarketPair::new(
        id,
        VenueMarket::new(Venue::Polymarket, format!("{}-pm", id), format!("{}-pm-yes", id), format!("{}-pm-no", id), 0.0),
        VenueMarket::new(Venue::PredictFun, format!("{}-pf", id), format!("{}-pf-yes", id), format!("{}-pf-no", id), 0.01),
        0.01,
        Duration::from_secs(60),
    )
}

pub fn snapshot(instrument: &Instrument, ask: f64, size: f64) -> OrderbookSnapshot {
    OrderbookSnapshot::new(instrument.clone(), ask - 0.01, ask, size, size, Utc::now())
}

/// Fresh books for a pair. Only the YES(A)/NO(B) direction is profitable:
/// 0.48 + 0.47 * 1.01 + 0.01 = 0.9647.
pub fn profitable_books(cache: &OrderbookCache, pair: &MarketPair, size: f64) {
    cache.update(snapshot(&pair.venue_a.yes, 0.48, size));
    cache.update(snapshot(&pair.venue_a.no, 0.54, size));
    cache.update(snapshot(&pair.venue_b.yes, 0.53, size));
    cache.update(snapshot(&pair.venue_b.no, 0.47, size));
}

pub fn arbitrage_config() -> ArbitrageConfig {
    ArbitrageConfig {
        min_profit_pct: 0.02,
        max_position_size: 100.0,
        min_position_size: 1.0,
        detection_interval_ms: 100,
    }
}

/// Detect the single opportunity on `pair` from `cache`.
pub fn detect(pair: MarketPair, cache: &Arc<OrderbookCache>) -> ArbitrageOpportunity {
    let registry = Arc::new(MarketRegistry::new(vec![pair]));
    let engine = ArbitrageEngine::new(registry, cache.clone(), arbitrage_config());
    let mut found = engine.scan();
    assert_eq!(found.len(), 1, "expected exactly one opportunity");
    found.remove(0)
}
