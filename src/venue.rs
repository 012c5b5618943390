//! Capability set every venue client provides to the engine.

use crate::error::VenueError;
use crate::market::{Instrument, OrderKind, OrderbookSnapshot, Side, Venue};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

pub type OrderId = String;

/// Connected clients by venue.
pub type VenueClients = HashMap<Venue, Arc<dyn VenueClient>>;

#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    /// Chosen locally so an order can be traced before the venue answers.
    pub client_order_id: Uuid,
    pub instrument: Instrument,
    pub side: Side,
    pub price: f64,
    pub size: f64,
    pub kind: OrderKind,
}

impl OrderRequest {
    pub fn buy(instrument: Instrument, price: f64, size: f64, kind: OrderKind) -> Self {
        Self {
            client_order_id: Uuid::new_v4(),
            instrument,
            side: Side::Buy,
            price,
            size,
            kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    /// Still resting on the book, possibly partially filled.
    Open,
    Filled,
    /// Killed, cancelled or expired. `filled_size` is final.
    Closed,
}

/// What the venue knows about an order right now.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderReport {
    pub order_id: OrderId,
    pub filled_size: f64,
    pub avg_price: Option<f64>,
    pub state: OrderState,
}

impl OrderReport {
    pub fn is_open(&self) -> bool {
        self.state == OrderState::Open
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    Acknowledged,
    AlreadyFilled,
    UnknownOrder,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Balance {
    pub asset: String,
    pub available: f64,
}

/// One implementation per venue, injected as `Arc<dyn VenueClient>`.
///
/// Every method is a suspension point; callers wrap them in deadlines.
#[async_trait]
pub trait VenueClient: Send + Sync {
    fn venue(&self) -> Venue;

    /// Whether `OrderKind::Fok` is honoured natively.
    fn supports_fok(&self) -> bool;

    /// Authenticate and prepare the client. Safe to call again to re-authenticate.
    async fn connect(&self) -> Result<(), VenueError>;

    async fn get_orderbook(&self, instrument: &Instrument) -> Result<OrderbookSnapshot, VenueError>;

    /// Place an order. Immediate fills are reported in the returned report.
    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderReport, VenueError>;

    async fn order_status(&self, order_id: &str) -> Result<OrderReport, VenueError>;

    async fn cancel_order(&self, order_id: &str) -> Result<CancelOutcome, VenueError>;

    /// Cancel an order whose submission never returned, found by the request
    /// that placed it. Only venues that know the order id before posting can.
    async fn cancel_unconfirmed(&self, _order: &OrderRequest) -> Result<CancelOutcome, VenueError> {
        Ok(CancelOutcome::UnknownOrder)
    }

    async fn get_balance(&self) -> Result<Balance, VenueError>;
}
