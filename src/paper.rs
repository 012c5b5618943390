//! Dry-run venue: real market data, simulated orders.

use crate::error::VenueError;
use crate::market::{Instrument, OrderKind, OrderbookSnapshot, Venue};
use crate::orderbook_cache::OrderbookCache;
use crate::venue::{Balance, CancelOutcome, OrderReport, OrderRequest, OrderState, VenueClient};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Wraps a live client. Orderbooks pass through; orders are matched against
/// the cached top of book and never reach the venue.
pub struct PaperVenue {
    inner: Arc<dyn VenueClient>,
    cache: Arc<OrderbookCache>,
    balance: f64,
    orders: Mutex<HashMap<String, OrderReport>>,
}

impl PaperVenue {
    pub fn new(inner: Arc<dyn VenueClient>, cache: Arc<OrderbookCache>, balance: f64) -> Self {
        Self {
            inner,
            cache,
            balance,
            orders: Mutex::new(HashMap::new()),
        }
    }

    fn simulate(&self, order: &OrderRequest) -> OrderReport {
        let order_id = format!("paper-{}", Uuid::new_v4());
        let book = self.cache.get(&order.instrument);

        // Marketable only if the limit reaches the best ask
        let available = book
            .as_ref()
            .filter(|b| b.has_ask() && order.price + 1e-9 >= b.best_ask)
            .map(|b| (b.best_ask, b.ask_size));

        match (order.kind, available) {
            (OrderKind::Fok, Some((ask, depth))) if depth + 1e-9 >= order.size => OrderReport {
                order_id,
                filled_size: order.size,
                avg_price: Some(ask),
                state: OrderState::Filled,
            },
            (OrderKind::Fok, _) => OrderReport {
                order_id,
                filled_size: 0.0,
                avg_price: None,
                state: OrderState::Closed,
            },
            (OrderKind::AggressiveLimit, Some((ask, depth))) => {
                let filled_size = depth.min(order.size);
                let state = if filled_size + 1e-9 >= order.size {
                    OrderState::Filled
                } else {
                    OrderState::Open
                };
                OrderReport {
                    order_id,
                    filled_size,
                    avg_price: Some(ask),
                    state,
                }
            }
            (OrderKind::AggressiveLimit, None) => OrderReport {
                order_id,
                filled_size: 0.0,
                avg_price: None,
                state: OrderState::Open,
            },
        }
    }
}

#[async_trait]
impl VenueClient for PaperVenue {
    fn venue(&self) -> Venue {
        self.inner.venue()
    }

    fn supports_fok(&self) -> bool {
        self.inner.supports_fok()
    }

    async fn connect(&self) -> Result<(), VenueError> {
        self.inner.connect().await
    }

    async fn get_orderbook(&self, instrument: &Instrument) -> Result<OrderbookSnapshot, VenueError> {
        self.inner.get_orderbook(instrument).await
    }

    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderReport, VenueError> {
        let report = self.simulate(order);
        info!(
            venue = %self.venue(),
            instrument = %order.instrument,
            price = order.price,
            size = order.size,
            filled = report.filled_size,
            "[DRY RUN] Simulated order"
        );
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

    async fn get_balance(&self) -> Result<Balance, VenueError> {
        Ok(Balance {
            asset: "PAPER".to_string(),
            available: self.balance,
        })
    }
}
