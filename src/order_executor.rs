//! Two-leg execution of an approved opportunity.
//!
//! Leg A goes to the venue that can fill-or-kill and is sent first. Leg B is
//! only sent once leg A has filled, sized to what actually filled, and priced
//! through the spread. Whatever leg B fails to match is left as unhedged
//! exposure for the operator; there are no automatic retries or reversals.

use crate::arbitrage_engine::ArbitrageOpportunity;
use crate::config::ExecutionConfig;
use crate::error::VenueError;
use crate::market::{Instrument, InstrumentKey, OrderKind, Venue};
use crate::position_tracker::PositionTracker;
use crate::risk_gate::ExecutionPermit;
use crate::venue::{CancelOutcome, OrderId, OrderReport, OrderRequest, VenueClient, VenueClients};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout, timeout_at, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const FILL_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExecutionState {
    Pending,
    LegASubmitted,
    LegAFilled,
    LegAFailed,
    LegBSubmitted,
    BothFilled,
    PartialFilled,
    BothFailed,
    Unwound,
    Terminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExecutionStatus {
    BothFilled,
    PartialFilled,
    BothFailed,
}

impl From<ExecutionStatus> for ExecutionState {
    fn from(status: ExecutionStatus) -> Self {
        match status {
            ExecutionStatus::BothFilled => ExecutionState::BothFilled,
            ExecutionStatus::PartialFilled => ExecutionState::PartialFilled,
            ExecutionStatus::BothFailed => ExecutionState::BothFailed,
        }
    }
}

/// What happened to one leg.
#[derive(Debug, Clone)]
pub struct LegOutcome {
    pub instrument: Instrument,
    pub kind: OrderKind,
    pub order_id: Option<OrderId>,
    pub limit_price: f64,
    /// Proportional taker fee of the leg's venue.
    pub fee: f64,
    pub requested_size: f64,
    pub filled_size: f64,
    pub avg_price: Option<f64>,
    /// A resting remainder was cancelled.
    pub cancelled: bool,
    pub error: Option<VenueError>,
}

impl LegOutcome {
    fn new(request: &OrderRequest, fee: f64) -> Self {
        Self {
            instrument: request.instrument.clone(),
            kind: request.kind,
            order_id: None,
            limit_price: request.price,
            fee,
            requested_size: request.size,
            filled_size: 0.0,
            avg_price: None,
            cancelled: false,
            error: None,
        }
    }

    // Fill counts only grow; a late or reordered status reply never shrinks them
    fn apply(&mut self, report: &OrderReport) {
        self.filled_size = self.filled_size.max(report.filled_size).min(self.requested_size);
        if report.avg_price.is_some() {
            self.avg_price = report.avg_price;
        }
    }

    pub fn is_filled(&self) -> bool {
        self.filled_size > FILL_EPSILON
    }

    /// Average fill price, or the limit price when the venue did not report one.
    pub fn fill_price(&self) -> f64 {
        self.avg_price.unwrap_or(self.limit_price)
    }
}

/// Terminal record of one execution attempt.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub id: Uuid,
    pub opportunity: ArbitrageOpportunity,
    pub leg_a: LegOutcome,
    /// `None` when leg A never filled.
    pub leg_b: Option<LegOutcome>,
    pub realized_pnl: f64,
    pub unhedged_size: f64,
    pub status: ExecutionStatus,
    pub trace: Vec<ExecutionState>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn hedged_size(&self) -> f64 {
        let b = self.leg_b.as_ref().map(|l| l.filled_size).unwrap_or(0.0);
        self.leg_a.filled_size.min(b)
    }

    /// The leg holding the unmatched size, if any.
    pub fn unhedged_leg(&self) -> Option<&LegOutcome> {
        if self.unhedged_size <= FILL_EPSILON {
            return None;
        }
        match &self.leg_b {
            Some(leg_b) if leg_b.filled_size > self.leg_a.filled_size => Some(leg_b),
            _ => Some(&self.leg_a),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenOrder {
    pub order_id: OrderId,
    pub instrument: Instrument,
    pub placed_at: DateTime<Utc>,
}

/// Orders currently resting on a venue.
#[derive(Default)]
pub struct OpenOrders {
    orders: DashMap<OrderId, OpenOrder>,
}

impl OpenOrders {
    fn register(&self, order_id: &str, instrument: &Instrument) {
        self.orders.insert(
            order_id.to_string(),
            OpenOrder {
                order_id: order_id.to_string(),
                instrument: instrument.clone(),
                placed_at: Utc::now(),
            },
        );
    }

    /// Only once the order is known to be off the book or a cancel was sent.
    /// An aborted leg leaves its entry for the shutdown sweep.
    fn deregister(&self, order_id: &str) {
        self.orders.remove(order_id);
    }

    pub fn snapshot(&self) -> Vec<OpenOrder> {
        self.orders.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

struct LegPlan {
    client: Arc<dyn VenueClient>,
    instrument: Instrument,
    ask: f64,
    fee: f64,
}

pub struct OrderExecutor {
    clients: VenueClients,
    config: ExecutionConfig,
    open_orders: OpenOrders,
    position_tracker: Option<Arc<Mutex<PositionTracker>>>,
}

impl OrderExecutor {
    pub fn new(clients: VenueClients, config: ExecutionConfig) -> Self {
        Self {
            clients,
            config,
            open_orders: OpenOrders::default(),
            position_tracker: None,
        }
    }

    pub fn with_position_tracker(mut self, tracker: Arc<Mutex<PositionTracker>>) -> Self {
        self.position_tracker = Some(tracker);
        self
    }

    pub fn open_orders(&self) -> &OpenOrders {
        &self.open_orders
    }

    /// Execute an approved opportunity to a terminal result.
    ///
    /// Venue errors never escape: they end up in the leg outcomes. The permit
    /// is completed with whatever size was left unhedged.
    pub async fn execute(&self, opportunity: ArbitrageOpportunity, permit: ExecutionPermit) -> ExecutionResult {
        let started_at = Utc::now();
        let mut trace = vec![ExecutionState::Pending];

        info!(
            execution = %permit.id(),
            pair = %opportunity.pair.id,
            direction = %opportunity.direction,
            size = opportunity.size,
            "Executing arbitrage: {} - Expected profit: ${:.4} ({:.2}% ROI)",
            opportunity.pair.name,
            opportunity.expected_profit(),
            opportunity.profit_pct * 100.0
        );

        let (first, second) = match self.plan(&opportunity) {
            Ok(legs) => legs,
            Err(err) => {
                error!(pair = %opportunity.pair.id, error = %err, "No client for execution leg");
                let request = OrderRequest::buy(
                    opportunity.instrument_a().clone(),
                    opportunity.venue_a_price,
                    opportunity.size,
                    OrderKind::Fok,
                );
                let mut leg_a = LegOutcome::new(&request, opportunity.pair.venue_a.fee);
                leg_a.error = Some(err);
                trace.push(ExecutionState::LegAFailed);
                return self.finish(opportunity, permit, leg_a, None, trace, started_at).await;
            }
        };

        // Leg A: fill-or-kill at the quoted ask
        let kind = if first.client.supports_fok() {
            OrderKind::Fok
        } else {
            OrderKind::AggressiveLimit
        };
        let request = OrderRequest::buy(first.instrument.clone(), first.ask, opportunity.size, kind);
        trace.push(ExecutionState::LegASubmitted);
        let leg_a = self.run_leg(&first, request, self.config.leg_a_timeout()).await;

        if !leg_a.is_filled() {
            warn!(
                pair = %opportunity.pair.id,
                instrument = %leg_a.instrument,
                error = ?leg_a.error,
                "Leg A not filled, aborting with no exposure"
            );
            trace.push(ExecutionState::LegAFailed);
            return self.finish(opportunity, permit, leg_a, None, trace, started_at).await;
        }
        trace.push(ExecutionState::LegAFilled);

        // Leg B: hedge exactly what filled, priced through the spread
        let price = (second.ask * (1.0 + self.config.aggressive_markup)).min(self.config.max_price);
        let request = OrderRequest::buy(
            second.instrument.clone(),
            price,
            leg_a.filled_size,
            OrderKind::AggressiveLimit,
        );
        trace.push(ExecutionState::LegBSubmitted);
        let leg_b = self.run_leg(&second, request, self.config.leg_b_timeout()).await;

        self.finish(opportunity, permit, leg_a, Some(leg_b), trace, started_at)
            .await
    }

    /// Cancel every resting order. Used on shutdown.
    pub async fn cancel_all_open(&self) -> usize {
        let orders = self.open_orders.snapshot();
        if orders.is_empty() {
            return 0;
        }

        warn!(count = orders.len(), "Cancelling all open orders");

        let cancels = orders.into_iter().map(|order| async move {
            let Some(client) = self.clients.get(&order.instrument.venue) else {
                error!(order = %order.order_id, venue = %order.instrument.venue, "No client to cancel order");
                return false;
            };
            match timeout(self.config.cancel_timeout(), client.cancel_order(&order.order_id)).await {
                Ok(Ok(outcome)) => {
                    info!(order = %order.order_id, ?outcome, "Open order cancelled");
                    self.open_orders.deregister(&order.order_id);
                    outcome == CancelOutcome::Acknowledged
                }
                Ok(Err(e)) => {
                    error!(order = %order.order_id, error = %e, "Failed to cancel open order");
                    false
                }
                Err(_) => {
                    error!(order = %order.order_id, "Timed out cancelling open order");
                    false
                }
            }
        });

        join_all(cancels).await.into_iter().filter(|ok| *ok).count()
    }

    fn plan(&self, opportunity: &ArbitrageOpportunity) -> Result<(LegPlan, LegPlan), VenueError> {
        let pair = &opportunity.pair;
        let client_for = |venue: Venue| self.clients.get(&venue).cloned().ok_or(VenueError::NotConnected);

        let a = LegPlan {
            client: client_for(pair.venue_a.venue)?,
            instrument: opportunity.instrument_a().clone(),
            ask: opportunity.venue_a_price,
            fee: pair.venue_a.fee,
        };
        let b = LegPlan {
            client: client_for(pair.venue_b.venue)?,
            instrument: opportunity.instrument_b().clone(),
            ask: opportunity.venue_b_price,
            fee: pair.venue_b.fee,
        };

        if !a.client.supports_fok() && b.client.supports_fok() {
            Ok((b, a))
        } else {
            Ok((a, b))
        }
    }

    /// Submit one order and wait for it to stop resting, at most `window`.
    /// A remainder still resting at the deadline is cancelled.
    async fn run_leg(&self, leg: &LegPlan, request: OrderRequest, window: std::time::Duration) -> LegOutcome {
        let deadline = Instant::now() + window;
        let mut outcome = LegOutcome::new(&request, leg.fee);

        info!(
            venue = %request.instrument.venue,
            instrument = %request.instrument,
            kind = ?request.kind,
            price = request.price,
            size = request.size,
            "Placing order"
        );

        let report = match timeout_at(deadline, leg.client.submit_order(&request)).await {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => {
                warn!(instrument = %request.instrument, error = %e, "Order failed");
                outcome.error = Some(e);
                return outcome;
            }
            Err(_) => {
                warn!(instrument = %request.instrument, "Order submission timed out");
                outcome.error = Some(VenueError::Timeout);
                self.cancel_unconfirmed(leg, &request, &mut outcome).await;
                return outcome;
            }
        };

        info!(
            order = %report.order_id,
            filled = report.filled_size,
            state = ?report.state,
            "✅ Order placed"
        );
        outcome.order_id = Some(report.order_id.clone());
        outcome.apply(&report);
        if !report.is_open() {
            return outcome;
        }

        let registered = report.order_id.clone();
        self.open_orders.register(&registered, &request.instrument);
        let mut last = report;

        while last.is_open() && outcome.filled_size + FILL_EPSILON < outcome.requested_size {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            sleep(self.config.fill_poll_interval().min(deadline - now)).await;

            match timeout_at(deadline, leg.client.order_status(&last.order_id)).await {
                Ok(Ok(report)) => {
                    outcome.apply(&report);
                    last = report;
                }
                Ok(Err(e)) => debug!(order = %last.order_id, error = %e, "Order status poll failed"),
                Err(_) => break,
            }
        }

        if last.is_open() && outcome.filled_size + FILL_EPSILON < outcome.requested_size {
            outcome.cancelled = true;
            self.cancel_remainder(leg, &last.order_id, &mut outcome).await;
        }
        self.open_orders.deregister(&registered);

        outcome
    }

    /// The post may have reached the venue even though no answer came back.
    async fn cancel_unconfirmed(&self, leg: &LegPlan, request: &OrderRequest, outcome: &mut LegOutcome) {
        let client_order_id = request.client_order_id;
        match timeout(self.config.cancel_timeout(), leg.client.cancel_unconfirmed(request)).await {
            Ok(Ok(CancelOutcome::Acknowledged)) => {
                outcome.cancelled = true;
                warn!(client_order_id = %client_order_id, "Unconfirmed order was live, cancelled");
            }
            Ok(Ok(CancelOutcome::AlreadyFilled)) => error!(
                client_order_id = %client_order_id,
                instrument = %request.instrument,
                "🚨 Unconfirmed order already filled, check venue position"
            ),
            Ok(Ok(CancelOutcome::UnknownOrder)) => {
                debug!(client_order_id = %client_order_id, "Unconfirmed order not found on venue")
            }
            Ok(Err(e)) => error!(client_order_id = %client_order_id, error = %e, "Cancel of unconfirmed order failed"),
            Err(_) => error!(client_order_id = %client_order_id, "Cancel of unconfirmed order timed out"),
        }
    }

    /// Best-effort cancel, then one status read for the final fill count.
    async fn cancel_remainder(&self, leg: &LegPlan, order_id: &str, outcome: &mut LegOutcome) {
        let limit = self.config.cancel_timeout();

        match timeout(limit, leg.client.cancel_order(order_id)).await {
            Ok(Ok(CancelOutcome::Acknowledged)) => info!(order = %order_id, "Resting remainder cancelled"),
            Ok(Ok(CancelOutcome::AlreadyFilled)) => info!(order = %order_id, "Order filled before cancel"),
            Ok(Ok(CancelOutcome::UnknownOrder)) => warn!(order = %order_id, "Venue does not know order on cancel"),
            Ok(Err(e)) => error!(order = %order_id, error = %e, "Cancel failed, order may still rest"),
            Err(_) => error!(order = %order_id, "Cancel timed out, order may still rest"),
        }

        match timeout(limit, leg.client.order_status(order_id)).await {
            Ok(Ok(report)) => outcome.apply(&report),
            Ok(Err(e)) => warn!(order = %order_id, error = %e, "Could not confirm final fill, using last known"),
            Err(_) => warn!(order = %order_id, "Could not confirm final fill, using last known"),
        }
    }

    async fn finish(
        &self,
        opportunity: ArbitrageOpportunity,
        permit: ExecutionPermit,
        leg_a: LegOutcome,
        leg_b: Option<LegOutcome>,
        mut trace: Vec<ExecutionState>,
        started_at: DateTime<Utc>,
    ) -> ExecutionResult {
        let a_filled = leg_a.filled_size;
        let b_filled = leg_b.as_ref().map(|l| l.filled_size).unwrap_or(0.0);
        let hedged = a_filled.min(b_filled);

        let mut unhedged: Vec<(InstrumentKey, f64)> = Vec::new();
        if a_filled - hedged > FILL_EPSILON {
            unhedged.push((leg_a.instrument.key(), a_filled - hedged));
        }
        if let Some(leg_b) = &leg_b {
            if b_filled - hedged > FILL_EPSILON {
                unhedged.push((leg_b.instrument.key(), b_filled - hedged));
            }
        }
        let unhedged_size: f64 = unhedged.iter().map(|(_, size)| size).sum();

        let status = if a_filled <= FILL_EPSILON {
            ExecutionStatus::BothFailed
        } else if unhedged_size <= FILL_EPSILON {
            ExecutionStatus::BothFilled
        } else {
            ExecutionStatus::PartialFilled
        };

        let realized_pnl = match &leg_b {
            Some(leg_b) if hedged > FILL_EPSILON => {
                let unit_cost = leg_a.fill_price() * (1.0 + leg_a.fee)
                    + leg_b.fill_price() * (1.0 + leg_b.fee)
                    + opportunity.pair.gas_estimate;
                hedged * (1.0 - unit_cost)
            }
            _ => 0.0,
        };

        trace.push(status.into());
        if leg_a.cancelled || leg_b.as_ref().is_some_and(|l| l.cancelled) {
            trace.push(ExecutionState::Unwound);
        }
        trace.push(ExecutionState::Terminal);

        let id = permit.id();
        permit.complete(&unhedged);

        let result = ExecutionResult {
            id,
            opportunity,
            leg_a,
            leg_b,
            realized_pnl,
            unhedged_size,
            status,
            trace,
            started_at,
            finished_at: Utc::now(),
        };

        match status {
            ExecutionStatus::BothFilled => info!(
                execution = %id,
                pair = %result.opportunity.pair.id,
                size = hedged,
                pnl = realized_pnl,
                "✅ Arbitrage executed successfully"
            ),
            ExecutionStatus::PartialFilled => error!(
                execution = %id,
                pair = %result.opportunity.pair.id,
                hedged,
                unhedged = unhedged_size,
                "⚠️ Partial execution, unhedged exposure left for manual reconciliation"
            ),
            ExecutionStatus::BothFailed => warn!(
                execution = %id,
                pair = %result.opportunity.pair.id,
                error = ?result.leg_a.error,
                "Arbitrage execution failed"
            ),
        }

        if let Some(tracker) = &self.position_tracker {
            tracker.lock().await.record(&result);
        }

        result
    }
}
