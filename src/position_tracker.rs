use crate::market::{Instrument, Venue};
use crate::order_executor::{ExecutionResult, ExecutionStatus};
use crate::risk_gate::RiskGate;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub enum PositionStatus {
    Open,     // Filled on one venue only, waiting for manual reconciliation
    Resolved, // Closed or hedged by the operator
}

/// Size left unhedged by a `PartialFilled` execution.
#[derive(Debug, Clone, Serialize)]
pub struct UnhedgedPosition {
    pub id: String,
    pub execution_id: String,
    pub pair_id: String,
    pub instrument: Instrument,
    pub size: f64,
    pub price: f64,       // Average fill price of the filled leg
    pub order_id: Option<String>,
    pub reason: String,
    pub status: PositionStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl UnhedgedPosition {
    fn from_result(result: &ExecutionResult) -> Option<Self> {
        if result.status != ExecutionStatus::PartialFilled || result.unhedged_size <= 0.0 {
            return None;
        }

        let leg = result.unhedged_leg()?;
        let reason = result
            .leg_b
            .as_ref()
            .and_then(|leg_b| leg_b.error.as_ref())
            .map(|e| e.to_string())
            .unwrap_or_else(|| "hedge leg not filled before deadline".to_string());

        Some(Self {
            id: format!("{}_{}", leg.instrument.venue, &uuid::Uuid::new_v4().to_string()[..8]),
            execution_id: result.id.to_string(),
            pair_id: result.opportunity.pair.id.clone(),
            instrument: leg.instrument.clone(),
            size: result.unhedged_size,
            price: leg.fill_price(),
            order_id: leg.order_id.clone(),
            reason,
            status: PositionStatus::Open,
            created_at: result.finished_at,
            resolved_at: None,
        })
    }

    /// Capital at risk if the held outcome resolves against us.
    pub fn cost(&self) -> f64 {
        self.size * self.price
    }
}

/// Ledger of execution results and the unhedged positions they left behind.
#[derive(Default)]
pub struct PositionTracker {
    positions: HashMap<String, UnhedgedPosition>,
    executions: usize,
    both_filled: usize,
    partial_filled: usize,
    both_failed: usize,
    realized_pnl: f64,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a terminal execution. Returns the id of the unhedged position it
    /// opened, if any.
    pub fn record(&mut self, result: &ExecutionResult) -> Option<String> {
        self.executions += 1;
        self.realized_pnl += result.realized_pnl;
        match result.status {
            ExecutionStatus::BothFilled => self.both_filled += 1,
            ExecutionStatus::PartialFilled => self.partial_filled += 1,
            ExecutionStatus::BothFailed => self.both_failed += 1,
        }

        let position = UnhedgedPosition::from_result(result)?;
        warn!(
            position = %position.id,
            pair = %position.pair_id,
            instrument = %position.instrument,
            size = position.size,
            price = position.price,
            "📝 Tracking unhedged position"
        );
        let id = position.id.clone();
        self.positions.insert(id.clone(), position);
        Some(id)
    }

    pub fn get_open_positions(&self) -> Vec<&UnhedgedPosition> {
        let mut open: Vec<_> = self
            .positions
            .values()
            .filter(|p| p.status == PositionStatus::Open)
            .collect();
        open.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        open
    }

    pub fn get_all_positions(&self) -> Vec<&UnhedgedPosition> {
        self.positions.values().collect()
    }

    pub fn get_positions_by_venue(&self, venue: Venue) -> Vec<&UnhedgedPosition> {
        self.positions
            .values()
            .filter(|p| p.instrument.venue == venue)
            .collect()
    }

    /// Mark a position as handled and clear its size from the risk gate.
    /// Returns the resolved size.
    pub fn resolve_position(&mut self, position_id: &str, risk: &RiskGate) -> Option<f64> {
        let position = self.positions.get_mut(position_id)?;
        if position.status == PositionStatus::Resolved {
            return None;
        }

        position.status = PositionStatus::Resolved;
        position.resolved_at = Some(Utc::now());
        risk.resolve_exposure(&position.instrument.key(), position.size);

        info!(
            position = %position.id,
            instrument = %position.instrument,
            size = position.size,
            "💰 Unhedged position resolved"
        );
        Some(position.size)
    }

    pub fn open_unhedged_size(&self) -> f64 {
        self.get_open_positions().iter().map(|p| p.size).sum()
    }

    pub fn get_statistics(&self) -> ExecutionStatistics {
        let open = self.get_open_positions();
        ExecutionStatistics {
            executions: self.executions,
            both_filled: self.both_filled,
            partial_filled: self.partial_filled,
            both_failed: self.both_failed,
            realized_pnl: self.realized_pnl,
            open_positions: open.len(),
            open_unhedged_size: open.iter().map(|p| p.size).sum(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionStatistics {
    pub executions: usize,
    pub both_filled: usize,
    pub partial_filled: usize,
    pub both_failed: usize,
    pub realized_pnl: f64,
    pub open_positions: usize,
    pub open_unhedged_size: f64,
}
