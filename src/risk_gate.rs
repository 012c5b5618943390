//! Pre-execution risk checks and exposure bookkeeping.
//!
//! State is locked per key: one map entry per pair for the in-flight marker
//! and one mutex per instrument for exposure. Unrelated pairs never contend.
//! Lock order is always pair entry first, then instruments sorted by key.

use crate::arbitrage_engine::ArbitrageOpportunity;
use crate::config::RiskConfig;
use crate::market::InstrumentKey;
use crate::orderbook_cache::OrderbookCache;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RejectReason {
    #[error("snapshot for {instrument} went stale before approval")]
    StaleAtApproval { instrument: InstrumentKey },

    #[error("an execution for pair {pair} is already in flight")]
    PairInFlight { pair: String },

    #[error("exposure limit exceeded on {instrument}: current {current} + requested {requested} > limit {limit}")]
    ExposureLimitExceeded {
        instrument: InstrumentKey,
        current: f64,
        requested: f64,
        limit: f64,
    },
}

#[derive(Debug, Default, Clone, Copy)]
struct ExposureState {
    /// Filled but unhedged size.
    unhedged: f64,
    /// Held by approved executions that have not completed.
    reserved: f64,
}

pub struct RiskGate {
    cache: Arc<OrderbookCache>,
    limits: RiskConfig,
    exposure: DashMap<InstrumentKey, Arc<Mutex<ExposureState>>>,
    in_flight: DashMap<String, Uuid>,
}

impl RiskGate {
    pub fn new(cache: Arc<OrderbookCache>, limits: RiskConfig) -> Arc<Self> {
        Arc::new(Self {
            cache,
            limits,
            exposure: DashMap::new(),
            in_flight: DashMap::new(),
        })
    }

    pub fn approve(self: &Arc<Self>, opportunity: &ArbitrageOpportunity) -> Result<ExecutionPermit, RejectReason> {
        self.approve_at(opportunity, Utc::now())
    }

    /// Approve at an explicit wall-clock time.
    ///
    /// On success the pair is marked in flight and `opportunity.size` is
    /// reserved on both legs until the permit is completed or dropped.
    pub fn approve_at(
        self: &Arc<Self>,
        opportunity: &ArbitrageOpportunity,
        now: DateTime<Utc>,
    ) -> Result<ExecutionPermit, RejectReason> {
        let pair = &opportunity.pair;

        // Prices may have moved since detection
        for instrument in [opportunity.instrument_a(), opportunity.instrument_b()] {
            if !self.cache.is_fresh_at(instrument, pair.max_age, now) {
                debug!(pair = %pair.id, %instrument, "Rejected: stale at approval");
                return Err(RejectReason::StaleAtApproval {
                    instrument: instrument.key(),
                });
            }
        }

        let slot = match self.in_flight.entry(pair.id.clone()) {
            Entry::Occupied(_) => {
                debug!(pair = %pair.id, "Rejected: pair in flight");
                return Err(RejectReason::PairInFlight { pair: pair.id.clone() });
            }
            Entry::Vacant(slot) => slot,
        };

        let size = opportunity.size;
        let mut keys = vec![opportunity.instrument_a().key(), opportunity.instrument_b().key()];
        keys.sort();
        keys.dedup();

        let states: Vec<_> = keys.iter().map(|key| self.slot(key)).collect();
        let mut guards: Vec<_> = states.iter().map(|state| state.lock()).collect();

        for (key, guard) in keys.iter().zip(guards.iter()) {
            let current = guard.unhedged + guard.reserved;
            let limit = self.limits.limit_for(key);
            if current + size > limit + EPSILON {
                warn!(
                    pair = %pair.id,
                    instrument = %key,
                    current,
                    requested = size,
                    limit,
                    "Exposure limit would be exceeded"
                );
                return Err(RejectReason::ExposureLimitExceeded {
                    instrument: key.clone(),
                    current,
                    requested: size,
                    limit,
                });
            }
        }

        for guard in guards.iter_mut() {
            guard.reserved += size;
        }
        drop(guards);

        let id = Uuid::new_v4();
        slot.insert(id);

        debug!(pair = %pair.id, execution = %id, size, "Execution approved");

        Ok(ExecutionPermit {
            gate: self.clone(),
            id,
            pair_id: pair.id.clone(),
            size,
            reservations: keys,
            finished: false,
        })
    }

    /// Filled-but-unhedged size on an instrument, across all pairs.
    pub fn exposure(&self, key: &InstrumentKey) -> f64 {
        self.exposure.get(key).map(|s| s.lock().unhedged).unwrap_or(0.0)
    }

    pub fn reserved(&self, key: &InstrumentKey) -> f64 {
        self.exposure.get(key).map(|s| s.lock().reserved).unwrap_or(0.0)
    }

    pub fn total_exposure(&self) -> f64 {
        self.exposure.iter().map(|s| s.value().lock().unhedged).sum()
    }

    /// Instruments carrying unhedged size, sorted by key.
    pub fn open_exposures(&self) -> Vec<(InstrumentKey, f64)> {
        let mut open: Vec<_> = self
            .exposure
            .iter()
            .map(|s| (s.key().clone(), s.value().lock().unhedged))
            .filter(|(_, size)| *size > EPSILON)
            .collect();
        open.sort_by(|a, b| a.0.cmp(&b.0));
        open
    }

    pub fn is_in_flight(&self, pair_id: &str) -> bool {
        self.in_flight.contains_key(pair_id)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Clear unhedged size after the position was closed or hedged by hand.
    pub fn resolve_exposure(&self, key: &InstrumentKey, size: f64) {
        let state = self.slot(key);
        let mut state = state.lock();
        state.unhedged = (state.unhedged - size).max(0.0);
        info!(instrument = %key, resolved = size, remaining = state.unhedged, "Exposure resolved");
    }

    #[cfg(test)]
    fn add_exposure(&self, key: &InstrumentKey, size: f64) {
        if size <= EPSILON {
            return;
        }
        let state = self.slot(key);
        let mut state = state.lock();
        state.unhedged += size;
        warn!(instrument = %key, added = size, total = state.unhedged, "Unhedged exposure recorded");
    }

    fn slot(&self, key: &InstrumentKey) -> Arc<Mutex<ExposureState>> {
        if let Some(state) = self.exposure.get(key) {
            return state.value().clone();
        }
        self.exposure
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(ExposureState::default())))
            .value()
            .clone()
    }

    /// Drop the permit's reservation and book `unhedged` in one critical
    /// section per instrument, then clear the pair's in-flight mark.
    fn settle(&self, permit: &ExecutionPermit, unhedged: &[(InstrumentKey, f64)]) {
        let mut keys: Vec<InstrumentKey> = permit
            .reservations
            .iter()
            .chain(unhedged.iter().filter(|(_, size)| *size > EPSILON).map(|(key, _)| key))
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();

        let states: Vec<_> = keys.iter().map(|key| self.slot(key)).collect();
        let mut guards: Vec<_> = states.iter().map(|state| state.lock()).collect();

        for (key, guard) in keys.iter().zip(guards.iter_mut()) {
            if permit.reservations.contains(key) {
                guard.reserved = (guard.reserved - permit.size).max(0.0);
            }
            let added: f64 = unhedged
                .iter()
                .filter(|(k, size)| k == key && *size > EPSILON)
                .map(|(_, size)| size)
                .sum();
            if added > 0.0 {
                guard.unhedged += added;
                warn!(instrument = %key, added, total = guard.unhedged, "Unhedged exposure recorded");
            }
        }
        drop(guards);

        self.in_flight.remove_if(&permit.pair_id, |_, id| *id == permit.id);
    }
}

/// Proof of approval. Holds the pair's in-flight mark and the exposure
/// reservation until [`ExecutionPermit::complete`] is called or it is dropped.
pub struct ExecutionPermit {
    gate: Arc<RiskGate>,
    id: Uuid,
    pair_id: String,
    size: f64,
    reservations: Vec<InstrumentKey>,
    finished: bool,
}

impl ExecutionPermit {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn pair_id(&self) -> &str {
        &self.pair_id
    }

    pub fn size(&self) -> f64 {
        self.size
    }

    /// Release the reservation and record what was actually left unhedged.
    pub fn complete(mut self, unhedged: &[(InstrumentKey, f64)]) {
        self.gate.settle(&self, unhedged);
        self.finished = true;
        debug!(pair = %self.pair_id, execution = %self.id, "Execution permit completed");
    }
}

impl Drop for ExecutionPermit {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                pair = %self.pair_id,
                execution = %self.id,
                "Execution permit dropped without completion, releasing reservation"
            );
            self.gate.settle(self, &[]);
        }
    }
}
