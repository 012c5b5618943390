use crate::config::ArbitrageConfig;
use crate::market::{Instrument, OrderbookSnapshot, Outcome};
use crate::market_registry::{MarketPair, MarketRegistry};
use crate::orderbook_cache::{is_snapshot_fresh, OrderbookCache};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Which complementary tokens are bought on which venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Direction {
    /// Buy Yes on venue A + buy No on venue B
    BuyYesANoB,
    /// Buy No on venue A + buy Yes on venue B
    BuyNoAYesB,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::BuyYesANoB, Direction::BuyNoAYesB];

    pub fn outcome_a(self) -> Outcome {
        match self {
            Direction::BuyYesANoB => Outcome::Yes,
            Direction::BuyNoAYesB => Outcome::No,
        }
    }

    pub fn outcome_b(self) -> Outcome {
        match self {
            Direction::BuyYesANoB => Outcome::No,
            Direction::BuyNoAYesB => Outcome::Yes,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::BuyYesANoB => f.write_str("YES_A+NO_B"),
            Direction::BuyNoAYesB => f.write_str("NO_A+YES_B"),
        }
    }
}

/// A priced, sized signal for one pair and direction. Never mutated.
#[derive(Debug, Clone)]
pub struct ArbitrageOpportunity {
    pub pair: Arc<MarketPair>,
    pub direction: Direction,
    pub venue_a_price: f64,
    pub venue_b_price: f64,
    /// Per-unit cost including fees and gas; a complete set pays out 1.0.
    pub total_cost: f64,
    pub profit_pct: f64,
    /// Executable size at the quoted prices.
    pub size: f64,
    pub detected_at: DateTime<Utc>,
}

impl ArbitrageOpportunity {
    pub fn instrument_a(&self) -> &Instrument {
        self.pair.venue_a.instrument(self.direction.outcome_a())
    }

    pub fn instrument_b(&self) -> &Instrument {
        self.pair.venue_b.instrument(self.direction.outcome_b())
    }

    pub fn unit_profit(&self) -> f64 {
        1.0 - self.total_cost
    }

    pub fn expected_profit(&self) -> f64 {
        self.unit_profit() * self.size
    }
}

/// Per-unit cost of buying both legs at `price_a` and `price_b`.
pub fn total_cost(price_a: f64, fee_a: f64, price_b: f64, fee_b: f64, gas_estimate: f64) -> f64 {
    price_a * (1.0 + fee_a) + price_b * (1.0 + fee_b) + gas_estimate
}

/// `None` when the set costs at least its payout.
pub fn profit_pct(total_cost: f64) -> Option<f64> {
    if total_cost >= 1.0 || total_cost <= 0.0 {
        return None;
    }
    Some((1.0 - total_cost) / total_cost)
}

/// Stateless scanner over the registry and the cache.
pub struct ArbitrageEngine {
    registry: Arc<MarketRegistry>,
    cache: Arc<OrderbookCache>,
    params: ArbitrageConfig,
}

impl ArbitrageEngine {
    pub fn new(registry: Arc<MarketRegistry>, cache: Arc<OrderbookCache>, params: ArbitrageConfig) -> Self {
        Self {
            registry,
            cache,
            params,
        }
    }

    pub fn params(&self) -> &ArbitrageConfig {
        &self.params
    }

    pub fn scan(&self) -> Vec<ArbitrageOpportunity> {
        self.scan_at(Utc::now())
    }

    /// One detection cycle: every qualifying opportunity, best first.
    pub fn scan_at(&self, now: DateTime<Utc>) -> Vec<ArbitrageOpportunity> {
        let mut opportunities: Vec<_> = self
            .registry
            .pairs()
            .iter()
            .flat_map(|pair| self.check_pair(pair, now))
            .collect();

        rank(&mut opportunities);
        opportunities
    }

    /// Both directions of one pair. Empty if any book is missing or stale.
    pub fn check_pair(&self, pair: &Arc<MarketPair>, now: DateTime<Utc>) -> Vec<ArbitrageOpportunity> {
        let books = self.cache.get_many(&pair.instruments());
        let mut snapshots = Vec::with_capacity(books.len());
        for (instrument, book) in pair.instruments().iter().zip(books) {
            match book {
                Some(snapshot) if is_snapshot_fresh(&snapshot, pair.max_age, now) => snapshots.push(snapshot),
                Some(_) => {
                    debug!(pair = %pair.id, instrument = %instrument, "Stale orderbook, skipping pair");
                    return Vec::new();
                }
                None => {
                    debug!(pair = %pair.id, instrument = %instrument, "Missing orderbook, skipping pair");
                    return Vec::new();
                }
            }
        }

        // instruments() order: A yes, A no, B yes, B no
        let (a_yes, a_no, b_yes, b_no) = (&snapshots[0], &snapshots[1], &snapshots[2], &snapshots[3]);

        Direction::ALL
            .iter()
            .filter_map(|&direction| {
                let (a, b) = match direction {
                    Direction::BuyYesANoB => (a_yes, b_no),
                    Direction::BuyNoAYesB => (a_no, b_yes),
                };
                self.check_direction(pair, direction, a, b, now)
            })
            .collect()
    }

    fn check_direction(
        &self,
        pair: &Arc<MarketPair>,
        direction: Direction,
        book_a: &OrderbookSnapshot,
        book_b: &OrderbookSnapshot,
        now: DateTime<Utc>,
    ) -> Option<ArbitrageOpportunity> {
        if !book_a.has_ask() || !book_b.has_ask() {
            return None;
        }

        // We're buying at ask prices
        let price_a = book_a.best_ask;
        let price_b = book_b.best_ask;
        let cost = total_cost(price_a, pair.venue_a.fee, price_b, pair.venue_b.fee, pair.gas_estimate);

        let profit = profit_pct(cost)?;
        if profit < self.params.min_profit_pct {
            return None;
        }

        let size = book_a.ask_size.min(book_b.ask_size).min(self.params.max_position_size);
        if size < self.params.min_position_size {
            debug!(
                pair = %pair.id,
                %direction,
                size,
                min = self.params.min_position_size,
                "Size too small"
            );
            return None;
        }

        info!(
            pair = %pair.id,
            %direction,
            price_a,
            price_b,
            total_cost = cost,
            "Arbitrage found: {} | Profit={:.2}%",
            pair.name,
            profit * 100.0
        );

        Some(ArbitrageOpportunity {
            pair: pair.clone(),
            direction,
            venue_a_price: price_a,
            venue_b_price: price_b,
            total_cost: cost,
            profit_pct: profit,
            size,
            detected_at: now,
        })
    }
}

/// Descending profit, then earlier detection, then pair id, then direction.
pub fn rank(opportunities: &mut [ArbitrageOpportunity]) {
    opportunities.sort_by(compare);
}

fn compare(a: &ArbitrageOpportunity, b: &ArbitrageOpportunity) -> Ordering {
    b.profit_pct
        .total_cmp(&a.profit_pct)
        .then_with(|| a.detected_at.cmp(&b.detected_at))
        .then_with(|| a.pair.id.cmp(&b.pair.id))
        .then_with(|| a.direction.cmp(&b.direction))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::Venue;
    use crate::market_registry::VenueMarket;
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;

    struct Books {
        a_yes: f64,
        a_no: f64,
        b_yes: f64,
        b_no: f64,
    }

    fn pair(id: &str, fee_a: f64, fee_b: f64, gas: f64) -> MarketPair {
        MarketPair::new(
            id,
            VenueMarket::new(Venue::Polymarket, format!("{id}-pm"), format!("{id}-pm-yes"), format!("{id}-pm-no"), fee_a),
            VenueMarket::new(Venue::PredictFun, format!("{id}-pf"), format!("{id}-pf-yes"), format!("{id}-pf-no"), fee_b),
            gas,
            Duration::from_secs(5),
        )
    }

    fn params(min_profit_pct: f64) -> ArbitrageConfig {
        ArbitrageConfig {
            min_profit_pct,
            max_position_size: 100.0,
            min_position_size: 5.0,
            detection_interval_ms: 100,
        }
    }

    fn seed(cache: &OrderbookCache, pair: &MarketPair, books: &Books, at: DateTime<Utc>, size: f64) {
        let asks = [books.a_yes, books.a_no, books.b_yes, books.b_no];
        for (instrument, ask) in pair.instruments().into_iter().zip(asks) {
            cache.update(OrderbookSnapshot::new(instrument.clone(), ask - 0.01, ask, size, size, at));
        }
    }

    fn engine(pairs: Vec<MarketPair>, min_profit_pct: f64) -> (ArbitrageEngine, Arc<OrderbookCache>, Arc<MarketRegistry>) {
        let registry = Arc::new(MarketRegistry::new(pairs));
        let cache = Arc::new(OrderbookCache::new());
        (
            ArbitrageEngine::new(registry.clone(), cache.clone(), params(min_profit_pct)),
            cache,
            registry,
        )
    }

    #[test]
    fn test_reference_scenario_meets_two_percent() {
        let (engine, cache, registry) = engine(vec![pair("btc", 0.0, 0.01, 0.01)], 0.02);
        let now = Utc::now();
        // A yes 0.48 + B no 0.47 is the cheap direction; the other one is far above 1.0
        seed(&cache, &registry.pairs()[0], &Books { a_yes: 0.48, a_no: 0.60, b_yes: 0.60, b_no: 0.47 }, now, 100.0);

        let opportunities = engine.scan_at(now);

        assert_eq!(opportunities.len(), 1);
        let opp = &opportunities[0];
        assert_eq!(opp.direction, Direction::BuyYesANoB);
        assert!((opp.total_cost - 0.9647).abs() < 1e-9);
        assert!((opp.profit_pct - (1.0 - 0.9647) / 0.9647).abs() < 1e-9);
        assert_eq!(opp.venue_a_price, 0.48);
        assert_eq!(opp.venue_b_price, 0.47);
        assert_eq!(opp.instrument_a().token_id, "btc-pm-yes");
        assert_eq!(opp.instrument_b().token_id, "btc-pf-no");
    }

    #[test]
    fn test_reference_scenario_below_five_percent() {
        let (engine, cache, registry) = engine(vec![pair("btc", 0.0, 0.01, 0.01)], 0.05);
        let now = Utc::now();
        seed(&cache, &registry.pairs()[0], &Books { a_yes: 0.48, a_no: 0.60, b_yes: 0.60, b_no: 0.47 }, now, 100.0);

        assert!(engine.scan_at(now).is_empty());
    }

    #[test]
    fn test_no_opportunity_when_sum_above_one() {
        let (engine, cache, registry) = engine(vec![pair("m", 0.0, 0.0, 0.0)], 0.0);
        let now = Utc::now();
        seed(&cache, &registry.pairs()[0], &Books { a_yes: 0.51, a_no: 0.52, b_yes: 0.50, b_no: 0.51 }, now, 100.0);

        assert!(engine.scan_at(now).is_empty());
    }

    #[test]
    fn test_threshold_boundary_is_included() {
        let cost = total_cost(0.40, 0.0, 0.50, 0.0, 0.0);
        let threshold = profit_pct(cost).unwrap();
        let (engine, cache, registry) = engine(vec![pair("m", 0.0, 0.0, 0.0)], threshold);
        let now = Utc::now();
        seed(&cache, &registry.pairs()[0], &Books { a_yes: 0.40, a_no: 0.70, b_yes: 0.70, b_no: 0.50 }, now, 100.0);

        assert_eq!(engine.scan_at(now).len(), 1);
    }

    #[test]
    fn test_both_directions_emitted_and_ranked() {
        let (engine, cache, registry) = engine(vec![pair("m", 0.0, 0.0, 0.0)], 0.02);
        let now = Utc::now();
        // YES_A+NO_B = 0.85, NO_A+YES_B = 0.75
        seed(&cache, &registry.pairs()[0], &Books { a_yes: 0.40, a_no: 0.35, b_yes: 0.40, b_no: 0.45 }, now, 100.0);

        let opportunities = engine.scan_at(now);

        assert_eq!(opportunities.len(), 2);
        assert_eq!(opportunities[0].direction, Direction::BuyNoAYesB);
        assert_eq!(opportunities[1].direction, Direction::BuyYesANoB);
        assert!(opportunities[0].profit_pct > opportunities[1].profit_pct);
    }

    #[test]
    fn test_ties_broken_by_pair_id() {
        let (engine, cache, registry) = engine(vec![pair("zeta", 0.0, 0.0, 0.0), pair("alpha", 0.0, 0.0, 0.0)], 0.02);
        let now = Utc::now();
        let books = Books { a_yes: 0.40, a_no: 0.70, b_yes: 0.70, b_no: 0.45 };
        for p in registry.pairs() {
            seed(&cache, p, &books, now, 100.0);
        }

        let opportunities = engine.scan_at(now);

        assert_eq!(opportunities.len(), 2);
        assert_eq!(opportunities[0].pair.id, "alpha");
        assert_eq!(opportunities[1].pair.id, "zeta");
    }

    #[test]
    fn test_ties_broken_by_detection_time() {
        let registry = MarketRegistry::new(vec![pair("b", 0.0, 0.0, 0.0), pair("a", 0.0, 0.0, 0.0)]);
        let now = Utc::now();
        let make = |pair: &Arc<MarketPair>, at| ArbitrageOpportunity {
            pair: pair.clone(),
            direction: Direction::BuyYesANoB,
            venue_a_price: 0.4,
            venue_b_price: 0.4,
            total_cost: 0.8,
            profit_pct: 0.25,
            size: 10.0,
            detected_at: at,
        };
        let mut opportunities = vec![
            make(&registry.pairs()[1], now),
            make(&registry.pairs()[0], now - ChronoDuration::milliseconds(5)),
        ];

        rank(&mut opportunities);

        assert_eq!(opportunities[0].pair.id, "b");
    }

    #[test]
    fn test_stale_snapshot_suppresses_pair() {
        let (engine, cache, registry) = engine(vec![pair("m", 0.0, 0.0, 0.0)], 0.02);
        let now = Utc::now();
        let p = registry.pairs()[0].clone();
        seed(&cache, &p, &Books { a_yes: 0.40, a_no: 0.70, b_yes: 0.70, b_no: 0.45 }, now, 100.0);
        assert_eq!(engine.scan_at(now).len(), 1);

        // Six seconds later only venue A has refreshed
        let later = now + ChronoDuration::seconds(6);
        for instrument in [&p.venue_a.yes, &p.venue_a.no] {
            cache.update(OrderbookSnapshot::new(instrument.clone(), 0.39, 0.40, 100.0, 100.0, later));
        }

        assert!(engine.scan_at(later).is_empty());
    }

    #[test]
    fn test_missing_snapshot_suppresses_pair() {
        let (engine, cache, registry) = engine(vec![pair("m", 0.0, 0.0, 0.0)], 0.02);
        let p = registry.pairs()[0].clone();
        cache.update(OrderbookSnapshot::new(p.venue_a.yes.clone(), 0.39, 0.40, 100.0, 100.0, Utc::now()));

        assert!(engine.scan().is_empty());
    }

    #[test]
    fn test_size_capped_and_minimum_enforced() {
        let (engine, cache, registry) = engine(vec![pair("m", 0.0, 0.0, 0.0)], 0.02);
        let now = Utc::now();
        let books = Books { a_yes: 0.40, a_no: 0.70, b_yes: 0.70, b_no: 0.45 };

        seed(&cache, &registry.pairs()[0], &books, now, 500.0);
        assert_eq!(engine.scan_at(now)[0].size, 100.0);

        let later = now + ChronoDuration::milliseconds(1);
        seed(&cache, &registry.pairs()[0], &books, later, 3.0);
        assert!(engine.scan_at(later).is_empty());
    }

    #[test]
    fn test_detection_is_stateless() {
        let (engine, cache, registry) = engine(vec![pair("m", 0.0, 0.0, 0.0)], 0.02);
        let now = Utc::now();
        seed(&cache, &registry.pairs()[0], &Books { a_yes: 0.40, a_no: 0.70, b_yes: 0.70, b_no: 0.45 }, now, 100.0);

        assert_eq!(engine.scan_at(now).len(), 1);
        assert_eq!(engine.scan_at(now).len(), 1);
    }
}
