use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported venues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Venue {
    Polymarket,
    PredictFun,
}

impl Venue {
    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Polymarket => "polymarket",
            Venue::PredictFun => "predict_fun",
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Yes,
    No,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Yes => f.write_str("YES"),
            Outcome::No => f.write_str("NO"),
        }
    }
}

/// One outcome token on one venue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    pub venue: Venue,
    pub market_id: String,
    pub outcome: Outcome,
    pub token_id: String,
}

impl Instrument {
    pub fn new(
        venue: Venue,
        market_id: impl Into<String>,
        outcome: Outcome,
        token_id: impl Into<String>,
    ) -> Self {
        Self {
            venue,
            market_id: market_id.into(),
            outcome,
            token_id: token_id.into(),
        }
    }

    pub fn key(&self) -> InstrumentKey {
        InstrumentKey {
            venue: self.venue,
            token_id: self.token_id.clone(),
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.venue, self.market_id, self.outcome)
    }
}

/// Identity of an instrument for cache and exposure lookups.
///
/// Token ids are unique within a venue, so `(venue, token_id)` is enough.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstrumentKey {
    pub venue: Venue,
    pub token_id: String,
}

impl InstrumentKey {
    pub fn new(venue: Venue, token_id: impl Into<String>) -> Self {
        Self {
            venue,
            token_id: token_id.into(),
        }
    }
}

impl fmt::Display for InstrumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.venue, self.token_id)
    }
}

/// Top-of-book snapshot for a single instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderbookSnapshot {
    pub instrument: Instrument,
    pub best_bid: f64,
    pub best_ask: f64,
    pub bid_size: f64,
    pub ask_size: f64,
    pub observed_at: DateTime<Utc>,
}

impl OrderbookSnapshot {
    pub fn new(
        instrument: Instrument,
        best_bid: f64,
        best_ask: f64,
        bid_size: f64,
        ask_size: f64,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            instrument,
            best_bid,
            best_ask,
            bid_size,
            ask_size,
            observed_at,
        }
    }

    /// Build a snapshot from full price levels, `(price, size)` pairs in any order.
    pub fn from_levels(
        instrument: Instrument,
        bids: &[(f64, f64)],
        asks: &[(f64, f64)],
        observed_at: DateTime<Utc>,
    ) -> Self {
        let (best_bid, bid_size) = bids
            .iter()
            .copied()
            .filter(|(_, size)| *size > 0.0)
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .unwrap_or((0.0, 0.0));
        let (best_ask, ask_size) = asks
            .iter()
            .copied()
            .filter(|(_, size)| *size > 0.0)
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .unwrap_or((0.0, 0.0));

        Self::new(instrument, best_bid, best_ask, bid_size, ask_size, observed_at)
    }

    /// An empty ask side cannot be bought.
    pub fn has_ask(&self) -> bool {
        self.best_ask > 0.0 && self.ask_size > 0.0
    }

    pub fn spread(&self) -> f64 {
        self.best_ask - self.best_bid
    }

    pub fn mid_price(&self) -> f64 {
        (self.best_bid + self.best_ask) / 2.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => f.write_str("BUY"),
            Side::Sell => f.write_str("SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    /// Fills entirely and immediately, or not at all.
    Fok,
    /// Limit order priced through the spread.
    AggressiveLimit,
}
