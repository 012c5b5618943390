//! Static registry of cross-venue market pairs.

use crate::config::{Config, MarketConfig, MarketSideConfig, VenuesConfig};
use crate::error::ConfigError;
use crate::market::{Instrument, InstrumentKey, Outcome, Venue};
use crate::venue::VenueClients;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// One venue's listing of a binary market.
#[derive(Debug, Clone, PartialEq)]
pub struct VenueMarket {
    pub venue: Venue,
    pub market_id: String,
    pub yes: Instrument,
    pub no: Instrument,
    /// Proportional taker fee.
    pub fee: f64,
    pub neg_risk: bool,
}

impl VenueMarket {
    pub fn new(
        venue: Venue,
        market_id: impl Into<String>,
        yes_token_id: impl Into<String>,
        no_token_id: impl Into<String>,
        fee: f64,
    ) -> Self {
        let market_id = market_id.into();
        Self {
            venue,
            yes: Instrument::new(venue, market_id.clone(), Outcome::Yes, yes_token_id),
            no: Instrument::new(venue, market_id.clone(), Outcome::No, no_token_id),
            market_id,
            fee,
            neg_risk: false,
        }
    }

    fn from_config(side: &MarketSideConfig) -> Self {
        let mut market = Self::new(
            side.venue,
            side.market_id.clone(),
            side.yes_token_id.clone(),
            side.no_token_id.clone(),
            side.fee,
        );
        market.neg_risk = side.neg_risk;
        market
    }

    pub fn instrument(&self, outcome: Outcome) -> &Instrument {
        match outcome {
            Outcome::Yes => &self.yes,
            Outcome::No => &self.no,
        }
    }
}

/// A logically equivalent binary market listed on two venues.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketPair {
    pub id: String,
    pub name: String,
    pub venue_a: VenueMarket,
    pub venue_b: VenueMarket,
    /// Per-unit gas/settlement cost of executing both legs.
    pub gas_estimate: f64,
    /// Oldest snapshot the pair will trade on.
    pub max_age: Duration,
}

impl MarketPair {
    pub fn new(
        id: impl Into<String>,
        venue_a: VenueMarket,
        venue_b: VenueMarket,
        gas_estimate: f64,
        max_age: Duration,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            venue_a,
            venue_b,
            gas_estimate,
            max_age,
        }
    }

    fn from_config(market: &MarketConfig, venues: &VenuesConfig) -> Self {
        let venue_a = VenueMarket::from_config(&market.venue_a);
        let venue_b = VenueMarket::from_config(&market.venue_b);
        let max_age = market
            .max_age_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| venues.max_age(venue_a.venue).min(venues.max_age(venue_b.venue)));

        Self {
            id: market.id.clone(),
            name: market.display_name().to_string(),
            venue_a,
            venue_b,
            gas_estimate: market.gas_estimate,
            max_age,
        }
    }

    pub fn instruments(&self) -> [&Instrument; 4] {
        [
            &self.venue_a.yes,
            &self.venue_a.no,
            &self.venue_b.yes,
            &self.venue_b.no,
        ]
    }

    pub fn venues(&self) -> [Venue; 2] {
        [self.venue_a.venue, self.venue_b.venue]
    }
}

/// Immutable after startup.
#[derive(Debug, Clone, Default)]
pub struct MarketRegistry {
    pairs: Vec<Arc<MarketPair>>,
}

impl MarketRegistry {
    pub fn new(pairs: Vec<MarketPair>) -> Self {
        Self {
            pairs: pairs.into_iter().map(Arc::new).collect(),
        }
    }

    /// Build from the enabled markets in `config`, checking each against the
    /// connected `clients`. Any error is fatal.
    pub fn from_config(config: &Config, clients: &VenueClients) -> Result<Self, Vec<ConfigError>> {
        let mut errors = Vec::new();
        let mut pairs = Vec::new();
        let mut ids = HashSet::new();

        for market in config.enabled_markets() {
            if !ids.insert(market.id.clone()) {
                errors.push(ConfigError::DuplicatePair(market.id.clone()));
                continue;
            }

            let pair = MarketPair::from_config(market, &config.venues);
            let mut fok_capable = false;
            let mut missing = false;
            for venue in pair.venues() {
                match clients.get(&venue) {
                    Some(client) => fok_capable |= client.supports_fok(),
                    None => {
                        missing = true;
                        errors.push(ConfigError::UnknownVenue {
                            pair: pair.id.clone(),
                            venue,
                        });
                    }
                }
            }
            if !missing && !fok_capable {
                errors.push(ConfigError::NoFokVenue { pair: pair.id.clone() });
            }

            pairs.push(pair);
        }

        if pairs.is_empty() && errors.is_empty() {
            errors.push(ConfigError::NoMarkets);
        }

        if errors.is_empty() {
            Ok(Self::new(pairs))
        } else {
            Err(errors)
        }
    }

    pub fn pairs(&self) -> &[Arc<MarketPair>] {
        &self.pairs
    }

    /// All instruments of a venue, deduplicated, for feed subscription.
    pub fn instruments_for(&self, venue: Venue) -> Vec<Instrument> {
        let mut seen = BTreeSet::new();
        let mut instruments = Vec::new();
        for pair in &self.pairs {
            for instrument in pair.instruments() {
                if instrument.venue == venue && seen.insert(instrument.key()) {
                    instruments.push(instrument.clone());
                }
            }
        }
        instruments
    }

    pub fn venues(&self) -> BTreeSet<Venue> {
        self.pairs.iter().flat_map(|p| p.venues()).collect()
    }

    /// Pairs an instrument participates in.
    pub fn pairs_with(&self, key: &InstrumentKey) -> Vec<&Arc<MarketPair>> {
        self.pairs
            .iter()
            .filter(|p| p.instruments().iter().any(|i| &i.key() == key))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(id: &str, pm_yes: &str) -> MarketPair {
        MarketPair::new(
            id,
            VenueMarket::new(Venue::Polymarket, "pm", pm_yes, format!("{pm_yes}-no"), 0.0),
            VenueMarket::new(Venue::PredictFun, "pf", format!("{id}-yes"), format!("{id}-no"), 0.02),
            0.01,
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_shared_instrument_is_listed_once() {
        let registry = MarketRegistry::new(vec![pair("a", "shared"), pair("b", "shared")]);

        let pm = registry.instruments_for(Venue::Polymarket);
        assert_eq!(pm.len(), 2);
        let pf = registry.instruments_for(Venue::PredictFun);
        assert_eq!(pf.len(), 4);

        let key = InstrumentKey::new(Venue::Polymarket, "shared");
        assert_eq!(registry.pairs_with(&key).len(), 2);
    }

    #[test]
    fn test_venues_of_all_pairs() {
        let registry = MarketRegistry::new(vec![pair("a", "x"), pair("b", "y")]);
        assert_eq!(registry.venues().len(), 2);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_from_config_requires_clients() {
        let config = Config::from_yaml(
            r#"
markets:
  - id: m1
    venue_a: { venue: polymarket, market_id: a, yes_token_id: "1", no_token_id: "2" }
    venue_b: { venue: predict_fun, market_id: b, yes_token_id: "3", no_token_id: "4" }
"#,
        )
        .unwrap();

        let errors = MarketRegistry::from_config(&config, &VenueClients::new()).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors
            .iter()
            .all(|e| matches!(e, ConfigError::UnknownVenue { pair, .. } if pair == "m1")));
    }
}
