//! Typed configuration.
//!
//! The file (YAML or TOML, chosen by extension) holds trading parameters and
//! the market registry. Secrets never live in the file: they are read from
//! the environment, after `.env` has been loaded by `main`.

use crate::error::ConfigError;
use crate::market::{InstrumentKey, Venue};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub arbitrage: ArbitrageConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub venues: VenuesConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub markets: Vec<MarketConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArbitrageConfig {
    /// Minimum `(1 - cost) / cost`, boundary included.
    pub min_profit_pct: f64,
    pub max_position_size: f64,
    pub min_position_size: f64,
    pub detection_interval_ms: u64,
}

impl Default for ArbitrageConfig {
    fn default() -> Self {
        Self {
            min_profit_pct: 0.02,
            max_position_size: 100.0,
            min_position_size: 5.0,
            detection_interval_ms: 500,
        }
    }
}

impl ArbitrageConfig {
    pub fn detection_interval(&self) -> Duration {
        Duration::from_millis(self.detection_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub leg_a_timeout_ms: u64,
    pub leg_b_timeout_ms: u64,
    pub fill_poll_interval_ms: u64,
    pub cancel_timeout_ms: u64,
    /// Leg B limit price is `ask * (1 + aggressive_markup)`.
    pub aggressive_markup: f64,
    /// Hard ceiling for any limit price.
    pub max_price: f64,
    pub shutdown_grace_ms: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            leg_a_timeout_ms: 3_000,
            leg_b_timeout_ms: 5_000,
            fill_poll_interval_ms: 250,
            cancel_timeout_ms: 2_000,
            aggressive_markup: 0.01,
            max_price: 0.99,
            shutdown_grace_ms: 10_000,
        }
    }
}

impl ExecutionConfig {
    pub fn leg_a_timeout(&self) -> Duration {
        Duration::from_millis(self.leg_a_timeout_ms)
    }

    pub fn leg_b_timeout(&self) -> Duration {
        Duration::from_millis(self.leg_b_timeout_ms)
    }

    pub fn fill_poll_interval(&self) -> Duration {
        Duration::from_millis(self.fill_poll_interval_ms)
    }

    pub fn cancel_timeout(&self) -> Duration {
        Duration::from_millis(self.cancel_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub default_exposure_limit: f64,
    /// Per-instrument caps keyed by `venue:token_id`.
    pub exposure_limits: HashMap<String, f64>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            default_exposure_limit: 100.0,
            exposure_limits: HashMap::new(),
        }
    }
}

impl RiskConfig {
    pub fn limit_for(&self, key: &InstrumentKey) -> f64 {
        self.exposure_limits
            .get(&key.to_string())
            .copied()
            .unwrap_or(self.default_exposure_limit)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VenuesConfig {
    pub polymarket: PolymarketSettings,
    pub predict_fun: PredictFunSettings,
}

impl VenuesConfig {
    pub fn max_age(&self, venue: Venue) -> Duration {
        let ms = match venue {
            Venue::Polymarket => self.polymarket.max_age_ms,
            Venue::PredictFun => self.predict_fun.max_age_ms,
        };
        Duration::from_millis(ms)
    }

    pub fn poll_interval(&self, venue: Venue) -> Duration {
        let ms = match venue {
            Venue::Polymarket => self.polymarket.poll_interval_ms,
            Venue::PredictFun => self.predict_fun.poll_interval_ms,
        };
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolymarketSettings {
    pub enabled: bool,
    pub host: String,
    pub chain_id: u64,
    /// 0 = EOA, 1 = Polymarket proxy, 2 = Gnosis safe.
    pub signature_type: u8,
    pub max_age_ms: u64,
    pub poll_interval_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for PolymarketSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "https://clob.polymarket.com".to_string(),
            chain_id: 137,
            signature_type: 2,
            max_age_ms: 2_000,
            poll_interval_ms: 500,
            request_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PredictFunSettings {
    pub enabled: bool,
    pub base_url: String,
    pub chain_id: u64,
    /// EIP-712 verifying contract for order signing.
    pub exchange_address: Option<String>,
    pub exchange_name: String,
    pub fee_rate_bps: u32,
    pub rpc_url: String,
    pub usdt_address: String,
    pub max_age_ms: u64,
    pub poll_interval_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for PredictFunSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.predict.fun/v1".to_string(),
            chain_id: 56,
            exchange_address: None,
            exchange_name: "predict.fun CTF Exchange".to_string(),
            fee_rate_bps: 200,
            rpc_url: "https://bsc-dataseed.binance.org".to_string(),
            usdt_address: "0x55d398326f99059fF775485246999027B3197955".to_string(),
            max_age_ms: 5_000,
            poll_interval_ms: 1_000,
            request_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub log_json: bool,
    pub exposure_report_interval_secs: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_json: false,
            exposure_report_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub telegram: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Per-unit gas/settlement cost added to both legs.
    #[serde(default)]
    pub gas_estimate: f64,
    /// Overrides the venues' freshness thresholds for this pair.
    #[serde(default)]
    pub max_age_ms: Option<u64>,
    pub venue_a: MarketSideConfig,
    pub venue_b: MarketSideConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketSideConfig {
    pub venue: Venue,
    pub market_id: String,
    pub yes_token_id: String,
    pub no_token_id: String,
    /// Proportional taker fee, e.g. 0.01 for 1%.
    #[serde(default)]
    pub fee: f64,
    /// Polymarket neg-risk markets settle through a different exchange.
    #[serde(default)]
    pub neg_risk: bool,
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load from a file, layered with `ARB__SECTION__KEY` environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix("ARB")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(contents, config::FileFormat::Yaml))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn enabled_markets(&self) -> impl Iterator<Item = &MarketConfig> {
        self.markets.iter().filter(|m| m.enabled)
    }

    /// Every problem found, so the operator can fix them in one pass.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        let arb = &self.arbitrage;
        if !(arb.min_profit_pct >= 0.0) {
            errors.push(invalid("arbitrage.min_profit_pct", "must be >= 0"));
        }
        if !(arb.max_position_size > 0.0) {
            errors.push(invalid("arbitrage.max_position_size", "must be > 0"));
        }
        if !(arb.min_position_size >= 0.0) || arb.min_position_size > arb.max_position_size {
            errors.push(invalid(
                "arbitrage.min_position_size",
                "must be between 0 and max_position_size",
            ));
        }
        if arb.detection_interval_ms == 0 {
            errors.push(invalid("arbitrage.detection_interval_ms", "must be > 0"));
        }

        let exec = &self.execution;
        if exec.leg_a_timeout_ms == 0 || exec.leg_b_timeout_ms == 0 {
            errors.push(invalid("execution.leg_*_timeout_ms", "must be > 0"));
        }
        if exec.fill_poll_interval_ms == 0 {
            errors.push(invalid("execution.fill_poll_interval_ms", "must be > 0"));
        }
        if !(exec.aggressive_markup >= 0.0) {
            errors.push(invalid("execution.aggressive_markup", "must be >= 0"));
        }
        if !(exec.max_price > 0.0 && exec.max_price < 1.0) {
            errors.push(invalid("execution.max_price", "must be in (0, 1)"));
        }

        if !(self.risk.default_exposure_limit > 0.0) {
            errors.push(ConfigError::InvalidExposureLimit {
                instrument: "default".to_string(),
                limit: self.risk.default_exposure_limit,
            });
        }
        let mut limits: Vec<_> = self.risk.exposure_limits.iter().collect();
        limits.sort_by(|a, b| a.0.cmp(b.0));
        for (instrument, limit) in limits {
            if !(*limit > 0.0) {
                errors.push(ConfigError::InvalidExposureLimit {
                    instrument: instrument.clone(),
                    limit: *limit,
                });
            }
        }

        let mut ids = HashSet::new();
        let mut any_enabled = false;
        for market in self.enabled_markets() {
            any_enabled = true;
            if !ids.insert(market.id.as_str()) {
                errors.push(ConfigError::DuplicatePair(market.id.clone()));
            }
            errors.extend(market.validate());
        }
        if !any_enabled {
            errors.push(ConfigError::NoMarkets);
        }

        errors
    }
}

impl MarketConfig {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let pair = || self.id.clone();

        if self.venue_a.venue == self.venue_b.venue {
            errors.push(ConfigError::SameVenueBothSides {
                pair: pair(),
                venue: self.venue_a.venue,
            });
        }

        let tokens = [
            &self.venue_a.yes_token_id,
            &self.venue_a.no_token_id,
            &self.venue_b.yes_token_id,
            &self.venue_b.no_token_id,
        ];
        let unique: HashSet<(Venue, &String)> = [
            (self.venue_a.venue, tokens[0]),
            (self.venue_a.venue, tokens[1]),
            (self.venue_b.venue, tokens[2]),
            (self.venue_b.venue, tokens[3]),
        ]
        .into_iter()
        .collect();
        if tokens.iter().any(|t| t.trim().is_empty()) || unique.len() != 4 {
            errors.push(ConfigError::InvalidInstrument { pair: pair() });
        }

        for fee in [self.venue_a.fee, self.venue_b.fee] {
            if !(0.0..1.0).contains(&fee) {
                errors.push(ConfigError::InvalidFee { pair: pair(), fee });
            }
        }
        if !(self.gas_estimate >= 0.0) {
            errors.push(ConfigError::InvalidSetting {
                name: "markets.gas_estimate",
                reason: format!("pair '{}' has negative gas estimate", self.id),
            });
        }
        if self.max_age_ms == Some(0) {
            errors.push(ConfigError::InvalidSetting {
                name: "markets.max_age_ms",
                reason: format!("pair '{}' has zero max age", self.id),
            });
        }

        errors
    }
}

fn invalid(name: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidSetting {
        name,
        reason: reason.to_string(),
    }
}

/// Polymarket wallet and L2 API credentials.
#[derive(Debug, Clone, Default)]
pub struct PolymarketCredentials {
    pub private_key: String,
    pub proxy_address: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub api_passphrase: Option<String>,
}

impl PolymarketCredentials {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            private_key: required_env("PM_PRIVATE_KEY")?,
            proxy_address: optional_env("PM_PROXY_ADDRESS"),
            api_key: optional_env("PM_API_KEY"),
            api_secret: optional_env("PM_API_SECRET"),
            api_passphrase: optional_env("PM_API_PASSPHRASE"),
        })
    }
}

/// Predict.fun API key and signer wallet.
#[derive(Debug, Clone, Default)]
pub struct PredictFunCredentials {
    pub api_key: String,
    pub private_key: String,
    pub smart_wallet: Option<String>,
}

impl PredictFunCredentials {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            api_key: required_env("PREDICT_FUN_API_KEY")?,
            private_key: required_env("PREDICT_FUN_PRIVATE_KEY")?,
            smart_wallet: optional_env("PREDICT_FUN_SMART_WALLET"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct TelegramCredentials {
    pub bot_token: String,
    pub chat_id: String,
}

impl TelegramCredentials {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            bot_token: required_env("TG_BOT_TOKEN")?,
            chat_id: required_env("TG_CHAT_ID")?,
        })
    }
}

fn required_env(name: &'static str) -> Result<String, ConfigError> {
    optional_env(name).ok_or(ConfigError::MissingCredential(name))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
arbitrage:
  min_profit_pct: 0.03
  max_position_size: 50
execution:
  leg_b_timeout_ms: 4000
risk:
  default_exposure_limit: 80
  exposure_limits:
    "polymarket:pm-yes": 50
venues:
  predict_fun:
    max_age_ms: 7000
markets:
  - id: btc-100k
    name: "BTC > 100k"
    gas_estimate: 0.01
    venue_a:
      venue: polymarket
      market_id: "0xabc"
      yes_token_id: pm-yes
      no_token_id: pm-no
    venue_b:
      venue: predict_fun
      market_id: "42"
      yes_token_id: pf-yes
      no_token_id: pf-no
      fee: 0.02
"#;

    #[test]
    fn test_parse_sample() {
        let config = Config::from_yaml(SAMPLE).unwrap();

        assert_eq!(config.arbitrage.min_profit_pct, 0.03);
        assert_eq!(config.arbitrage.max_position_size, 50.0);
        assert_eq!(config.arbitrage.min_position_size, 5.0);
        assert_eq!(config.execution.leg_b_timeout(), Duration::from_millis(4000));
        assert_eq!(config.venues.max_age(Venue::PredictFun), Duration::from_millis(7000));
        assert_eq!(config.venues.max_age(Venue::Polymarket), Duration::from_millis(2000));
        assert_eq!(config.markets.len(), 1);
        assert!(config.markets[0].enabled);
        assert_eq!(config.markets[0].venue_b.fee, 0.02);
        assert_eq!(config.markets[0].display_name(), "BTC > 100k");
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_exposure_limit_lookup() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        let capped = InstrumentKey::new(Venue::Polymarket, "pm-yes");
        let other = InstrumentKey::new(Venue::Polymarket, "pm-no");

        assert_eq!(config.risk.limit_for(&capped), 50.0);
        assert_eq!(config.risk.limit_for(&other), 80.0);
    }

    #[test]
    fn test_zero_exposure_limit_is_fatal() {
        let mut config = Config::from_yaml(SAMPLE).unwrap();
        config.risk.exposure_limits.insert("predict_fun:pf-no".to_string(), 0.0);

        let errors = config.validate();
        assert!(errors.contains(&ConfigError::InvalidExposureLimit {
            instrument: "predict_fun:pf-no".to_string(),
            limit: 0.0,
        }));
    }

    #[test]
    fn test_bad_markets_are_reported_together() {
        let mut config = Config::from_yaml(SAMPLE).unwrap();
        let mut dup = config.markets[0].clone();
        dup.venue_b.venue = Venue::Polymarket;
        dup.venue_b.fee = 1.5;
        config.markets.push(dup);

        let errors = config.validate();
        assert!(errors.contains(&ConfigError::DuplicatePair("btc-100k".to_string())));
        assert!(errors.iter().any(|e| matches!(e, ConfigError::SameVenueBothSides { .. })));
        assert!(errors.iter().any(|e| matches!(e, ConfigError::InvalidFee { fee, .. } if *fee == 1.5)));
    }

    #[test]
    fn test_no_enabled_markets() {
        let mut config = Config::from_yaml(SAMPLE).unwrap();
        config.markets[0].enabled = false;
        assert_eq!(config.validate(), vec![ConfigError::NoMarkets]);
    }
}
