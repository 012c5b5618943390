// Core modules
pub mod market;
pub mod error;
pub mod config;
pub mod venue;
pub mod orderbook_cache;
pub mod market_registry;
pub mod arbitrage_engine;
pub mod risk_gate;
pub mod order_executor;
pub mod position_tracker;
pub mod feed;
pub mod bot;
pub mod shutdown;

// Venue integrations
pub mod signing;
pub mod clients;
pub mod paper;
pub mod notifier;

// Re-exports
pub use market::{Instrument, InstrumentKey, OrderKind, OrderbookSnapshot, Outcome, Side, Venue};
pub use error::{ConfigError, VenueError};
pub use config::Config;
pub use venue::{CancelOutcome, OrderReport, OrderRequest, OrderState, VenueClient, VenueClients};
pub use orderbook_cache::OrderbookCache;
pub use market_registry::{MarketPair, MarketRegistry, VenueMarket};
pub use arbitrage_engine::{ArbitrageEngine, ArbitrageOpportunity, Direction};
pub use risk_gate::{ExecutionPermit, RejectReason, RiskGate};
pub use order_executor::{ExecutionResult, ExecutionState, ExecutionStatus, LegOutcome, OrderExecutor};
pub use position_tracker::{ExecutionStatistics, PositionStatus, PositionTracker, UnhedgedPosition};
pub use bot::ArbitrageBot;
pub use clients::{PolymarketClient, PredictFunClient};
pub use paper::PaperVenue;
pub use notifier::TelegramNotifier;
