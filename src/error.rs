use crate::market::Venue;
use thiserror::Error;

/// Failures reported by a venue client for a single request.
///
/// None of these are fatal to the engine: the executor turns them into leg
/// outcomes and the feed turns them into missed snapshots.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum VenueError {
    #[error("order rejected by venue: {0}")]
    RejectedByVenue(String),

    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: f64, available: f64 },

    #[error("size {size} below venue minimum {minimum}")]
    SizeBelowMinimum { size: f64, minimum: f64 },

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("client not connected, call connect() first")]
    NotConnected,

    #[error("unknown order: {0}")]
    UnknownOrder(String),

    #[error("failed to decode venue response: {0}")]
    Decode(String),
}

impl VenueError {
    /// Classify a free-form rejection message the way venues phrase them.
    pub fn from_rejection(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("insufficient") || lower.contains("not enough balance") || lower.contains("collateral") {
            VenueError::InsufficientBalance {
                required: 0.0,
                available: 0.0,
            }
        } else if lower.contains("minimum") || lower.contains("min size") || lower.contains("too small") {
            VenueError::SizeBelowMinimum {
                size: 0.0,
                minimum: 0.0,
            }
        } else {
            VenueError::RejectedByVenue(message)
        }
    }
}

impl From<reqwest::Error> for VenueError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            VenueError::Timeout
        } else if err.is_decode() {
            VenueError::Decode(err.to_string())
        } else {
            VenueError::Network(err.to_string())
        }
    }
}

/// Startup configuration problems. Any of these stops the process before a
/// single order is placed.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(String),

    #[error("no enabled markets configured")]
    NoMarkets,

    #[error("duplicate market pair id '{0}'")]
    DuplicatePair(String),

    #[error("market pair '{pair}' uses {venue} on both sides")]
    SameVenueBothSides { pair: String, venue: Venue },

    #[error("market pair '{pair}' references an empty or repeated token id")]
    InvalidInstrument { pair: String },

    #[error("market pair '{pair}' references {venue}, which has no connected client")]
    UnknownVenue { pair: String, venue: Venue },

    #[error("market pair '{pair}' has no fill-or-kill capable venue")]
    NoFokVenue { pair: String },

    #[error("market pair '{pair}' has invalid fee {fee} (expected 0 <= fee < 1)")]
    InvalidFee { pair: String, fee: f64 },

    #[error("exposure limit for '{instrument}' must be positive, got {limit}")]
    InvalidExposureLimit { instrument: String, limit: f64 },

    #[error("invalid setting {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },

    #[error("missing credential {0}")]
    MissingCredential(&'static str),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::Load(err.to_string())
    }
}
