//! Error handling - one hierarchy for every engine boundary

use std::time::Duration;

use thiserror::Error;

use crate::risk::RiskRejection;

pub type Result<T> = std::result::Result<T, Error>;

/// Why a venue refused an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderRejectReason {
    InsufficientFunds,
    InvalidSymbol,
    VenueRejected,
    RateLimited,
    InvalidOrder,
}

impl std::fmt::Display for OrderRejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderRejectReason::InsufficientFunds => "insufficient funds",
            OrderRejectReason::InvalidSymbol => "invalid symbol",
            OrderRejectReason::VenueRejected => "venue rejection",
            OrderRejectReason::RateLimited => "rate limited",
            OrderRejectReason::InvalidOrder => "invalid order",
        };
        f.write_str(s)
    }
}

/// Tradebridge error hierarchy
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or missing settings. Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Venue unreachable or authentication failed
    #[error("Connection error [{venue}]: {message}")]
    Connection { venue: String, message: String },

    /// Order refused by the venue
    #[error("Order error [{venue}] ({reason}): {message}")]
    Order {
        venue: String,
        reason: OrderRejectReason,
        message: String,
    },

    /// Blocked by the risk engine before any venue call
    #[error("Risk rejection: {0}")]
    Risk(#[from] RiskRejection),

    /// Connector or bridge call exceeded its deadline
    #[error("Timeout: {operation} exceeded {after:?}")]
    Timeout { operation: String, after: Duration },

    /// Execution bridge failure (pool closed, worker panicked)
    #[error("Bridge error: {0}")]
    Bridge(String),

    /// Strategy hook failure
    #[error("Strategy error [{name}]: {message}")]
    Strategy { name: String, message: String },

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Unknown venue, order or strategy
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parse errors
    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    pub fn connection(venue: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Connection {
            venue: venue.into(),
            message: message.into(),
        }
    }

    pub fn order(venue: impl Into<String>, reason: OrderRejectReason, message: impl Into<String>) -> Self {
        Error::Order {
            venue: venue.into(),
            reason,
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Error::Timeout {
            operation: operation.into(),
            after,
        }
    }

    /// Failures that are expected to clear on the next poll cycle.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Timeout { .. }
                | Error::Connection { .. }
                | Error::Order {
                    reason: OrderRejectReason::RateLimited,
                    ..
                }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(Error::timeout("get_balances", Duration::from_secs(1)).is_transient());
        assert!(Error::connection("paper", "refused").is_transient());
        assert!(Error::order("paper", OrderRejectReason::RateLimited, "slow down").is_transient());
        assert!(!Error::order("paper", OrderRejectReason::InvalidSymbol, "XYZ").is_transient());
        assert!(!Error::Config("bad".into()).is_transient());
    }

    #[test]
    fn display_carries_venue() {
        let e = Error::order("alpaca", OrderRejectReason::InsufficientFunds, "need 10 USD");
        assert_eq!(
            e.to_string(),
            "Order error [alpaca] (insufficient funds): need 10 USD"
        );
    }
}
