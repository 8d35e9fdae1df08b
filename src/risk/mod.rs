//! Risk engine - pre-trade gate every order passes before submission
//!
//! Stateless per check: the caller supplies the portfolio snapshot and the
//! day's loss. Rules run in a fixed order and the first failing rule wins.

mod daily;

pub use daily::DailyLossTracker;

use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use crate::core::config::RiskConfig;
use crate::core::{OrderRequest, Position};

#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum RiskRejection {
    #[error("order value {value} exceeds max {limit}")]
    OrderTooLarge { value: Decimal, limit: Decimal },

    #[error("position {current} + order {requested} exceeds max position {limit}")]
    PositionLimitExceeded {
        current: Decimal,
        requested: Decimal,
        limit: Decimal,
    },

    #[error("daily loss {loss} reached limit {limit}")]
    DailyLossLimitReached { loss: Decimal, limit: Decimal },

    #[error("no price available to value order on {symbol}")]
    MissingPrice { symbol: String },
}

/// Outcome of a risk check
#[derive(Debug, Clone, PartialEq)]
pub enum RiskDecision {
    /// `simulated` orders are approved for dry-run execution only and must not reach a venue.
    Approve { simulated: bool },
    Reject(RiskRejection),
}

impl RiskDecision {
    pub fn is_approved(&self) -> bool {
        matches!(self, RiskDecision::Approve { .. })
    }
}

/// Risk engine
#[derive(Debug, Clone)]
pub struct RiskEngine {
    limits: RiskConfig,
    dry_run: bool,
}

impl RiskEngine {
    pub fn new(limits: RiskConfig, dry_run: bool) -> Self {
        Self { limits, dry_run }
    }

    pub fn limits(&self) -> &RiskConfig {
        &self.limits
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// Evaluate an intended order.
    ///
    /// `reference_price` values the order (limit price, or the touch for market
    /// orders); `positions` are the target venue's open positions; `daily_loss`
    /// is today's realized + unrealized loss as a non-negative amount.
    ///
    /// The position rule is side-agnostic: it sums the absolute size of every
    /// position in the symbol and adds the order quantity, so a sell against a
    /// long at the limit is rejected like a buy would be.
    pub fn check(
        &self,
        order: &OrderRequest,
        reference_price: Option<Decimal>,
        positions: &[Position],
        daily_loss: Decimal,
    ) -> RiskDecision {
        // 1. Order value
        let Some(price) = reference_price else {
            return RiskDecision::Reject(RiskRejection::MissingPrice {
                symbol: order.symbol.clone(),
            });
        };
        let value = order.quantity * price;
        if value > self.limits.max_order_value {
            return RiskDecision::Reject(RiskRejection::OrderTooLarge {
                value,
                limit: self.limits.max_order_value,
            });
        }

        // 2. Position size on this venue + symbol, gross of side
        let current: Decimal = positions
            .iter()
            .filter(|p| p.symbol == order.symbol)
            .map(|p| p.quantity.abs())
            .sum();
        if current + order.quantity > self.limits.max_position_size {
            return RiskDecision::Reject(RiskRejection::PositionLimitExceeded {
                current,
                requested: order.quantity,
                limit: self.limits.max_position_size,
            });
        }

        // 3. Daily loss
        if daily_loss >= self.limits.max_daily_loss {
            return RiskDecision::Reject(RiskRejection::DailyLossLimitReached {
                loss: daily_loss,
                limit: self.limits.max_daily_loss,
            });
        }

        // 4. Dry run
        RiskDecision::Approve {
            simulated: self.dry_run,
        }
    }
}
