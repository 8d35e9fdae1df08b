//! Strategy capability and the notifications strategies receive

use async_trait::async_trait;
use serde::Serialize;

use crate::core::{ConnectorSet, Order, Position, Result, Signal, VenueId};
use crate::engine::MarketSnapshot;
use crate::risk::RiskRejection;

/// Base strategy trait
///
/// Each registered strategy runs in its own task and owns its private state,
/// so hooks take `&mut self`. Strategies never touch shared state; they only
/// emit signals.
#[async_trait]
pub trait Strategy: Send {
    /// Strategy name, unique per engine
    fn name(&self) -> &str;

    /// Called once before the first cycle
    async fn initialize(&mut self, _connectors: &ConnectorSet) -> Result<()> {
        Ok(())
    }

    /// Observe a fresh snapshot. Runs right before `evaluate` on every cycle.
    async fn on_tick(&mut self, _snapshot: &MarketSnapshot) -> Result<()> {
        Ok(())
    }

    /// Produce this cycle's signals
    async fn evaluate(&mut self, snapshot: &MarketSnapshot) -> Result<Vec<Signal>>;

    /// Final outcome of a signal this strategy emitted
    async fn on_order_fill(&mut self, _outcome: &OrderOutcome) -> Result<()> {
        Ok(())
    }

    async fn on_position_change(&mut self, _change: &PositionChange) -> Result<()> {
        Ok(())
    }

    /// Called once on shutdown
    async fn stop(&mut self) -> Result<()> {
        Ok(())
    }
}

/// What became of a signal
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OrderOutcome {
    /// Working on the venue; `Completed` follows once it is terminal
    Accepted { order: Order },
    /// The order reached a terminal status on the venue
    Completed { order: Order },
    /// Approved in dry-run mode; nothing was sent
    Simulated { venue: VenueId, signal: Signal },
    /// Blocked by the risk engine before any venue call
    RiskRejected { signal: Signal, rejection: RiskRejection },
    /// Unroutable, refused by the venue, or the submission failed
    Failed {
        venue: Option<VenueId>,
        signal: Signal,
        error: String,
    },
}

impl OrderOutcome {
    /// Everything except a still-working order
    pub fn is_final(&self) -> bool {
        !matches!(self, OrderOutcome::Accepted { .. })
    }

    pub fn is_filled(&self) -> bool {
        matches!(self, OrderOutcome::Completed { order } if order.status == crate::core::OrderStatus::Filled)
    }
}

/// Position transition observed between two polls of a venue
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum PositionChange {
    Opened { position: Position },
    Updated { previous: Position, current: Position },
    Closed { position: Position },
}

impl PositionChange {
    pub fn kind(&self) -> &'static str {
        match self {
            PositionChange::Opened { .. } => "opened",
            PositionChange::Updated { .. } => "updated",
            PositionChange::Closed { .. } => "closed",
        }
    }

    /// Latest known state of the position
    pub fn position(&self) -> &Position {
        match self {
            PositionChange::Opened { position } | PositionChange::Closed { position } => position,
            PositionChange::Updated { current, .. } => current,
        }
    }

    /// Diff two polls of the same venue. Mark-to-market moves alone are not a
    /// change; quantity or entry price must differ.
    pub fn diff(previous: &[Position], current: &[Position]) -> Vec<PositionChange> {
        let mut changes = Vec::new();
        for now in current {
            match previous.iter().find(|p| p.key() == now.key()) {
                None => changes.push(PositionChange::Opened { position: now.clone() }),
                Some(before) if before.quantity != now.quantity || before.entry_price != now.entry_price => {
                    changes.push(PositionChange::Updated {
                        previous: before.clone(),
                        current: now.clone(),
                    })
                }
                Some(_) => {}
            }
        }
        for before in previous {
            if !current.iter().any(|p| p.key() == before.key()) {
                changes.push(PositionChange::Closed { position: before.clone() });
            }
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PositionSide;
    use rust_decimal::Decimal;

    fn pos(symbol: &str, qty: i64, current: i64) -> Position {
        Position::new(
            "paper",
            symbol,
            PositionSide::Long,
            Decimal::from(qty),
            Decimal::from(100),
            Decimal::from(current),
        )
    }

    #[test]
    fn diff_classifies_changes() {
        let before = vec![pos("BTC", 1, 100), pos("ETH", 2, 100), pos("SOL", 3, 100)];
        let after = vec![pos("BTC", 1, 105), pos("ETH", 1, 100), pos("XRP", 5, 100)];
        let changes = PositionChange::diff(&before, &after);

        assert_eq!(changes.len(), 3);
        assert!(matches!(&changes[0], PositionChange::Updated { current, .. } if current.symbol == "ETH"));
        assert!(matches!(&changes[1], PositionChange::Opened { position } if position.symbol == "XRP"));
        assert!(matches!(&changes[2], PositionChange::Closed { position } if position.symbol == "SOL"));
    }

    #[test]
    fn outcome_serializes_with_tag() {
        let signal = Signal::new("trend", "BTC/USDT", crate::core::Side::Buy, Decimal::ONE);
        let json = serde_json::to_value(OrderOutcome::Simulated {
            venue: "paper".into(),
            signal,
        })
        .unwrap();
        assert_eq!(json["outcome"], "simulated");
        assert_eq!(json["signal"]["strategy"], "trend");
    }
}
