//! Engine state - lifecycle, per-venue health and the aggregated market view

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::core::{Balance, Position, Ticker, VenueId};
use crate::strategies::StrategyHealth;

/// Engine lifecycle. `Degraded` is Running with at least one venue down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineLifecycle {
    Stopped,
    Starting,
    Running,
    Degraded,
    Stopping,
}

impl EngineLifecycle {
    /// Running or Degraded
    pub fn is_running(self) -> bool {
        matches!(self, EngineLifecycle::Running | EngineLifecycle::Degraded)
    }
}

/// Most recent known state of one venue
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VenueHealth {
    pub venue: VenueId,
    pub connected: bool,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub last_success: Option<DateTime<Utc>>,
}

impl VenueHealth {
    pub fn new(venue: impl Into<VenueId>) -> Self {
        Self {
            venue: venue.into(),
            connected: false,
            consecutive_failures: 0,
            last_error: None,
            last_success: None,
        }
    }

    pub(crate) fn record_success(&mut self) {
        self.connected = true;
        self.consecutive_failures = 0;
        self.last_success = Some(Utc::now());
    }

    /// Count a failure; returns true when the venue just crossed `max_failures`.
    pub(crate) fn record_failure(&mut self, error: String, max_failures: u32) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(error);
        if self.connected && self.consecutive_failures >= max_failures {
            self.connected = false;
            return true;
        }
        false
    }
}

/// Immutable aggregated view handed to strategies and observers.
/// Replaced wholesale every poll cycle, never edited in place.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MarketSnapshot {
    /// Poll cycle counter, 0 before the first cycle
    pub sequence: u64,
    pub timestamp: Option<DateTime<Utc>>,
    pub balances: BTreeMap<VenueId, Vec<Balance>>,
    pub positions: BTreeMap<VenueId, Vec<Position>>,
    pub tickers: BTreeMap<VenueId, BTreeMap<String, Ticker>>,
}

impl MarketSnapshot {
    pub fn ticker(&self, venue: &str, symbol: &str) -> Option<&Ticker> {
        self.tickers.get(venue).and_then(|t| t.get(symbol))
    }

    /// First venue (by name) quoting `symbol`
    pub fn find_ticker(&self, symbol: &str) -> Option<(&VenueId, &Ticker)> {
        self.tickers
            .iter()
            .find_map(|(venue, tickers)| tickers.get(symbol).map(|t| (venue, t)))
    }

    /// Every symbol quoted on any venue, deduplicated and sorted
    pub fn symbols(&self) -> Vec<&str> {
        let mut symbols: Vec<&str> = self
            .tickers
            .values()
            .flat_map(|t| t.keys().map(String::as_str))
            .collect();
        symbols.sort_unstable();
        symbols.dedup();
        symbols
    }

    pub fn positions_on(&self, venue: &str) -> &[Position] {
        self.positions.get(venue).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        self.positions.values().flatten().map(|p| p.unrealized_pnl).sum()
    }
}

/// Point-in-time engine status
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub state: EngineLifecycle,
    pub running: bool,
    pub dry_run: bool,
    pub connected_exchanges: Vec<VenueId>,
    pub strategies: Vec<String>,
    pub venues: Vec<VenueHealth>,
    pub strategy_health: Vec<StrategyHealth>,
    pub open_orders: usize,
    pub daily_loss: Decimal,
    pub last_poll: Option<DateTime<Utc>>,
}
