//! Shared fixtures for scenario tests
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use tradebridge::connectors::PaperConnector;
use tradebridge::{Config, MarketSnapshot, OrderOutcome, Result, Strategy};
use tradebridge::core::Signal;

pub fn d(s: &str) -> Decimal {
    s.parse().unwrap()
}

/// Manual-poll config: the background loop never fires during a test.
pub fn config(dry_run: bool) -> Config {
    let mut cfg = Config::default();
    cfg.dry_run = dry_run;
    cfg.engine.poll_interval_ms = 60_000;
    cfg.engine.call_timeout_ms = 200;
    cfg.engine.shutdown_grace_ms = 1_000;
    cfg
}

pub fn watch(cfg: &mut Config, venue: &str, symbol: &str) {
    cfg.connectors
        .venues
        .entry(venue.to_string())
        .or_default()
        .watchlist
        .push(symbol.to_string());
}

pub fn paper(name: &str) -> Arc<PaperConnector> {
    Arc::new(
        PaperConnector::new(name)
            .with_balance("USDT", d("100000"))
            .with_ticker("BTC/USDT", d("49990"), d("50010")),
    )
}

/// Poll `cond` for up to two seconds.
pub async fn eventually(cond: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

/// Emits a fixed batch of signals (once, or every cycle) and records outcomes.
pub struct Scripted {
    pub name: String,
    pub batch: Vec<Signal>,
    pub repeat: bool,
    pub outcomes: Arc<Mutex<Vec<OrderOutcome>>>,
    emitted: bool,
}

impl Scripted {
    pub fn new(name: &str, batch: Vec<Signal>, repeat: bool) -> (Self, Arc<Mutex<Vec<OrderOutcome>>>) {
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let s = Self {
            name: name.to_string(),
            batch,
            repeat,
            outcomes: outcomes.clone(),
            emitted: false,
        };
        (s, outcomes)
    }
}

#[async_trait]
impl Strategy for Scripted {
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(&mut self, _snapshot: &MarketSnapshot) -> Result<Vec<Signal>> {
        if self.emitted && !self.repeat {
            return Ok(vec![]);
        }
        self.emitted = true;
        Ok(self.batch.clone())
    }

    async fn on_order_fill(&mut self, outcome: &OrderOutcome) -> Result<()> {
        self.outcomes.lock().push(outcome.clone());
        Ok(())
    }
}
