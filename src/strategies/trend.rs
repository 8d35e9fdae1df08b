//! Trend following strategy

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::Deserialize;
use tracing::{debug, info};

use super::traits::{OrderOutcome, PositionChange, Strategy};
use crate::core::{ConnectorSet, Error, PositionSide, Result, Side, Signal};
use crate::engine::MarketSnapshot;

const HISTORY_LEN: usize = 200;

/// Trend following parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrendParams {
    /// Symbols to trade; empty means every symbol in the snapshot
    pub symbols: Vec<String>,
    /// RSI period
    pub rsi_period: usize,
    /// RSI oversold threshold
    pub rsi_oversold: f64,
    /// RSI overbought threshold
    pub rsi_overbought: f64,
    /// Moving average period
    pub ma_period: usize,
    /// Quantity per signal
    pub order_quantity: Decimal,
}

impl Default for TrendParams {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            rsi_period: 14,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            ma_period: 50,
            order_quantity: Decimal::new(1, 3),
        }
    }
}

impl TrendParams {
    /// Read from the `[strategies.trend]` table; defaults when absent.
    pub fn from_config(params: Option<&toml::Value>) -> Result<Self> {
        let params = match params {
            Some(v) => {
                let parsed: TrendParams = v.clone().try_into()?;
                parsed
            }
            None => Self::default(),
        };
        if params.rsi_period == 0 || params.ma_period == 0 || params.ma_period > HISTORY_LEN {
            return Err(Error::Config(format!(
                "trend periods must be in 1..={HISTORY_LEN}, got rsi {} ma {}",
                params.rsi_period, params.ma_period
            )));
        }
        if params.order_quantity <= Decimal::ZERO {
            return Err(Error::Config("trend order_quantity must be positive".into()));
        }
        Ok(params)
    }
}

/// Trend following strategy
pub struct TrendStrategy {
    name: String,
    params: TrendParams,
    price_history: HashMap<String, VecDeque<f64>>,
}

impl TrendStrategy {
    pub fn new(params: TrendParams) -> Self {
        Self {
            name: "trend".to_string(),
            params,
            price_history: HashMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn tracked_symbols(&self, snapshot: &MarketSnapshot) -> Vec<String> {
        if self.params.symbols.is_empty() {
            snapshot.symbols().into_iter().map(str::to_string).collect()
        } else {
            self.params.symbols.clone()
        }
    }

    /// Calculate RSI over the last `rsi_period` changes
    fn calculate_rsi(&self, history: &VecDeque<f64>) -> Option<f64> {
        let period = self.params.rsi_period;
        if history.len() < period + 1 {
            return None;
        }

        let mut gains = 0.0;
        let mut losses = 0.0;
        let window: Vec<f64> = history.iter().skip(history.len() - period - 1).copied().collect();
        for pair in window.windows(2) {
            let change = pair[1] - pair[0];
            if change > 0.0 {
                gains += change;
            } else {
                losses -= change;
            }
        }

        let avg_gain = gains / period as f64;
        let avg_loss = losses / period as f64;
        if avg_loss == 0.0 {
            return Some(100.0);
        }

        let rs = avg_gain / avg_loss;
        Some(100.0 - (100.0 / (1.0 + rs)))
    }

    /// Calculate Simple Moving Average
    fn calculate_sma(&self, history: &VecDeque<f64>) -> Option<f64> {
        let period = self.params.ma_period;
        if history.len() < period {
            return None;
        }
        let sum: f64 = history.iter().rev().take(period).sum();
        Some(sum / period as f64)
    }

    fn holds(snapshot: &MarketSnapshot, venue: &str, symbol: &str, side: PositionSide) -> bool {
        snapshot
            .positions_on(venue)
            .iter()
            .any(|p| p.symbol == symbol && p.side == side)
    }
}

#[async_trait]
impl Strategy for TrendStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&mut self, connectors: &ConnectorSet) -> Result<()> {
        info!(
            strategy = %self.name,
            venues = connectors.len(),
            "Initializing trend strategy: RSI({}, {}/{}), MA({})",
            self.params.rsi_period,
            self.params.rsi_oversold,
            self.params.rsi_overbought,
            self.params.ma_period
        );
        Ok(())
    }

    async fn on_tick(&mut self, snapshot: &MarketSnapshot) -> Result<()> {
        for symbol in self.tracked_symbols(snapshot) {
            let Some(price) = snapshot
                .find_ticker(&symbol)
                .and_then(|(_, t)| t.mid())
                .and_then(|p| p.to_f64())
            else {
                continue;
            };
            let history = self.price_history.entry(symbol).or_default();
            history.push_back(price);
            // Keep history bounded
            if history.len() > HISTORY_LEN {
                history.pop_front();
            }
        }
        Ok(())
    }

    async fn evaluate(&mut self, snapshot: &MarketSnapshot) -> Result<Vec<Signal>> {
        let mut signals = vec![];

        for symbol in self.tracked_symbols(snapshot) {
            let Some((venue, ticker)) = snapshot.find_ticker(&symbol) else {
                continue;
            };
            let Some(history) = self.price_history.get(&symbol) else {
                continue;
            };
            let (Some(rsi), Some(ma)) = (self.calculate_rsi(history), self.calculate_sma(history)) else {
                continue;
            };
            let Some(&price) = history.back() else {
                continue;
            };

            let (side, reason, confidence) = if rsi < self.params.rsi_oversold && price > ma {
                (
                    Side::Buy,
                    format!("RSI oversold ({:.1}) + price above MA({:.2})", rsi, ma),
                    (self.params.rsi_oversold - rsi) / self.params.rsi_oversold,
                )
            } else if rsi > self.params.rsi_overbought && price < ma {
                (
                    Side::Sell,
                    format!("RSI overbought ({:.1}) + price below MA({:.2})", rsi, ma),
                    (rsi - self.params.rsi_overbought) / (100.0 - self.params.rsi_overbought),
                )
            } else {
                continue;
            };

            if Self::holds(snapshot, venue, &symbol, PositionSide::from(side)) {
                debug!(strategy = %self.name, %symbol, %side, "already positioned, skipping");
                continue;
            }

            let mut signal = Signal::new(&self.name, &symbol, side, self.params.order_quantity)
                .on_venue(venue.clone())
                .with_reason(reason)
                .with_confidence(confidence);
            if let Some(reference) = ticker.reference_price(side).or_else(|| Decimal::from_f64(price)) {
                signal = signal.priced_at(reference);
            }
            signals.push(signal);
        }

        Ok(signals)
    }

    async fn on_order_fill(&mut self, outcome: &OrderOutcome) -> Result<()> {
        match outcome {
            OrderOutcome::Accepted { order } | OrderOutcome::Completed { order } => {
                info!(strategy = %self.name, id = %order.id, status = ?order.status, "order completed")
            }
            OrderOutcome::Simulated { venue, signal } => {
                info!(strategy = %self.name, %venue, symbol = %signal.symbol, "dry-run fill")
            }
            OrderOutcome::RiskRejected { rejection, .. } => {
                info!(strategy = %self.name, %rejection, "signal rejected by risk")
            }
            OrderOutcome::Failed { error, .. } => info!(strategy = %self.name, %error, "signal failed"),
        }
        Ok(())
    }

    async fn on_position_change(&mut self, change: &PositionChange) -> Result<()> {
        let p = change.position();
        debug!(strategy = %self.name, venue = %p.venue, symbol = %p.symbol, qty = %p.quantity, "position change");
        Ok(())
    }
}
