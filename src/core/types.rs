//! Core types - normalized venue data

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core::{Error, OrderRejectReason, Result};

/// Connector identity, e.g. "binance" or "alpaca". Aggregation key everywhere.
pub type VenueId = String;

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Direction of an open position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn sign(self) -> Decimal {
        match self {
            PositionSide::Long => Decimal::ONE,
            PositionSide::Short => Decimal::NEGATIVE_ONE,
        }
    }
}

impl From<Side> for PositionSide {
    fn from(side: Side) -> Self {
        match side {
            Side::Buy => PositionSide::Long,
            Side::Sell => PositionSide::Short,
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
        }
    }
}

/// Order status. Transitions only move forward; terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }

    fn rank(self) -> u8 {
        match self {
            OrderStatus::Pending => 0,
            OrderStatus::Open => 1,
            OrderStatus::PartiallyFilled => 2,
            _ => 3,
        }
    }

    /// Whether `self -> next` is a legal forward move. Repeating the same status is allowed.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        if self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        next.rank() > self.rank()
    }
}

/// Account balance for one currency on one venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub venue: VenueId,
    pub currency: String,
    pub free: Decimal,
    pub used: Decimal,
    pub total: Decimal,
}

impl Balance {
    /// `total` is always derived, never taken from the venue.
    pub fn new(venue: impl Into<VenueId>, currency: impl Into<String>, free: Decimal, used: Decimal) -> Self {
        Self {
            venue: venue.into(),
            currency: currency.into(),
            free,
            used,
            total: free + used,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.total == self.free + self.used
    }

    /// Re-derive `total` from its parts.
    pub fn normalized(mut self) -> Self {
        self.total = self.free + self.used;
        self
    }
}

/// Open position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub venue: VenueId,
    pub symbol: String,
    pub side: PositionSide,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub unrealized_pnl: Decimal,
}

impl Position {
    pub fn new(
        venue: impl Into<VenueId>,
        symbol: impl Into<String>,
        side: PositionSide,
        quantity: Decimal,
        entry_price: Decimal,
        current_price: Decimal,
    ) -> Self {
        let mut p = Self {
            venue: venue.into(),
            symbol: symbol.into(),
            side,
            quantity,
            entry_price,
            current_price,
            unrealized_pnl: Decimal::ZERO,
        };
        p.unrealized_pnl = p.compute_pnl();
        p
    }

    /// (current - entry) * quantity * side sign
    pub fn compute_pnl(&self) -> Decimal {
        (self.current_price - self.entry_price) * self.quantity * self.side.sign()
    }

    /// Re-price the position at `price`.
    pub fn mark(&mut self, price: Decimal) {
        self.current_price = price;
        self.unrealized_pnl = self.compute_pnl();
    }

    /// Key used to match the same position across two polls.
    pub fn key(&self) -> (VenueId, String, PositionSide) {
        (self.venue.clone(), self.symbol.clone(), self.side)
    }
}

/// Best bid/ask/last snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub bid: Option<Decimal>,
    pub ask: Option<Decimal>,
    pub last: Option<Decimal>,
    pub volume_24h: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

impl Ticker {
    /// Price an order on `side` would trade at: ask for buys, bid for sells, falling back to last.
    pub fn reference_price(&self, side: Side) -> Option<Decimal> {
        let touch = match side {
            Side::Buy => self.ask,
            Side::Sell => self.bid,
        };
        touch.or(self.last)
    }

    pub fn mid(&self) -> Option<Decimal> {
        match (self.bid, self.ask) {
            (Some(b), Some(a)) => Some((b + a) / Decimal::TWO),
            _ => self.last,
        }
    }
}

/// Tradeable market on a venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub symbol: String,
    pub base_currency: String,
    pub quote_currency: String,
    pub min_order_size: Decimal,
    pub precision: u32,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Order book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    pub symbol: String,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub timestamp: DateTime<Utc>,
}

/// What the engine asks a connector to place
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
}

impl OrderRequest {
    pub fn market(symbol: impl Into<String>, side: Side, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
        }
    }

    pub fn limit(symbol: impl Into<String>, side: Side, quantity: Decimal, price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            quantity,
            price: Some(price),
        }
    }

    /// Quantity must be positive; price is required iff the order is a limit order.
    pub fn validate(&self, venue: &str) -> Result<()> {
        if self.quantity <= Decimal::ZERO {
            return Err(Error::order(venue, OrderRejectReason::InvalidOrder, "quantity must be positive"));
        }
        match (self.order_type, self.price) {
            (OrderType::Limit, None) => Err(Error::order(
                venue,
                OrderRejectReason::InvalidOrder,
                "limit order requires a price",
            )),
            (OrderType::Limit, Some(p)) if p <= Decimal::ZERO => Err(Error::order(
                venue,
                OrderRejectReason::InvalidOrder,
                "limit price must be positive",
            )),
            (OrderType::Market, Some(_)) => Err(Error::order(
                venue,
                OrderRejectReason::InvalidOrder,
                "market order must not carry a price",
            )),
            _ => Ok(()),
        }
    }
}

/// Order as reported by a venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub venue: VenueId,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub filled_quantity: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn from_request(id: impl Into<String>, venue: impl Into<VenueId>, req: &OrderRequest) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            venue: venue.into(),
            symbol: req.symbol.clone(),
            side: req.side,
            order_type: req.order_type,
            quantity: req.quantity,
            price: req.price,
            filled_quantity: Decimal::ZERO,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `next`, refusing regressions and exits from terminal states.
    pub fn transition(&mut self, next: OrderStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidState(format!(
                "order {} cannot move from {:?} to {:?}",
                self.id, self.status, next
            )));
        }
        if self.status != next {
            self.status = next;
            self.updated_at = Utc::now();
        }
        Ok(())
    }
}

/// Advisory trade intent emitted by a strategy. Must pass the risk engine before becoming an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub strategy: String,
    /// Explicit target venue. When absent the engine routes by symbol.
    pub venue: Option<VenueId>,
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    pub reason: String,
    pub confidence: f64,
}

impl Signal {
    pub fn new(strategy: impl Into<String>, symbol: impl Into<String>, side: Side, quantity: Decimal) -> Self {
        Self {
            strategy: strategy.into(),
            venue: None,
            symbol: symbol.into(),
            side,
            quantity,
            order_type: OrderType::Market,
            price: None,
            reason: String::new(),
            confidence: 0.0,
        }
    }

    pub fn on_venue(mut self, venue: impl Into<VenueId>) -> Self {
        self.venue = Some(venue.into());
        self
    }

    /// Limit order at `price`.
    pub fn limit(mut self, price: Decimal) -> Self {
        self.order_type = OrderType::Limit;
        self.price = Some(price);
        self
    }

    /// Market order valued at `price` by the risk engine.
    pub fn priced_at(mut self, price: Decimal) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Clamped into [0, 1]; NaN becomes 0.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = if confidence.is_nan() { 0.0 } else { confidence.clamp(0.0, 1.0) };
        self
    }

    /// The order this signal would place. Market orders drop the valuation price.
    pub fn to_request(&self) -> OrderRequest {
        OrderRequest {
            symbol: self.symbol.clone(),
            side: self.side,
            order_type: self.order_type,
            quantity: self.quantity,
            price: match self.order_type {
                OrderType::Limit => self.price,
                OrderType::Market => None,
            },
        }
    }
}
