//! Paper venue - native-async in-memory connector
//!
//! Cash-settled model: buys debit the quote currency, sells credit it, and
//! positions net per symbol. Market orders fill at the touch; limit orders
//! rest (reserving notional for buys) until a ticker update crosses them or
//! they are cancelled. Fault injection hooks exist for exercising the engine's
//! isolation paths.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;

use crate::core::{
    Balance, BookLevel, Connector, Error, Market, Order, OrderBook, OrderRejectReason, OrderRequest, OrderStatus,
    OrderType, Position, PositionSide, Result, Side, Ticker,
};

#[derive(Debug, Default, Clone, Copy)]
struct Cash {
    free: Decimal,
    used: Decimal,
}

/// Net position: signed quantity and average entry
#[derive(Debug, Default, Clone, Copy)]
struct NetPosition {
    qty: Decimal,
    entry: Decimal,
}

#[derive(Debug, Default)]
struct PaperState {
    connected: bool,
    cash: BTreeMap<String, Cash>,
    positions: BTreeMap<String, NetPosition>,
    tickers: BTreeMap<String, Ticker>,
    orders: HashMap<String, Order>,
}

#[derive(Debug, Default, Clone)]
struct Faults {
    fail_connect: bool,
    fail_polls: bool,
    latency: Duration,
    reject_orders: Option<OrderRejectReason>,
}

/// In-memory venue
pub struct PaperConnector {
    name: String,
    state: Mutex<PaperState>,
    faults: Mutex<Faults>,
}

/// "BTC/USDT" -> ("BTC", "USDT"); symbols without a quote settle in USD.
fn split_symbol(symbol: &str) -> (&str, &str) {
    symbol.split_once('/').unwrap_or((symbol, "USD"))
}

impl PaperConnector {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(PaperState::default()),
            faults: Mutex::new(Faults::default()),
        }
    }

    /// Seed a free balance
    pub fn with_balance(self, currency: &str, free: Decimal) -> Self {
        self.set_balance(currency, free);
        self
    }

    pub fn with_ticker(self, symbol: &str, bid: Decimal, ask: Decimal) -> Self {
        self.set_ticker(symbol, bid, ask);
        self
    }

    pub fn set_balance(&self, currency: &str, free: Decimal) {
        self.state.lock().cash.entry(currency.to_string()).or_default().free = free;
    }

    /// Seed a position directly
    pub fn set_position(&self, symbol: &str, side: PositionSide, quantity: Decimal, entry: Decimal) {
        let mut state = self.state.lock();
        if quantity.is_zero() {
            state.positions.remove(symbol);
        } else {
            state.positions.insert(
                symbol.to_string(),
                NetPosition {
                    qty: quantity * side.sign(),
                    entry,
                },
            );
        }
    }

    /// Publish a new top of book and fill any resting limit order it crosses.
    pub fn set_ticker(&self, symbol: &str, bid: Decimal, ask: Decimal) {
        let mut state = self.state.lock();
        state.tickers.insert(
            symbol.to_string(),
            Ticker {
                symbol: symbol.to_string(),
                bid: Some(bid),
                ask: Some(ask),
                last: Some((bid + ask) / Decimal::TWO),
                volume_24h: None,
                timestamp: Utc::now(),
            },
        );

        let crossed: Vec<String> = state
            .orders
            .values()
            .filter(|o| o.symbol == symbol && !o.is_terminal())
            .filter(|o| match (o.side, o.price) {
                (Side::Buy, Some(limit)) => ask <= limit,
                (Side::Sell, Some(limit)) => bid >= limit,
                _ => false,
            })
            .map(|o| o.id.clone())
            .collect();
        for id in crossed {
            Self::fill_resting(&mut state, &id);
        }
    }

    pub fn fail_connect(&self, fail: bool) {
        self.faults.lock().fail_connect = fail;
    }

    /// Make balance / position / ticker calls fail with a connection error
    pub fn fail_polls(&self, fail: bool) {
        self.faults.lock().fail_polls = fail;
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.faults.lock().latency = latency;
    }

    pub fn reject_orders(&self, reason: Option<OrderRejectReason>) {
        self.faults.lock().reject_orders = reason;
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    /// Forget every order, as a venue that lost its order book would.
    /// Reserved funds stay reserved.
    pub fn drop_orders(&self) {
        self.state.lock().orders.clear();
    }

    /// Orders ever accepted, in any status
    pub fn order_count(&self) -> usize {
        self.state.lock().orders.len()
    }

    async fn delay(&self) -> Faults {
        let faults = self.faults.lock().clone();
        if !faults.latency.is_zero() {
            tokio::time::sleep(faults.latency).await;
        }
        faults
    }

    fn ensure_connected(&self, state: &PaperState) -> Result<()> {
        if state.connected {
            Ok(())
        } else {
            Err(Error::connection(&self.name, "not connected"))
        }
    }

    fn poll_guard(&self, faults: &Faults) -> Result<()> {
        if faults.fail_polls {
            return Err(Error::connection(&self.name, "venue unreachable"));
        }
        Ok(())
    }

    /// Apply a fill of `qty` at `price` to cash and the net position.
    fn apply_fill(state: &mut PaperState, symbol: &str, side: Side, qty: Decimal, price: Decimal) {
        let (_, quote) = split_symbol(symbol);
        let notional = qty * price;
        let cash = state.cash.entry(quote.to_string()).or_default();
        match side {
            Side::Buy => cash.free -= notional,
            Side::Sell => cash.free += notional,
        }

        let signed = match side {
            Side::Buy => qty,
            Side::Sell => -qty,
        };
        let pos = state.positions.entry(symbol.to_string()).or_default();
        let prev = pos.qty;
        let next = prev + signed;
        if prev.is_zero() || prev.is_sign_positive() == signed.is_sign_positive() {
            pos.entry = (pos.entry * prev.abs() + price * qty) / next.abs();
        } else if !next.is_zero() && next.is_sign_positive() != prev.is_sign_positive() {
            // flipped through zero: the remainder opens at the fill price
            pos.entry = price;
        }
        pos.qty = next;
        if pos.qty.is_zero() {
            state.positions.remove(symbol);
        }
    }

    fn fill_resting(state: &mut PaperState, id: &str) {
        let Some(order) = state.orders.get(id).cloned() else {
            return;
        };
        let Some(price) = order.price else {
            return;
        };
        if order.side == Side::Buy {
            let (_, quote) = split_symbol(&order.symbol);
            let cash = state.cash.entry(quote.to_string()).or_default();
            let reserved = order.quantity * price;
            cash.used -= reserved;
            cash.free += reserved;
        }
        Self::apply_fill(state, &order.symbol, order.side, order.quantity, price);
        if let Some(o) = state.orders.get_mut(id) {
            o.filled_quantity = o.quantity;
            let _ = o.transition(OrderStatus::Filled);
        }
        debug!(id, symbol = %order.symbol, %price, "paper limit order filled");
    }
}

#[async_trait]
impl Connector for PaperConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<()> {
        let faults = self.delay().await;
        if faults.fail_connect {
            return Err(Error::connection(&self.name, "authentication failed"));
        }
        let mut state = self.state.lock();
        if !state.connected {
            state.connected = true;
            info!(venue = %self.name, "paper venue connected");
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.state.lock().connected = false;
        Ok(())
    }

    async fn get_balances(&self) -> Result<Vec<Balance>> {
        let faults = self.delay().await;
        self.poll_guard(&faults)?;
        let state = self.state.lock();
        self.ensure_connected(&state)?;
        Ok(state
            .cash
            .iter()
            .map(|(currency, c)| Balance::new(&self.name, currency, c.free, c.used))
            .collect())
    }

    async fn get_positions(&self) -> Result<Vec<Position>> {
        let faults = self.delay().await;
        self.poll_guard(&faults)?;
        let state = self.state.lock();
        self.ensure_connected(&state)?;
        Ok(state
            .positions
            .iter()
            .filter(|(_, p)| !p.qty.is_zero())
            .map(|(symbol, p)| {
                let side = if p.qty.is_sign_positive() {
                    PositionSide::Long
                } else {
                    PositionSide::Short
                };
                let mark = state
                    .tickers
                    .get(symbol)
                    .and_then(Ticker::mid)
                    .unwrap_or(p.entry);
                Position::new(&self.name, symbol, side, p.qty.abs(), p.entry, mark)
            })
            .collect())
    }

    async fn get_ticker(&self, symbol: &str) -> Result<Ticker> {
        let faults = self.delay().await;
        self.poll_guard(&faults)?;
        let state = self.state.lock();
        self.ensure_connected(&state)?;
        state
            .tickers
            .get(symbol)
            .cloned()
            .ok_or_else(|| Error::order(&self.name, OrderRejectReason::InvalidSymbol, format!("no market {symbol}")))
    }

    async fn get_markets(&self) -> Result<Vec<Market>> {
        self.delay().await;
        let state = self.state.lock();
        self.ensure_connected(&state)?;
        Ok(state
            .tickers
            .keys()
            .map(|symbol| {
                let (base, quote) = split_symbol(symbol);
                Market {
                    symbol: symbol.clone(),
                    base_currency: base.to_string(),
                    quote_currency: quote.to_string(),
                    min_order_size: Decimal::ZERO,
                    precision: 8,
                    active: true,
                }
            })
            .collect())
    }

    async fn get_orderbook(&self, symbol: &str, depth: usize) -> Result<OrderBook> {
        self.delay().await;
        let state = self.state.lock();
        self.ensure_connected(&state)?;
        if !state.tickers.contains_key(symbol) {
            return Err(Error::order(&self.name, OrderRejectReason::InvalidSymbol, format!("no market {symbol}")));
        }

        let mut bids: BTreeMap<Decimal, Decimal> = BTreeMap::new();
        let mut asks: BTreeMap<Decimal, Decimal> = BTreeMap::new();
        for o in state.orders.values().filter(|o| o.symbol == symbol && !o.is_terminal()) {
            if let Some(price) = o.price {
                let book = if o.side == Side::Buy { &mut bids } else { &mut asks };
                *book.entry(price).or_default() += o.quantity - o.filled_quantity;
            }
        }
        let level = |(price, quantity): (&Decimal, &Decimal)| BookLevel {
            price: *price,
            quantity: *quantity,
        };
        Ok(OrderBook {
            symbol: symbol.to_string(),
            bids: bids.iter().rev().take(depth).map(level).collect(),
            asks: asks.iter().take(depth).map(level).collect(),
            timestamp: Utc::now(),
        })
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<Order> {
        let faults = self.delay().await;
        request.validate(&self.name)?;
        if let Some(reason) = faults.reject_orders {
            return Err(Error::order(&self.name, reason, "rejected by venue"));
        }

        let mut state = self.state.lock();
        self.ensure_connected(&state)?;
        let ticker = state.tickers.get(&request.symbol).cloned().ok_or_else(|| {
            Error::order(&self.name, OrderRejectReason::InvalidSymbol, format!("no market {}", request.symbol))
        })?;

        let (_, quote) = split_symbol(&request.symbol);
        let free = state.cash.get(quote).map(|c| c.free).unwrap_or_default();
        let mut order = Order::from_request(format!("paper-{}", Uuid::new_v4()), &self.name, request);

        let crossing_price = match (request.order_type, request.side, request.price) {
            (OrderType::Market, side, _) => ticker.reference_price(side),
            (OrderType::Limit, Side::Buy, Some(limit)) => ticker.ask.filter(|a| *a <= limit).map(|_| limit),
            (OrderType::Limit, Side::Sell, Some(limit)) => ticker.bid.filter(|b| *b >= limit).map(|_| limit),
            (OrderType::Limit, _, None) => None,
        };

        if request.side == Side::Buy {
            let notional = request.quantity * crossing_price.or(request.price).unwrap_or_default();
            if notional > free {
                return Err(Error::order(
                    &self.name,
                    OrderRejectReason::InsufficientFunds,
                    format!("need {notional} {quote}, have {free}"),
                ));
            }
        }

        match crossing_price {
            Some(price) => {
                Self::apply_fill(&mut state, &request.symbol, request.side, request.quantity, price);
                order.filled_quantity = order.quantity;
                order.transition(OrderStatus::Filled)?;
            }
            None if request.order_type == OrderType::Market => {
                return Err(Error::order(&self.name, OrderRejectReason::VenueRejected, "no liquidity"));
            }
            None => {
                if let (Side::Buy, Some(limit)) = (request.side, request.price) {
                    let cash = state.cash.entry(quote.to_string()).or_default();
                    cash.free -= request.quantity * limit;
                    cash.used += request.quantity * limit;
                }
                order.transition(OrderStatus::Open)?;
            }
        }

        debug!(venue = %self.name, id = %order.id, status = ?order.status, "paper order accepted");
        state.orders.insert(order.id.clone(), order.clone());
        Ok(order)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<Order> {
        self.delay().await;
        let mut state = self.state.lock();
        self.ensure_connected(&state)?;
        let order = state
            .orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("order {order_id} on {}", self.name)))?;
        if order.is_terminal() {
            return Ok(order);
        }

        if let (Side::Buy, Some(limit)) = (order.side, order.price) {
            let (_, quote) = split_symbol(&order.symbol);
            let cash = state.cash.entry(quote.to_string()).or_default();
            let reserved = (order.quantity - order.filled_quantity) * limit;
            cash.used -= reserved;
            cash.free += reserved;
        }
        let stored = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| Error::NotFound(format!("order {order_id} on {}", self.name)))?;
        stored.transition(OrderStatus::Cancelled)?;
        Ok(stored.clone())
    }

    async fn get_order(&self, order_id: &str) -> Result<Order> {
        self.delay().await;
        let state = self.state.lock();
        self.ensure_connected(&state)?;
        state
            .orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("order {order_id} on {}", self.name)))
    }

    async fn get_open_orders(&self) -> Result<Vec<Order>> {
        self.delay().await;
        let state = self.state.lock();
        self.ensure_connected(&state)?;
        let mut open: Vec<Order> = state.orders.values().filter(|o| !o.is_terminal()).cloned().collect();
        open.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(open)
    }
}
