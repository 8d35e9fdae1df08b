//! Connector capability - the one surface every venue adapter implements

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{Result, types::*};

/// Venue adapter. Native-async venues implement this directly; synchronous
/// client libraries go through [`crate::connectors::BridgedConnector`].
/// Callers never know which one they hold.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Venue name, used as the aggregation key
    fn name(&self) -> &str;

    /// Establish the venue session. Idempotent. Fails with `Error::Connection`
    /// and leaves no partial session behind.
    async fn connect(&self) -> Result<()>;

    /// Release the venue session. Idempotent.
    async fn disconnect(&self) -> Result<()>;

    async fn get_balances(&self) -> Result<Vec<Balance>>;

    async fn get_positions(&self) -> Result<Vec<Position>>;

    async fn get_ticker(&self, symbol: &str) -> Result<Ticker>;

    async fn get_markets(&self) -> Result<Vec<Market>>;

    async fn get_orderbook(&self, symbol: &str, depth: usize) -> Result<OrderBook>;

    /// Submit an order. Fails with `Error::Order` carrying the reject reason.
    async fn place_order(&self, request: &OrderRequest) -> Result<Order>;

    /// Cancel an order and return it in its resulting state. A no-op
    /// returning the same order when it is already terminal.
    async fn cancel_order(&self, order_id: &str) -> Result<Order>;

    async fn get_order(&self, order_id: &str) -> Result<Order>;

    async fn get_open_orders(&self) -> Result<Vec<Order>>;
}

/// Connectors keyed by venue name
pub type ConnectorSet = BTreeMap<VenueId, Arc<dyn Connector>>;
