//! Synchronous venue SDKs behind the async `Connector` seam
//!
//! A `BlockingVenue` is any client whose calls block the calling thread.
//! `BridgedConnector` owns one behind an `ExecutionBridge` so every call runs
//! on the venue's worker pool under the configured deadline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::core::config::EngineSettings;
use crate::core::{Balance, Connector, Market, Order, OrderBook, OrderRequest, Position, Result, Ticker};
use crate::execution::ExecutionBridge;

/// Blocking venue client
pub trait BlockingVenue: Send + Sync + 'static {
    fn name(&self) -> &str;
    fn connect(&self) -> Result<()>;
    fn disconnect(&self) -> Result<()>;
    fn get_balances(&self) -> Result<Vec<Balance>>;
    fn get_positions(&self) -> Result<Vec<Position>>;
    fn get_ticker(&self, symbol: &str) -> Result<Ticker>;
    fn get_markets(&self) -> Result<Vec<Market>>;
    fn get_orderbook(&self, symbol: &str, depth: usize) -> Result<OrderBook>;
    fn place_order(&self, request: &OrderRequest) -> Result<Order>;
    fn cancel_order(&self, order_id: &str) -> Result<Order>;
    fn get_order(&self, order_id: &str) -> Result<Order>;
    fn get_open_orders(&self) -> Result<Vec<Order>>;
}

/// Async connector over a blocking venue
pub struct BridgedConnector<V: BlockingVenue> {
    name: String,
    venue: Arc<V>,
    bridge: ExecutionBridge,
    timeout: Duration,
}

impl<V: BlockingVenue> BridgedConnector<V> {
    /// Wrap `venue` with its own pool of `workers` threads.
    pub fn new(venue: V, workers: usize, timeout: Duration) -> Result<Self> {
        let name = venue.name().to_string();
        let bridge = ExecutionBridge::new(name.clone(), workers)?;
        Ok(Self::with_bridge(venue, bridge, timeout))
    }

    /// Pool size and per-call deadline from the `[engine]` section
    pub fn from_settings(venue: V, settings: &EngineSettings) -> Result<Self> {
        Self::new(venue, settings.bridge_workers, settings.call_timeout())
    }

    /// Wrap `venue` on an existing pool
    pub fn with_bridge(venue: V, bridge: ExecutionBridge, timeout: Duration) -> Self {
        Self {
            name: venue.name().to_string(),
            venue: Arc::new(venue),
            bridge,
            timeout,
        }
    }

    pub fn bridge(&self) -> &ExecutionBridge {
        &self.bridge
    }

    pub fn venue(&self) -> &Arc<V> {
        &self.venue
    }

    async fn call<T, F>(&self, operation: &str, f: F) -> Result<T>
    where
        F: FnOnce(&V) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let venue = self.venue.clone();
        self.bridge.run_blocking(operation, move || f(&venue), self.timeout).await
    }
}

#[async_trait]
impl<V: BlockingVenue> Connector for BridgedConnector<V> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<()> {
        match self.call("connect", |v| v.connect()).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // A half-open session may linger on the venue side.
                warn!(venue = %self.name, error = %e, "connect failed, releasing session");
                if let Err(cleanup) = self.call("disconnect", |v| v.disconnect()).await {
                    debug!(venue = %self.name, error = %cleanup, "cleanup disconnect failed");
                }
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> Result<()> {
        self.call("disconnect", |v| v.disconnect()).await
    }

    async fn get_balances(&self) -> Result<Vec<Balance>> {
        self.call("get_balances", |v| v.get_balances()).await
    }

    async fn get_positions(&self) -> Result<Vec<Position>> {
        self.call("get_positions", |v| v.get_positions()).await
    }

    async fn get_ticker(&self, symbol: &str) -> Result<Ticker> {
        let symbol = symbol.to_string();
        self.call("get_ticker", move |v| v.get_ticker(&symbol)).await
    }

    async fn get_markets(&self) -> Result<Vec<Market>> {
        self.call("get_markets", |v| v.get_markets()).await
    }

    async fn get_orderbook(&self, symbol: &str, depth: usize) -> Result<OrderBook> {
        let symbol = symbol.to_string();
        self.call("get_orderbook", move |v| v.get_orderbook(&symbol, depth)).await
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<Order> {
        let request = request.clone();
        self.call("place_order", move |v| v.place_order(&request)).await
    }

    async fn cancel_order(&self, order_id: &str) -> Result<Order> {
        let id = order_id.to_string();
        self.call("cancel_order", move |v| v.cancel_order(&id)).await
    }

    async fn get_order(&self, order_id: &str) -> Result<Order> {
        let id = order_id.to_string();
        self.call("get_order", move |v| v.get_order(&id)).await
    }

    async fn get_open_orders(&self) -> Result<Vec<Order>> {
        self.call("get_open_orders", |v| v.get_open_orders()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Error, Side};
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    /// Blocking SDK stand-in with a fixed per-call delay
    struct SlowSdk {
        delay: Duration,
        fail_connect: bool,
        disconnects: AtomicUsize,
    }

    impl SlowSdk {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                fail_connect: false,
                disconnects: AtomicUsize::new(0),
            }
        }
    }

    impl BlockingVenue for SlowSdk {
        fn name(&self) -> &str {
            "slow"
        }
        fn connect(&self) -> Result<()> {
            thread::sleep(self.delay);
            if self.fail_connect {
                Err(Error::connection("slow", "bad credentials"))
            } else {
                Ok(())
            }
        }
        fn disconnect(&self) -> Result<()> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn get_balances(&self) -> Result<Vec<Balance>> {
            thread::sleep(self.delay);
            Ok(vec![Balance::new("slow", "USD", Decimal::from(100), Decimal::ZERO)])
        }
        fn get_positions(&self) -> Result<Vec<Position>> {
            Ok(vec![])
        }
        fn get_ticker(&self, symbol: &str) -> Result<Ticker> {
            Err(Error::NotFound(symbol.to_string()))
        }
        fn get_markets(&self) -> Result<Vec<Market>> {
            Ok(vec![])
        }
        fn get_orderbook(&self, symbol: &str, _depth: usize) -> Result<OrderBook> {
            Err(Error::NotFound(symbol.to_string()))
        }
        fn place_order(&self, request: &OrderRequest) -> Result<Order> {
            Ok(Order::from_request("sdk-1", "slow", request))
        }
        fn cancel_order(&self, order_id: &str) -> Result<Order> {
            Err(Error::NotFound(order_id.to_string()))
        }
        fn get_order(&self, order_id: &str) -> Result<Order> {
            Err(Error::NotFound(order_id.to_string()))
        }
        fn get_open_orders(&self) -> Result<Vec<Order>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn calls_run_on_the_bridge() {
        let conn = BridgedConnector::new(SlowSdk::new(Duration::ZERO), 1, Duration::from_secs(1)).unwrap();
        assert_eq!(conn.name(), "slow");
        let balances = conn.get_balances().await.unwrap();
        assert_eq!(balances[0].total, Decimal::from(100));

        let order = conn
            .place_order(&OrderRequest::market("AAPL", Side::Buy, Decimal::ONE))
            .await
            .unwrap();
        assert_eq!(order.id, "sdk-1");
        assert!(matches!(conn.get_ticker("AAPL").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn slow_sdk_times_out() {
        let conn =
            BridgedConnector::new(SlowSdk::new(Duration::from_millis(300)), 1, Duration::from_millis(30)).unwrap();
        let err = conn.get_balances().await.unwrap_err();
        match err {
            Error::Timeout { operation, .. } => assert_eq!(operation, "slow.get_balances"),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn pool_sized_from_settings() {
        let mut settings = EngineSettings::default();
        settings.bridge_workers = 2;
        settings.call_timeout_ms = 50;
        let conn = BridgedConnector::from_settings(SlowSdk::new(Duration::from_millis(200)), &settings).unwrap();
        assert_eq!(conn.bridge().workers(), 2);
        assert!(matches!(conn.get_balances().await, Err(Error::Timeout { .. })));
    }

    #[tokio::test]
    async fn failed_connect_releases_session() {
        let mut sdk = SlowSdk::new(Duration::ZERO);
        sdk.fail_connect = true;
        let conn = BridgedConnector::new(sdk, 1, Duration::from_secs(1)).unwrap();
        assert!(matches!(conn.connect().await, Err(Error::Connection { .. })));
        assert_eq!(conn.venue().disconnects.load(Ordering::SeqCst), 1);
    }
}
