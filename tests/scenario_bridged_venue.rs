//! Scenario: a venue whose SDK blocks the calling thread, wired in through
//! the execution bridge. A call stuck inside the SDK times out on its own
//! deadline and the rest of the engine keeps polling.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use common::{config, d, paper};
use tradebridge::connectors::{BlockingVenue, BridgedConnector};
use tradebridge::core::{Balance, Market, Order, OrderBook, OrderRequest, Position, Ticker};
use tradebridge::{Error, Result, TradingEngine};

/// Blocking SDK stand-in; `stall_ms` is how long every read blocks.
struct LegacySdk {
    stall_ms: Arc<AtomicU64>,
}

impl LegacySdk {
    fn stall(&self) {
        std::thread::sleep(Duration::from_millis(self.stall_ms.load(Ordering::SeqCst)));
    }
}

impl BlockingVenue for LegacySdk {
    fn name(&self) -> &str {
        "legacy"
    }

    fn connect(&self) -> Result<()> {
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    fn get_balances(&self) -> Result<Vec<Balance>> {
        self.stall();
        Ok(vec![Balance::new("legacy", "USD", d("2500"), d("500"))])
    }

    fn get_positions(&self) -> Result<Vec<Position>> {
        Ok(vec![])
    }

    fn get_ticker(&self, symbol: &str) -> Result<Ticker> {
        Ok(Ticker {
            symbol: symbol.to_string(),
            bid: Some(d("99")),
            ask: Some(d("101")),
            last: Some(d("100")),
            volume_24h: None,
            timestamp: Utc::now(),
        })
    }

    fn get_markets(&self) -> Result<Vec<Market>> {
        Ok(vec![])
    }

    fn get_orderbook(&self, symbol: &str, _depth: usize) -> Result<OrderBook> {
        Err(Error::NotFound(format!("orderbook {symbol}")))
    }

    fn place_order(&self, request: &OrderRequest) -> Result<Order> {
        Err(Error::NotFound(format!("market {}", request.symbol)))
    }

    fn cancel_order(&self, order_id: &str) -> Result<Order> {
        Err(Error::NotFound(format!("order {order_id}")))
    }

    fn get_order(&self, order_id: &str) -> Result<Order> {
        Err(Error::NotFound(format!("order {order_id}")))
    }

    fn get_open_orders(&self) -> Result<Vec<Order>> {
        Ok(vec![])
    }
}

#[tokio::test]
async fn stuck_sdk_call_does_not_stall_the_engine() {
    let stall_ms = Arc::new(AtomicU64::new(0));
    let legacy = BridgedConnector::new(
        LegacySdk {
            stall_ms: stall_ms.clone(),
        },
        2,
        Duration::from_millis(150),
    )
    .unwrap();

    let engine = TradingEngine::new(config(true)).unwrap();
    engine.register_connector(Arc::new(legacy)).unwrap();
    engine.register_connector(paper("paper")).unwrap();
    engine.start(false).await.unwrap();

    let legacy_usd = engine.balances()["legacy"][0].clone();
    assert_eq!(legacy_usd.total, d("3000"));

    stall_ms.store(1_000, Ordering::SeqCst);
    let began = Instant::now();
    let snapshot = engine.poll_once().await;
    assert!(began.elapsed() < Duration::from_millis(900), "poll waited on the stuck SDK");

    assert!(snapshot.balances.contains_key("paper"));
    assert!(!snapshot.balances.contains_key("legacy"));
    let health = engine.status().venues.into_iter().find(|h| h.venue == "legacy").unwrap();
    assert_eq!(health.consecutive_failures, 1);
    assert!(health.last_error.unwrap().contains("Timeout"));

    // the second worker is still free once the SDK unsticks
    stall_ms.store(0, Ordering::SeqCst);
    let snapshot = engine.poll_once().await;
    assert!(snapshot.balances.contains_key("legacy"));
    engine.stop().await.unwrap();
}
