//! Scenario: two venues, venue A reports {BTC: free=1.0, used=0.0}, venue B's
//! poll times out.
//!
//! The cycle completes, the aggregate holds A's balance, B is omitted rather
//! than served stale, and B's timeout is counted toward its health without
//! disconnecting it.

mod common;

use std::time::{Duration, Instant};

use common::{config, d};
use rust_decimal::Decimal;
use tradebridge::connectors::PaperConnector;
use tradebridge::{EngineLifecycle, TradingEngine};
use std::sync::Arc;

#[tokio::test]
async fn timed_out_venue_is_excluded_from_the_cycle() {
    let engine = TradingEngine::new(config(true)).unwrap();
    let a = Arc::new(PaperConnector::new("a").with_balance("BTC", d("1.0")));
    let b = Arc::new(PaperConnector::new("b").with_balance("USDT", d("500")));
    engine.register_connector(a.clone()).unwrap();
    engine.register_connector(b.clone()).unwrap();
    engine.start(false).await.unwrap();
    assert!(engine.balances().contains_key("b"));

    b.set_latency(Duration::from_millis(1_000));
    let started = Instant::now();
    let snapshot = engine.poll_once().await;
    assert!(started.elapsed() < Duration::from_millis(900), "cycle bounded by the call timeout");

    let a_balances = &snapshot.balances["a"];
    assert_eq!(a_balances.len(), 1);
    assert_eq!(a_balances[0].currency, "BTC");
    assert_eq!(a_balances[0].free, d("1.0"));
    assert_eq!(a_balances[0].used, Decimal::ZERO);
    assert_eq!(a_balances[0].total, d("1.0"));
    assert!(!snapshot.balances.contains_key("b"));

    let status = engine.status();
    let b_health = status.venues.iter().find(|v| v.venue == "b").unwrap();
    assert_eq!(b_health.consecutive_failures, 1);
    assert!(b_health.last_error.as_deref().unwrap().contains("Timeout"));
    // one transient failure does not disconnect the venue
    assert!(b_health.connected);
    assert_eq!(engine.lifecycle(), EngineLifecycle::Running);

    b.set_latency(Duration::ZERO);
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn repeated_timeouts_disconnect_the_venue() {
    let mut cfg = config(true);
    cfg.engine.max_consecutive_failures = 2;
    let engine = TradingEngine::new(cfg).unwrap();
    let a = Arc::new(PaperConnector::new("a").with_balance("BTC", d("1")));
    let b = Arc::new(PaperConnector::new("b"));
    engine.register_connector(a).unwrap();
    engine.register_connector(b.clone()).unwrap();
    engine.start(false).await.unwrap();

    b.fail_polls(true);
    engine.poll_once().await;
    engine.poll_once().await;
    assert_eq!(engine.lifecycle(), EngineLifecycle::Degraded);
    assert_eq!(engine.status().connected_exchanges, vec!["a".to_string()]);

    b.fail_polls(false);
    engine.poll_once().await;
    assert_eq!(engine.lifecycle(), EngineLifecycle::Running);
    engine.stop().await.unwrap();
}
