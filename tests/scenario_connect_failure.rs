//! Scenario: one venue fails to connect at startup.
//!
//! The engine still starts, lands in Degraded rather than Stopped, the other
//! venue connects and is polled, and the failed venue carries a visible error
//! until a later poll reconnects it.

mod common;

use common::{config, paper};
use tradebridge::{EngineLifecycle, TradingEngine};

#[tokio::test]
async fn failed_connect_degrades_and_recovers() {
    let engine = TradingEngine::new(config(true)).unwrap();
    let down = paper("down");
    let up = paper("up");
    down.fail_connect(true);
    engine.register_connector(down.clone()).unwrap();
    engine.register_connector(up.clone()).unwrap();

    engine.start(false).await.unwrap();
    assert_eq!(engine.lifecycle(), EngineLifecycle::Degraded);

    let status = engine.status();
    assert!(status.running);
    assert_eq!(status.connected_exchanges, vec!["up".to_string()]);
    let down_health = status.venues.iter().find(|v| v.venue == "down").unwrap();
    assert!(!down_health.connected);
    assert!(down_health.last_error.as_deref().unwrap().contains("authentication failed"));

    let balances = engine.balances();
    assert!(balances.contains_key("up"));
    assert!(!balances.contains_key("down"));

    // venue comes back: the next cycle reconnects it
    down.fail_connect(false);
    engine.poll_once().await;
    assert_eq!(engine.lifecycle(), EngineLifecycle::Running);
    assert!(engine.balances().contains_key("down"));

    engine.stop().await.unwrap();
    assert_eq!(engine.lifecycle(), EngineLifecycle::Stopped);
}
