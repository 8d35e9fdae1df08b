//! Scenario: stop() is called while start() is still connecting a slow venue.
//!
//! stop() wins. start() returns an error instead of bringing the engine up
//! behind the caller's back, the venue session it opened is released, and no
//! strategy or background loop is left running.

mod common;

use std::time::Duration;

use common::{Scripted, config, d, paper};
use tradebridge::core::{Side, Signal};
use tradebridge::{EngineLifecycle, Error, TradingEngine};

#[tokio::test]
async fn stop_while_connecting_leaves_the_engine_stopped() {
    let engine = TradingEngine::new(config(false)).unwrap();
    let venue = paper("paper");
    venue.set_latency(Duration::from_millis(100));
    engine.register_connector(venue.clone()).unwrap();

    let signal = Signal::new("s", "BTC/USDT", Side::Buy, d("0.001"))
        .on_venue("paper")
        .priced_at(d("50000"));
    let (strategy, outcomes) = Scripted::new("eager", vec![signal], true);
    engine.register_strategy(Box::new(strategy)).unwrap();

    let starting = tokio::spawn({
        let engine = engine.clone();
        async move { engine.start(false).await }
    });
    tokio::time::sleep(Duration::from_millis(30)).await;
    engine.stop().await.unwrap();
    assert_eq!(engine.lifecycle(), EngineLifecycle::Stopped);

    let started = starting.await.unwrap();
    assert!(matches!(started, Err(Error::InvalidState(_))), "got {started:?}");
    assert_eq!(engine.lifecycle(), EngineLifecycle::Stopped);
    assert!(!venue.is_connected(), "session opened by start() was released");

    // nothing keeps trading afterwards
    venue.set_latency(Duration::ZERO);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let status = engine.status();
    assert!(status.strategies.is_empty());
    assert!(status.connected_exchanges.is_empty());
    assert!(outcomes.lock().is_empty());
    assert_eq!(venue.order_count(), 0);
}
