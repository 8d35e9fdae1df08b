//! Scenario: resting limit orders. A strategy's limit buy rests on the book,
//! is tracked by the engine, and its fill is relayed back once the market
//! trades through it. An order the venue forgets is given up on and reported
//! as failed. Cancels are idempotent.

mod common;

use common::{Scripted, config, d, eventually, paper};
use tradebridge::core::{OrderStatus, Side, Signal};
use tradebridge::{Error, OrderOutcome, TradingEngine};

#[tokio::test]
async fn resting_fill_is_relayed_to_the_strategy() {
    let engine = TradingEngine::new(config(false)).unwrap();
    let venue = paper("paper");
    engine.register_connector(venue.clone()).unwrap();

    let bid = Signal::new("s", "BTC/USDT", Side::Buy, d("0.01"))
        .on_venue("paper")
        .limit(d("49500"));
    let (strategy, outcomes) = Scripted::new("bidder", vec![bid], false);
    engine.register_strategy(Box::new(strategy)).unwrap();
    engine.start(false).await.unwrap();

    engine.poll_once().await;
    assert!(eventually(|| engine.status().open_orders == 1).await);
    // still working: nothing relayed yet
    assert!(outcomes.lock().is_empty());

    engine.poll_once().await;
    let usdt = engine.balances()["paper"].iter().find(|b| b.currency == "USDT").cloned().unwrap();
    assert_eq!(usdt.used, d("495"));
    assert_eq!(usdt.total, usdt.free + usdt.used);

    venue.set_ticker("BTC/USDT", d("49380"), d("49400"));
    engine.poll_once().await;
    assert!(eventually(|| !outcomes.lock().is_empty()).await);
    match &outcomes.lock()[0] {
        OrderOutcome::Completed { order } => {
            assert_eq!(order.status, OrderStatus::Filled);
            assert_eq!(order.filled_quantity, d("0.01"));
        }
        other => panic!("expected the fill, got {other:?}"),
    }
    assert_eq!(engine.status().open_orders, 0);
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn order_forgotten_by_the_venue_is_reported_failed() {
    let engine = TradingEngine::new(config(false)).unwrap();
    let venue = paper("paper");
    engine.register_connector(venue.clone()).unwrap();

    let bid = Signal::new("s", "BTC/USDT", Side::Buy, d("0.01"))
        .on_venue("paper")
        .limit(d("49500"));
    let (strategy, outcomes) = Scripted::new("bidder", vec![bid], false);
    engine.register_strategy(Box::new(strategy)).unwrap();
    engine.start(false).await.unwrap();

    engine.poll_once().await;
    assert!(eventually(|| engine.status().open_orders == 1).await);

    venue.drop_orders();
    engine.poll_once().await;
    engine.poll_once().await;
    // two misses: still followed
    assert_eq!(engine.status().open_orders, 1);
    assert!(outcomes.lock().is_empty());

    engine.poll_once().await;
    assert_eq!(engine.status().open_orders, 0);
    assert!(eventually(|| !outcomes.lock().is_empty()).await);
    match &outcomes.lock()[0] {
        OrderOutcome::Failed { venue, signal, error } => {
            assert_eq!(venue.as_deref(), Some("paper"));
            assert_eq!(signal.strategy, "bidder");
            assert_eq!(signal.price, Some(d("49500")));
            assert!(error.contains("unknown"));
        }
        other => panic!("expected a failure, got {other:?}"),
    }
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn cancel_is_idempotent() {
    let engine = TradingEngine::new(config(false)).unwrap();
    engine.register_connector(paper("paper")).unwrap();
    engine.start(false).await.unwrap();

    let outcome = engine
        .submit_manual_order("paper", "BTC/USDT", Side::Sell, d("0.01"), Some(d("60000")))
        .await
        .unwrap();
    let OrderOutcome::Accepted { order } = outcome else {
        panic!("expected a resting order, got {outcome:?}");
    };
    assert_eq!(engine.status().open_orders, 1);

    let first = engine.cancel_order("paper", &order.id).await.unwrap();
    let second = engine.cancel_order("paper", &order.id).await.unwrap();
    assert_eq!(first.status, OrderStatus::Cancelled);
    assert_eq!(second, first);
    assert_eq!(engine.status().open_orders, 0);

    assert!(matches!(
        engine.cancel_order("paper", "paper-missing").await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        engine.cancel_order("elsewhere", &order.id).await,
        Err(Error::NotFound(_))
    ));
    engine.stop().await.unwrap();
}
