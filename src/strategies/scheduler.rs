//! Strategy scheduler - one isolated task per registered strategy
//!
//! Each unit waits for its cadence (a fixed interval, or every snapshot
//! refresh), runs `on_tick` then `evaluate` against the latest snapshot and
//! forwards the signals to the engine. Fill and position notifications arrive
//! on a per-unit queue and are delivered in the order they were observed.
//! Errors and panics inside a hook mark the unit degraded; they never reach
//! other units or the engine.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::traits::{OrderOutcome, PositionChange, Strategy};
use crate::core::{ConnectorSet, Error, Result, Signal};
use crate::engine::MarketSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyState {
    Active,
    Degraded,
    Stopped,
}

/// Most recent known state of one strategy
#[derive(Debug, Clone, Serialize)]
pub struct StrategyHealth {
    pub name: String,
    pub state: StrategyState,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub last_error: Option<String>,
    pub signals_emitted: u64,
    pub last_run: Option<DateTime<Utc>>,
}

impl StrategyHealth {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: StrategyState::Active,
            consecutive_failures: 0,
            total_failures: 0,
            last_error: None,
            signals_emitted: 0,
            last_run: None,
        }
    }
}

enum StrategyEvent {
    Fill(OrderOutcome),
    Position(PositionChange),
}

struct Unit {
    name: String,
    events: mpsc::UnboundedSender<StrategyEvent>,
    handle: JoinHandle<()>,
}

type HealthMap = Arc<RwLock<BTreeMap<String, StrategyHealth>>>;

/// Registry and runner of strategies
pub struct StrategyScheduler {
    registered: Mutex<Vec<Box<dyn Strategy>>>,
    units: Mutex<Vec<Unit>>,
    health: HealthMap,
    shutdown: watch::Sender<bool>,
    started: AtomicBool,
}

impl Default for StrategyScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategyScheduler {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            registered: Mutex::new(Vec::new()),
            units: Mutex::new(Vec::new()),
            health: Arc::new(RwLock::new(BTreeMap::new())),
            shutdown,
            started: AtomicBool::new(false),
        }
    }

    /// Register a strategy. Names must be unique; registration closes once
    /// the scheduler has started.
    pub fn register(&self, strategy: Box<dyn Strategy>) -> Result<()> {
        let name = strategy.name().to_string();
        if self.started.load(Ordering::SeqCst) {
            return Err(Error::InvalidState(format!("cannot register {name}: scheduler already running")));
        }
        let mut health = self.health.write();
        if health.contains_key(&name) {
            return Err(Error::Config(format!("strategy {name} registered twice")));
        }
        health.insert(name.clone(), StrategyHealth::new(&name));
        self.registered.lock().push(strategy);
        info!(strategy = %name, "strategy registered");
        Ok(())
    }

    /// Registered strategy names, sorted
    pub fn names(&self) -> Vec<String> {
        self.health.read().keys().cloned().collect()
    }

    pub fn health(&self) -> Vec<StrategyHealth> {
        self.health.read().values().cloned().collect()
    }

    /// Names of strategies still running (active or degraded)
    pub fn active(&self) -> Vec<String> {
        self.health
            .read()
            .values()
            .filter(|h| h.state != StrategyState::Stopped)
            .map(|h| h.name.clone())
            .collect()
    }

    /// Spawn one task per registered strategy.
    pub fn start(
        &self,
        connectors: ConnectorSet,
        snapshots: watch::Receiver<Arc<MarketSnapshot>>,
        signals: mpsc::Sender<Signal>,
        cadence: Option<Duration>,
    ) {
        self.started.store(true, Ordering::SeqCst);
        self.shutdown.send_replace(false);
        let strategies: Vec<_> = self.registered.lock().drain(..).collect();
        let mut units = self.units.lock();
        for strategy in strategies {
            let name = strategy.name().to_string();
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let ctx = UnitContext {
                name: name.clone(),
                connectors: connectors.clone(),
                snapshots: snapshots.clone(),
                signals: signals.clone(),
                shutdown: self.shutdown.subscribe(),
                cadence,
                health: self.health.clone(),
            };
            let handle = tokio::spawn(run_unit(strategy, ctx, events_rx));
            units.push(Unit {
                name,
                events: events_tx,
                handle,
            });
        }
        info!(count = units.len(), ?cadence, "strategy scheduler started");
    }

    /// Relay a signal outcome to the strategy that emitted it.
    pub fn notify_outcome(&self, strategy: &str, outcome: OrderOutcome) {
        let units = self.units.lock();
        match units.iter().find(|u| u.name == strategy) {
            Some(unit) => {
                if unit.events.send(StrategyEvent::Fill(outcome)).is_err() {
                    debug!(strategy, "strategy gone, dropping order outcome");
                }
            }
            None => debug!(strategy, "no running strategy for order outcome"),
        }
    }

    /// Broadcast position changes to every strategy.
    pub fn notify_positions(&self, changes: &[PositionChange]) {
        if changes.is_empty() {
            return;
        }
        for unit in self.units.lock().iter() {
            for change in changes {
                let _ = unit.events.send(StrategyEvent::Position(change.clone()));
            }
        }
    }

    /// Signal every unit to stop and wait up to `grace` for them to finish.
    /// Units still running afterwards are aborted.
    pub async fn stop(&self, grace: Duration) {
        self.shutdown.send_replace(true);
        let units: Vec<Unit> = self.units.lock().drain(..).collect();
        let deadline = Instant::now() + grace;
        for mut unit in units {
            match tokio::time::timeout_at(deadline, &mut unit.handle).await {
                Ok(_) => debug!(strategy = %unit.name, "strategy unit finished"),
                Err(_) => {
                    warn!(strategy = %unit.name, "strategy did not stop in time, aborting");
                    unit.handle.abort();
                }
            }
            if let Some(h) = self.health.write().get_mut(&unit.name) {
                h.state = StrategyState::Stopped;
            }
        }
        // Registered but never launched
        for h in self.health.write().values_mut() {
            h.state = StrategyState::Stopped;
        }
    }
}

struct UnitContext {
    name: String,
    connectors: ConnectorSet,
    snapshots: watch::Receiver<Arc<MarketSnapshot>>,
    signals: mpsc::Sender<Signal>,
    shutdown: watch::Receiver<bool>,
    cadence: Option<Duration>,
    health: HealthMap,
}

impl UnitContext {
    fn update(&self, f: impl FnOnce(&mut StrategyHealth)) {
        if let Some(h) = self.health.write().get_mut(&self.name) {
            f(h);
        }
    }

    fn record_failure(&self, hook: &str, message: String) {
        error!(strategy = %self.name, hook, error = %message, "strategy hook failed");
        self.update(|h| {
            h.state = StrategyState::Degraded;
            h.consecutive_failures += 1;
            h.total_failures += 1;
            h.last_error = Some(format!("{hook}: {message}"));
        });
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

/// Flatten a hook result that may also have panicked.
fn settle<T>(outcome: std::result::Result<Result<T>, Box<dyn Any + Send>>) -> std::result::Result<T, String> {
    match outcome {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(e.to_string()),
        Err(panic) => Err(panic_message(panic)),
    }
}

/// Resolves when the next cycle is due; false once snapshots stop flowing.
async fn next_cycle(interval: &mut Option<Interval>, snapshots: &mut watch::Receiver<Arc<MarketSnapshot>>) -> bool {
    match interval {
        Some(interval) => {
            interval.tick().await;
            true
        }
        None => snapshots.changed().await.is_ok(),
    }
}

async fn run_unit(
    mut strategy: Box<dyn Strategy>,
    mut ctx: UnitContext,
    mut events: mpsc::UnboundedReceiver<StrategyEvent>,
) {
    let init = AssertUnwindSafe(strategy.initialize(&ctx.connectors)).catch_unwind().await;
    if let Err(message) = settle(init) {
        ctx.record_failure("initialize", message);
        ctx.update(|h| h.state = StrategyState::Stopped);
        return;
    }
    debug!(strategy = %ctx.name, "strategy initialized");

    let mut interval = ctx.cadence.map(|period| {
        let mut i = tokio::time::interval(period);
        i.set_missed_tick_behavior(MissedTickBehavior::Skip);
        i
    });

    loop {
        tokio::select! {
            biased;
            _ = ctx.shutdown.changed() => break,
            Some(event) = events.recv() => {
                let (hook, outcome) = match &event {
                    StrategyEvent::Fill(outcome) => (
                        "on_order_fill",
                        AssertUnwindSafe(strategy.on_order_fill(outcome)).catch_unwind().await,
                    ),
                    StrategyEvent::Position(change) => (
                        "on_position_change",
                        AssertUnwindSafe(strategy.on_position_change(change)).catch_unwind().await,
                    ),
                };
                if let Err(message) = settle(outcome) {
                    ctx.record_failure(hook, message);
                }
            }
            due = next_cycle(&mut interval, &mut ctx.snapshots) => {
                if !due {
                    debug!(strategy = %ctx.name, "snapshot source closed");
                    break;
                }
                let snapshot = ctx.snapshots.borrow_and_update().clone();
                // Nothing polled yet
                if snapshot.sequence == 0 {
                    continue;
                }
                if !run_cycle(strategy.as_mut(), &snapshot, &ctx).await {
                    break;
                }
            }
        }
    }

    if let Err(message) = settle(AssertUnwindSafe(strategy.stop()).catch_unwind().await) {
        ctx.record_failure("stop", message);
    }
    ctx.update(|h| h.state = StrategyState::Stopped);
    info!(strategy = %ctx.name, "strategy stopped");
}

/// One on_tick + evaluate pass. Returns false when the engine is gone.
async fn run_cycle(strategy: &mut dyn Strategy, snapshot: &MarketSnapshot, ctx: &UnitContext) -> bool {
    let result = AssertUnwindSafe(async {
        match strategy.on_tick(snapshot).await {
            Ok(()) => strategy.evaluate(snapshot).await,
            Err(e) => Err(e),
        }
    })
    .catch_unwind()
    .await;

    let signals = match settle(result) {
        Ok(signals) => signals,
        Err(message) => {
            ctx.record_failure("evaluate", message);
            return true;
        }
    };

    let count = signals.len() as u64;
    ctx.update(|h| {
        h.state = StrategyState::Active;
        h.consecutive_failures = 0;
        h.signals_emitted += count;
        h.last_run = Some(Utc::now());
    });

    for mut signal in signals {
        signal.strategy = ctx.name.clone();
        debug!(strategy = %ctx.name, symbol = %signal.symbol, side = %signal.side, qty = %signal.quantity, "signal");
        if ctx.signals.send(signal).await.is_err() {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Side;
    use async_trait::async_trait;
    use rust_decimal::Decimal;

    struct Emitter {
        name: String,
        fail: bool,
        fills: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Strategy for Emitter {
        fn name(&self) -> &str {
            &self.name
        }

        async fn evaluate(&mut self, _snapshot: &MarketSnapshot) -> Result<Vec<Signal>> {
            if self.fail {
                panic!("bad math");
            }
            Ok(vec![Signal::new("spoofed", "BTC/USDT", Side::Buy, Decimal::ONE)])
        }

        async fn on_order_fill(&mut self, outcome: &OrderOutcome) -> Result<()> {
            let tag = match outcome {
                OrderOutcome::Simulated { .. } => "simulated",
                _ => "other",
            };
            self.fills.lock().push(tag.to_string());
            Ok(())
        }
    }

    fn emitter(name: &str, fail: bool) -> (Box<dyn Strategy>, Arc<Mutex<Vec<String>>>) {
        let fills = Arc::new(Mutex::new(Vec::new()));
        let s = Emitter {
            name: name.into(),
            fail,
            fills: fills.clone(),
        };
        (Box::new(s), fills)
    }

    fn snapshot(sequence: u64) -> Arc<MarketSnapshot> {
        Arc::new(MarketSnapshot {
            sequence,
            ..Default::default()
        })
    }

    #[test]
    fn duplicate_names_rejected() {
        let scheduler = StrategyScheduler::new();
        scheduler.register(emitter("a", false).0).unwrap();
        assert!(matches!(scheduler.register(emitter("a", false).0), Err(Error::Config(_))));
        assert_eq!(scheduler.names(), vec!["a"]);
    }

    #[tokio::test]
    async fn panicking_strategy_is_isolated() {
        let scheduler = StrategyScheduler::new();
        scheduler.register(emitter("good", false).0).unwrap();
        scheduler.register(emitter("bad", true).0).unwrap();

        let (snap_tx, snap_rx) = watch::channel(snapshot(0));
        let (sig_tx, mut sig_rx) = mpsc::channel(16);
        scheduler.start(ConnectorSet::new(), snap_rx, sig_tx, None);

        snap_tx.send_replace(snapshot(1));
        let signal = tokio::time::timeout(Duration::from_secs(1), sig_rx.recv()).await.unwrap().unwrap();
        assert_eq!(signal.strategy, "good", "signals are stamped with the emitting strategy");

        snap_tx.send_replace(snapshot(2));
        let again = tokio::time::timeout(Duration::from_secs(1), sig_rx.recv()).await.unwrap().unwrap();
        assert_eq!(again.strategy, "good");

        let health = scheduler.health();
        let bad = health.iter().find(|h| h.name == "bad").unwrap();
        assert_eq!(bad.state, StrategyState::Degraded);
        assert!(bad.last_error.as_deref().unwrap().contains("bad math"));
        let good = health.iter().find(|h| h.name == "good").unwrap();
        assert_eq!(good.state, StrategyState::Active);

        scheduler.stop(Duration::from_secs(1)).await;
        assert!(scheduler.active().is_empty());
    }

    #[tokio::test]
    async fn outcomes_reach_the_emitting_strategy() {
        let scheduler = StrategyScheduler::new();
        let (strategy, fills) = emitter("a", false);
        scheduler.register(strategy).unwrap();
        let (_snap_tx, snap_rx) = watch::channel(snapshot(0));
        let (sig_tx, _sig_rx) = mpsc::channel(16);
        scheduler.start(ConnectorSet::new(), snap_rx, sig_tx, Some(Duration::from_secs(60)));

        let signal = Signal::new("a", "BTC/USDT", Side::Buy, Decimal::ONE);
        scheduler.notify_outcome(
            "a",
            OrderOutcome::Simulated {
                venue: "paper".into(),
                signal,
            },
        );
        for _ in 0..50 {
            if !fills.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(*fills.lock(), vec!["simulated".to_string()]);
        scheduler.stop(Duration::from_secs(1)).await;
    }
}
