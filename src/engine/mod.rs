//! Trading engine - connector lifecycle, polling, signal execution
//!
//! The engine is the only writer of the aggregated view. Each poll cycle
//! queries every enabled venue concurrently, builds a fresh `MarketSnapshot`
//! from the venues that answered, and swaps it in atomically. Strategies read
//! that snapshot and hand signals back over a channel; every signal is routed,
//! risk-checked and then simulated or submitted.

pub mod publisher;
pub mod state;

pub use publisher::{DashboardStatus, DashboardUpdate, StatePublisher};
pub use state::{EngineLifecycle, EngineStatus, MarketSnapshot, VenueHealth};

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::core::{
    Balance, Config, Connector, ConnectorSet, Error, Order, Position, Result, Side, Signal, Ticker, VenueId,
};
use crate::execution::OrderTracker;
use crate::risk::{DailyLossTracker, RiskDecision, RiskEngine};
use crate::strategies::{OrderOutcome, PositionChange, Strategy, StrategyScheduler};

const SIGNAL_QUEUE: usize = 256;
const MANUAL: &str = "manual";
/// Consecutive "unknown order" answers before a working order is given up on
const MAX_ORDER_MISSES: u32 = 3;

/// Result of executing an approved signal
enum Execution {
    Simulated { venue: VenueId },
    Placed(Order),
}

/// One venue's answers for a poll cycle
struct VenuePoll {
    balances: Vec<Balance>,
    positions: Vec<Position>,
    tickers: BTreeMap<String, Ticker>,
}

struct EngineInner {
    config: Config,
    risk: RiskEngine,
    connectors: RwLock<ConnectorSet>,
    scheduler: StrategyScheduler,
    orders: OrderTracker,
    publisher: StatePublisher,
    lifecycle: RwLock<EngineLifecycle>,
    health: RwLock<BTreeMap<VenueId, VenueHealth>>,
    snapshot: watch::Sender<Arc<MarketSnapshot>>,
    /// Last positions seen per venue, kept across failed polls
    last_positions: Mutex<BTreeMap<VenueId, Vec<Position>>>,
    daily: Mutex<DailyLossTracker>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    poll_guard: tokio::sync::Mutex<()>,
    started_once: AtomicBool,
}

/// Trading engine handle. Cheap to clone; all clones drive the same engine.
#[derive(Clone)]
pub struct TradingEngine {
    inner: Arc<EngineInner>,
}

impl TradingEngine {
    /// Build an engine. An invalid config is fatal.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let (snapshot, _) = watch::channel(Arc::new(MarketSnapshot::default()));
        let (shutdown, _) = watch::channel(false);
        let risk = RiskEngine::new(config.risk.clone(), config.dry_run);
        let publisher = StatePublisher::new(config.dashboard.channel_capacity);

        info!(
            dry_run = config.dry_run,
            enabled = ?config.connectors.enabled,
            max_order_value = %config.risk.max_order_value,
            max_position_size = %config.risk.max_position_size,
            max_daily_loss = %config.risk.max_daily_loss,
            "trading engine configured"
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                risk,
                connectors: RwLock::new(ConnectorSet::new()),
                scheduler: StrategyScheduler::new(),
                orders: OrderTracker::new(),
                publisher,
                lifecycle: RwLock::new(EngineLifecycle::Stopped),
                health: RwLock::new(BTreeMap::new()),
                snapshot,
                last_positions: Mutex::new(BTreeMap::new()),
                daily: Mutex::new(DailyLossTracker::new(Utc::now().date_naive())),
                shutdown,
                tasks: Mutex::new(Vec::new()),
                poll_guard: tokio::sync::Mutex::new(()),
                started_once: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn lifecycle(&self) -> EngineLifecycle {
        *self.inner.lifecycle.read()
    }

    /// Add a venue. Only allowed before `start`.
    pub fn register_connector(&self, connector: Arc<dyn Connector>) -> Result<()> {
        if self.lifecycle() != EngineLifecycle::Stopped {
            return Err(Error::InvalidState("connectors must be registered before start".into()));
        }
        let name = connector.name().to_string();
        let mut connectors = self.inner.connectors.write();
        if connectors.contains_key(&name) {
            return Err(Error::Config(format!("connector {name} registered twice")));
        }
        connectors.insert(name.clone(), connector);
        self.inner.health.write().insert(name.clone(), VenueHealth::new(&name));
        debug!(venue = %name, "connector registered");
        Ok(())
    }

    /// Add a strategy. Only allowed before `start`.
    pub fn register_strategy(&self, strategy: Box<dyn Strategy>) -> Result<()> {
        self.inner.scheduler.register(strategy)
    }

    /// Venues the engine drives: the configured `enabled` list, or every
    /// registered connector when the list is empty.
    fn active_connectors(&self) -> Result<ConnectorSet> {
        let registered = self.inner.connectors.read();
        let enabled = &self.inner.config.connectors.enabled;
        if enabled.is_empty() {
            return Ok(registered.clone());
        }
        enabled
            .iter()
            .map(|venue| {
                registered
                    .get(venue)
                    .map(|c| (venue.clone(), c.clone()))
                    .ok_or_else(|| Error::Config(format!("venue {venue} is enabled but no connector is registered")))
            })
            .collect()
    }

    /// Bound a connector call by the configured timeout.
    async fn call<T>(&self, venue: &str, operation: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let limit = self.inner.config.engine.call_timeout();
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(format!("{venue}.{operation}"), limit)),
        }
    }

    fn is_connected(&self, venue: &str) -> bool {
        self.inner.health.read().get(venue).is_some_and(|h| h.connected)
    }

    fn connected_venues(&self) -> Vec<VenueId> {
        self.inner
            .health
            .read()
            .values()
            .filter(|h| h.connected)
            .map(|h| h.venue.clone())
            .collect()
    }

    /// Connect every venue, take a first snapshot, then launch the poll loop,
    /// the strategies and (optionally) the periodic dashboard push.
    pub async fn start(&self, with_dashboard: bool) -> Result<()> {
        {
            let mut lifecycle = self.inner.lifecycle.write();
            if *lifecycle != EngineLifecycle::Stopped {
                return Err(Error::InvalidState(format!("cannot start from {:?}", *lifecycle)));
            }
            if self.inner.started_once.load(Ordering::SeqCst) {
                return Err(Error::InvalidState("engine cannot be restarted".into()));
            }
            *lifecycle = EngineLifecycle::Starting;
        }

        let connectors = match self.active_connectors() {
            Ok(c) => c,
            Err(e) => {
                *self.inner.lifecycle.write() = EngineLifecycle::Stopped;
                return Err(e);
            }
        };
        self.inner.started_once.store(true, Ordering::SeqCst);
        info!(venues = connectors.len(), dry_run = self.inner.config.dry_run, "starting trading engine");

        let attempts = connectors.iter().map(|(venue, connector)| async move {
            (venue.clone(), self.call(venue, "connect", connector.connect()).await)
        });
        for (venue, result) in join_all(attempts).await {
            let mut health = self.inner.health.write();
            let Some(h) = health.get_mut(&venue) else { continue };
            match result {
                Ok(()) => {
                    h.connected = true;
                    info!(venue = %venue, "venue connected");
                }
                Err(e) => {
                    h.connected = false;
                    h.consecutive_failures += 1;
                    h.last_error = Some(e.to_string());
                    error!(venue = %venue, error = %e, "venue failed to connect, continuing without it");
                }
            }
        }
        let still_starting = {
            let mut lifecycle = self.inner.lifecycle.write();
            let starting = *lifecycle == EngineLifecycle::Starting;
            if starting {
                *lifecycle = EngineLifecycle::Running;
            }
            starting
        };
        if !still_starting {
            return Err(self.abandon_start(&connectors).await);
        }

        // Subscribed before the first poll so strategies see snapshot #1.
        let snapshots = self.inner.snapshot.subscribe();
        self.poll_once().await;

        // stop() takes the lifecycle lock before tearing anything down, so
        // either it sees the launched tasks or we see it and back out.
        let launched = {
            let lifecycle = self.inner.lifecycle.read();
            if lifecycle.is_running() {
                self.launch(connectors.clone(), snapshots, with_dashboard);
                true
            } else {
                false
            }
        };
        if !launched {
            return Err(self.abandon_start(&connectors).await);
        }

        info!(state = ?self.lifecycle(), "trading engine started");
        Ok(())
    }

    /// Spawn the strategies and background loops.
    fn launch(&self, connectors: ConnectorSet, snapshots: watch::Receiver<Arc<MarketSnapshot>>, with_dashboard: bool) {
        let (signals_tx, signals_rx) = mpsc::channel(SIGNAL_QUEUE);
        self.inner.scheduler.start(
            connectors,
            snapshots,
            signals_tx,
            self.inner.config.engine.strategy_interval(),
        );

        let mut tasks = self.inner.tasks.lock();
        tasks.push(tokio::spawn(self.clone().poll_loop()));
        tasks.push(tokio::spawn(self.clone().signal_loop(signals_rx)));
        if with_dashboard {
            tasks.push(tokio::spawn(self.clone().dashboard_loop()));
        }
    }

    /// stop() ran while start() was connecting: release the sessions this
    /// start opened and leave the engine stopped.
    async fn abandon_start(&self, connectors: &ConnectorSet) -> Error {
        warn!("engine stopped while starting, releasing venues");
        let disconnects = connectors.iter().map(|(venue, connector)| async move {
            (venue.clone(), self.call(venue, "disconnect", connector.disconnect()).await)
        });
        for (venue, result) in join_all(disconnects).await {
            if let Err(e) = result {
                warn!(venue = %venue, error = %e, "disconnect failed");
            }
            if let Some(h) = self.inner.health.write().get_mut(&venue) {
                h.connected = false;
            }
        }
        Error::InvalidState("engine was stopped while starting".into())
    }

    async fn poll_loop(self) {
        let mut shutdown = self.inner.shutdown.subscribe();
        let period = self.inner.config.engine.poll_interval();
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = interval.tick() => {
                    self.poll_once().await;
                }
            }
        }
        debug!("poll loop stopped");
    }

    async fn signal_loop(self, mut signals: mpsc::Receiver<Signal>) {
        let mut shutdown = self.inner.shutdown.subscribe();
        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                signal = signals.recv() => {
                    let Some(signal) = signal else { break };
                    let strategy = signal.strategy.clone();
                    let outcome = self.process_signal(signal).await;
                    if outcome.is_final() {
                        self.inner.scheduler.notify_outcome(&strategy, outcome);
                    }
                }
            }
        }
        debug!("signal loop stopped");
    }

    async fn dashboard_loop(self) {
        let mut shutdown = self.inner.shutdown.subscribe();
        let period = std::time::Duration::from_secs(self.inner.config.dashboard.push_interval_secs);
        let mut interval = tokio::time::interval(period);
        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = interval.tick() => {
                    let update = self.inner.publisher.publish_full();
                    debug!(subscribers = self.inner.publisher.subscriber_count(), ts = %update.timestamp, "dashboard push");
                }
            }
        }
    }

    /// Run one poll cycle now and return the snapshot it produced.
    pub async fn poll_once(&self) -> Arc<MarketSnapshot> {
        let _guard = self.inner.poll_guard.lock().await;
        let connectors = self.active_connectors().unwrap_or_default();

        let polls = connectors
            .iter()
            .map(|(venue, connector)| async move { (venue.clone(), self.poll_venue(venue, connector.as_ref()).await) });
        let results = join_all(polls).await;

        let previous = self.inner.snapshot.borrow().clone();
        let mut next = MarketSnapshot {
            sequence: previous.sequence + 1,
            timestamp: Some(Utc::now()),
            ..Default::default()
        };
        let max_failures = self.inner.config.engine.max_consecutive_failures;
        let today = Utc::now().date_naive();
        let mut changes = Vec::new();

        for (venue, result) in results {
            match result {
                Ok(poll) => {
                    if let Some(h) = self.inner.health.write().get_mut(&venue) {
                        h.record_success();
                    }
                    {
                        let mut last = self.inner.last_positions.lock();
                        if let Some(before) = last.get(&venue) {
                            changes.extend(PositionChange::diff(before, &poll.positions));
                            self.inner.daily.lock().observe_positions(before, &poll.positions, today);
                        } else {
                            changes.extend(PositionChange::diff(&[], &poll.positions));
                        }
                        last.insert(venue.clone(), poll.positions.clone());
                    }
                    next.balances.insert(venue.clone(), poll.balances);
                    next.positions.insert(venue.clone(), poll.positions);
                    next.tickers.insert(venue, poll.tickers);
                }
                Err(e) => {
                    let crossed = self
                        .inner
                        .health
                        .write()
                        .get_mut(&venue)
                        .is_some_and(|h| h.record_failure(e.to_string(), max_failures));
                    if crossed {
                        error!(venue = %venue, error = %e, "venue marked disconnected after repeated failures");
                    } else {
                        warn!(venue = %venue, error = %e, "venue poll failed, excluded from this cycle");
                    }
                }
            }
        }

        let loss = self.inner.daily.lock().current_loss(next.unrealized_pnl(), today);
        let next = Arc::new(next);
        self.inner.snapshot.send_replace(next.clone());
        self.refresh_lifecycle();

        for change in &changes {
            let p = change.position();
            info!(venue = %p.venue, symbol = %p.symbol, side = ?p.side, qty = %p.quantity, change = change.kind(), "position change");
        }
        self.inner.scheduler.notify_positions(&changes);
        self.refresh_orders().await;

        self.inner
            .publisher
            .publish_delta(self.dashboard_status(), next.balances.clone(), next.positions.clone());
        debug!(seq = next.sequence, venues = next.balances.len(), daily_loss = %loss, "poll cycle complete");
        next
    }

    /// balances -> positions -> tickers, in that order, for one venue.
    async fn poll_venue(&self, venue: &str, connector: &dyn Connector) -> Result<VenuePoll> {
        if !self.is_connected(venue) {
            self.call(venue, "connect", connector.connect()).await?;
            info!(venue, "venue reconnected");
        }

        let balances: Vec<Balance> = self
            .call(venue, "get_balances", connector.get_balances())
            .await?
            .into_iter()
            .map(Balance::normalized)
            .collect();
        let positions: Vec<Position> = self
            .call(venue, "get_positions", connector.get_positions())
            .await?
            .into_iter()
            .filter(|p| p.quantity > Decimal::ZERO)
            .collect();

        let mut symbols: BTreeSet<String> = self.inner.config.venue(venue).watchlist.into_iter().collect();
        symbols.extend(positions.iter().map(|p| p.symbol.clone()));
        let mut tickers = BTreeMap::new();
        for symbol in symbols {
            match self.call(venue, "get_ticker", connector.get_ticker(&symbol)).await {
                Ok(ticker) => {
                    tickers.insert(symbol, ticker);
                }
                Err(e) if e.is_transient() => return Err(e),
                Err(e) => warn!(venue, symbol = %symbol, error = %e, "ticker unavailable"),
            }
        }

        Ok(VenuePoll {
            balances,
            positions,
            tickers,
        })
    }

    /// Re-query working orders and relay the ones that turned terminal.
    async fn refresh_orders(&self) {
        let pending = self.inner.orders.pending();
        if pending.is_empty() {
            return;
        }
        let connectors = self.inner.connectors.read().clone();
        let lookups = pending.into_iter().filter_map(|(venue, id)| {
            let connector = connectors.get(&venue)?.clone();
            Some(async move {
                let result = self.call(&venue, "get_order", connector.get_order(&id)).await;
                (venue, id, result)
            })
        });
        for (venue, id, result) in join_all(lookups).await {
            match result {
                Ok(order) => self.apply_order_update(order),
                Err(Error::NotFound(_)) => self.record_lost_order(&venue, &id),
                Err(e) => debug!(venue = %venue, id = %id, error = %e, "order refresh failed"),
            }
        }
    }

    fn record_lost_order(&self, venue: &str, id: &str) {
        let Some(lost) = self.inner.orders.record_miss(venue, id, MAX_ORDER_MISSES) else {
            return;
        };
        warn!(venue, id, misses = lost.misses, "venue lost track of order, no longer following it");
        let Some(strategy) = lost.strategy else {
            return;
        };
        let order = lost.order;
        let mut signal = Signal::new(strategy.as_str(), &order.symbol, order.side, order.quantity).on_venue(venue);
        if let Some(price) = order.price {
            signal = signal.limit(price);
        }
        self.inner.scheduler.notify_outcome(
            &strategy,
            OrderOutcome::Failed {
                venue: Some(venue.to_string()),
                signal,
                error: format!("order {id} unknown to {venue} after {} lookups", lost.misses),
            },
        );
    }

    fn apply_order_update(&self, order: Order) {
        match self.inner.orders.apply_update(order) {
            Ok(Some(done)) => {
                info!(venue = %done.order.venue, id = %done.order.id, status = ?done.order.status, "order completed");
                if let Some(strategy) = done.strategy {
                    self.inner
                        .scheduler
                        .notify_outcome(&strategy, OrderOutcome::Completed { order: done.order });
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "order update refused"),
        }
    }

    fn refresh_lifecycle(&self) {
        let all_connected = self
            .active_connectors()
            .map(|c| c.keys().all(|v| self.is_connected(v)))
            .unwrap_or(false);
        let mut lifecycle = self.inner.lifecycle.write();
        if lifecycle.is_running() {
            let next = if all_connected {
                EngineLifecycle::Running
            } else {
                EngineLifecycle::Degraded
            };
            if *lifecycle != next {
                info!(from = ?*lifecycle, to = ?next, "engine state changed");
                *lifecycle = next;
            }
        }
    }

    /// Pick the venue for a signal.
    fn route(&self, signal: &Signal, snapshot: &MarketSnapshot) -> Result<VenueId> {
        if let Some(venue) = &signal.venue {
            if !self.inner.connectors.read().contains_key(venue) {
                return Err(Error::NotFound(format!("venue {venue}")));
            }
            if !self.is_connected(venue) {
                return Err(Error::connection(venue, "venue is disconnected"));
            }
            return Ok(venue.clone());
        }

        let connected = self.connected_venues();
        if let Some(venue) = connected.iter().find(|v| snapshot.ticker(v, &signal.symbol).is_some()) {
            return Ok(venue.clone());
        }
        match connected.as_slice() {
            [only] => Ok(only.clone()),
            _ => Err(Error::NotFound(format!("no connected venue quotes {}", signal.symbol))),
        }
    }

    fn daily_loss(&self, snapshot: &MarketSnapshot) -> Decimal {
        self.inner
            .daily
            .lock()
            .current_loss(snapshot.unrealized_pnl(), Utc::now().date_naive())
    }

    /// Route, risk-check and execute one signal.
    async fn execute(&self, signal: &Signal, origin: Option<&str>) -> Result<Execution> {
        let snapshot = self.snapshot();
        let venue = self.route(signal, &snapshot)?;
        let request = signal.to_request();
        request.validate(&venue)?;

        let reference_price = signal.price.or_else(|| {
            snapshot
                .ticker(&venue, &signal.symbol)
                .and_then(|t| t.reference_price(signal.side))
        });
        let decision = self.inner.risk.check(
            &request,
            reference_price,
            snapshot.positions_on(&venue),
            self.daily_loss(&snapshot),
        );

        match decision {
            RiskDecision::Reject(rejection) => {
                info!(strategy = %signal.strategy, venue = %venue, symbol = %signal.symbol, %rejection, "signal rejected by risk");
                Err(Error::Risk(rejection))
            }
            RiskDecision::Approve { simulated: true } => {
                info!(
                    strategy = %signal.strategy,
                    venue = %venue,
                    "[DRY RUN] {} {} {} @ {:?}",
                    request.side,
                    request.quantity,
                    request.symbol,
                    reference_price
                );
                Ok(Execution::Simulated { venue })
            }
            RiskDecision::Approve { simulated: false } => {
                let connector = self
                    .inner
                    .connectors
                    .read()
                    .get(&venue)
                    .cloned()
                    .ok_or_else(|| Error::NotFound(format!("venue {venue}")))?;
                let order = self.call(&venue, "place_order", connector.place_order(&request)).await?;
                info!(
                    strategy = %signal.strategy,
                    venue = %venue,
                    id = %order.id,
                    status = ?order.status,
                    "order placed: {} {} {}",
                    order.side,
                    order.quantity,
                    order.symbol
                );
                if !order.is_terminal() {
                    self.inner.orders.track(order.clone(), origin.map(str::to_string));
                }
                Ok(Execution::Placed(order))
            }
        }
    }

    /// Run a strategy signal through routing, risk and execution.
    pub async fn process_signal(&self, signal: Signal) -> OrderOutcome {
        let origin = signal.strategy.clone();
        match self.execute(&signal, Some(&origin)).await {
            Ok(Execution::Simulated { venue }) => OrderOutcome::Simulated { venue, signal },
            Ok(Execution::Placed(order)) if order.is_terminal() => OrderOutcome::Completed { order },
            Ok(Execution::Placed(order)) => OrderOutcome::Accepted { order },
            Err(Error::Risk(rejection)) => OrderOutcome::RiskRejected { signal, rejection },
            Err(e) => {
                warn!(strategy = %origin, symbol = %signal.symbol, error = %e, "signal failed");
                OrderOutcome::Failed {
                    venue: signal.venue.clone(),
                    signal,
                    error: e.to_string(),
                }
            }
        }
    }

    /// Place an order by hand. Goes through the same risk gate as strategy
    /// signals; a rejection comes back as `Error::Risk`.
    pub async fn submit_manual_order(
        &self,
        venue: &str,
        symbol: &str,
        side: Side,
        quantity: Decimal,
        price: Option<Decimal>,
    ) -> Result<OrderOutcome> {
        if !self.lifecycle().is_running() {
            return Err(Error::InvalidState("engine is not running".into()));
        }
        let mut signal = Signal::new(MANUAL, symbol, side, quantity)
            .on_venue(venue)
            .with_reason("manual order")
            .with_confidence(1.0);
        if let Some(price) = price {
            signal = signal.limit(price);
        }

        match self.execute(&signal, None).await? {
            Execution::Simulated { venue } => Ok(OrderOutcome::Simulated { venue, signal }),
            Execution::Placed(order) if order.is_terminal() => Ok(OrderOutcome::Completed { order }),
            Execution::Placed(order) => Ok(OrderOutcome::Accepted { order }),
        }
    }

    /// Cancel an order on a venue. Cancelling an already-terminal order
    /// returns it unchanged.
    pub async fn cancel_order(&self, venue: &str, order_id: &str) -> Result<Order> {
        let connector = self
            .inner
            .connectors
            .read()
            .get(venue)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("venue {venue}")))?;
        let order = self.call(venue, "cancel_order", connector.cancel_order(order_id)).await?;
        self.apply_order_update(order.clone());
        Ok(order)
    }

    /// Current status, including per-venue and per-strategy health
    pub fn status(&self) -> EngineStatus {
        let snapshot = self.snapshot();
        let state = self.lifecycle();
        EngineStatus {
            state,
            running: state.is_running(),
            dry_run: self.inner.config.dry_run,
            connected_exchanges: self.connected_venues(),
            strategies: self.inner.scheduler.active(),
            venues: self.inner.health.read().values().cloned().collect(),
            strategy_health: self.inner.scheduler.health(),
            open_orders: self.inner.orders.len(),
            daily_loss: self.daily_loss(&snapshot),
            last_poll: snapshot.timestamp,
        }
    }

    fn dashboard_status(&self) -> DashboardStatus {
        DashboardStatus {
            running: self.lifecycle().is_running(),
            dry_run: self.inner.config.dry_run,
            connected_exchanges: self.connected_venues(),
            strategies: self.inner.scheduler.active(),
        }
    }

    /// Balances from the latest snapshot, keyed by venue
    pub fn balances(&self) -> BTreeMap<VenueId, Vec<Balance>> {
        self.snapshot().balances.clone()
    }

    /// Positions from the latest snapshot, keyed by venue
    pub fn positions(&self) -> BTreeMap<VenueId, Vec<Position>> {
        self.snapshot().positions.clone()
    }

    /// Latest aggregated view
    pub fn snapshot(&self) -> Arc<MarketSnapshot> {
        self.inner.snapshot.borrow().clone()
    }

    /// Snapshot stream; a new value arrives after every poll cycle
    pub fn watch_snapshots(&self) -> watch::Receiver<Arc<MarketSnapshot>> {
        self.inner.snapshot.subscribe()
    }

    /// Dashboard push stream
    pub fn subscribe(&self) -> broadcast::Receiver<DashboardUpdate> {
        self.inner.publisher.subscribe()
    }

    /// Dashboard pull endpoint: the complete latest view
    pub fn full_state(&self) -> DashboardUpdate {
        self.inner.publisher.full_state()
    }

    /// Stop strategies and background loops, then disconnect every venue.
    /// Disconnect failures are logged; shutdown always completes.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut lifecycle = self.inner.lifecycle.write();
            match *lifecycle {
                EngineLifecycle::Stopped | EngineLifecycle::Stopping => return Ok(()),
                _ => *lifecycle = EngineLifecycle::Stopping,
            }
        }
        info!("stopping trading engine");
        let grace = self.inner.config.engine.shutdown_grace();

        self.inner.shutdown.send_replace(true);
        self.inner.scheduler.stop(grace).await;

        let tasks: Vec<JoinHandle<()>> = self.inner.tasks.lock().drain(..).collect();
        for mut task in tasks {
            if tokio::time::timeout(grace, &mut task).await.is_err() {
                warn!("background task did not stop in time, aborting");
                task.abort();
            }
        }

        let connectors = self.inner.connectors.read().clone();
        let disconnects = connectors.iter().map(|(venue, connector)| async move {
            (venue.clone(), self.call(venue, "disconnect", connector.disconnect()).await)
        });
        for (venue, result) in join_all(disconnects).await {
            if let Err(e) = result {
                warn!(venue = %venue, error = %e, "disconnect failed");
            }
            if let Some(h) = self.inner.health.write().get_mut(&venue) {
                h.connected = false;
            }
        }

        let abandoned = self.inner.orders.clear();
        if !abandoned.is_empty() {
            warn!(count = abandoned.len(), "stopped while orders were still working");
        }

        *self.inner.lifecycle.write() = EngineLifecycle::Stopped;
        let snapshot = self.snapshot();
        self.inner
            .publisher
            .publish_delta(self.dashboard_status(), snapshot.balances.clone(), snapshot.positions.clone());
        info!("trading engine stopped");
        Ok(())
    }
}
