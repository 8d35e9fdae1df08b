use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use tracing_subscriber::{EnvFilter, fmt};

use tradebridge::connectors::PaperConnector;
use tradebridge::core::config::VenueConfig;
use tradebridge::strategies::{TrendParams, TrendStrategy};
use tradebridge::{Config, TradingEngine};

const DEFAULT_LAYERS: [&str; 2] = ["config.toml", "config.local.toml"];

/// Paper venue seeded from `balance.<CCY>` and `price.<SYMBOL>` options.
fn paper_venue(name: &str, venue: &VenueConfig) -> anyhow::Result<(Arc<PaperConnector>, Vec<(String, Decimal)>)> {
    let connector = PaperConnector::new(name);
    let mut prices = Vec::new();
    for (key, value) in &venue.options {
        let amount: Decimal = value
            .parse()
            .map_err(|e| anyhow::anyhow!("{name}: option {key}={value} is not a number: {e}"))?;
        if let Some(currency) = key.strip_prefix("balance.") {
            connector.set_balance(currency, amount);
        } else if let Some(symbol) = key.strip_prefix("price.") {
            connector.set_ticker(symbol, amount, amount);
            prices.push((symbol.to_string(), amount));
        }
    }
    Ok((Arc::new(connector), prices))
}

/// Oscillate paper quotes so the strategies have something to look at.
async fn drive_quotes(venues: Vec<(Arc<PaperConnector>, Vec<(String, Decimal)>)>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    let spread = Decimal::new(5, 4);
    let mut step: u32 = 0;
    loop {
        interval.tick().await;
        step = step.wrapping_add(1);
        let swing = Decimal::from_f64((f64::from(step) / 7.0).sin() * 0.02).unwrap_or_default();
        for (venue, prices) in &venues {
            for (symbol, base) in prices {
                let mid = *base * (Decimal::ONE + swing);
                venue.set_ticker(symbol, mid * (Decimal::ONE - spread), mid * (Decimal::ONE + spread));
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    // 1. Layered config + environment overrides
    let layers: Vec<String> = match std::env::args().skip(1).collect::<Vec<_>>() {
        args if args.is_empty() => DEFAULT_LAYERS.iter().map(|s| s.to_string()).collect(),
        args => args,
    };
    let mut config = Config::load_layered(&layers)?;
    config.apply_env_overrides();

    // 2. Logger
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_level(true)
        .init();

    tracing::info!(layers = ?layers, dry_run = config.dry_run, "tradebridge starting");
    if !config.dry_run {
        tracing::warn!("LIVE MODE: approved orders will be submitted to venues");
    }

    // 3. Engine, venues, strategies
    let engine = TradingEngine::new(config.clone())?;
    let mut quoted = Vec::new();
    for name in &config.connectors.enabled {
        let venue = config.venue(name);
        if venue.has_credentials() {
            tracing::info!(venue = %name, "credentials present; running against the paper venue");
        }
        let (connector, prices) = paper_venue(name, &venue)?;
        engine.register_connector(connector.clone())?;
        quoted.push((connector, prices));
    }
    let params = TrendParams::from_config(config.strategies.get("trend"))?;
    engine.register_strategy(Box::new(TrendStrategy::new(params)))?;

    tokio::spawn(drive_quotes(quoted, config.engine.poll_interval()));

    // 4. Run until Ctrl-C
    engine.start(true).await?;
    let mut updates = engine.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl-C received, shutting down");
                break;
            }
            update = updates.recv() => match update {
                Ok(update) => tracing::debug!(payload = %update.to_json()?, "dashboard update"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "dashboard consumer lagging");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    engine.stop().await?;
    let status = engine.status();
    tracing::info!(state = ?status.state, open_orders = status.open_orders, "tradebridge stopped");
    Ok(())
}
