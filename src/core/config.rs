//! Configuration - Type-safe, validated config
//!
//! Handed to the engine once at startup. Every section has defaults so a
//! partial TOML file is enough; `validate` decides whether the engine may start.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Evaluate and approve orders but never submit them
    pub dry_run: bool,

    /// Log filter used when RUST_LOG is unset
    pub log_level: String,

    /// Risk limits
    pub risk: RiskConfig,

    /// Enabled venues and their credentials
    pub connectors: ConnectorsConfig,

    /// Polling, timeouts and worker pool sizing
    pub engine: EngineSettings,

    /// State push to dashboard observers
    pub dashboard: DashboardConfig,

    /// Per-strategy parameters keyed by strategy name
    pub strategies: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Max absolute quantity per venue + symbol
    pub max_position_size: Decimal,
    /// Max quantity * price for a single order
    pub max_order_value: Decimal,
    /// Realized + unrealized loss that blocks new orders until the UTC day rolls over
    pub max_daily_loss: Decimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorsConfig {
    /// Venue names the engine should start
    pub enabled: Vec<String>,
    /// Per-venue settings keyed by venue name
    pub venues: BTreeMap<String, VenueConfig>,
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VenueConfig {
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub private_key: Option<String>,
    pub passphrase: Option<String>,
    /// Testnet / paper account
    pub sandbox: bool,
    /// Symbols whose tickers are polled every cycle
    pub watchlist: Vec<String>,
    /// Venue-specific knobs passed through to the connector
    pub options: BTreeMap<String, String>,
}

impl VenueConfig {
    pub fn has_credentials(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
            || self.private_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

impl std::fmt::Debug for VenueConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn redact(v: &Option<String>) -> &'static str {
            if v.is_some() { "<redacted>" } else { "<unset>" }
        }
        f.debug_struct("VenueConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_secret", &redact(&self.api_secret))
            .field("private_key", &redact(&self.private_key))
            .field("passphrase", &redact(&self.passphrase))
            .field("sandbox", &self.sandbox)
            .field("watchlist", &self.watchlist)
            .field("options", &self.options)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub poll_interval_ms: u64,
    /// Deadline for every connector and bridge call
    pub call_timeout_ms: u64,
    /// Worker threads per synchronous venue
    pub bridge_workers: usize,
    /// Strategy cadence. `None` evaluates on every state refresh.
    pub strategy_interval_ms: Option<u64>,
    /// Consecutive poll failures before a venue is marked disconnected
    pub max_consecutive_failures: u32,
    /// How long `stop` waits for strategies to wind down
    pub shutdown_grace_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub push_interval_secs: u64,
    pub channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dry_run: true,
            log_level: "info,tradebridge=debug".to_string(),
            risk: RiskConfig::default(),
            connectors: ConnectorsConfig::default(),
            engine: EngineSettings::default(),
            dashboard: DashboardConfig::default(),
            strategies: BTreeMap::new(),
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_position_size: Decimal::from(10),
            max_order_value: Decimal::from(1_000),
            max_daily_loss: Decimal::from(500),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            call_timeout_ms: 10_000,
            bridge_workers: 4,
            strategy_interval_ms: None,
            max_consecutive_failures: 3,
            shutdown_grace_ms: 5_000,
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            push_interval_secs: 5,
            channel_capacity: 64,
        }
    }
}

impl EngineSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn strategy_interval(&self) -> Option<Duration> {
        self.strategy_interval_ms.map(Duration::from_millis)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Config {
    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load several TOML files, later files overriding earlier ones.
    /// Tables merge recursively; missing files are skipped.
    pub fn load_layered<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut merged = toml::Table::new();
        for path in paths {
            let path = path.as_ref();
            if !path.exists() {
                tracing::debug!(path = %path.display(), "config layer not found, skipping");
                continue;
            }
            let content = std::fs::read_to_string(path)
                .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
            let layer: toml::Table = toml::from_str(&content)?;
            deep_merge(&mut merged, layer);
        }
        Ok(toml::Value::Table(merged).try_into()?)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup:
    /// `TRADEBRIDGE_DRY_RUN`, `TRADEBRIDGE_ENABLED_CONNECTORS`, `TRADEBRIDGE_LOG_LEVEL`,
    /// and `<VENUE>_API_KEY` / `<VENUE>_API_SECRET` / `<VENUE>_PRIVATE_KEY` per enabled venue.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("TRADEBRIDGE_DRY_RUN") {
            match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => self.dry_run = true,
                "0" | "false" | "no" => self.dry_run = false,
                other => tracing::warn!(value = other, "ignoring unparseable TRADEBRIDGE_DRY_RUN"),
            }
        }
        if let Some(v) = lookup("TRADEBRIDGE_ENABLED_CONNECTORS") {
            self.connectors.enabled = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = lookup("TRADEBRIDGE_LOG_LEVEL") {
            self.log_level = v;
        }

        for venue in self.connectors.enabled.clone() {
            let prefix = venue.to_ascii_uppercase().replace('-', "_");
            let entry = self.connectors.venues.entry(venue).or_default();
            if let Some(v) = lookup(&format!("{prefix}_API_KEY")) {
                entry.api_key = Some(v);
            }
            if let Some(v) = lookup(&format!("{prefix}_API_SECRET")) {
                entry.api_secret = Some(v);
            }
            if let Some(v) = lookup(&format!("{prefix}_PRIVATE_KEY")) {
                entry.private_key = Some(v);
            }
        }
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let risk = &self.risk;
        for (name, value) in [
            ("risk.max_position_size", risk.max_position_size),
            ("risk.max_order_value", risk.max_order_value),
            ("risk.max_daily_loss", risk.max_daily_loss),
        ] {
            if value <= Decimal::ZERO {
                return Err(Error::Config(format!("{name} must be positive, got {value}")));
            }
        }

        let engine = &self.engine;
        if engine.poll_interval_ms == 0 {
            return Err(Error::Config("engine.poll_interval_ms must be > 0".into()));
        }
        if engine.call_timeout_ms == 0 {
            return Err(Error::Config("engine.call_timeout_ms must be > 0".into()));
        }
        if engine.bridge_workers == 0 {
            return Err(Error::Config("engine.bridge_workers must be > 0".into()));
        }
        if engine.strategy_interval_ms == Some(0) {
            return Err(Error::Config("engine.strategy_interval_ms must be > 0 when set".into()));
        }
        if engine.max_consecutive_failures == 0 {
            return Err(Error::Config("engine.max_consecutive_failures must be > 0".into()));
        }
        if self.dashboard.push_interval_secs == 0 || self.dashboard.channel_capacity == 0 {
            return Err(Error::Config("dashboard push interval and capacity must be > 0".into()));
        }

        let mut seen = HashSet::new();
        for venue in &self.connectors.enabled {
            if venue.trim().is_empty() {
                return Err(Error::Config("empty venue name in connectors.enabled".into()));
            }
            if !seen.insert(venue.as_str()) {
                return Err(Error::Config(format!("venue {venue} enabled twice")));
            }
        }
        Ok(())
    }

    /// Settings for one venue; defaults when the venue has no section.
    pub fn venue(&self, name: &str) -> VenueConfig {
        self.connectors.venues.get(name).cloned().unwrap_or_default()
    }
}

/// Recursively merge `overlay` into `base`.
fn deep_merge(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                deep_merge(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
