//! State publisher - push/pull fan-out of the aggregated view
//!
//! Push: `subscribe()` yields a broadcast of `DashboardUpdate`s, a full one
//! every push interval plus section-level deltas whenever a poll changes
//! something. Sections absent from an update are unchanged. Pull:
//! `full_state()` returns the complete latest view for consumers that
//! (re)connect.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::core::{Balance, Position, VenueId};

/// Status section of the dashboard payload
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DashboardStatus {
    pub running: bool,
    pub dry_run: bool,
    pub connected_exchanges: Vec<VenueId>,
    pub strategies: Vec<String>,
}

/// One push to dashboard observers. `None` sections are omitted on the wire.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<DashboardStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balances: Option<BTreeMap<VenueId, Vec<Balance>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub positions: Option<BTreeMap<VenueId, Vec<Position>>>,
    pub timestamp: DateTime<Utc>,
}

impl DashboardUpdate {
    pub fn is_full(&self) -> bool {
        self.status.is_some() && self.balances.is_some() && self.positions.is_some()
    }

    pub fn to_json(&self) -> crate::core::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Default)]
struct Latest {
    status: DashboardStatus,
    balances: BTreeMap<VenueId, Vec<Balance>>,
    positions: BTreeMap<VenueId, Vec<Position>>,
    timestamp: Option<DateTime<Utc>>,
}

pub struct StatePublisher {
    tx: broadcast::Sender<DashboardUpdate>,
    latest: RwLock<Latest>,
}

impl StatePublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            latest: RwLock::new(Latest::default()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DashboardUpdate> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Record the latest view and push only the sections that changed.
    /// Returns the pushed update, if any.
    pub fn publish_delta(
        &self,
        status: DashboardStatus,
        balances: BTreeMap<VenueId, Vec<Balance>>,
        positions: BTreeMap<VenueId, Vec<Position>>,
    ) -> Option<DashboardUpdate> {
        let now = Utc::now();
        let update = {
            let mut latest = self.latest.write();
            let update = DashboardUpdate {
                status: (latest.status != status).then(|| status.clone()),
                balances: (latest.balances != balances).then(|| balances.clone()),
                positions: (latest.positions != positions).then(|| positions.clone()),
                timestamp: now,
            };
            *latest = Latest {
                status,
                balances,
                positions,
                timestamp: Some(now),
            };
            update
        };

        if update.status.is_none() && update.balances.is_none() && update.positions.is_none() {
            return None;
        }
        self.push(update.clone());
        Some(update)
    }

    /// Push the complete latest view (periodic heartbeat).
    pub fn publish_full(&self) -> DashboardUpdate {
        let update = self.full_state();
        self.push(update.clone());
        update
    }

    /// Pull: the complete latest view
    pub fn full_state(&self) -> DashboardUpdate {
        let latest = self.latest.read();
        DashboardUpdate {
            status: Some(latest.status.clone()),
            balances: Some(latest.balances.clone()),
            positions: Some(latest.positions.clone()),
            timestamp: latest.timestamp.unwrap_or_else(Utc::now),
        }
    }

    pub fn status(&self) -> DashboardStatus {
        self.latest.read().status.clone()
    }

    pub fn balances(&self) -> BTreeMap<VenueId, Vec<Balance>> {
        self.latest.read().balances.clone()
    }

    pub fn positions(&self) -> BTreeMap<VenueId, Vec<Position>> {
        self.latest.read().positions.clone()
    }

    fn push(&self, update: DashboardUpdate) {
        // No subscribers is not an error
        if self.tx.send(update).is_err() {
            trace!("no dashboard subscribers");
        }
    }
}
