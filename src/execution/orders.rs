//! Order tracking - follows submitted orders until they reach a terminal status

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::core::{Order, Result, VenueId};

/// A live order and the strategy that asked for it (`None` for manual orders)
#[derive(Debug, Clone)]
pub struct TrackedOrder {
    pub order: Order,
    pub strategy: Option<String>,
    /// Consecutive lookups the venue answered with "unknown order"
    pub misses: u32,
}

/// Non-terminal orders keyed by (venue, order id)
#[derive(Default)]
pub struct OrderTracker {
    orders: RwLock<HashMap<(VenueId, String), TrackedOrder>>,
}

impl OrderTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start following an order. Terminal orders are not tracked.
    pub fn track(&self, order: Order, strategy: Option<String>) {
        if order.is_terminal() {
            return;
        }
        debug!(venue = %order.venue, id = %order.id, status = ?order.status, "tracking order");
        self.orders.write().insert(
            (order.venue.clone(), order.id.clone()),
            TrackedOrder {
                order,
                strategy,
                misses: 0,
            },
        );
    }

    /// Orders still waiting for a terminal status
    pub fn pending(&self) -> Vec<(VenueId, String)> {
        let mut keys: Vec<_> = self.orders.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn get(&self, venue: &str, id: &str) -> Option<TrackedOrder> {
        self.orders.read().get(&(venue.to_string(), id.to_string())).cloned()
    }

    pub fn len(&self) -> usize {
        self.orders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply a venue-reported state. Returns the tracked order once it turns
    /// terminal (and stops tracking it). Regressions are refused and leave the
    /// tracked state untouched.
    pub fn apply_update(&self, update: Order) -> Result<Option<TrackedOrder>> {
        let key = (update.venue.clone(), update.id.clone());
        let mut orders = self.orders.write();
        let Some(tracked) = orders.get_mut(&key) else {
            return Ok(None);
        };

        if let Err(e) = tracked.order.transition(update.status) {
            warn!(venue = %key.0, id = %key.1, reported = ?update.status, "ignoring order status regression");
            return Err(e);
        }
        let status = tracked.order.status;
        tracked.misses = 0;
        tracked.order = Order {
            status,
            ..update
        };

        if status.is_terminal() {
            Ok(orders.remove(&key))
        } else {
            Ok(None)
        }
    }

    /// The venue no longer knows this order. After `max_misses` lookups in a
    /// row the order is given up on and returned.
    pub fn record_miss(&self, venue: &str, id: &str, max_misses: u32) -> Option<TrackedOrder> {
        let key = (venue.to_string(), id.to_string());
        let mut orders = self.orders.write();
        let tracked = orders.get_mut(&key)?;
        tracked.misses += 1;
        if tracked.misses < max_misses {
            debug!(venue, id, misses = tracked.misses, "venue does not know tracked order");
            return None;
        }
        orders.remove(&key)
    }

    /// Drop everything, e.g. on shutdown
    pub fn clear(&self) -> Vec<TrackedOrder> {
        self.orders.write().drain().map(|(_, t)| t).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{OrderRequest, OrderStatus, Side};
    use rust_decimal::Decimal;

    fn open_order(id: &str) -> Order {
        let req = OrderRequest::limit("BTC/USDT", Side::Buy, Decimal::ONE, Decimal::from(100));
        let mut o = Order::from_request(id, "paper", &req);
        o.status = OrderStatus::Open;
        o
    }

    #[test]
    fn releases_order_on_terminal_status() {
        let tracker = OrderTracker::new();
        tracker.track(open_order("a"), Some("trend".into()));
        assert_eq!(tracker.pending(), vec![("paper".to_string(), "a".to_string())]);

        let mut partial = open_order("a");
        partial.status = OrderStatus::PartiallyFilled;
        assert!(tracker.apply_update(partial).unwrap().is_none());
        assert_eq!(tracker.len(), 1);

        let mut filled = open_order("a");
        filled.status = OrderStatus::Filled;
        filled.filled_quantity = Decimal::ONE;
        let done = tracker.apply_update(filled).unwrap().unwrap();
        assert_eq!(done.strategy.as_deref(), Some("trend"));
        assert_eq!(done.order.status, OrderStatus::Filled);
        assert!(tracker.is_empty());
    }

    #[test]
    fn refuses_regression() {
        let tracker = OrderTracker::new();
        let mut o = open_order("b");
        o.status = OrderStatus::PartiallyFilled;
        tracker.track(o, None);

        let regressed = open_order("b");
        assert!(tracker.apply_update(regressed).is_err());
        assert_eq!(tracker.get("paper", "b").unwrap().order.status, OrderStatus::PartiallyFilled);
    }

    #[test]
    fn unknown_order_is_dropped_after_repeated_misses() {
        let tracker = OrderTracker::new();
        tracker.track(open_order("d"), Some("trend".into()));

        assert!(tracker.record_miss("paper", "d", 3).is_none());
        // a successful lookup resets the count
        let mut seen = open_order("d");
        seen.status = OrderStatus::PartiallyFilled;
        tracker.apply_update(seen).unwrap();
        assert!(tracker.record_miss("paper", "d", 3).is_none());
        assert!(tracker.record_miss("paper", "d", 3).is_none());

        let lost = tracker.record_miss("paper", "d", 3).unwrap();
        assert_eq!(lost.misses, 3);
        assert_eq!(lost.strategy.as_deref(), Some("trend"));
        assert!(tracker.is_empty());
        assert!(tracker.record_miss("paper", "d", 3).is_none());
    }

    #[test]
    fn terminal_orders_are_not_tracked() {
        let tracker = OrderTracker::new();
        let mut o = open_order("c");
        o.status = OrderStatus::Rejected;
        tracker.track(o, None);
        assert!(tracker.is_empty());
    }
}
