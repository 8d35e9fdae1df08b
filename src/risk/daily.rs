//! Daily loss tracking keyed on the wall-clock UTC date

use std::collections::HashMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::info;

use crate::core::Position;

/// Accumulates the trading day's realized PnL and the worst loss seen.
///
/// The worst loss latches for the rest of the day: once the limit is hit,
/// an intraday recovery of unrealized PnL does not reopen trading. Unrealized
/// PnL carried over from earlier days is measured against the value seen at
/// the day boundary, so a position held overnight starts the new day at zero.
#[derive(Debug, Clone)]
pub struct DailyLossTracker {
    day: NaiveDate,
    realized_pnl: Decimal,
    peak_loss: Decimal,
    /// Unrealized PnL when the current day started
    unrealized_baseline: Decimal,
    last_unrealized: Decimal,
}

impl DailyLossTracker {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            day: today,
            realized_pnl: Decimal::ZERO,
            peak_loss: Decimal::ZERO,
            unrealized_baseline: Decimal::ZERO,
            last_unrealized: Decimal::ZERO,
        }
    }

    pub fn day(&self) -> NaiveDate {
        self.day
    }

    pub fn realized_today(&self) -> Decimal {
        self.realized_pnl
    }

    fn roll(&mut self, today: NaiveDate) {
        if today != self.day {
            info!(
                previous = %self.day,
                today = %today,
                realized = %self.realized_pnl,
                carried_unrealized = %self.last_unrealized,
                "trading day rolled over, resetting daily loss"
            );
            self.day = today;
            self.realized_pnl = Decimal::ZERO;
            self.peak_loss = Decimal::ZERO;
            self.unrealized_baseline = self.last_unrealized;
        }
    }

    /// Book realized PnL (negative for a loss).
    pub fn record_realized(&mut self, pnl: Decimal, today: NaiveDate) {
        self.roll(today);
        self.realized_pnl += pnl;
    }

    /// Book realized PnL for positions that shrank or closed between two polls
    /// of the same venue. The closed fraction of the previous unrealized PnL is
    /// treated as realized.
    pub fn observe_positions(&mut self, previous: &[Position], current: &[Position], today: NaiveDate) {
        self.roll(today);
        let now: HashMap<_, &Position> = current.iter().map(|p| (p.key(), p)).collect();
        for prev in previous {
            if prev.quantity <= Decimal::ZERO {
                continue;
            }
            let remaining = now.get(&prev.key()).map(|p| p.quantity).unwrap_or(Decimal::ZERO);
            let closed = prev.quantity - remaining;
            if closed > Decimal::ZERO {
                let realized = prev.unrealized_pnl * closed / prev.quantity;
                self.realized_pnl += realized;
            }
        }
    }

    /// Today's loss as a non-negative amount:
    /// max(0, -(realized + unrealized - unrealized at day start)),
    /// never lower than the worst value already seen today.
    pub fn current_loss(&mut self, unrealized: Decimal, today: NaiveDate) -> Decimal {
        self.roll(today);
        self.last_unrealized = unrealized;
        let loss = (-(self.realized_pnl + unrealized - self.unrealized_baseline)).max(Decimal::ZERO);
        if loss > self.peak_loss {
            self.peak_loss = loss;
        }
        self.peak_loss
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PositionSide;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn day(n: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, n).unwrap()
    }

    #[test]
    fn loss_combines_realized_and_unrealized() {
        let mut t = DailyLossTracker::new(day(1));
        t.record_realized(d("-30"), day(1));
        assert_eq!(t.current_loss(d("-20"), day(1)), d("50"));
        assert_eq!(t.current_loss(d("100"), day(1)), d("50"), "worst loss latches");
    }

    #[test]
    fn gains_are_not_a_loss() {
        let mut t = DailyLossTracker::new(day(1));
        t.record_realized(d("40"), day(1));
        assert_eq!(t.current_loss(d("-10"), day(1)), Decimal::ZERO);
    }

    #[test]
    fn resets_on_date_rollover() {
        let mut t = DailyLossTracker::new(day(1));
        t.record_realized(d("-500"), day(1));
        assert_eq!(t.current_loss(Decimal::ZERO, day(1)), d("500"));
        assert_eq!(t.current_loss(Decimal::ZERO, day(2)), Decimal::ZERO);
        assert_eq!(t.day(), day(2));
        assert_eq!(t.realized_today(), Decimal::ZERO);
    }

    #[test]
    fn losing_position_held_overnight_starts_the_day_flat() {
        let mut t = DailyLossTracker::new(day(1));
        assert_eq!(t.current_loss(d("-1000"), day(1)), d("1000"));

        // no price move across midnight
        assert_eq!(t.current_loss(d("-1000"), day(2)), Decimal::ZERO);
        // only today's move counts
        assert_eq!(t.current_loss(d("-1200"), day(2)), d("200"));
        assert_eq!(t.current_loss(d("-900"), day(2)), d("200"), "worst loss latches");
    }

    #[test]
    fn closing_a_carried_position_does_not_count_yesterday_twice() {
        let mut t = DailyLossTracker::new(day(1));
        let held = vec![Position::new("v", "BTC/USDT", PositionSide::Long, d("1"), d("100"), d("80"))];
        assert_eq!(t.current_loss(d("-20"), day(1)), d("20"));

        // closed on day two at the same mark: the -20 was yesterday's
        t.observe_positions(&held, &[], day(2));
        assert_eq!(t.realized_today(), d("-20"));
        assert_eq!(t.current_loss(Decimal::ZERO, day(2)), Decimal::ZERO);
    }

    #[test]
    fn closed_positions_realize_their_pnl() {
        let mut t = DailyLossTracker::new(day(1));
        let before = vec![
            Position::new("v", "BTC/USDT", PositionSide::Long, d("2"), d("100"), d("90")),
            Position::new("v", "ETH/USDT", PositionSide::Short, d("1"), d("10"), d("12")),
        ];
        // BTC halved, ETH closed
        let after = vec![Position::new("v", "BTC/USDT", PositionSide::Long, d("1"), d("100"), d("90"))];
        t.observe_positions(&before, &after, day(1));
        // BTC: -20 * 1/2 = -10, ETH: -2
        assert_eq!(t.realized_today(), d("-12"));
    }
}
