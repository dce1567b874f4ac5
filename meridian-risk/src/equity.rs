//! All-time-high equity watermark and drawdown tracking - spec `3. DATA MODEL`
//! (`EquityDrawdownState`), invariants `I5`/`P5`/`P6`.
//!
//! Grounded on `jackbot_risk::drawdown::DrawdownTracker`'s update-then-compare shape,
//! adapted from a per-instrument peak/current map to the single scalar all-time-high
//! over total portfolio equity that spec `4.7 R3` actually calls for.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Counters for each equity-drawdown severity level crossed - spec `3.`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerCounts {
    pub alert: u64,
    pub warning: u64,
    pub danger: u64,
    pub emergency: u64,
}

/// Tracks the all-time-high equity watermark and the drawdown from it - spec `3.`
/// (`EquityDrawdownState`). Monotone per invariant `I5`: `allTimeHighEquity` only ever
/// increases, and crossing a new high resets `currentDrawdown` to zero.
#[derive(Debug, Clone, PartialEq)]
pub struct EquityDrawdownState {
    all_time_high_equity: Decimal,
    all_time_high_time: i64,
    current_drawdown: Decimal,
    current_drawdown_amount: Decimal,
    max_drawdown: Decimal,
    max_drawdown_time: i64,
    trigger_counts: TriggerCounts,
}

impl EquityDrawdownState {
    /// Create state seeded with an initial equity reading, which immediately becomes
    /// the all-time high - spec `3.` "created at init".
    pub fn new(initial_equity: Decimal, now_ms: i64) -> Self {
        Self {
            all_time_high_equity: initial_equity,
            all_time_high_time: now_ms,
            current_drawdown: Decimal::ZERO,
            current_drawdown_amount: Decimal::ZERO,
            max_drawdown: Decimal::ZERO,
            max_drawdown_time: now_ms,
            trigger_counts: TriggerCounts::default(),
        }
    }

    pub fn all_time_high_equity(&self) -> Decimal {
        self.all_time_high_equity
    }

    pub fn current_drawdown(&self) -> Decimal {
        self.current_drawdown
    }

    pub fn max_drawdown(&self) -> Decimal {
        self.max_drawdown
    }

    pub fn trigger_counts(&self) -> TriggerCounts {
        self.trigger_counts
    }

    /// Update the watermark with a fresh equity reading - invariant `I5`/property `P5`:
    /// `all_time_high_equity` never decreases. Returns the freshly computed drawdown
    /// fraction `(ATH - current) / ATH`, zero when `current >= ATH`.
    pub fn update(&mut self, current_equity: Decimal, now_ms: i64) -> Decimal {
        if current_equity > self.all_time_high_equity {
            self.all_time_high_equity = current_equity;
            self.all_time_high_time = now_ms;
            self.current_drawdown = Decimal::ZERO;
            self.current_drawdown_amount = Decimal::ZERO;
            return Decimal::ZERO;
        }

        if self.all_time_high_equity.is_zero() {
            self.current_drawdown = Decimal::ZERO;
            return Decimal::ZERO;
        }

        self.current_drawdown_amount = self.all_time_high_equity - current_equity;
        self.current_drawdown = self.current_drawdown_amount / self.all_time_high_equity;

        if self.current_drawdown > self.max_drawdown {
            self.max_drawdown = self.current_drawdown;
            self.max_drawdown_time = now_ms;
        }

        self.current_drawdown
    }

    /// Record that a given severity threshold was crossed on this tick - spec `4.7 R3`:
    /// "each level transition increments the corresponding counter".
    pub fn record_trigger(&mut self, level: EquityDrawdownLevel) {
        match level {
            EquityDrawdownLevel::Alert => self.trigger_counts.alert += 1,
            EquityDrawdownLevel::Warning => self.trigger_counts.warning += 1,
            EquityDrawdownLevel::Danger => self.trigger_counts.danger += 1,
            EquityDrawdownLevel::Emergency => self.trigger_counts.emergency += 1,
        }
    }
}

/// Severity level reached by the equity-drawdown staircase in spec `4.7 R3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EquityDrawdownLevel {
    Alert,
    Warning,
    Danger,
    Emergency,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn new_high_resets_drawdown_to_zero() {
        let mut state = EquityDrawdownState::new(dec!(10000), 0);
        state.update(dec!(9000), 1);
        assert!(state.current_drawdown() > Decimal::ZERO);

        let drawdown = state.update(dec!(11000), 2);
        assert_eq!(drawdown, Decimal::ZERO);
        assert_eq!(state.current_drawdown(), Decimal::ZERO);
        assert_eq!(state.all_time_high_equity(), dec!(11000));
    }

    #[test]
    fn all_time_high_is_monotone_non_decreasing() {
        let mut state = EquityDrawdownState::new(dec!(10000), 0);
        for equity in [dec!(9500), dec!(10500), dec!(9000), dec!(10400)] {
            let previous_ath = state.all_time_high_equity();
            state.update(equity, 0);
            assert!(state.all_time_high_equity() >= previous_ath);
        }
        assert_eq!(state.all_time_high_equity(), dec!(10500));
    }

    #[test]
    fn drawdown_staircase_matches_spec_scenario_3() {
        let mut state = EquityDrawdownState::new(dec!(10000), 0);

        let d1 = state.update(dec!(9400), 1);
        assert_eq!(d1.round_dp(2), dec!(0.06));

        let d2 = state.update(dec!(9000), 2);
        assert_eq!(d2.round_dp(2), dec!(0.10));

        let d3 = state.update(dec!(8400), 3);
        assert_eq!(d3.round_dp(2), dec!(0.16));

        let d4 = state.update(dec!(7900), 4);
        assert_eq!(d4.round_dp(2), dec!(0.21));
    }

    #[test]
    fn max_drawdown_tracks_the_deepest_drawdown_seen() {
        let mut state = EquityDrawdownState::new(dec!(10000), 0);
        state.update(dec!(9000), 1);
        state.update(dec!(9500), 2);
        assert_eq!(state.max_drawdown(), dec!(0.1));
    }
}
