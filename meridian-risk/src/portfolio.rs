//! Aggregate portfolio risk level and snapshot - spec `3. DATA MODEL` (`PortfolioState`),
//! invariant `I4`: the aggregate risk level is the maximum of every rule's individual
//! verdict on a tick, never lower.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Severity ladder a single tick's risk checks can land on - spec `3.`/`4.7`.
/// Ordered so `max()` across every rule's verdict gives the portfolio-wide level,
/// per invariant `I4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RiskLevel {
    #[default]
    Safe,
    Normal,
    Elevated,
    Warning,
    High,
    Danger,
    Critical,
    Emergency,
}

impl RiskLevel {
    const ORDER: [RiskLevel; 8] = [
        RiskLevel::Safe,
        RiskLevel::Normal,
        RiskLevel::Elevated,
        RiskLevel::Warning,
        RiskLevel::High,
        RiskLevel::Danger,
        RiskLevel::Critical,
        RiskLevel::Emergency,
    ];

    fn rank(self) -> usize {
        Self::ORDER.iter().position(|&l| l == self).expect("RiskLevel::ORDER is exhaustive")
    }

    /// Join two levels to the more severe of the two - the monotone "never downgrade
    /// within a tick" combinator invariant `I4` requires of every rule's contribution.
    pub fn max(self, other: RiskLevel) -> RiskLevel {
        if self.rank() >= other.rank() { self } else { other }
    }

    pub fn is_at_least(self, floor: RiskLevel) -> bool {
        self.rank() >= floor.rank()
    }
}

impl PartialOrd for RiskLevel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RiskLevel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RiskLevel::Safe => "safe",
            RiskLevel::Normal => "normal",
            RiskLevel::Elevated => "elevated",
            RiskLevel::Warning => "warning",
            RiskLevel::High => "high",
            RiskLevel::Danger => "danger",
            RiskLevel::Critical => "critical",
            RiskLevel::Emergency => "emergency",
        };
        f.write_str(name)
    }
}

/// Portfolio-wide snapshot recomputed on every `RiskEngine` tick - spec `3.`.
#[derive(Debug, Clone, PartialEq)]
pub struct PortfolioState {
    pub total_equity: Decimal,
    pub total_position_value: Decimal,
    pub position_ratio: Decimal,
    pub peak_equity: Decimal,
    pub current_drawdown: Decimal,
    pub daily_start_equity: Decimal,
    pub daily_drawdown: Decimal,
    pub weekly_start_equity: Decimal,
    pub weekly_drawdown: Decimal,
    pub risk_level: RiskLevel,
    pub trading_allowed: bool,
    pub pause_reason: Option<String>,
}

impl PortfolioState {
    /// Fresh state as of account-refresh time `now_ms`, before any rule has run -
    /// spec `3.` initial values, with both boundary anchors seeded from the same
    /// opening equity so the first tick reports zero daily/weekly drawdown.
    pub fn new(opening_equity: Decimal) -> Self {
        Self {
            total_equity: opening_equity,
            total_position_value: Decimal::ZERO,
            position_ratio: Decimal::ZERO,
            peak_equity: opening_equity,
            current_drawdown: Decimal::ZERO,
            daily_start_equity: opening_equity,
            daily_drawdown: Decimal::ZERO,
            weekly_start_equity: opening_equity,
            weekly_drawdown: Decimal::ZERO,
            risk_level: RiskLevel::Safe,
            trading_allowed: true,
            pause_reason: None,
        }
    }

    /// Fold a rule's contribution into the aggregate level without ever lowering it -
    /// invariant `I4`.
    pub fn raise_risk_level(&mut self, level: RiskLevel) {
        self.risk_level = self.risk_level.max(level);
    }

    pub fn pause(&mut self, reason: impl Into<String>) {
        self.trading_allowed = false;
        self.pause_reason = Some(reason.into());
    }

    pub fn resume(&mut self) {
        self.trading_allowed = true;
        self.pause_reason = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn ordering_matches_spec_ladder() {
        assert!(RiskLevel::Safe < RiskLevel::Normal);
        assert!(RiskLevel::Normal < RiskLevel::Elevated);
        assert!(RiskLevel::Elevated < RiskLevel::Warning);
        assert!(RiskLevel::Warning < RiskLevel::High);
        assert!(RiskLevel::High < RiskLevel::Danger);
        assert!(RiskLevel::Danger < RiskLevel::Critical);
        assert!(RiskLevel::Critical < RiskLevel::Emergency);
    }

    #[test]
    fn max_never_downgrades() {
        assert_eq!(RiskLevel::Warning.max(RiskLevel::Normal), RiskLevel::Warning);
        assert_eq!(RiskLevel::Normal.max(RiskLevel::Warning), RiskLevel::Warning);
        assert_eq!(RiskLevel::Emergency.max(RiskLevel::Safe), RiskLevel::Emergency);
    }

    #[test]
    fn raise_risk_level_is_monotone_across_a_tick() {
        let mut state = PortfolioState::new(dec!(10000));
        state.raise_risk_level(RiskLevel::Warning);
        state.raise_risk_level(RiskLevel::Normal);
        assert_eq!(state.risk_level, RiskLevel::Warning);
        state.raise_risk_level(RiskLevel::Emergency);
        assert_eq!(state.risk_level, RiskLevel::Emergency);
    }

    #[test]
    fn pause_and_resume_round_trip() {
        let mut state = PortfolioState::new(dec!(10000));
        state.pause("danger margin rate");
        assert!(!state.trading_allowed);
        assert_eq!(state.pause_reason.as_deref(), Some("danger margin rate"));
        state.resume();
        assert!(state.trading_allowed);
        assert!(state.pause_reason.is_none());
    }
}
