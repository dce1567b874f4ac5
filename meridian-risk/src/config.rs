//! Threshold and cadence configuration for the risk pipeline - spec `8. CONFIGURATION
//! SURFACE`. Every constant here mirrors a named threshold in spec `4.7`/`4.8`/`8.`;
//! `Default` reproduces the documented defaults exactly so test-vector scenarios in
//! spec `10.` reproduce without callers overriding anything.

use meridian_instrument::Symbol;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// `RiskEngine` thresholds and cadence - spec `4.7`/`8.`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    // R2 margin rate
    pub emergency_margin_rate: Decimal,
    pub danger_margin_rate: Decimal,
    pub warning_margin_rate: Decimal,

    // R3 equity drawdown
    pub enable_equity_drawdown_monitor: bool,
    pub max_equity_drawdown: Decimal,
    pub equity_drawdown_danger_threshold: Decimal,
    pub equity_drawdown_warning_threshold: Decimal,
    pub equity_drawdown_alert_threshold: Decimal,
    pub equity_drawdown_reduce_ratio: Decimal,

    // R4 daily/weekly drawdown
    pub max_daily_drawdown: Decimal,
    pub drawdown_warning_threshold: Decimal,

    // R5 BTC flash-crash
    pub btc_crash_threshold: Decimal,
    pub altcoin_reduce_ratio: Decimal,
    pub btc_price_window: Duration,
    pub altcoin_symbols: Option<Vec<Symbol>>,

    // R6 concentration
    pub max_single_position_ratio: Decimal,
    pub position_warning_ratio: Decimal,

    // R7 liquidation proximity
    pub maintenance_margin_rate: Decimal,
    pub liquidation_buffer: Decimal,

    // checkOrder gate
    pub max_single_strategy_ratio: Decimal,
    pub max_total_position_ratio: Decimal,

    // cadence
    pub check_interval: Duration,
    pub margin_refresh_interval: Duration,
    pub price_refresh_interval: Duration,

    // de-risking cooldown shared by R3/R5 reduce actions
    pub de_risk_cooldown: Duration,

    /// Timezone the R1 day/week boundary reset evaluates "local date" in - spec `4.7`
    /// R1, open question on timezone configurability resolved in `DESIGN.md`. `None`
    /// keeps the UTC default every other Meridian timestamp already uses.
    pub reset_timezone: Option<chrono_tz::Tz>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            emergency_margin_rate: dec!(0.35),
            danger_margin_rate: dec!(0.40),
            warning_margin_rate: dec!(0.50),

            enable_equity_drawdown_monitor: true,
            max_equity_drawdown: dec!(0.20),
            equity_drawdown_danger_threshold: dec!(0.15),
            equity_drawdown_warning_threshold: dec!(0.10),
            equity_drawdown_alert_threshold: dec!(0.05),
            equity_drawdown_reduce_ratio: dec!(0.30),

            max_daily_drawdown: dec!(0.08),
            drawdown_warning_threshold: dec!(0.05),

            btc_crash_threshold: dec!(-0.03),
            altcoin_reduce_ratio: dec!(0.50),
            btc_price_window: Duration::from_millis(300_000),
            altcoin_symbols: None,

            max_single_position_ratio: dec!(0.15),
            position_warning_ratio: dec!(0.10),

            maintenance_margin_rate: dec!(0.004),
            liquidation_buffer: dec!(0.05),

            max_single_strategy_ratio: dec!(0.15),
            max_total_position_ratio: dec!(0.50),

            check_interval: Duration::from_millis(1_000),
            margin_refresh_interval: Duration::from_millis(5_000),
            price_refresh_interval: Duration::from_millis(1_000),

            de_risk_cooldown: Duration::from_secs(30 * 60),

            reset_timezone: None,
        }
    }
}

/// `BlackSwanProtector` detector thresholds and cadence - spec `4.8`/`8.`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlackSwanConfig {
    pub enable_auto_recovery: bool,
    pub enable_auto_emergency_close: bool,

    pub price_history_length: usize,

    pub price_1m_l1_threshold: Decimal,
    pub price_1m_l2_threshold: Decimal,
    pub price_5m_l2_threshold: Decimal,
    pub price_5m_l3_threshold: Decimal,
    pub price_15m_emergency_threshold: Decimal,

    pub volatility_window: usize,
    pub volatility_ratio_threshold: Decimal,

    pub spread_l3_ratio_threshold: Decimal,
    pub spread_l1_ratio_threshold: Decimal,
    pub max_spread_percent: Decimal,

    pub depth_l3_ratio_threshold: Decimal,
    pub depth_l1_ratio_threshold: Decimal,

    pub cooldown_duration: Duration,
    pub recovery_interval: Duration,
    pub stability_duration: Duration,
    pub stable_min_samples: usize,
    pub stability_vol_threshold: Decimal,

    pub event_history_length: usize,

    pub l1_reduce_ratio: Decimal,
    pub l2_reduce_ratio: Decimal,
}

impl Default for BlackSwanConfig {
    fn default() -> Self {
        Self {
            enable_auto_recovery: true,
            enable_auto_emergency_close: true,

            price_history_length: 1_000,

            price_1m_l1_threshold: dec!(0.03),
            price_1m_l2_threshold: dec!(0.05),
            price_5m_l2_threshold: dec!(0.05),
            price_5m_l3_threshold: dec!(0.08),
            price_15m_emergency_threshold: dec!(0.15),

            volatility_window: 60,
            volatility_ratio_threshold: dec!(3.0),

            spread_l3_ratio_threshold: dec!(5),
            spread_l1_ratio_threshold: dec!(3),
            max_spread_percent: dec!(0.02),

            depth_l3_ratio_threshold: dec!(0.2),
            depth_l1_ratio_threshold: dec!(0.5),

            cooldown_duration: Duration::from_secs(30 * 60),
            recovery_interval: Duration::from_secs(10),
            stability_duration: Duration::from_secs(5 * 60),
            stable_min_samples: 30,
            stability_vol_threshold: dec!(20),

            event_history_length: 500,

            l1_reduce_ratio: dec!(0.25),
            l2_reduce_ratio: dec!(0.50),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_config_defaults_match_documented_thresholds() {
        let config = RiskConfig::default();
        assert_eq!(config.emergency_margin_rate, dec!(0.35));
        assert_eq!(config.max_equity_drawdown, dec!(0.20));
        assert_eq!(config.btc_crash_threshold, dec!(-0.03));
        assert_eq!(config.maintenance_margin_rate, dec!(0.004));
        assert_eq!(config.check_interval, Duration::from_secs(1));
        assert_eq!(config.de_risk_cooldown, Duration::from_secs(1_800));
    }

    #[test]
    fn blackswan_config_defaults_match_documented_thresholds() {
        let config = BlackSwanConfig::default();
        assert_eq!(config.price_1m_l1_threshold, dec!(0.03));
        assert_eq!(config.price_15m_emergency_threshold, dec!(0.15));
        assert_eq!(config.recovery_interval, Duration::from_secs(10));
        assert_eq!(config.event_history_length, 500);
    }

    #[test]
    fn configs_round_trip_through_json() {
        let risk = RiskConfig::default();
        let decoded: RiskConfig = serde_json::from_str(&serde_json::to_string(&risk).unwrap()).unwrap();
        assert_eq!(risk, decoded);
    }
}
