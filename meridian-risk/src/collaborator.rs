//! Collaborator contracts the risk pipeline calls out to but does not implement
//! itself - spec `6. EXTERNAL INTERFACES`. Defined as `#[async_trait]` traits at the
//! crate boundary, following `jackbot_risk::alert::RiskAlertHook`'s pattern of putting
//! the collaborator interface where the risk logic lives rather than where it's
//! implemented, so `RiskEngine`/`AccountStateRefresher` are independently testable
//! with mock implementations.

use crate::error::RiskError;
use async_trait::async_trait;
use meridian_instrument::{ExchangeId, PositionSide, Side, Symbol};
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Per-exchange account snapshot - spec `3. DATA MODEL`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AccountSnapshot {
    pub equity: Decimal,
    pub available: Decimal,
    pub used_margin: Decimal,
    pub timestamp: i64,
}

/// Per `(exchange, symbol)` open position snapshot - spec `3. DATA MODEL`.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionSnapshot {
    pub exchange: ExchangeId,
    pub symbol: Symbol,
    pub side: PositionSide,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub leverage: Decimal,
    pub mark_price: Decimal,
    pub notional: Decimal,
}

impl PositionSnapshot {
    /// Liquidation price per spec `4.7 R7`:
    /// long: `entry * (1 - 1/leverage + mmr)`, short: `entry * (1 + 1/leverage - mmr)`.
    pub fn liquidation_price(&self, maintenance_margin_rate: Decimal) -> Decimal {
        let inverse_leverage = if self.leverage.is_zero() { Decimal::ZERO } else { Decimal::ONE / self.leverage };
        match self.side {
            PositionSide::Long => self.entry_price * (Decimal::ONE - inverse_leverage + maintenance_margin_rate),
            PositionSide::Short => self.entry_price * (Decimal::ONE + inverse_leverage - maintenance_margin_rate),
        }
    }

    /// Fractional distance between `self.mark_price` and the liquidation price -
    /// spec `4.7 R7`, `d = |current - liq| / current`.
    pub fn liquidation_distance(&self, maintenance_margin_rate: Decimal) -> Decimal {
        if self.mark_price.is_zero() {
            return Decimal::MAX;
        }
        let liquidation = self.liquidation_price(maintenance_margin_rate);
        ((self.mark_price - liquidation) / self.mark_price).abs()
    }

    /// The [`Side`] of a reduce-only order that would shrink this position - spec `4.7`.
    pub fn closing_side(&self) -> Side {
        match self.side {
            PositionSide::Long => Side::Sell,
            PositionSide::Short => Side::Buy,
        }
    }

    pub fn is_btc(&self) -> bool {
        self.symbol.base().eq_ignore_ascii_case("BTC")
    }
}

/// Minimum exchange REST contract the risk pipeline needs - spec `4.6`/`6.`:
/// `fetchBalance()` / `fetchPositions()` / `fetchTickers([symbols])`.
#[async_trait]
pub trait Exchange: Send + Sync + std::fmt::Debug {
    fn id(&self) -> ExchangeId;

    async fn fetch_balance(&self) -> Result<AccountSnapshot, RiskError>;

    async fn fetch_positions(&self) -> Result<Vec<PositionSnapshot>, RiskError>;

    /// Latest price per requested symbol. Symbols the venue has no market for are
    /// simply absent from the returned map, not an error.
    async fn fetch_tickers(&self, symbols: &[Symbol]) -> Result<HashMap<Symbol, Decimal>, RiskError>;
}

/// A reduce-only or flattening order the risk engine asks the (opaque, out-of-scope)
/// order-execution layer to place - spec `6.`.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketOrderRequest {
    pub exchange: ExchangeId,
    pub symbol: Symbol,
    pub side: Side,
    pub amount: Decimal,
    pub reduce_only: bool,
}

/// Order-execution collaborator the risk engine invokes for close/reduce actions -
/// spec `6.`. Actual order submission transport is explicitly out of scope (spec `1.`);
/// this crate only ever calls through this trait.
#[async_trait]
pub trait Executor: Send + Sync + std::fmt::Debug {
    async fn emergency_close_all(&self, reason: Option<String>) -> Result<(), RiskError>;

    async fn execute_market_order(&self, order: MarketOrderRequest) -> Result<(), RiskError>;

    async fn reduce_all_positions(&self, ratio: Decimal) -> Result<(), RiskError>;
}

/// The strategy-facing portfolio-risk collaborator - spec `6.`: `pauseTrading(reason)`
/// / `resumeTrading()` / `emit(eventName, payload)`. Implemented by the (out-of-scope)
/// strategy/API layer; the risk pipeline only ever calls through this trait.
pub trait PortfolioRiskManager: Send + Sync + std::fmt::Debug {
    fn pause_trading(&self, reason: &str);

    fn resume_trading(&self);

    fn emit(&self, event_name: &str, payload: serde_json::Value);
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Debug, Default)]
    pub struct MockExchange {
        pub id: Option<ExchangeId>,
        pub balance: Mutex<AccountSnapshot>,
        pub positions: Mutex<Vec<PositionSnapshot>>,
        pub tickers: Mutex<HashMap<Symbol, Decimal>>,
    }

    #[async_trait]
    impl Exchange for MockExchange {
        fn id(&self) -> ExchangeId {
            self.id.unwrap_or(ExchangeId::BinanceSpot)
        }

        async fn fetch_balance(&self) -> Result<AccountSnapshot, RiskError> {
            Ok(*self.balance.lock())
        }

        async fn fetch_positions(&self) -> Result<Vec<PositionSnapshot>, RiskError> {
            Ok(self.positions.lock().clone())
        }

        async fn fetch_tickers(&self, symbols: &[Symbol]) -> Result<HashMap<Symbol, Decimal>, RiskError> {
            let tickers = self.tickers.lock();
            Ok(symbols.iter().filter_map(|s| tickers.get(s).map(|p| (s.clone(), *p))).collect())
        }
    }

    #[derive(Debug, Default)]
    pub struct MockExecutor {
        pub emergency_closes: Mutex<Vec<Option<String>>>,
        pub market_orders: Mutex<Vec<MarketOrderRequest>>,
        pub reduce_alls: Mutex<Vec<Decimal>>,
        pub fail: bool,
    }

    #[async_trait]
    impl Executor for MockExecutor {
        async fn emergency_close_all(&self, reason: Option<String>) -> Result<(), RiskError> {
            if self.fail {
                return Err(RiskError::ExecutorUnavailable);
            }
            self.emergency_closes.lock().push(reason);
            Ok(())
        }

        async fn execute_market_order(&self, order: MarketOrderRequest) -> Result<(), RiskError> {
            if self.fail {
                return Err(RiskError::ExecutorUnavailable);
            }
            self.market_orders.lock().push(order);
            Ok(())
        }

        async fn reduce_all_positions(&self, ratio: Decimal) -> Result<(), RiskError> {
            if self.fail {
                return Err(RiskError::ExecutorUnavailable);
            }
            self.reduce_alls.lock().push(ratio);
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    pub struct MockPortfolioRiskManager {
        pub paused: Mutex<Option<String>>,
        pub events: Mutex<Vec<(String, serde_json::Value)>>,
    }

    impl PortfolioRiskManager for MockPortfolioRiskManager {
        fn pause_trading(&self, reason: &str) {
            *self.paused.lock() = Some(reason.to_string());
        }

        fn resume_trading(&self) {
            *self.paused.lock() = None;
        }

        fn emit(&self, event_name: &str, payload: serde_json::Value) {
            self.events.lock().push((event_name.to_string(), payload));
        }
    }

    pub fn arc<T>(value: T) -> Arc<T> {
        Arc::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position(side: PositionSide, entry: Decimal, leverage: Decimal, mark: Decimal) -> PositionSnapshot {
        PositionSnapshot {
            exchange: ExchangeId::BinanceFuturesUsd,
            symbol: Symbol::new("BTC", "USDT"),
            side,
            size: dec!(1),
            entry_price: entry,
            leverage,
            mark_price: mark,
            notional: entry,
        }
    }

    #[test]
    fn liquidation_price_long_below_entry() {
        let position = position(PositionSide::Long, dec!(20000), dec!(10), dec!(20000));
        let liq = position.liquidation_price(dec!(0.004));
        assert!(liq < position.entry_price);
    }

    #[test]
    fn liquidation_price_short_above_entry() {
        let position = position(PositionSide::Short, dec!(20000), dec!(10), dec!(20000));
        let liq = position.liquidation_price(dec!(0.004));
        assert!(liq > position.entry_price);
    }

    #[test]
    fn closing_side_is_opposite_of_position_side() {
        assert_eq!(position(PositionSide::Long, dec!(1), dec!(1), dec!(1)).closing_side(), Side::Sell);
        assert_eq!(position(PositionSide::Short, dec!(1), dec!(1), dec!(1)).closing_side(), Side::Buy);
    }
}
