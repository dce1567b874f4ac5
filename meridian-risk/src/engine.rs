//! Priority-ordered risk evaluator - spec `4.7 RiskEngine (C7)`.
//!
//! Runs the strictly ordered `R1..R7` pipeline on every `checkInterval` tick, executes
//! the resulting actions through the [`crate::collaborator::Executor`]/
//! [`crate::collaborator::PortfolioRiskManager`] collaborators, and exposes the
//! synchronous `checkOrder` gate. Grounded on
//! [`meridian_data::aggregator::CrossExchangeAggregator`]'s ticker-task shape for the
//! periodic loop, and on `jackbot_risk::alert::RiskAlertHook` for emitting typed
//! violations through a collaborator rather than returning them up a call stack.

use crate::account::AccountStateRefresher;
use crate::clock::Clock;
use crate::collaborator::{Executor, MarketOrderRequest, PortfolioRiskManager, PositionSnapshot};
use crate::config::RiskConfig;
use crate::equity::{EquityDrawdownLevel, EquityDrawdownState};
use crate::portfolio::{PortfolioState, RiskLevel};
use meridian_instrument::Symbol;
use meridian_integration::stop::{StopSignal, StopToken};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

const PAUSE_REASON_DAILY_DRAWDOWN: &str = "daily_drawdown";
const PAUSE_REASON_WEEKLY_DRAWDOWN: &str = "weekly_drawdown";
const PAUSE_REASON_EQUITY_DRAWDOWN: &str = "equity_drawdown";

fn btc_usdt() -> Symbol {
    Symbol::new("BTC", "USDT")
}

/// A strategy's standing with the order gate - spec `4.7` `checkOrder`. `risk_budget`
/// is the notional a strategy may still deploy before `maxSingleStrategyRatio` of
/// total equity is reached; resolved open question (see `DESIGN.md`): the "remaining
/// risk budget" the order gate checks is this allowance minus the strategy's currently
/// open notional.
#[derive(Debug, Clone, Copy, Default)]
struct StrategyRiskState {
    open_notional: Decimal,
    paused: bool,
}

/// Request to `checkOrder` - spec `4.7`.
#[derive(Debug, Clone)]
pub struct OrderCheckRequest {
    pub strategy_id: String,
    pub symbol: Symbol,
    pub side: meridian_instrument::Side,
    pub amount: Decimal,
    pub price: Decimal,
}

/// Synchronous verdict from `checkOrder` - spec `4.7`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderCheckResult {
    pub allowed: bool,
    pub reasons: Vec<String>,
    pub warnings: Vec<String>,
    pub suggested_reduction: Option<Decimal>,
}

impl OrderCheckResult {
    fn allow() -> Self {
        Self { allowed: true, ..Default::default() }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self { allowed: false, reasons: vec![reason.into()], ..Default::default() }
    }
}

/// Priority-ordered evaluator over account, position and price state - spec `4.7`.
#[derive(Debug)]
pub struct RiskEngine {
    config: RiskConfig,
    account: Arc<AccountStateRefresher>,
    executor: Arc<dyn Executor>,
    portfolio_manager: Arc<dyn PortfolioRiskManager>,
    clock: Arc<dyn Clock>,

    state: parking_lot::Mutex<PortfolioState>,
    equity_drawdown: parking_lot::Mutex<Option<EquityDrawdownState>>,
    btc_price_history: parking_lot::Mutex<VecDeque<(i64, Decimal)>>,
    last_reduce_at: parking_lot::Mutex<Option<i64>>,
    day_anchor: parking_lot::Mutex<Option<chrono::NaiveDate>>,
    week_anchor: parking_lot::Mutex<Option<u32>>,
    strategies: parking_lot::Mutex<HashMap<String, StrategyRiskState>>,
    last_emitted_level: parking_lot::Mutex<RiskLevel>,

    stop: StopToken,
    stop_signal: parking_lot::Mutex<Option<StopSignal>>,
}

impl RiskEngine {
    pub fn new(
        config: RiskConfig,
        account: Arc<AccountStateRefresher>,
        executor: Arc<dyn Executor>,
        portfolio_manager: Arc<dyn PortfolioRiskManager>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let (stop, stop_signal) = StopToken::new();
        Arc::new(Self {
            config,
            account,
            executor,
            portfolio_manager,
            clock,
            state: parking_lot::Mutex::new(PortfolioState::new(Decimal::ZERO)),
            equity_drawdown: parking_lot::Mutex::new(None),
            btc_price_history: parking_lot::Mutex::new(VecDeque::new()),
            last_reduce_at: parking_lot::Mutex::new(None),
            day_anchor: parking_lot::Mutex::new(None),
            week_anchor: parking_lot::Mutex::new(None),
            strategies: parking_lot::Mutex::new(HashMap::new()),
            last_emitted_level: parking_lot::Mutex::new(RiskLevel::Safe),
            stop,
            stop_signal: parking_lot::Mutex::new(Some(stop_signal)),
        })
    }

    pub fn state(&self) -> PortfolioState {
        self.state.lock().clone()
    }

    /// Register a strategy's currently open notional so `checkOrder` can enforce
    /// `maxSingleStrategyRatio` against it - spec `4.7`.
    pub fn set_strategy_open_notional(&self, strategy_id: &str, notional: Decimal) {
        self.strategies.lock().entry(strategy_id.to_string()).or_default().open_notional = notional;
    }

    pub fn pause_strategy(&self, strategy_id: &str) {
        self.strategies.lock().entry(strategy_id.to_string()).or_default().paused = true;
    }

    pub fn resume_strategy(&self, strategy_id: &str) {
        self.strategies.lock().entry(strategy_id.to_string()).or_default().paused = false;
    }

    /// Run one full `R1..R7` pipeline pass - spec `4.7`.
    pub async fn tick(&self) {
        self.account.refresh_margin().await;
        let now = self.clock.now_ms();
        let current_equity = self.account.total_equity();
        let used_margin = self.account.total_used_margin();
        let positions = self.account.positions();

        {
            let mut state = self.state.lock();
            state.risk_level = RiskLevel::Safe;
            state.total_equity = current_equity;
            state.total_position_value = positions.iter().map(|p| p.notional).sum();
            state.position_ratio = if current_equity.is_zero() {
                Decimal::ZERO
            } else {
                state.total_position_value / current_equity
            };
        }

        self.reset_day_week_boundaries(current_equity, now);

        if self.run_r2_margin_rate(current_equity, used_margin).await {
            self.emit_level_change_if_needed();
            return;
        }
        if self.run_r3_equity_drawdown(current_equity, &positions, now).await {
            self.emit_level_change_if_needed();
            return;
        }
        self.run_r4_daily_drawdown(current_equity);
        self.run_r5_btc_flash_crash(&positions, now).await;
        self.run_r6_concentration(&positions);
        self.run_r7_liquidation_proximity(&positions);

        self.emit_level_change_if_needed();
    }

    fn emit_level_change_if_needed(&self) {
        let current = self.state.lock().risk_level;
        let mut previous = self.last_emitted_level.lock();
        if *previous != current {
            self.portfolio_manager.emit(
                "riskLevelChanged",
                serde_json::json!({ "previous": previous.to_string(), "current": current.to_string() }),
            );
            *previous = current;
        }
    }

    /// (R1) Day/week boundary reset - spec `4.7`. "Local date" is evaluated in
    /// `config.reset_timezone` when set, UTC otherwise.
    fn reset_day_week_boundaries(&self, current_equity: Decimal, now: i64) {
        let today = match self.config.reset_timezone {
            Some(tz) => chrono::DateTime::from_timestamp_millis(self.clock.now_ms())
                .map(|dt| dt.with_timezone(&tz).date_naive())
                .unwrap_or_default(),
            None => self.clock.today(),
        };
        let iso_week = today.iso_week().week();

        let mut day_anchor = self.day_anchor.lock();
        if *day_anchor != Some(today) {
            *day_anchor = Some(today);
            drop(day_anchor);
            let mut state = self.state.lock();
            state.daily_start_equity = current_equity;
            state.daily_drawdown = Decimal::ZERO;
            if state.pause_reason.as_deref() == Some(PAUSE_REASON_DAILY_DRAWDOWN) {
                state.resume();
                drop(state);
                self.portfolio_manager.resume_trading();
            }
        }

        let mut week_anchor = self.week_anchor.lock();
        if *week_anchor != Some(iso_week) {
            *week_anchor = Some(iso_week);
            drop(week_anchor);
            let mut state = self.state.lock();
            state.weekly_start_equity = current_equity;
            state.weekly_drawdown = Decimal::ZERO;
            if state.pause_reason.as_deref() == Some(PAUSE_REASON_WEEKLY_DRAWDOWN) {
                state.resume();
                drop(state);
                self.portfolio_manager.resume_trading();
            }
        }
        let _ = now;
    }

    /// (R2) Margin rate - spec `4.7`. Returns `true` if the tick short-circuited on
    /// `EMERGENCY_CLOSE`.
    async fn run_r2_margin_rate(&self, total_equity: Decimal, total_used_margin: Decimal) -> bool {
        let margin_rate =
            if total_used_margin.is_zero() { Decimal::MAX } else { total_equity / total_used_margin };

        if margin_rate < self.config.emergency_margin_rate {
            self.execute_emergency_close(format!("margin rate {margin_rate} below emergency threshold")).await;
            return true;
        }
        if margin_rate < self.config.danger_margin_rate {
            self.raise_level(RiskLevel::Danger);
            self.execute_alert(format!("margin rate {margin_rate} below danger threshold"));
        } else if margin_rate < self.config.warning_margin_rate {
            self.raise_level(RiskLevel::Warning);
            self.execute_alert(format!("margin rate {margin_rate} below warning threshold"));
        } else {
            self.raise_level(RiskLevel::Normal);
        }
        false
    }

    /// (R3) Equity drawdown all-time-high watermark - spec `4.7`. Returns `true` if the
    /// tick short-circuited on `EMERGENCY_CLOSE`.
    async fn run_r3_equity_drawdown(&self, current_equity: Decimal, positions: &[PositionSnapshot], now: i64) -> bool {
        if !self.config.enable_equity_drawdown_monitor {
            return false;
        }

        let (drawdown, peak_equity) = {
            let mut guard = self.equity_drawdown.lock();
            let tracker = guard.get_or_insert_with(|| EquityDrawdownState::new(current_equity, now));
            let drawdown = tracker.update(current_equity, now);
            (drawdown, tracker.all_time_high_equity())
        };
        {
            let mut state = self.state.lock();
            state.peak_equity = peak_equity;
            state.current_drawdown = drawdown;
        }

        if drawdown >= self.config.max_equity_drawdown {
            self.equity_drawdown.lock().as_mut().unwrap().record_trigger(EquityDrawdownLevel::Emergency);
            self.execute_emergency_close(format!("equity drawdown {drawdown} breached maxEquityDrawdown")).await;
            return true;
        }
        if drawdown >= self.config.equity_drawdown_danger_threshold {
            self.equity_drawdown.lock().as_mut().unwrap().record_trigger(EquityDrawdownLevel::Danger);
            self.raise_level(RiskLevel::Danger);
            self.execute_reduce_position(
                positions,
                self.config.equity_drawdown_reduce_ratio,
                now,
                "equity drawdown danger threshold",
            )
            .await;
        } else if drawdown >= self.config.equity_drawdown_warning_threshold {
            self.equity_drawdown.lock().as_mut().unwrap().record_trigger(EquityDrawdownLevel::Warning);
            self.raise_level(RiskLevel::Warning);
            self.execute_pause(PAUSE_REASON_EQUITY_DRAWDOWN);
        } else if drawdown >= self.config.equity_drawdown_alert_threshold {
            self.equity_drawdown.lock().as_mut().unwrap().record_trigger(EquityDrawdownLevel::Alert);
            self.raise_level(RiskLevel::Elevated);
            self.execute_alert(format!("equity drawdown {drawdown} crossed alert threshold"));
        }
        false
    }

    /// (R4) Daily drawdown - spec `4.7`.
    fn run_r4_daily_drawdown(&self, current_equity: Decimal) {
        let mut state = self.state.lock();
        let daily_drawdown = if state.daily_start_equity.is_zero() {
            Decimal::ZERO
        } else {
            ((state.daily_start_equity - current_equity) / state.daily_start_equity).max(Decimal::ZERO)
        };
        state.daily_drawdown = daily_drawdown;

        if daily_drawdown > self.config.max_daily_drawdown {
            state.raise_risk_level(RiskLevel::High);
            state.pause(PAUSE_REASON_DAILY_DRAWDOWN);
            drop(state);
            self.portfolio_manager.pause_trading(PAUSE_REASON_DAILY_DRAWDOWN);
        }
    }

    /// (R5) BTC flash-crash - spec `4.7`.
    async fn run_r5_btc_flash_crash(&self, positions: &[PositionSnapshot], now: i64) {
        let Some(btc_price) = self.account.price(&btc_usdt()) else { return };

        let change = {
            let mut history = self.btc_price_history.lock();
            history.push_back((now, btc_price));
            let window_start = now - self.config.btc_price_window.as_millis() as i64;
            while history.front().is_some_and(|(ts, _)| *ts < window_start) {
                history.pop_front();
            }
            let Some(&(_, oldest)) = history.front() else { return };
            if oldest.is_zero() {
                return;
            }
            (btc_price - oldest) / oldest
        };

        if change < self.config.btc_crash_threshold {
            self.raise_level(RiskLevel::High);
            let allow_list = self.config.altcoin_symbols.as_deref();
            let affected: Vec<PositionSnapshot> = positions
                .iter()
                .filter(|p| !p.is_btc())
                .filter(|p| allow_list.map_or(true, |list| list.contains(&p.symbol)))
                .cloned()
                .collect();
            self.execute_reduce_position(&affected, self.config.altcoin_reduce_ratio, now, "BTC flash crash").await;
        }
    }

    /// (R6) Concentration - spec `4.7`.
    fn run_r6_concentration(&self, positions: &[PositionSnapshot]) {
        let total_notional: Decimal = positions.iter().map(|p| p.notional).sum();
        if total_notional.is_zero() {
            return;
        }

        let mut by_base: HashMap<String, Decimal> = HashMap::new();
        for position in positions {
            *by_base.entry(position.symbol.base().to_string()).or_default() += position.notional;
        }

        for (base, notional) in by_base {
            let ratio = notional / total_notional;
            if ratio > self.config.max_single_position_ratio {
                self.raise_level(RiskLevel::Warning);
                self.execute_alert(format!("{base} concentration {ratio} exceeds maxSinglePositionRatio"));
            } else if ratio > self.config.position_warning_ratio {
                self.raise_level(RiskLevel::Elevated);
            }
        }
    }

    /// (R7) Liquidation proximity - spec `4.7`.
    fn run_r7_liquidation_proximity(&self, positions: &[PositionSnapshot]) {
        let mmr = self.config.maintenance_margin_rate;
        let at_risk: Vec<&PositionSnapshot> = positions
            .iter()
            .filter(|p| p.liquidation_distance(mmr) < self.config.liquidation_buffer)
            .collect();

        if !at_risk.is_empty() {
            self.raise_level(RiskLevel::High);
            let symbols: Vec<String> = at_risk.iter().map(|p| p.symbol.to_string()).collect();
            self.execute_alert(format!("positions near liquidation: {}", symbols.join(", ")));
        }
    }

    fn raise_level(&self, level: RiskLevel) {
        self.state.lock().raise_risk_level(level);
    }

    fn execute_alert(&self, message: String) {
        self.portfolio_manager.emit("alert", serde_json::json!({ "message": message }));
    }

    fn execute_pause(&self, reason: &str) {
        let mut state = self.state.lock();
        let already_paused = !state.trading_allowed;
        state.pause(reason);
        drop(state);
        if !already_paused {
            self.portfolio_manager.pause_trading(reason);
        }
    }

    async fn execute_emergency_close(&self, reason: String) {
        {
            let mut state = self.state.lock();
            state.raise_risk_level(RiskLevel::Emergency);
            state.pause(reason.clone());
        }
        self.portfolio_manager.emit("emergencyClose", serde_json::json!({ "reason": reason }));
        self.portfolio_manager.pause_trading(&reason);
        if let Err(error) = self.executor.emergency_close_all(Some(reason)).await {
            tracing::error!(%error, "executor.emergencyCloseAll failed, manual intervention required");
            self.execute_alert(format!("executor unavailable during emergency close: {error}"));
        }
    }

    /// `REDUCE_POSITION` action - spec `4.7`, gated by `deRiskCooldown` to prevent
    /// back-to-back reductions.
    async fn execute_reduce_position(&self, positions: &[PositionSnapshot], ratio: Decimal, now: i64, reason: &str) {
        if positions.is_empty() {
            return;
        }
        {
            let mut last = self.last_reduce_at.lock();
            if let Some(last_at) = *last {
                if now - last_at < self.config.de_risk_cooldown.as_millis() as i64 {
                    tracing::debug!(reason, "reduce position suppressed by deRiskCooldown");
                    return;
                }
            }
            *last = Some(now);
        }

        for position in positions {
            let order = MarketOrderRequest {
                exchange: position.exchange,
                symbol: position.symbol.clone(),
                side: position.closing_side(),
                amount: position.size * ratio,
                reduce_only: true,
            };
            if let Err(error) = self.executor.execute_market_order(order).await {
                tracing::warn!(symbol = %position.symbol, %error, "reduce-only order failed");
            }
        }
        self.portfolio_manager.emit(
            "reducePosition",
            serde_json::json!({ "ratio": ratio.to_string(), "reason": reason, "count": positions.len() }),
        );
    }

    /// Synchronous order gate - spec `4.7` `checkOrder`.
    pub fn check_order(&self, request: &OrderCheckRequest) -> OrderCheckResult {
        let state = self.state.lock();
        if !state.trading_allowed {
            return OrderCheckResult::deny("trading paused".to_string());
        }
        if let Some(strategy) = self.strategies.lock().get(&request.strategy_id) {
            if strategy.paused {
                return OrderCheckResult::deny("strategy paused");
            }
        }
        if state.risk_level.is_at_least(RiskLevel::Critical) {
            let mut result = OrderCheckResult::deny(format!("risk level {} blocks new orders", state.risk_level));
            if state.risk_level == RiskLevel::Critical {
                result.suggested_reduction = Some(Decimal::new(5, 1));
            }
            return result;
        }
        if state.current_drawdown >= self.config.max_equity_drawdown
            || state.daily_drawdown > self.config.max_daily_drawdown
        {
            return OrderCheckResult::deny("aggregated drawdown breach blocks new orders");
        }

        let order_notional = request.amount * request.price;
        let total_position_value = state.total_position_value + order_notional;
        let projected_total_ratio =
            if state.total_equity.is_zero() { Decimal::MAX } else { total_position_value / state.total_equity };
        if projected_total_ratio > self.config.max_total_position_ratio {
            return OrderCheckResult::deny("order would exceed maxTotalPositionRatio");
        }

        let strategies = self.strategies.lock();
        let strategy = strategies.get(&request.strategy_id).copied().unwrap_or_default();
        drop(strategies);
        let strategy_allowance = state.total_equity * self.config.max_single_strategy_ratio;
        let projected_strategy_notional = strategy.open_notional + order_notional;
        if projected_strategy_notional > strategy_allowance {
            return OrderCheckResult::deny("order would exceed maxSingleStrategyRatio");
        }

        let mut result = OrderCheckResult::allow();
        if projected_total_ratio > self.config.max_total_position_ratio * Decimal::new(8, 1) {
            result.warnings.push("approaching maxTotalPositionRatio".to_string());
        }
        if state.risk_level == RiskLevel::Danger || state.risk_level == RiskLevel::High {
            result.warnings.push(format!("elevated risk level {}", state.risk_level));
        }
        result
    }

    /// Spawn the periodic `checkInterval` ticker - spec `4.7`. A no-op (logged) if
    /// called more than once, since the stop signal is consumed on the first call.
    pub fn spawn(self: Arc<Self>) {
        let Some(mut stop_signal) = self.stop_signal.lock().take() else {
            tracing::warn!("RiskEngine::spawn called more than once, ignoring");
            return;
        };
        let engine = self;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(engine.config.check_interval);
            loop {
                tokio::select! {
                    biased;
                    _ = stop_signal.stopped() => break,
                    _ = interval.tick() => engine.tick().await,
                }
            }
        });
    }

    pub fn stop(&self) {
        self.stop.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::collaborator::test_support::{arc, MockExchange, MockExecutor, MockPortfolioRiskManager};
    use crate::collaborator::AccountSnapshot;
    use meridian_instrument::{ExchangeId, PositionSide, Side};
    use rust_decimal_macros::dec;

    fn engine_with(
        config: RiskConfig,
        exchange: Arc<MockExchange>,
        executor: Arc<MockExecutor>,
        portfolio_manager: Arc<MockPortfolioRiskManager>,
        clock: Arc<TestClock>,
    ) -> Arc<RiskEngine> {
        let account = AccountStateRefresher::new(config.clone());
        account.register_exchange(exchange);
        RiskEngine::new(config, account, executor, portfolio_manager, clock)
    }

    fn position(symbol: Symbol, side: PositionSide, entry: Decimal, leverage: Decimal, mark: Decimal) -> PositionSnapshot {
        PositionSnapshot {
            exchange: ExchangeId::BinanceFuturesUsd,
            symbol,
            side,
            size: dec!(1),
            entry_price: entry,
            leverage,
            mark_price: mark,
            notional: entry,
        }
    }

    #[tokio::test]
    async fn emergency_margin_triggers_emergency_close_and_pauses_trading() {
        let exchange = arc(MockExchange {
            id: Some(ExchangeId::BinanceFuturesUsd),
            balance: parking_lot::Mutex::new(AccountSnapshot {
                equity: dec!(30),
                available: dec!(0),
                used_margin: dec!(100),
                timestamp: 0,
            }),
            positions: parking_lot::Mutex::new(Vec::new()),
            tickers: parking_lot::Mutex::new(HashMap::new()),
        });
        let executor = arc(MockExecutor::default());
        let portfolio_manager = arc(MockPortfolioRiskManager::default());
        let clock = arc(TestClock::new(0));

        let engine = engine_with(RiskConfig::default(), exchange, Arc::clone(&executor), Arc::clone(&portfolio_manager), clock);
        engine.tick().await;

        assert!(!engine.state().trading_allowed);
        assert_eq!(engine.state().risk_level, RiskLevel::Emergency);
        assert_eq!(executor.emergency_closes.lock().len(), 1);
        assert!(portfolio_manager.paused.lock().as_deref().unwrap_or_default().starts_with("margin rate"));

        let check = engine.check_order(&OrderCheckRequest {
            strategy_id: "s1".into(),
            symbol: Symbol::new("BTC", "USDT"),
            side: Side::Buy,
            amount: dec!(1),
            price: dec!(100),
        });
        assert!(!check.allowed);
    }

    #[tokio::test]
    async fn equity_drawdown_staircase_matches_spec_scenario() {
        let exchange = arc(MockExchange {
            id: Some(ExchangeId::BinanceFuturesUsd),
            balance: parking_lot::Mutex::new(AccountSnapshot {
                equity: dec!(10000),
                available: dec!(10000),
                used_margin: dec!(0),
                timestamp: 0,
            }),
            positions: parking_lot::Mutex::new(Vec::new()),
            tickers: parking_lot::Mutex::new(HashMap::new()),
        });
        let executor = arc(MockExecutor::default());
        let portfolio_manager = arc(MockPortfolioRiskManager::default());
        let clock = arc(TestClock::new(0));

        let engine = engine_with(RiskConfig::default(), exchange.clone(), Arc::clone(&executor), Arc::clone(&portfolio_manager), clock);
        engine.tick().await;
        assert_eq!(engine.state().risk_level, RiskLevel::Normal);

        *exchange.balance.lock() = AccountSnapshot { equity: dec!(9400), available: dec!(9400), used_margin: dec!(0), timestamp: 0 };
        engine.tick().await;
        assert_eq!(engine.state().risk_level, RiskLevel::Elevated);
        assert!(engine.state().trading_allowed);

        // Equity drawdown alone (R3) would only raise Warning here, but this equity is
        // also a 10% drop from the 10000 opening balance R1 anchored as
        // `dailyStartEquity` on the first tick, so R4's daily-drawdown check (> 0.08)
        // additionally fires and raises the aggregate level to High.
        *exchange.balance.lock() = AccountSnapshot { equity: dec!(9000), available: dec!(9000), used_margin: dec!(0), timestamp: 0 };
        engine.tick().await;
        assert_eq!(engine.state().risk_level, RiskLevel::High);
        assert!(!engine.state().trading_allowed);

        *exchange.balance.lock() = AccountSnapshot { equity: dec!(7900), available: dec!(7900), used_margin: dec!(0), timestamp: 0 };
        engine.tick().await;
        assert_eq!(engine.state().risk_level, RiskLevel::Emergency);
        assert_eq!(executor.emergency_closes.lock().len(), 1);
    }

    #[tokio::test]
    async fn btc_flash_crash_reduces_only_non_btc_positions() {
        let btc = Symbol::new("BTC", "USDT");
        let eth = Symbol::new("ETH", "USDT");
        let exchange = arc(MockExchange {
            id: Some(ExchangeId::BinanceFuturesUsd),
            balance: parking_lot::Mutex::new(AccountSnapshot {
                equity: dec!(100000),
                available: dec!(100000),
                used_margin: dec!(0),
                timestamp: 0,
            }),
            positions: parking_lot::Mutex::new(vec![
                position(btc.clone(), PositionSide::Long, dec!(60000), dec!(5), dec!(60000)),
                position(eth.clone(), PositionSide::Long, dec!(3000), dec!(5), dec!(3000)),
            ]),
            tickers: parking_lot::Mutex::new({
                let mut map = HashMap::new();
                map.insert(btc.clone(), dec!(60000));
                map
            }),
        });
        let executor = arc(MockExecutor::default());
        let portfolio_manager = arc(MockPortfolioRiskManager::default());
        let clock = arc(TestClock::new(0));

        let engine = engine_with(RiskConfig::default(), Arc::clone(&exchange), Arc::clone(&executor), Arc::clone(&portfolio_manager), Arc::clone(&clock));
        engine.tick().await;

        clock.advance(60_000);
        exchange.tickers.lock().insert(btc.clone(), dec!(58000));
        engine.tick().await;

        let orders = executor.market_orders.lock();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].symbol, eth);
    }

    #[tokio::test]
    async fn check_order_denies_when_trading_paused() {
        let exchange = arc(MockExchange::default());
        let executor = arc(MockExecutor::default());
        let portfolio_manager = arc(MockPortfolioRiskManager::default());
        let clock = arc(TestClock::new(0));
        let engine = engine_with(RiskConfig::default(), exchange, executor, portfolio_manager, clock);

        engine.state.lock().pause("test");
        let result = engine.check_order(&OrderCheckRequest {
            strategy_id: "s1".into(),
            symbol: Symbol::new("BTC", "USDT"),
            side: Side::Buy,
            amount: dec!(1),
            price: dec!(1),
        });
        assert!(!result.allowed);
    }
}
