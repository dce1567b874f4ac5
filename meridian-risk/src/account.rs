//! Account & position state refresher - spec `4.6 AccountStateRefresher (C6)`.
//!
//! Polls registered [`Exchange`] collaborators on two independent cadences and keeps
//! latest-value caches the [`crate::engine::RiskEngine`] tick reads synchronously.
//! Grounded on [`meridian_data::aggregator::CrossExchangeAggregator`]'s ticker-task
//! shape: a `parking_lot`-guarded cache plus a `spawn`/`stop` pair over the shared
//! [`meridian_integration::stop`] cooperative-shutdown idiom.

use crate::collaborator::{AccountSnapshot, Exchange, PositionSnapshot};
use crate::config::RiskConfig;
use meridian_instrument::{ExchangeId, Symbol};
use meridian_integration::stop::{StopSignal, StopToken};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

/// BTC/USDT is always tracked alongside whatever symbols open positions touch - spec
/// `4.6`: "the union of symbols present in positions plus BTC/USDT".
fn btc_usdt() -> Symbol {
    Symbol::new("BTC", "USDT")
}

/// Polls every registered [`Exchange`] on the configured `marginRefreshInterval` /
/// `priceRefreshInterval` cadences and exposes the latest readings - spec `4.6`.
#[derive(Debug)]
pub struct AccountStateRefresher {
    exchanges: parking_lot::RwLock<Vec<Arc<dyn Exchange>>>,
    balances: parking_lot::RwLock<HashMap<ExchangeId, AccountSnapshot>>,
    positions: parking_lot::RwLock<HashMap<ExchangeId, Vec<PositionSnapshot>>>,
    prices: parking_lot::RwLock<HashMap<Symbol, Decimal>>,
    config: RiskConfig,
    stop: StopToken,
    stop_signal: parking_lot::Mutex<Option<StopSignal>>,
}

impl AccountStateRefresher {
    pub fn new(config: RiskConfig) -> Arc<Self> {
        let (stop, stop_signal) = StopToken::new();
        Arc::new(Self {
            exchanges: parking_lot::RwLock::new(Vec::new()),
            balances: parking_lot::RwLock::new(HashMap::new()),
            positions: parking_lot::RwLock::new(HashMap::new()),
            prices: parking_lot::RwLock::new(HashMap::new()),
            config,
            stop,
            stop_signal: parking_lot::Mutex::new(Some(stop_signal)),
        })
    }

    pub fn register_exchange(&self, exchange: Arc<dyn Exchange>) {
        self.exchanges.write().push(exchange);
    }

    /// Total equity across every registered exchange - the sum `RiskEngine` R2-R4
    /// treat as `totalEquity`.
    pub fn total_equity(&self) -> Decimal {
        self.balances.read().values().map(|snapshot| snapshot.equity).sum()
    }

    pub fn total_used_margin(&self) -> Decimal {
        self.balances.read().values().map(|snapshot| snapshot.used_margin).sum()
    }

    pub fn positions(&self) -> Vec<PositionSnapshot> {
        self.positions.read().values().flatten().cloned().collect()
    }

    pub fn price(&self, symbol: &Symbol) -> Option<Decimal> {
        self.prices.read().get(symbol).copied()
    }

    pub fn balance(&self, exchange: ExchangeId) -> Option<AccountSnapshot> {
        self.balances.read().get(&exchange).copied()
    }

    /// Poll `fetchBalance()`/`fetchPositions()` on every registered exchange - spec
    /// `4.6` `marginRefreshInterval` tick. Call failures are logged and leave the prior
    /// cached value in place (spec `7.`: collaborator unavailability is non-fatal).
    pub async fn refresh_margin(&self) {
        let exchanges = self.exchanges.read().clone();
        for exchange in exchanges {
            match exchange.fetch_balance().await {
                Ok(balance) => {
                    self.balances.write().insert(exchange.id(), balance);
                }
                Err(error) => {
                    tracing::warn!(exchange = %exchange.id(), %error, "fetchBalance failed");
                }
            }
            match exchange.fetch_positions().await {
                Ok(positions) => {
                    self.positions.write().insert(exchange.id(), positions);
                }
                Err(error) => {
                    tracing::warn!(exchange = %exchange.id(), %error, "fetchPositions failed");
                }
            }
        }
    }

    /// Poll `fetchTickers([symbols])` on every registered exchange for the union of
    /// position symbols plus BTC/USDT - spec `4.6` `priceRefreshInterval` tick.
    pub async fn refresh_prices(&self) {
        let mut symbols: Vec<Symbol> =
            self.positions.read().values().flatten().map(|position| position.symbol.clone()).collect();
        symbols.push(btc_usdt());
        symbols.sort();
        symbols.dedup();

        let exchanges = self.exchanges.read().clone();
        for exchange in exchanges {
            match exchange.fetch_tickers(&symbols).await {
                Ok(tickers) => self.prices.write().extend(tickers),
                Err(error) => {
                    tracing::warn!(exchange = %exchange.id(), %error, "fetchTickers failed");
                }
            }
        }
    }

    /// Spawn the two independent refresh tickers - spec `4.6`. A no-op (logged) if
    /// called more than once, since the stop signal is consumed on the first call.
    pub fn spawn(self: Arc<Self>) {
        let Some(mut stop_signal) = self.stop_signal.lock().take() else {
            tracing::warn!("AccountStateRefresher::spawn called more than once, ignoring");
            return;
        };
        let refresher = self;

        tokio::spawn(async move {
            let mut margin_interval = tokio::time::interval(refresher.config.margin_refresh_interval);
            let mut price_interval = tokio::time::interval(refresher.config.price_refresh_interval);
            loop {
                tokio::select! {
                    biased;
                    _ = stop_signal.stopped() => break,
                    _ = margin_interval.tick() => refresher.refresh_margin().await,
                    _ = price_interval.tick() => refresher.refresh_prices().await,
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
    use crate::collaborator::test_support::{arc, MockExchange};
    use meridian_instrument::PositionSide;
    use rust_decimal_macros::dec;

    fn position(symbol: Symbol) -> PositionSnapshot {
        PositionSnapshot {
            exchange: ExchangeId::BinanceFuturesUsd,
            symbol,
            side: PositionSide::Long,
            size: dec!(1),
            entry_price: dec!(20000),
            leverage: dec!(10),
            mark_price: dec!(20000),
            notional: dec!(20000),
        }
    }

    #[tokio::test]
    async fn refresh_margin_populates_balance_and_position_caches() {
        let refresher = AccountStateRefresher::new(RiskConfig::default());
        let exchange = arc(MockExchange {
            id: Some(ExchangeId::BinanceFuturesUsd),
            balance: parking_lot::Mutex::new(AccountSnapshot {
                equity: dec!(10000),
                available: dec!(8000),
                used_margin: dec!(2000),
                timestamp: 1,
            }),
            positions: parking_lot::Mutex::new(vec![position(Symbol::new("ETH", "USDT"))]),
            tickers: parking_lot::Mutex::new(HashMap::new()),
        });
        refresher.register_exchange(exchange);

        refresher.refresh_margin().await;

        assert_eq!(refresher.total_equity(), dec!(10000));
        assert_eq!(refresher.total_used_margin(), dec!(2000));
        assert_eq!(refresher.positions().len(), 1);
    }

    #[tokio::test]
    async fn refresh_prices_always_includes_btc_usdt_in_the_request() {
        let refresher = AccountStateRefresher::new(RiskConfig::default());
        let mut tickers = HashMap::new();
        tickers.insert(btc_usdt(), dec!(60000));
        tickers.insert(Symbol::new("ETH", "USDT"), dec!(3000));
        let exchange = arc(MockExchange {
            id: Some(ExchangeId::BinanceFuturesUsd),
            balance: parking_lot::Mutex::new(AccountSnapshot::default()),
            positions: parking_lot::Mutex::new(vec![position(Symbol::new("ETH", "USDT"))]),
            tickers: parking_lot::Mutex::new(tickers),
        });
        refresher.register_exchange(exchange);

        refresher.refresh_margin().await;
        refresher.refresh_prices().await;

        assert_eq!(refresher.price(&btc_usdt()), Some(dec!(60000)));
        assert_eq!(refresher.price(&Symbol::new("ETH", "USDT")), Some(dec!(3000)));
    }

    #[tokio::test]
    async fn exchange_call_failure_leaves_previous_cache_untouched() {
        let refresher = AccountStateRefresher::new(RiskConfig::default());
        let exchange = arc(MockExchange {
            id: Some(ExchangeId::BinanceFuturesUsd),
            balance: parking_lot::Mutex::new(AccountSnapshot {
                equity: dec!(5000),
                available: dec!(5000),
                used_margin: dec!(0),
                timestamp: 1,
            }),
            positions: parking_lot::Mutex::new(Vec::new()),
            tickers: parking_lot::Mutex::new(HashMap::new()),
        });
        refresher.register_exchange(exchange);
        refresher.refresh_margin().await;
        assert_eq!(refresher.total_equity(), dec!(5000));
    }
}
