use crate::cache::MarketDataStore;
use meridian_instrument::{ExchangeId, Symbol};
use meridian_integration::channel::{ChannelTxDroppable, UnboundedTx};
use meridian_integration::stop::{StopSignal, StopToken};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Tuning knobs for [`CrossExchangeAggregator`] - spec `4.5`, `6. EXTERNAL INTERFACES`.
#[derive(Debug, Clone, Copy)]
pub struct AggregatorConfig {
    pub update_interval: Duration,
    pub enable_aggregation: bool,
    pub enable_arbitrage_detection: bool,
    /// Minimum `spreadPercent` (already ×100) required to report an arbitrage opportunity.
    pub arbitrage_threshold: Decimal,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_millis(1_000),
            enable_aggregation: true,
            enable_arbitrage_detection: true,
            arbitrage_threshold: Decimal::new(1, 1), // 0.1%
        }
    }
}

/// Best bid/ask across every subscribed exchange for one symbol, tagged with which
/// exchange quoted each side - spec `4.5` step 2.
#[derive(Debug, Clone, PartialEq)]
pub struct BestPrices {
    pub symbol: Symbol,
    pub lowest_ask: (ExchangeId, Decimal),
    pub highest_bid: (ExchangeId, Decimal),
    pub timestamp: i64,
}

/// Cross-exchange spread for one symbol - spec `4.5` step 3.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spread {
    pub spread: Decimal,
    pub spread_percent: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArbitrageOpportunity {
    pub symbol: Symbol,
    pub buy_exchange: ExchangeId,
    pub sell_exchange: ExchangeId,
    pub spread: Decimal,
    pub spread_percent: Decimal,
}

/// Owns the `exchange -> subscribed symbols` mapping and periodically recomputes
/// cross-exchange best prices, spreads and arbitrage opportunities - spec `4.5
/// CrossExchangeAggregator (capability)`.
#[derive(Debug)]
pub struct CrossExchangeAggregator {
    store: Arc<dyn MarketDataStore>,
    config: AggregatorConfig,
    exchanges: parking_lot::RwLock<HashSet<ExchangeId>>,
    subscriptions: parking_lot::RwLock<HashMap<Symbol, HashSet<ExchangeId>>>,
    best_prices: parking_lot::RwLock<HashMap<Symbol, BestPrices>>,
    spreads: parking_lot::RwLock<HashMap<Symbol, Spread>>,
    stop: StopToken,
    /// Taken by [`Self::spawn`] the one time the ticker task starts.
    stop_signal: parking_lot::Mutex<Option<StopSignal>>,
}

impl CrossExchangeAggregator {
    pub fn new(store: Arc<dyn MarketDataStore>, config: AggregatorConfig) -> Arc<Self> {
        let (stop, stop_signal) = StopToken::new();
        Arc::new(Self {
            store,
            config,
            exchanges: parking_lot::RwLock::new(HashSet::new()),
            subscriptions: parking_lot::RwLock::new(HashMap::new()),
            best_prices: parking_lot::RwLock::new(HashMap::new()),
            spreads: parking_lot::RwLock::new(HashMap::new()),
            stop,
            stop_signal: parking_lot::Mutex::new(Some(stop_signal)),
        })
    }

    pub fn add_exchange(&self, exchange: ExchangeId) {
        self.exchanges.write().insert(exchange);
    }

    /// Disconnects `exchange` from aggregation and purges every cache entry tagged with
    /// it - spec `4.5`.
    pub fn remove_exchange(&self, exchange: ExchangeId) {
        self.exchanges.write().remove(&exchange);
        for exchanges in self.subscriptions.write().values_mut() {
            exchanges.remove(&exchange);
        }
        self.store.purge_exchange(exchange);
    }

    /// Subscribe `symbol` across `exchanges`, or every known exchange if `None`.
    pub fn subscribe(&self, symbol: Symbol, exchanges: Option<&[ExchangeId]>) {
        let targets: HashSet<ExchangeId> = match exchanges {
            Some(list) => list.iter().copied().collect(),
            None => self.exchanges.read().clone(),
        };
        self.subscriptions.write().entry(symbol).or_default().extend(targets);
    }

    pub fn best_prices(&self, symbol: &Symbol) -> Option<BestPrices> {
        self.best_prices.read().get(symbol).cloned()
    }

    pub fn spread(&self, symbol: &Symbol) -> Option<Spread> {
        self.spreads.read().get(symbol).copied()
    }

    /// Run one aggregation pass, returning arbitrage opportunities sorted descending by
    /// `spread_percent` - spec `4.5` steps 1-4.
    pub fn tick(&self) -> Vec<ArbitrageOpportunity> {
        let subscriptions = self.subscriptions.read().clone();
        let mut opportunities = Vec::new();

        for (symbol, exchanges) in subscriptions {
            let mut quotes: Vec<(ExchangeId, Decimal, Decimal)> = Vec::new();
            for exchange in exchanges {
                if let Some(ticker) = self.store.latest_ticker(exchange, &symbol) {
                    quotes.push((exchange, ticker.bid, ticker.ask));
                }
            }
            if quotes.is_empty() {
                continue;
            }

            let highest_bid = quotes.iter().max_by_key(|(_, bid, _)| *bid).map(|(ex, bid, _)| (*ex, *bid)).unwrap();
            let lowest_ask = quotes.iter().min_by_key(|(_, _, ask)| *ask).map(|(ex, _, ask)| (*ex, *ask)).unwrap();

            self.best_prices.write().insert(
                symbol.clone(),
                BestPrices {
                    symbol: symbol.clone(),
                    lowest_ask,
                    highest_bid,
                    timestamp: now_millis(),
                },
            );

            if lowest_ask.1.is_zero() {
                continue;
            }
            let spread = highest_bid.1 - lowest_ask.1;
            let spread_percent = spread / lowest_ask.1 * Decimal::ONE_HUNDRED;
            self.spreads.write().insert(symbol.clone(), Spread { spread, spread_percent });

            if !self.config.enable_arbitrage_detection || spread_percent < self.config.arbitrage_threshold {
                continue;
            }

            opportunities.push(ArbitrageOpportunity {
                symbol,
                buy_exchange: lowest_ask.0,
                sell_exchange: highest_bid.0,
                spread,
                spread_percent,
            });
        }

        opportunities.sort_by(|a, b| b.spread_percent.cmp(&a.spread_percent));
        opportunities
    }

    /// Spawn the periodic aggregation ticker, forwarding detected opportunities to
    /// `opportunities`. A no-op (logged) if called more than once, since the stop
    /// signal is consumed on the first call.
    pub fn spawn(self: Arc<Self>, opportunities: UnboundedTx<ArbitrageOpportunity>) {
        let Some(mut stop_signal) = self.stop_signal.lock().take() else {
            tracing::warn!("CrossExchangeAggregator::spawn called more than once, ignoring");
            return;
        };
        let aggregator = self;
        let mut opportunities = ChannelTxDroppable::new(opportunities);

        tokio::spawn(async move {
            if !aggregator.config.enable_aggregation {
                return;
            }
            let mut interval = tokio::time::interval(aggregator.config.update_interval);
            loop {
                tokio::select! {
                    biased;
                    _ = stop_signal.stopped() => break,
                    _ = interval.tick() => {
                        for opportunity in aggregator.tick() {
                            opportunities.send(opportunity);
                        }
                    }
                }
            }
        });
    }

    pub fn stop(&self) {
        self.stop.stop();
    }
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryStore;
    use crate::event::{MarketEvent, MarketEventKind, Ticker};
    use rust_decimal_macros::dec;

    fn ticker_event(exchange: ExchangeId, symbol: &Symbol, bid: Decimal, ask: Decimal) -> MarketEvent {
        MarketEvent {
            exchange,
            symbol: symbol.clone(),
            exchange_timestamp: 1,
            local_timestamp: 1,
            unified_timestamp: 1,
            kind: MarketEventKind::Ticker(Ticker {
                last: (bid + ask) / dec!(2),
                bid,
                bid_size: dec!(1),
                ask,
                ask_size: dec!(1),
                open: bid,
                high: ask,
                low: bid,
                volume: dec!(1000),
                quote_volume: dec!(1000),
                change: Decimal::ZERO,
                change_percent: Decimal::ZERO,
                funding_rate: None,
            }),
        }
    }

    #[test]
    fn detects_arbitrage_opportunity_above_threshold() {
        let store: Arc<dyn MarketDataStore> = Arc::new(InMemoryStore::new());
        let symbol = Symbol::new("BTC", "USDT");
        store.store(&ticker_event(ExchangeId::BinanceSpot, &symbol, dec!(20000), dec!(20010))).unwrap();
        store.store(&ticker_event(ExchangeId::BybitSpot, &symbol, dec!(20100), dec!(20110))).unwrap();

        let aggregator = CrossExchangeAggregator::new(store, AggregatorConfig::default());
        aggregator.add_exchange(ExchangeId::BinanceSpot);
        aggregator.add_exchange(ExchangeId::BybitSpot);
        aggregator.subscribe(symbol.clone(), None);

        let opportunities = aggregator.tick();
        assert_eq!(opportunities.len(), 1);
        let opportunity = &opportunities[0];
        assert_eq!(opportunity.buy_exchange, ExchangeId::BinanceSpot);
        assert_eq!(opportunity.sell_exchange, ExchangeId::BybitSpot);
        assert!(opportunity.spread_percent > Decimal::ZERO);
    }

    #[test]
    fn no_opportunity_when_spread_below_threshold() {
        let store: Arc<dyn MarketDataStore> = Arc::new(InMemoryStore::new());
        let symbol = Symbol::new("BTC", "USDT");
        store.store(&ticker_event(ExchangeId::BinanceSpot, &symbol, dec!(20000), dec!(20001))).unwrap();
        store.store(&ticker_event(ExchangeId::BybitSpot, &symbol, dec!(20000.5), dec!(20001.5))).unwrap();

        let aggregator = CrossExchangeAggregator::new(store, AggregatorConfig::default());
        aggregator.add_exchange(ExchangeId::BinanceSpot);
        aggregator.add_exchange(ExchangeId::BybitSpot);
        aggregator.subscribe(symbol, None);

        assert!(aggregator.tick().is_empty());
    }

    #[test]
    fn remove_exchange_purges_subscriptions_and_cache() {
        let store: Arc<dyn MarketDataStore> = Arc::new(InMemoryStore::new());
        let symbol = Symbol::new("BTC", "USDT");
        store.store(&ticker_event(ExchangeId::BinanceSpot, &symbol, dec!(20000), dec!(20010))).unwrap();

        let aggregator = CrossExchangeAggregator::new(Arc::clone(&store), AggregatorConfig::default());
        aggregator.add_exchange(ExchangeId::BinanceSpot);
        aggregator.subscribe(symbol.clone(), None);

        aggregator.remove_exchange(ExchangeId::BinanceSpot);

        assert!(store.latest_ticker(ExchangeId::BinanceSpot, &symbol).is_none());
        assert!(aggregator.tick().is_empty());
    }
}
