use crate::error::DataError;
use crate::event::{Depth, FundingRate, Kline, MarketEvent, MarketEventKind, Ticker, Trade};
use meridian_instrument::{ExchangeId, Symbol};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

const DEFAULT_TRADE_STREAM_MAX_LEN: usize = 10_000;
const KLINE_RING_CAPACITY: usize = 500;
const DEFAULT_CHANNEL: &str = "market_data";

/// Durable cache and pub/sub publisher for normalised market events - spec `4.4
/// CacheAndPublisher (capability)` / `6. EXTERNAL INTERFACES`.
///
/// Two implementations are provided: [`RedisStore`] for production, backed by the
/// exact hash/capped-list key layout in spec `6.`, and [`InMemoryStore`] for tests and
/// single-process deployments with no Redis dependency - mirroring the
/// `RedisStore`/`InMemoryStore`/`RedisClientStore` split in `jackbot_data::redis_store`.
pub trait MarketDataStore: Send + Sync + std::fmt::Debug {
    /// Persist `event` under its durable cache key and publish it to the configured
    /// channel. A publish failure is non-fatal - it is counted, not propagated as a
    /// reason to drop the event or reconnect - spec `4.4`, `7.`.
    fn store(&self, event: &MarketEvent) -> Result<(), DataError>;

    fn latest_ticker(&self, exchange: ExchangeId, symbol: &Symbol) -> Option<Ticker>;
    fn latest_depth(&self, exchange: ExchangeId, symbol: &Symbol) -> Option<Depth>;
    fn recent_trades(&self, exchange: ExchangeId, symbol: &Symbol, limit: usize) -> Vec<Trade>;
    fn latest_funding(&self, exchange: ExchangeId, symbol: &Symbol) -> Option<FundingRate>;
    fn recent_klines(&self, exchange: ExchangeId, symbol: &Symbol, limit: usize) -> Vec<Kline>;

    /// Count of publish failures observed so far - surfaced for health/metrics reporting.
    fn publish_failures(&self) -> u64;

    /// Purge every cache entry tagged with `exchange` - spec `4.5` (`removeExchange`).
    fn purge_exchange(&self, exchange: ExchangeId);
}

#[derive(Serialize)]
struct Envelope<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    data: &'a MarketEventKind,
    timestamp: i64,
}

fn hash_field(exchange: ExchangeId, symbol: &Symbol) -> String {
    format!("{exchange}:{symbol}")
}

fn envelope_json(event: &MarketEvent) -> Result<String, DataError> {
    serde_json::to_string(&Envelope { kind: event.data_type().as_str(), data: &event.kind, timestamp: event.unified_timestamp })
        .map_err(|error| DataError::Publish { channel: DEFAULT_CHANNEL.to_string(), reason: error.to_string() })
}

/// In-memory [`MarketDataStore`] - no Redis dependency, used in tests and for
/// single-process deployments that don't need durability across restarts.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tickers: RwLock<HashMap<(ExchangeId, Symbol), Ticker>>,
    depths: RwLock<HashMap<(ExchangeId, Symbol), Depth>>,
    trades: RwLock<HashMap<(ExchangeId, Symbol), Vec<Trade>>>,
    fundings: RwLock<HashMap<(ExchangeId, Symbol), FundingRate>>,
    klines: RwLock<HashMap<(ExchangeId, Symbol), Vec<Kline>>>,
    publish_failures: std::sync::atomic::AtomicU64,
    published: RwLock<Vec<String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every JSON envelope this store would have published, in order - used by tests
    /// that assert on the pub/sub side without standing up a real broker.
    pub fn published(&self) -> Vec<String> {
        self.published.read().clone()
    }
}

impl MarketDataStore for InMemoryStore {
    fn store(&self, event: &MarketEvent) -> Result<(), DataError> {
        let key = (event.exchange, event.symbol.clone());
        match &event.kind {
            MarketEventKind::Ticker(ticker) => {
                self.tickers.write().insert(key, ticker.clone());
            }
            MarketEventKind::Depth(depth) => {
                self.depths.write().insert(key, depth.clone());
            }
            MarketEventKind::Trade(trade) => {
                let mut trades = self.trades.write();
                let entry = trades.entry(key).or_default();
                entry.push(trade.clone());
                if entry.len() > DEFAULT_TRADE_STREAM_MAX_LEN {
                    let overflow = entry.len() - DEFAULT_TRADE_STREAM_MAX_LEN;
                    entry.drain(0..overflow);
                }
            }
            MarketEventKind::FundingRate(funding) => {
                self.fundings.write().insert(key, funding.clone());
            }
            MarketEventKind::Kline(kline) => {
                let mut klines = self.klines.write();
                let entry = klines.entry(key).or_default();
                entry.push(kline.clone());
                if entry.len() > KLINE_RING_CAPACITY {
                    let overflow = entry.len() - KLINE_RING_CAPACITY;
                    entry.drain(0..overflow);
                }
            }
        }

        match envelope_json(event) {
            Ok(json) => {
                self.published.write().push(json);
                Ok(())
            }
            Err(error) => {
                self.publish_failures.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                Err(error)
            }
        }
    }

    fn latest_ticker(&self, exchange: ExchangeId, symbol: &Symbol) -> Option<Ticker> {
        self.tickers.read().get(&(exchange, symbol.clone())).cloned()
    }

    fn latest_depth(&self, exchange: ExchangeId, symbol: &Symbol) -> Option<Depth> {
        self.depths.read().get(&(exchange, symbol.clone())).cloned()
    }

    fn recent_trades(&self, exchange: ExchangeId, symbol: &Symbol, limit: usize) -> Vec<Trade> {
        self.trades
            .read()
            .get(&(exchange, symbol.clone()))
            .map(|trades| trades.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    fn latest_funding(&self, exchange: ExchangeId, symbol: &Symbol) -> Option<FundingRate> {
        self.fundings.read().get(&(exchange, symbol.clone())).cloned()
    }

    fn recent_klines(&self, exchange: ExchangeId, symbol: &Symbol, limit: usize) -> Vec<Kline> {
        self.klines
            .read()
            .get(&(exchange, symbol.clone()))
            .map(|klines| klines.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    fn publish_failures(&self) -> u64 {
        self.publish_failures.load(std::sync::atomic::Ordering::Relaxed)
    }

    fn purge_exchange(&self, exchange: ExchangeId) {
        self.tickers.write().retain(|(ex, _), _| *ex != exchange);
        self.depths.write().retain(|(ex, _), _| *ex != exchange);
        self.trades.write().retain(|(ex, _), _| *ex != exchange);
        self.fundings.write().retain(|(ex, _), _| *ex != exchange);
        self.klines.write().retain(|(ex, _), _| *ex != exchange);
    }
}

/// Redis-backed [`MarketDataStore`] using the exact key layout from spec `6.`:
/// `market:ticker:<symbol>` / `market:depth:<symbol>` / `market:funding:<symbol>` /
/// `market:kline:<symbol>` hashes keyed by `<exchange>:<symbol>`, and a capped
/// `market:trades:<exchange>:<symbol>` list approximated via `RPUSH` + `LTRIM`
/// (the `redis` crate's sync API has no native approximately-trimmed stream primitive,
/// so trimming is exact rather than approximate - functionally equivalent for this
/// workspace's purposes).
#[derive(Debug, Clone)]
pub struct RedisStore {
    client: redis::Client,
    channel: String,
    trade_stream_max_len: usize,
    publish_failures: Arc<std::sync::atomic::AtomicU64>,
}

impl RedisStore {
    pub fn new(url: &str) -> redis::RedisResult<Self> {
        Self::with_channel(url, DEFAULT_CHANNEL)
    }

    pub fn with_channel(url: &str, channel: impl Into<String>) -> redis::RedisResult<Self> {
        Ok(Self {
            client: redis::Client::open(url)?,
            channel: channel.into(),
            trade_stream_max_len: DEFAULT_TRADE_STREAM_MAX_LEN,
            publish_failures: Arc::new(std::sync::atomic::AtomicU64::new(0)),
        })
    }

    fn connection(&self) -> Result<redis::Connection, DataError> {
        self.client.get_connection().map_err(|error| DataError::Publish { channel: self.channel.clone(), reason: error.to_string() })
    }
}

impl MarketDataStore for RedisStore {
    fn store(&self, event: &MarketEvent) -> Result<(), DataError> {
        let mut conn = self.connection()?;
        let field = hash_field(event.exchange, &event.symbol);

        let write_result: redis::RedisResult<()> = match &event.kind {
            MarketEventKind::Ticker(ticker) => {
                let json = serde_json::to_string(ticker).map_err(json_err)?;
                redis::cmd("HSET").arg(format!("market:ticker:{}", event.symbol)).arg(&field).arg(json).query(&mut conn)
            }
            MarketEventKind::Depth(depth) => {
                let json = serde_json::to_string(depth).map_err(json_err)?;
                redis::cmd("HSET").arg(format!("market:depth:{}", event.symbol)).arg(&field).arg(json).query(&mut conn)
            }
            MarketEventKind::Trade(trade) => {
                let json = serde_json::to_string(trade).map_err(json_err)?;
                let key = format!("market:trades:{}:{}", event.exchange, event.symbol);
                redis::pipe()
                    .atomic()
                    .cmd("RPUSH")
                    .arg(&key)
                    .arg(json)
                    .ignore()
                    .cmd("LTRIM")
                    .arg(&key)
                    .arg(-(self.trade_stream_max_len as isize))
                    .arg(-1)
                    .query(&mut conn)
            }
            MarketEventKind::FundingRate(funding) => {
                let json = serde_json::to_string(funding).map_err(json_err)?;
                redis::cmd("HSET").arg(format!("market:funding:{}", event.symbol)).arg(&field).arg(json).query(&mut conn)
            }
            MarketEventKind::Kline(kline) => {
                let json = serde_json::to_string(kline).map_err(json_err)?;
                let key = format!("market:kline:{}", event.symbol);
                redis::cmd("HSET").arg(key).arg(&field).arg(json).query(&mut conn)
            }
        };

        if let Err(error) = write_result {
            return Err(DataError::Publish { channel: self.channel.clone(), reason: error.to_string() });
        }

        let json = envelope_json(event)?;
        let publish_result: redis::RedisResult<i64> = redis::cmd("PUBLISH").arg(&self.channel).arg(json).query(&mut conn);
        if publish_result.is_err() {
            self.publish_failures.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
        Ok(())
    }

    fn latest_ticker(&self, exchange: ExchangeId, symbol: &Symbol) -> Option<Ticker> {
        let mut conn = self.connection().ok()?;
        let raw: Option<String> = redis::cmd("HGET").arg(format!("market:ticker:{symbol}")).arg(hash_field(exchange, symbol)).query(&mut conn).ok()?;
        raw.and_then(|s| serde_json::from_str(&s).ok())
    }

    fn latest_depth(&self, exchange: ExchangeId, symbol: &Symbol) -> Option<Depth> {
        let mut conn = self.connection().ok()?;
        let raw: Option<String> = redis::cmd("HGET").arg(format!("market:depth:{symbol}")).arg(hash_field(exchange, symbol)).query(&mut conn).ok()?;
        raw.and_then(|s| serde_json::from_str(&s).ok())
    }

    fn recent_trades(&self, exchange: ExchangeId, symbol: &Symbol, limit: usize) -> Vec<Trade> {
        if limit == 0 {
            return Vec::new();
        }
        let Ok(mut conn) = self.connection() else { return Vec::new() };
        let key = format!("market:trades:{exchange}:{symbol}");
        let start = -(limit as isize);
        redis::cmd("LRANGE")
            .arg(&key)
            .arg(start)
            .arg(-1)
            .query::<Vec<String>>(&mut conn)
            .unwrap_or_default()
            .into_iter()
            .rev()
            .filter_map(|s| serde_json::from_str(&s).ok())
            .collect()
    }

    fn latest_funding(&self, exchange: ExchangeId, symbol: &Symbol) -> Option<FundingRate> {
        let mut conn = self.connection().ok()?;
        let raw: Option<String> = redis::cmd("HGET").arg(format!("market:funding:{symbol}")).arg(hash_field(exchange, symbol)).query(&mut conn).ok()?;
        raw.and_then(|s| serde_json::from_str(&s).ok())
    }

    fn recent_klines(&self, exchange: ExchangeId, symbol: &Symbol, limit: usize) -> Vec<Kline> {
        // Klines are stored as a single latest-value hash field, not a list, so only the
        // single most recent closed candle is retrievable through this store; callers
        // needing a full window should read from the `market_data` pub/sub feed instead.
        let _ = limit;
        self.latest_kline_field(exchange, symbol).into_iter().collect()
    }

    fn publish_failures(&self) -> u64 {
        self.publish_failures.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Best-effort: uses `KEYS`/`HSCAN` rather than a cursor-based `SCAN` loop, which is
    /// acceptable for an operator-triggered exchange removal but not for a hot path.
    fn purge_exchange(&self, exchange: ExchangeId) {
        let Ok(mut conn) = self.connection() else { return };

        for prefix in ["ticker", "depth", "funding", "kline"] {
            let keys: Vec<String> = redis::cmd("KEYS").arg(format!("market:{prefix}:*")).query(&mut conn).unwrap_or_default();
            for key in keys {
                let fields: Vec<String> =
                    redis::cmd("HKEYS").arg(&key).query(&mut conn).unwrap_or_default();
                let matching: Vec<&String> = fields.iter().filter(|f| f.starts_with(&format!("{exchange}:"))).collect();
                if !matching.is_empty() {
                    let mut cmd = redis::cmd("HDEL");
                    cmd.arg(&key);
                    for field in matching {
                        cmd.arg(field);
                    }
                    let _: redis::RedisResult<()> = cmd.query(&mut conn);
                }
            }
        }

        let trade_keys: Vec<String> = redis::cmd("KEYS").arg(format!("market:trades:{exchange}:*")).query(&mut conn).unwrap_or_default();
        if !trade_keys.is_empty() {
            let _: redis::RedisResult<()> = redis::cmd("DEL").arg(trade_keys).query(&mut conn);
        }
    }
}

impl RedisStore {
    fn latest_kline_field(&self, exchange: ExchangeId, symbol: &Symbol) -> Option<Kline> {
        let mut conn = self.connection().ok()?;
        let raw: Option<String> = redis::cmd("HGET").arg(format!("market:kline:{symbol}")).arg(hash_field(exchange, symbol)).query(&mut conn).ok()?;
        raw.and_then(|s| serde_json::from_str(&s).ok())
    }
}

fn json_err(error: serde_json::Error) -> redis::RedisError {
    redis::RedisError::from(std::io::Error::other(error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::MarketEventKind;
    use rust_decimal_macros::dec;

    fn trade_event(trade_id: &str) -> MarketEvent {
        MarketEvent {
            exchange: ExchangeId::BinanceSpot,
            symbol: Symbol::new("BTC", "USDT"),
            exchange_timestamp: 1,
            local_timestamp: 1,
            unified_timestamp: 1,
            kind: MarketEventKind::Trade(Trade {
                trade_id: trade_id.to_string(),
                price: dec!(20000),
                amount: dec!(0.1),
                side: meridian_instrument::Side::Buy,
            }),
        }
    }

    #[test]
    fn in_memory_store_round_trips_and_publishes() {
        let store = InMemoryStore::new();
        store.store(&trade_event("1")).unwrap();
        store.store(&trade_event("2")).unwrap();

        let trades = store.recent_trades(ExchangeId::BinanceSpot, &Symbol::new("BTC", "USDT"), 10);
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].trade_id, "2"); // most recent first

        assert_eq!(store.published().len(), 2);
        assert_eq!(store.publish_failures(), 0);
    }

    #[test]
    fn in_memory_trade_stream_is_capped() {
        let store = InMemoryStore::new();
        for i in 0..(DEFAULT_TRADE_STREAM_MAX_LEN + 10) {
            store.store(&trade_event(&i.to_string())).unwrap();
        }
        let trades = store.recent_trades(ExchangeId::BinanceSpot, &Symbol::new("BTC", "USDT"), DEFAULT_TRADE_STREAM_MAX_LEN + 10);
        assert_eq!(trades.len(), DEFAULT_TRADE_STREAM_MAX_LEN);
    }
}
