use meridian_instrument::{ExchangeId, Side, Symbol};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Kind of market data stream a [`crate::subscription::SubscriptionKey`] identifies -
/// see spec `3. DATA MODEL`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Ticker,
    Depth,
    Trade,
    FundingRate,
    Kline,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Ticker => "ticker",
            DataType::Depth => "depth",
            DataType::Trade => "trade",
            DataType::FundingRate => "fundingRate",
            DataType::Kline => "kline",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Normalised Meridian market event. Every variant carries the common envelope fields
/// (`exchange`, `symbol`, `exchange_timestamp`, `local_timestamp`, `unified_timestamp`)
/// plus a tagged [`MarketEventKind`] payload - see spec `3. DATA MODEL`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketEvent {
    pub exchange: ExchangeId,
    pub symbol: Symbol,
    /// Milliseconds since epoch, as reported by the exchange.
    pub exchange_timestamp: i64,
    /// Milliseconds since epoch, as observed locally on frame arrival.
    pub local_timestamp: i64,
    /// `round((exchange_timestamp + local_timestamp) / 2)` - see spec `4.3`.
    pub unified_timestamp: i64,
    pub kind: MarketEventKind,
}

impl MarketEvent {
    pub fn data_type(&self) -> DataType {
        match &self.kind {
            MarketEventKind::Ticker(_) => DataType::Ticker,
            MarketEventKind::Depth(_) => DataType::Depth,
            MarketEventKind::Trade(_) => DataType::Trade,
            MarketEventKind::FundingRate(_) => DataType::FundingRate,
            MarketEventKind::Kline(_) => DataType::Kline,
        }
    }
}

/// Tagged union over the normalised event payloads - prefer a sum type over
/// inheritance so downstream code dispatches on the tag (spec `9. DESIGN NOTES`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum MarketEventKind {
    Ticker(Ticker),
    Depth(Depth),
    Trade(Trade),
    FundingRate(FundingRate),
    Kline(Kline),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub last: Decimal,
    pub bid: Decimal,
    pub bid_size: Decimal,
    pub ask: Decimal,
    pub ask_size: Decimal,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub volume: Decimal,
    pub quote_volume: Decimal,
    pub change: Decimal,
    pub change_percent: Decimal,
    pub funding_rate: Option<Decimal>,
}

/// A single (price, amount) order book level.
pub type Level = (Decimal, Decimal);

/// Order book snapshot - not an incremental update, per spec `3. DATA MODEL`. `bids`
/// must be sorted in decreasing price order, `asks` in increasing price order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Depth {
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
}

impl Depth {
    /// `true` if `bids` is strictly decreasing and `asks` is strictly increasing.
    pub fn is_ordered(&self) -> bool {
        self.bids.windows(2).all(|pair| pair[0].0 > pair[1].0)
            && self.asks.windows(2).all(|pair| pair[0].0 < pair[1].0)
    }

    pub fn best_bid(&self) -> Option<Level> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<Level> {
        self.asks.first().copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: String,
    pub price: Decimal,
    pub amount: Decimal,
    pub side: Side,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingRate {
    pub mark_price: Decimal,
    pub index_price: Decimal,
    pub funding_rate: Decimal,
    pub next_funding_time: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    pub interval: String,
    pub open_time: i64,
    pub close_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub quote_volume: Decimal,
    pub trades: u64,
    pub is_closed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_is_ordered_detects_violations() {
        let ordered = Depth {
            bids: vec![(100.into(), 1.into()), (99.into(), 1.into())],
            asks: vec![(101.into(), 1.into()), (102.into(), 1.into())],
        };
        assert!(ordered.is_ordered());

        let unordered = Depth {
            bids: vec![(99.into(), 1.into()), (100.into(), 1.into())],
            asks: vec![(101.into(), 1.into())],
        };
        assert!(!unordered.is_ordered());
    }
}
