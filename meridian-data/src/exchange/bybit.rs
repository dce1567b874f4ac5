use crate::error::DataError;
use crate::event::{DataType, Depth, FundingRate, Kline, MarketEvent, MarketEventKind, Ticker, Trade};
use crate::exchange::{Control, Decoded, ExchangeAdapter, split_concatenated};
use meridian_instrument::{ExchangeId, Side, Symbol, TradingType};
use meridian_integration::protocol::websocket::{self, WsMessage};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use std::str::FromStr;
use url::Url;

/// Which of Bybit's three public v5 WebSocket categories this adapter instance
/// serves. Spot carries no funding rate; linear and inverse both do.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BybitMarket {
    Spot,
    Linear,
    Inverse,
}

impl BybitMarket {
    fn path(&self) -> &'static str {
        match self {
            BybitMarket::Spot => "spot",
            BybitMarket::Linear => "linear",
            BybitMarket::Inverse => "inverse",
        }
    }
}

/// Bybit v5 public adapter - spot, linear (USDT perpetuals) and inverse - spec `4.1`.
///
/// Bybit frames subscriptions as dot-joined topics (`tickers.BTCUSDT`,
/// `publicTrade.BTCUSDT`, `orderbook.50.BTCUSDT`, `kline.1.BTCUSDT`) inside a
/// `{"op":"subscribe","args":[...]}` envelope, and expects an application-level
/// `{"op":"ping"}` heartbeat rather than relying on protocol pings.
#[derive(Debug, Clone)]
pub struct Bybit {
    market: BybitMarket,
}

impl Bybit {
    pub fn spot() -> Self {
        Self { market: BybitMarket::Spot }
    }

    pub fn linear() -> Self {
        Self { market: BybitMarket::Linear }
    }

    pub fn inverse() -> Self {
        Self { market: BybitMarket::Inverse }
    }

    fn topic(&self, symbol: &Symbol, data_type: DataType) -> String {
        let native = self.to_native(symbol);
        match data_type {
            DataType::Ticker => format!("tickers.{native}"),
            DataType::Depth => format!("orderbook.50.{native}"),
            DataType::Trade => format!("publicTrade.{native}"),
            DataType::FundingRate => format!("tickers.{native}"),
            DataType::Kline => format!("kline.1.{native}"),
        }
    }

    fn symbol_from_topic(&self, topic: &str) -> Option<Symbol> {
        let native = topic.rsplit('.').next()?;
        self.from_native(native)
    }

    fn decode_payload(&self, value: &Value, local_timestamp: i64) -> Result<Decoded, DataError> {
        let topic = match value.get("topic").and_then(Value::as_str) {
            Some(topic) => topic,
            None => return Ok(Decoded::None),
        };

        let exchange_timestamp = value.get("ts").and_then(Value::as_i64).unwrap_or(local_timestamp);
        let symbol = self.symbol_from_topic(topic).ok_or_else(|| DataError::Decode {
            exchange: self.id(),
            reason: format!("unrecognised topic '{topic}'"),
        })?;
        let data = value.get("data").ok_or_else(|| DataError::Decode {
            exchange: self.id(),
            reason: "message missing 'data' field".into(),
        })?;

        if topic.starts_with("tickers.") {
            return self.decode_ticker(symbol, data, exchange_timestamp, local_timestamp);
        }
        if topic.starts_with("publicTrade.") {
            return self.decode_trade(symbol, data, exchange_timestamp, local_timestamp);
        }
        if topic.starts_with("orderbook.") {
            return self.decode_depth(symbol, data, exchange_timestamp, local_timestamp);
        }
        if topic.starts_with("kline.") {
            return self.decode_kline(symbol, data, exchange_timestamp, local_timestamp);
        }

        Ok(Decoded::None)
    }

    /// Spot tickers carry no funding rate; linear/inverse tickers do, and since v5 has no
    /// dedicated public funding-rate topic, we fold it into the same [`Ticker`] event
    /// (populating `funding_rate`) rather than synthesising a separate `FundingRate`
    /// event the exchange never actually sent.
    fn decode_ticker(
        &self,
        symbol: Symbol,
        data: &Value,
        exchange_timestamp: i64,
        local_timestamp: i64,
    ) -> Result<Decoded, DataError> {
        let funding_rate = data.get("fundingRate").and_then(Value::as_str).and_then(|s| Decimal::from_str(s).ok());

        let ticker = Ticker {
            last: decimal_field(data, "lastPrice")?,
            bid: decimal_field(data, "bid1Price")?,
            bid_size: decimal_field(data, "bid1Size")?,
            ask: decimal_field(data, "ask1Price")?,
            ask_size: decimal_field(data, "ask1Size")?,
            open: decimal_field(data, "prevPrice24h")?,
            high: decimal_field(data, "highPrice24h")?,
            low: decimal_field(data, "lowPrice24h")?,
            volume: decimal_field(data, "volume24h")?,
            quote_volume: decimal_field(data, "turnover24h")?,
            change: Decimal::ZERO,
            change_percent: decimal_field(data, "price24hPcnt")?,
            funding_rate,
        };

        Ok(Decoded::Event(self.envelope(symbol, exchange_timestamp, local_timestamp, MarketEventKind::Ticker(ticker))))
    }

    fn decode_trade(
        &self,
        symbol: Symbol,
        data: &Value,
        exchange_timestamp: i64,
        local_timestamp: i64,
    ) -> Result<Decoded, DataError> {
        let row = data.as_array().and_then(|rows| rows.first()).ok_or_else(|| DataError::Decode {
            exchange: self.id(),
            reason: "publicTrade payload is not a non-empty array".into(),
        })?;

        let side = match row.get("S").and_then(Value::as_str) {
            Some("Buy") => Side::Buy,
            _ => Side::Sell,
        };

        let trade = Trade {
            trade_id: row.get("i").and_then(Value::as_str).unwrap_or_default().to_string(),
            price: decimal_field(row, "p")?,
            amount: decimal_field(row, "v")?,
            side,
        };

        Ok(Decoded::Event(self.envelope(symbol, exchange_timestamp, local_timestamp, MarketEventKind::Trade(trade))))
    }

    fn decode_depth(
        &self,
        symbol: Symbol,
        data: &Value,
        exchange_timestamp: i64,
        local_timestamp: i64,
    ) -> Result<Decoded, DataError> {
        let bids = levels(data, "b")?;
        let asks = levels(data, "a")?;
        Ok(Decoded::Event(self.envelope(
            symbol,
            exchange_timestamp,
            local_timestamp,
            MarketEventKind::Depth(Depth { bids, asks }),
        )))
    }

    fn decode_kline(
        &self,
        symbol: Symbol,
        data: &Value,
        exchange_timestamp: i64,
        local_timestamp: i64,
    ) -> Result<Decoded, DataError> {
        let row = data.as_array().and_then(|rows| rows.first()).ok_or_else(|| DataError::Decode {
            exchange: self.id(),
            reason: "kline payload is not a non-empty array".into(),
        })?;

        let kline = Kline {
            interval: row.get("interval").and_then(Value::as_str).unwrap_or("1").to_string(),
            open_time: row.get("start").and_then(Value::as_i64).unwrap_or(0),
            close_time: row.get("end").and_then(Value::as_i64).unwrap_or(0),
            open: decimal_field(row, "open")?,
            high: decimal_field(row, "high")?,
            low: decimal_field(row, "low")?,
            close: decimal_field(row, "close")?,
            volume: decimal_field(row, "volume")?,
            quote_volume: decimal_field(row, "turnover")?,
            trades: 0,
            is_closed: row.get("confirm").and_then(Value::as_bool).unwrap_or(false),
        };

        Ok(Decoded::Event(self.envelope(symbol, exchange_timestamp, local_timestamp, MarketEventKind::Kline(kline))))
    }

    fn envelope(&self, symbol: Symbol, exchange_timestamp: i64, local_timestamp: i64, kind: MarketEventKind) -> MarketEvent {
        MarketEvent {
            exchange: self.id(),
            symbol,
            exchange_timestamp,
            local_timestamp,
            unified_timestamp: local_timestamp,
            kind,
        }
    }
}

fn decimal_field(payload: &Value, key: &str) -> Result<Decimal, DataError> {
    match payload.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Decimal::from_str(s).map_err(|error| DataError::Decode {
            exchange: ExchangeId::BybitSpot,
            reason: format!("invalid decimal for '{key}': {error}"),
        }),
        _ => Ok(Decimal::ZERO),
    }
}

fn levels(payload: &Value, key: &str) -> Result<Vec<(Decimal, Decimal)>, DataError> {
    payload
        .get(key)
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|row| {
                    let row = row.as_array()?;
                    let price = row.first()?.as_str().and_then(|s| Decimal::from_str(s).ok())?;
                    let amount = row.get(1)?.as_str().and_then(|s| Decimal::from_str(s).ok())?;
                    Some((price, amount))
                })
                .collect()
        })
        .ok_or_else(|| DataError::Decode {
            exchange: ExchangeId::BybitSpot,
            reason: format!("missing or invalid '{key}' levels"),
        })
}

impl ExchangeAdapter for Bybit {
    fn id(&self) -> ExchangeId {
        match self.market {
            BybitMarket::Spot => ExchangeId::BybitSpot,
            BybitMarket::Linear => ExchangeId::BybitLinear,
            BybitMarket::Inverse => ExchangeId::BybitInverse,
        }
    }

    fn trading_type(&self) -> TradingType {
        match self.market {
            BybitMarket::Spot => TradingType::Spot,
            BybitMarket::Linear | BybitMarket::Inverse => TradingType::Futures,
        }
    }

    fn ws_url(&self) -> Url {
        Url::parse(&format!("wss://stream.bybit.com/v5/public/{}", self.market.path()))
            .expect("static Bybit URL is valid")
    }

    fn build_subscribe(&self, symbol: &Symbol, data_type: DataType) -> WsMessage {
        websocket::text(json!({"op": "subscribe", "args": [self.topic(symbol, data_type)]}).to_string())
    }

    fn build_unsubscribe(&self, symbol: &Symbol, data_type: DataType) -> WsMessage {
        websocket::text(json!({"op": "unsubscribe", "args": [self.topic(symbol, data_type)]}).to_string())
    }

    fn heartbeat_frame(&self) -> Option<WsMessage> {
        Some(websocket::text(json!({"op": "ping"}).to_string()))
    }

    fn decode(&self, raw: &str, local_timestamp: i64) -> Result<Decoded, DataError> {
        let value: Value = serde_json::from_str(raw).map_err(|error| DataError::Decode {
            exchange: self.id(),
            reason: error.to_string(),
        })?;

        match value.get("op").and_then(Value::as_str) {
            Some("pong") => return Ok(Decoded::Control(Control::Pong)),
            Some("subscribe") => {
                let success = value.get("success").and_then(Value::as_bool).unwrap_or(false);
                return Ok(if success {
                    Decoded::Control(Control::SubscribeAck {
                        channel: value
                            .get("req_id")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    })
                } else {
                    Decoded::Control(Control::Error {
                        message: value.get("ret_msg").and_then(Value::as_str).unwrap_or("subscribe failed").to_string(),
                    })
                });
            }
            _ => {}
        }

        if value.get("ret_msg").and_then(Value::as_str) == Some("pong") {
            return Ok(Decoded::Control(Control::Pong));
        }

        self.decode_payload(&value, local_timestamp)
    }

    fn to_native(&self, symbol: &Symbol) -> String {
        format!("{}{}", symbol.base(), symbol.quote())
    }

    fn from_native(&self, native: &str) -> Option<Symbol> {
        split_concatenated(&native.to_ascii_uppercase()).map(|(base, quote)| Symbol::new(base, quote))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_roundtrip_linear() {
        let adapter = Bybit::linear();
        let symbol = Symbol::new("BTC", "USDT");
        assert_eq!(adapter.to_native(&symbol), "BTCUSDT");
        assert_eq!(adapter.from_native("BTCUSDT"), Some(symbol));
    }

    #[test]
    fn decode_linear_ticker_populates_funding_rate() {
        let adapter = Bybit::linear();
        let raw = json!({
            "topic": "tickers.BTCUSDT",
            "ts": 1700000000000i64,
            "data": {
                "lastPrice": "20010.0", "bid1Price": "20000.0", "bid1Size": "1.0",
                "ask1Price": "20020.0", "ask1Size": "1.0", "prevPrice24h": "20000.0",
                "highPrice24h": "20100.0", "lowPrice24h": "19900.0", "volume24h": "1000.0",
                "turnover24h": "20000000.0", "price24hPcnt": "0.005", "fundingRate": "0.0001"
            }
        })
        .to_string();

        match adapter.decode(&raw, 1700000000100).unwrap() {
            Decoded::Event(event) => match event.kind {
                MarketEventKind::Ticker(ticker) => {
                    assert_eq!(ticker.funding_rate, Some(Decimal::from_str("0.0001").unwrap()));
                }
                other => panic!("expected Ticker, got {other:?}"),
            },
            other => panic!("expected Event, got {other:?}"),
        }
    }

    #[test]
    fn decode_pong_is_control() {
        let adapter = Bybit::spot();
        let raw = json!({"op": "pong"}).to_string();
        assert!(matches!(adapter.decode(&raw, 0).unwrap(), Decoded::Control(Control::Pong)));
    }
}
