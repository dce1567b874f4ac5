use crate::error::DataError;
use crate::event::{DataType, Depth, FundingRate, Kline, MarketEvent, MarketEventKind, Ticker, Trade};
use crate::exchange::{Control, Decoded, ExchangeAdapter, split_concatenated};
use meridian_instrument::{ExchangeId, Side, Symbol, TradingType};
use meridian_integration::protocol::websocket::{self, WsMessage};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use std::str::FromStr;
use url::Url;

const WS_URL_SPOT: &str = "wss://stream.binance.com:9443/ws";
const WS_URL_FUTURES_USD: &str = "wss://fstream.binance.com/ws";

/// Binance spot & USDT-M futures adapter - see spec `4.1`.
///
/// Binance multiplexes all subscriptions over one connection keyed by lower-case
/// `<symbol><channel>` stream names (eg/ `btcusdt@ticker`), framed with a JSON-RPC-ish
/// `{"method":"SUBSCRIBE","params":[...],"id":N}` envelope. Heartbeats are handled
/// entirely at the WebSocket-ping protocol level, so [`ExchangeAdapter::heartbeat_frame`]
/// returns `None` here - `tokio-tungstenite` answers protocol pings automatically.
#[derive(Debug, Clone)]
pub struct Binance {
    trading_type: TradingType,
}

impl Binance {
    pub fn spot() -> Self {
        Self {
            trading_type: TradingType::Spot,
        }
    }

    pub fn futures_usd() -> Self {
        Self {
            trading_type: TradingType::Futures,
        }
    }

    fn stream_suffix(&self, data_type: DataType) -> &'static str {
        match data_type {
            DataType::Ticker => "@ticker",
            DataType::Depth => "@depth20",
            DataType::Trade => "@trade",
            DataType::FundingRate => "@markPrice",
            DataType::Kline => "@kline_1m",
        }
    }

    fn stream_name(&self, symbol: &Symbol, data_type: DataType) -> String {
        format!("{}{}", self.to_native(symbol).to_ascii_lowercase(), self.stream_suffix(data_type))
    }

    fn decode_payload(&self, payload: &Value, local_timestamp: i64) -> Result<Decoded, DataError> {
        let event_type = payload.get("e").and_then(Value::as_str);

        match event_type {
            Some("24hrTicker") => self.decode_ticker(payload, local_timestamp),
            Some("trade") => self.decode_trade(payload, local_timestamp),
            Some("markPriceUpdate") => self.decode_funding(payload, local_timestamp),
            Some("kline") => self.decode_kline(payload, local_timestamp),
            None if payload.get("bids").is_some() && payload.get("asks").is_some() => {
                self.decode_depth(payload, local_timestamp)
            }
            _ => Ok(Decoded::None),
        }
    }

    fn decode_ticker(&self, payload: &Value, local_timestamp: i64) -> Result<Decoded, DataError> {
        let symbol = self.native_symbol_from_payload(payload)?;
        let exchange_timestamp = payload.get("E").and_then(Value::as_i64).unwrap_or(local_timestamp);

        let ticker = Ticker {
            last: decimal_field(payload, "c")?,
            bid: decimal_field(payload, "b")?,
            bid_size: decimal_field(payload, "B")?,
            ask: decimal_field(payload, "a")?,
            ask_size: decimal_field(payload, "A")?,
            open: decimal_field(payload, "o")?,
            high: decimal_field(payload, "h")?,
            low: decimal_field(payload, "l")?,
            volume: decimal_field(payload, "v")?,
            quote_volume: decimal_field(payload, "q")?,
            change: decimal_field(payload, "p")?,
            change_percent: decimal_field(payload, "P")?,
            funding_rate: None,
        };

        Ok(Decoded::Event(self.envelope(
            symbol,
            exchange_timestamp,
            local_timestamp,
            MarketEventKind::Ticker(ticker),
        )))
    }

    fn decode_trade(&self, payload: &Value, local_timestamp: i64) -> Result<Decoded, DataError> {
        let symbol = self.native_symbol_from_payload(payload)?;
        let exchange_timestamp = payload.get("T").and_then(Value::as_i64).unwrap_or(local_timestamp);
        let is_buyer_maker = payload.get("m").and_then(Value::as_bool).unwrap_or(false);

        let trade = Trade {
            trade_id: payload
                .get("t")
                .map(|v| v.to_string())
                .unwrap_or_default(),
            price: decimal_field(payload, "p")?,
            amount: decimal_field(payload, "q")?,
            side: if is_buyer_maker { Side::Sell } else { Side::Buy },
        };

        Ok(Decoded::Event(self.envelope(
            symbol,
            exchange_timestamp,
            local_timestamp,
            MarketEventKind::Trade(trade),
        )))
    }

    fn decode_funding(&self, payload: &Value, local_timestamp: i64) -> Result<Decoded, DataError> {
        let symbol = self.native_symbol_from_payload(payload)?;
        let exchange_timestamp = payload.get("E").and_then(Value::as_i64).unwrap_or(local_timestamp);

        let funding = FundingRate {
            mark_price: decimal_field(payload, "p")?,
            index_price: decimal_field(payload, "i")?,
            funding_rate: decimal_field(payload, "r")?,
            next_funding_time: payload.get("T").and_then(Value::as_i64).unwrap_or(0),
        };

        Ok(Decoded::Event(self.envelope(
            symbol,
            exchange_timestamp,
            local_timestamp,
            MarketEventKind::FundingRate(funding),
        )))
    }

    fn decode_kline(&self, payload: &Value, local_timestamp: i64) -> Result<Decoded, DataError> {
        let symbol = self.native_symbol_from_payload(payload)?;
        let exchange_timestamp = payload.get("E").and_then(Value::as_i64).unwrap_or(local_timestamp);
        let k = payload.get("k").ok_or_else(|| DataError::Decode {
            exchange: self.id(),
            reason: "kline payload missing 'k' field".into(),
        })?;

        let kline = Kline {
            interval: k.get("i").and_then(Value::as_str).unwrap_or("1m").to_string(),
            open_time: k.get("t").and_then(Value::as_i64).unwrap_or(0),
            close_time: k.get("T").and_then(Value::as_i64).unwrap_or(0),
            open: decimal_field(k, "o")?,
            high: decimal_field(k, "h")?,
            low: decimal_field(k, "l")?,
            close: decimal_field(k, "c")?,
            volume: decimal_field(k, "v")?,
            quote_volume: decimal_field(k, "q")?,
            trades: k.get("n").and_then(Value::as_u64).unwrap_or(0),
            is_closed: k.get("x").and_then(Value::as_bool).unwrap_or(false),
        };

        Ok(Decoded::Event(self.envelope(
            symbol,
            exchange_timestamp,
            local_timestamp,
            MarketEventKind::Kline(kline),
        )))
    }

    fn decode_depth(&self, payload: &Value, local_timestamp: i64) -> Result<Decoded, DataError> {
        // Partial depth streams carry no symbol field - the caller (SessionManager)
        // attaches the symbol it subscribed this stream under via `decode`'s caller
        // context in practice; here we fall back to whatever the stream name carried.
        let symbol = self.native_symbol_from_payload(payload).unwrap_or_else(|_| {
            Symbol::new("UNKNOWN", "UNKNOWN")
        });

        let bids = levels(payload, "bids")?;
        let asks = levels(payload, "asks")?;

        Ok(Decoded::Event(self.envelope(
            symbol,
            local_timestamp,
            local_timestamp,
            MarketEventKind::Depth(Depth { bids, asks }),
        )))
    }

    fn native_symbol_from_payload(&self, payload: &Value) -> Result<Symbol, DataError> {
        let native = payload.get("s").and_then(Value::as_str).ok_or_else(|| DataError::Decode {
            exchange: self.id(),
            reason: "payload missing 's' (symbol) field".into(),
        })?;
        self.from_native(native).ok_or_else(|| DataError::Decode {
            exchange: self.id(),
            reason: format!("unrecognised native symbol '{native}'"),
        })
    }

    fn envelope(
        &self,
        symbol: Symbol,
        exchange_timestamp: i64,
        local_timestamp: i64,
        kind: MarketEventKind,
    ) -> MarketEvent {
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
    let raw = payload.get(key);
    match raw {
        Some(Value::String(s)) => Decimal::from_str(s).map_err(|error| DataError::Decode {
            exchange: ExchangeId::BinanceSpot,
            reason: format!("invalid decimal for '{key}': {error}"),
        }),
        Some(Value::Number(n)) => Decimal::from_str(&n.to_string()).map_err(|error| DataError::Decode {
            exchange: ExchangeId::BinanceSpot,
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
            exchange: ExchangeId::BinanceSpot,
            reason: format!("missing or invalid '{key}' levels"),
        })
}

impl ExchangeAdapter for Binance {
    fn id(&self) -> ExchangeId {
        match self.trading_type {
            TradingType::Spot => ExchangeId::BinanceSpot,
            TradingType::Futures => ExchangeId::BinanceFuturesUsd,
        }
    }

    fn trading_type(&self) -> TradingType {
        self.trading_type
    }

    fn ws_url(&self) -> Url {
        let url = match self.trading_type {
            TradingType::Spot => WS_URL_SPOT,
            TradingType::Futures => WS_URL_FUTURES_USD,
        };
        Url::parse(url).expect("static Binance URL is valid")
    }

    fn build_subscribe(&self, symbol: &Symbol, data_type: DataType) -> WsMessage {
        websocket::text(
            json!({
                "method": "SUBSCRIBE",
                "params": [self.stream_name(symbol, data_type)],
                "id": 1,
            })
            .to_string(),
        )
    }

    fn build_unsubscribe(&self, symbol: &Symbol, data_type: DataType) -> WsMessage {
        websocket::text(
            json!({
                "method": "UNSUBSCRIBE",
                "params": [self.stream_name(symbol, data_type)],
                "id": 1,
            })
            .to_string(),
        )
    }

    fn heartbeat_frame(&self) -> Option<WsMessage> {
        // Binance relies on WebSocket-protocol pings, answered transparently by
        // tokio-tungstenite - no application-level heartbeat is required.
        None
    }

    fn decode(&self, raw: &str, local_timestamp: i64) -> Result<Decoded, DataError> {
        let value: Value = serde_json::from_str(raw).map_err(|error| DataError::Decode {
            exchange: self.id(),
            reason: error.to_string(),
        })?;

        if let Some(result) = value.get("result") {
            if result.is_null() {
                return Ok(Decoded::Control(Control::SubscribeAck {
                    channel: value.get("id").map(|v| v.to_string()).unwrap_or_default(),
                }));
            }
        }

        // Combined stream envelope: {"stream": "...", "data": {...}}
        if let Some(data) = value.get("data") {
            return self.decode_payload(data, local_timestamp);
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
    fn symbol_roundtrip_spot() {
        let adapter = Binance::spot();
        for (base, quote) in [("BTC", "USDT"), ("ETH", "BUSD"), ("SOL", "USDC")] {
            let symbol = Symbol::new(base, quote);
            let native = adapter.to_native(&symbol);
            assert_eq!(adapter.from_native(&native), Some(symbol));
        }
    }

    #[test]
    fn decode_ticker_produces_event() {
        let adapter = Binance::spot();
        let raw = json!({
            "e": "24hrTicker", "E": 1700000000000i64, "s": "BTCUSDT",
            "p": "10.0", "P": "0.5", "c": "20010.0", "b": "20000.0", "B": "1.0",
            "a": "20020.0", "A": "1.0", "o": "20000.0", "h": "20100.0", "l": "19900.0",
            "v": "1000.0", "q": "20000000.0"
        })
        .to_string();

        let decoded = adapter.decode(&raw, 1700000000500).unwrap();
        match decoded {
            Decoded::Event(event) => {
                assert_eq!(event.symbol, Symbol::new("BTC", "USDT"));
                assert_eq!(event.exchange_timestamp, 1700000000000);
                match event.kind {
                    MarketEventKind::Ticker(ticker) => {
                        assert_eq!(ticker.last, Decimal::from_str("20010.0").unwrap());
                    }
                    other => panic!("expected Ticker, got {other:?}"),
                }
            }
            other => panic!("expected Event, got {other:?}"),
        }
    }

    #[test]
    fn decode_subscribe_ack_is_control_not_event() {
        let adapter = Binance::spot();
        let raw = json!({"result": null, "id": 1}).to_string();
        let decoded = adapter.decode(&raw, 0).unwrap();
        assert!(matches!(decoded, Decoded::Control(Control::SubscribeAck { .. })));
    }
}
