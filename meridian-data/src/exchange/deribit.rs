use crate::error::DataError;
use crate::event::{DataType, Depth, MarketEvent, MarketEventKind, Ticker, Trade};
use crate::exchange::{Control, Decoded, ExchangeAdapter};
use meridian_instrument::{ExchangeId, Side, Symbol, TradingType};
use meridian_integration::protocol::websocket::{self, WsMessage};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use url::Url;

const WS_URL_PROD: &str = "wss://www.deribit.com/ws/api/v2";
const WS_URL_TESTNET: &str = "wss://test.deribit.com/ws/api/v2";

/// Deribit public JSON-RPC 2.0 adapter - perpetual swaps only, spec `4.1`.
///
/// Canonical [`Symbol`] carries no expiry dimension, so this adapter only round-trips
/// `BASE-PERPETUAL` instruments (quote is always implicitly `USD` on Deribit); dated
/// futures and options instruments are out of scope - there is no canonical way to
/// address them with a `(base, quote)` pair alone.
///
/// Subscriptions use Deribit's JSON-RPC envelope (`{"jsonrpc":"2.0","method":"public/
/// subscribe","params":{"channels":[...]},"id":N}`); heartbeats answer the server's
/// `test_request` heartbeat notification with a `public/test` call.
#[derive(Debug)]
pub struct Deribit {
    testnet: bool,
    next_id: std::sync::atomic::AtomicI64,
}

impl Deribit {
    pub fn production() -> Self {
        Self { testnet: false, next_id: std::sync::atomic::AtomicI64::new(1) }
    }

    pub fn testnet() -> Self {
        Self { testnet: true, next_id: std::sync::atomic::AtomicI64::new(1) }
    }

    fn request_id(&self) -> i64 {
        self.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }

    fn channel(&self, symbol: &Symbol, data_type: DataType) -> String {
        let instrument = self.to_native(symbol);
        match data_type {
            DataType::Ticker | DataType::FundingRate => format!("ticker.{instrument}.100ms"),
            DataType::Depth => format!("book.{instrument}.none.20.100ms"),
            DataType::Trade => format!("trades.{instrument}.100ms"),
            DataType::Kline => format!("chart.trades.{instrument}.1"),
        }
    }

    fn symbol_from_channel(&self, channel: &str) -> Option<Symbol> {
        let mut parts = channel.split('.');
        let kind = parts.next()?;
        let instrument = if kind == "chart" {
            parts.next(); // "trades"
            parts.next()?
        } else {
            parts.next()?
        };
        self.from_native(instrument)
    }

    fn decode_notification(&self, value: &Value, local_timestamp: i64) -> Result<Decoded, DataError> {
        if value.pointer("/params/type").and_then(Value::as_str) == Some("test_request") {
            return Ok(Decoded::Control(Control::Pong));
        }

        let channel = match value.pointer("/params/channel").and_then(Value::as_str) {
            Some(channel) => channel,
            None => return Ok(Decoded::None),
        };
        let data = match value.pointer("/params/data") {
            Some(data) => data,
            None => return Ok(Decoded::None),
        };
        let symbol = self.symbol_from_channel(channel).ok_or_else(|| DataError::Decode {
            exchange: self.id(),
            reason: format!("unrecognised channel '{channel}'"),
        })?;

        if channel.starts_with("ticker.") {
            self.decode_ticker(symbol, data, local_timestamp)
        } else if channel.starts_with("trades.") {
            self.decode_trades(symbol, data, local_timestamp)
        } else if channel.starts_with("book.") {
            self.decode_book(symbol, data, local_timestamp)
        } else {
            Ok(Decoded::None)
        }
    }

    fn decode_ticker(&self, symbol: Symbol, data: &Value, local_timestamp: i64) -> Result<Decoded, DataError> {
        let exchange_timestamp = data.get("timestamp").and_then(Value::as_i64).unwrap_or(local_timestamp);
        let stats = data.get("stats");

        let ticker = Ticker {
            last: decimal_field(data, "last_price"),
            bid: decimal_field(data, "best_bid_price"),
            bid_size: decimal_field(data, "best_bid_amount"),
            ask: decimal_field(data, "best_ask_price"),
            ask_size: decimal_field(data, "best_ask_amount"),
            open: Decimal::ZERO,
            high: stats.map(|s| decimal_field(s, "high")).unwrap_or(Decimal::ZERO),
            low: stats.map(|s| decimal_field(s, "low")).unwrap_or(Decimal::ZERO),
            volume: stats.map(|s| decimal_field(s, "volume")).unwrap_or(Decimal::ZERO),
            quote_volume: stats.map(|s| decimal_field(s, "volume_usd")).unwrap_or(Decimal::ZERO),
            change: Decimal::ZERO,
            change_percent: stats.map(|s| decimal_field(s, "price_change")).unwrap_or(Decimal::ZERO),
            funding_rate: data.get("current_funding").map(|_| decimal_field(data, "current_funding")),
        };

        // Deribit's ticker channel already carries funding + mark/index price fields
        // inline, so - as with Bybit - we fold them into this Ticker event's
        // `funding_rate` rather than requiring a second subscription.
        Ok(Decoded::Event(self.envelope(symbol, exchange_timestamp, local_timestamp, MarketEventKind::Ticker(ticker))))
    }

    fn decode_trades(&self, symbol: Symbol, data: &Value, local_timestamp: i64) -> Result<Decoded, DataError> {
        let row = data.as_array().and_then(|rows| rows.first()).ok_or_else(|| DataError::Decode {
            exchange: self.id(),
            reason: "trades payload is not a non-empty array".into(),
        })?;
        let exchange_timestamp = row.get("timestamp").and_then(Value::as_i64).unwrap_or(local_timestamp);

        let side = match row.get("direction").and_then(Value::as_str) {
            Some("buy") => Side::Buy,
            _ => Side::Sell,
        };

        let trade = Trade {
            trade_id: row.get("trade_id").and_then(Value::as_str).unwrap_or_default().to_string(),
            price: decimal_field(row, "price"),
            amount: decimal_field(row, "amount"),
            side,
        };

        Ok(Decoded::Event(self.envelope(symbol, exchange_timestamp, local_timestamp, MarketEventKind::Trade(trade))))
    }

    fn decode_book(&self, symbol: Symbol, data: &Value, local_timestamp: i64) -> Result<Decoded, DataError> {
        let exchange_timestamp = data.get("timestamp").and_then(Value::as_i64).unwrap_or(local_timestamp);
        let bids = triples(data, "bids");
        let asks = triples(data, "asks");
        Ok(Decoded::Event(self.envelope(symbol, exchange_timestamp, local_timestamp, MarketEventKind::Depth(Depth { bids, asks }))))
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

fn decimal_field(payload: &Value, key: &str) -> Decimal {
    match payload.get(key) {
        Some(Value::Number(n)) => n.as_f64().and_then(|f| Decimal::try_from(f).ok()).unwrap_or(Decimal::ZERO),
        Some(Value::String(s)) => s.parse().unwrap_or(Decimal::ZERO),
        _ => Decimal::ZERO,
    }
}

/// Deribit order book levels are `[action, price, amount]` triples; `action` is dropped
/// since [`Depth`] models a full snapshot, not an incremental update.
fn triples(payload: &Value, key: &str) -> Vec<(Decimal, Decimal)> {
    payload
        .get(key)
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|row| {
                    let row = row.as_array()?;
                    let price = row.get(1).and_then(Value::as_f64).and_then(|f| Decimal::try_from(f).ok())?;
                    let amount = row.get(2).and_then(Value::as_f64).and_then(|f| Decimal::try_from(f).ok())?;
                    Some((price, amount))
                })
                .collect()
        })
        .unwrap_or_default()
}

impl ExchangeAdapter for Deribit {
    fn id(&self) -> ExchangeId {
        ExchangeId::Deribit
    }

    fn trading_type(&self) -> TradingType {
        TradingType::Futures
    }

    fn ws_url(&self) -> Url {
        let url = if self.testnet { WS_URL_TESTNET } else { WS_URL_PROD };
        Url::parse(url).expect("static Deribit URL is valid")
    }

    fn build_subscribe(&self, symbol: &Symbol, data_type: DataType) -> WsMessage {
        websocket::text(
            json!({
                "jsonrpc": "2.0",
                "id": self.request_id(),
                "method": "public/subscribe",
                "params": {"channels": [self.channel(symbol, data_type)]},
            })
            .to_string(),
        )
    }

    fn build_unsubscribe(&self, symbol: &Symbol, data_type: DataType) -> WsMessage {
        websocket::text(
            json!({
                "jsonrpc": "2.0",
                "id": self.request_id(),
                "method": "public/unsubscribe",
                "params": {"channels": [self.channel(symbol, data_type)]},
            })
            .to_string(),
        )
    }

    fn heartbeat_frame(&self) -> Option<WsMessage> {
        Some(websocket::text(
            json!({"jsonrpc": "2.0", "id": self.request_id(), "method": "public/test", "params": {}}).to_string(),
        ))
    }

    fn decode(&self, raw: &str, local_timestamp: i64) -> Result<Decoded, DataError> {
        let value: Value = serde_json::from_str(raw).map_err(|error| DataError::Decode {
            exchange: self.id(),
            reason: error.to_string(),
        })?;

        if value.get("method").and_then(Value::as_str) == Some("heartbeat") {
            return self.decode_notification(&value, local_timestamp);
        }
        if value.get("method").and_then(Value::as_str) == Some("subscription") {
            return self.decode_notification(&value, local_timestamp);
        }
        if let Some(error) = value.get("error") {
            return Ok(Decoded::Control(Control::Error {
                message: error.get("message").and_then(Value::as_str).unwrap_or("unknown Deribit error").to_string(),
            }));
        }
        if value.get("result").is_some() {
            return Ok(Decoded::Control(Control::SubscribeAck {
                channel: value.get("id").map(|v| v.to_string()).unwrap_or_default(),
            }));
        }

        Ok(Decoded::None)
    }

    fn to_native(&self, symbol: &Symbol) -> String {
        format!("{}-PERPETUAL", symbol.base())
    }

    fn from_native(&self, native: &str) -> Option<Symbol> {
        native.strip_suffix("-PERPETUAL").map(|base| Symbol::new(base, "USD"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_roundtrip_perpetual() {
        let adapter = Deribit::production();
        let symbol = Symbol::new("BTC", "USD");
        assert_eq!(adapter.to_native(&symbol), "BTC-PERPETUAL");
        assert_eq!(adapter.from_native("BTC-PERPETUAL"), Some(symbol));
    }

    #[test]
    fn dated_future_has_no_canonical_symbol() {
        let adapter = Deribit::production();
        assert_eq!(adapter.from_native("BTC-29DEC23"), None);
    }

    #[test]
    fn decode_heartbeat_test_request_is_control() {
        let adapter = Deribit::production();
        let raw = json!({"jsonrpc": "2.0", "method": "heartbeat", "params": {"type": "test_request"}}).to_string();
        assert!(matches!(adapter.decode(&raw, 0).unwrap(), Decoded::Control(Control::Pong)));
    }

    #[test]
    fn decode_ticker_notification_event() {
        let adapter = Deribit::production();
        let raw = json!({
            "jsonrpc": "2.0",
            "method": "subscription",
            "params": {
                "channel": "ticker.BTC-PERPETUAL.100ms",
                "data": {
                    "timestamp": 1700000000000i64, "last_price": 20010.0, "best_bid_price": 20000.0,
                    "best_bid_amount": 1.0, "best_ask_price": 20020.0, "best_ask_amount": 1.0,
                    "mark_price": 20005.0, "index_price": 20000.0, "current_funding": 0.0001,
                    "stats": {"volume": 1000.0, "volume_usd": 20000000.0, "high": 20100.0, "low": 19900.0, "price_change": 0.5}
                }
            }
        })
        .to_string();

        match adapter.decode(&raw, 1700000000050).unwrap() {
            Decoded::Event(event) => assert_eq!(event.symbol, Symbol::new("BTC", "USD")),
            other => panic!("expected Event, got {other:?}"),
        }
    }
}
