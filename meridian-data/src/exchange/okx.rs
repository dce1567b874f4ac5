use crate::error::DataError;
use crate::event::{DataType, Depth, FundingRate, Kline, MarketEvent, MarketEventKind, Ticker, Trade};
use crate::exchange::{Control, Decoded, ExchangeAdapter};
use meridian_instrument::{ExchangeId, Side, Symbol, TradingType};
use meridian_integration::protocol::websocket::{self, WsMessage};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use std::str::FromStr;
use url::Url;

const WS_URL: &str = "wss://ws.okx.com:8443/ws/v5/public";

/// OKX unified public-channel adapter - spot, swap (perpetual) and futures - spec `4.1`.
///
/// Native symbols are dash-separated (`BTC-USDT`), with a `-SWAP` suffix appended iff
/// `trading_type() != Spot`. Subscriptions are framed as `{"op":"subscribe","args":[{
/// "channel":..,"instId":..}]}`; heartbeats are a literal `"ping"` text frame answered
/// with a literal `"pong"` text frame, outside the JSON envelope entirely.
#[derive(Debug, Clone)]
pub struct Okx {
    trading_type: TradingType,
}

impl Okx {
    pub fn spot() -> Self {
        Self { trading_type: TradingType::Spot }
    }

    pub fn swap() -> Self {
        Self { trading_type: TradingType::Futures }
    }

    fn channel(&self, data_type: DataType) -> &'static str {
        match data_type {
            DataType::Ticker => "tickers",
            DataType::Depth => "books5",
            DataType::Trade => "trades",
            DataType::FundingRate => "funding-rate",
            DataType::Kline => "candle1m",
        }
    }

    fn decode_payload(&self, value: &Value, local_timestamp: i64) -> Result<Decoded, DataError> {
        let channel = match value.pointer("/arg/channel").and_then(Value::as_str) {
            Some(channel) => channel,
            None => return Ok(Decoded::None),
        };
        let data = match value.get("data").and_then(Value::as_array) {
            Some(rows) if !rows.is_empty() => rows,
            _ => return Ok(Decoded::None),
        };
        let row = &data[0];

        let native = row.get("instId").and_then(Value::as_str).ok_or_else(|| DataError::Decode {
            exchange: self.id(),
            reason: "row missing 'instId'".into(),
        })?;
        let symbol = self.from_native(native).ok_or_else(|| DataError::Decode {
            exchange: self.id(),
            reason: format!("unrecognised native symbol '{native}'"),
        })?;
        let exchange_timestamp = row.get("ts").and_then(Value::as_str).and_then(|s| s.parse().ok()).unwrap_or(local_timestamp);

        match channel {
            "tickers" => self.decode_ticker(symbol, row, exchange_timestamp, local_timestamp),
            "trades" => self.decode_trade(symbol, row, exchange_timestamp, local_timestamp),
            "books5" | "books" => self.decode_depth(symbol, row, exchange_timestamp, local_timestamp),
            "funding-rate" => self.decode_funding(symbol, row, exchange_timestamp, local_timestamp),
            "candle1m" => self.decode_kline(symbol, row, exchange_timestamp, local_timestamp),
            _ => Ok(Decoded::None),
        }
    }

    fn decode_ticker(&self, symbol: Symbol, row: &Value, exchange_timestamp: i64, local_timestamp: i64) -> Result<Decoded, DataError> {
        let ticker = Ticker {
            last: decimal_field(row, "last")?,
            bid: decimal_field(row, "bidPx")?,
            bid_size: decimal_field(row, "bidSz")?,
            ask: decimal_field(row, "askPx")?,
            ask_size: decimal_field(row, "askSz")?,
            open: decimal_field(row, "open24h")?,
            high: decimal_field(row, "high24h")?,
            low: decimal_field(row, "low24h")?,
            volume: decimal_field(row, "vol24h")?,
            quote_volume: decimal_field(row, "volCcy24h")?,
            change: Decimal::ZERO,
            change_percent: Decimal::ZERO,
            funding_rate: None,
        };
        Ok(Decoded::Event(self.envelope(symbol, exchange_timestamp, local_timestamp, MarketEventKind::Ticker(ticker))))
    }

    fn decode_trade(&self, symbol: Symbol, row: &Value, exchange_timestamp: i64, local_timestamp: i64) -> Result<Decoded, DataError> {
        let side = match row.get("side").and_then(Value::as_str) {
            Some("buy") => Side::Buy,
            _ => Side::Sell,
        };
        let trade = Trade {
            trade_id: row.get("tradeId").and_then(Value::as_str).unwrap_or_default().to_string(),
            price: decimal_field(row, "px")?,
            amount: decimal_field(row, "sz")?,
            side,
        };
        Ok(Decoded::Event(self.envelope(symbol, exchange_timestamp, local_timestamp, MarketEventKind::Trade(trade))))
    }

    fn decode_depth(&self, symbol: Symbol, row: &Value, exchange_timestamp: i64, local_timestamp: i64) -> Result<Decoded, DataError> {
        let bids = levels(row, "bids")?;
        let asks = levels(row, "asks")?;
        Ok(Decoded::Event(self.envelope(symbol, exchange_timestamp, local_timestamp, MarketEventKind::Depth(Depth { bids, asks }))))
    }

    /// OKX splits mark price into a separate `mark-price` channel this adapter does not
    /// subscribe to, so `mark_price`/`index_price` are left at zero here - only
    /// `funding_rate` and `next_funding_time` are populated from `funding-rate`.
    fn decode_funding(&self, symbol: Symbol, row: &Value, exchange_timestamp: i64, local_timestamp: i64) -> Result<Decoded, DataError> {
        let funding = FundingRate {
            mark_price: Decimal::ZERO,
            index_price: Decimal::ZERO,
            funding_rate: decimal_field(row, "fundingRate")?,
            next_funding_time: row.get("nextFundingTime").and_then(Value::as_str).and_then(|s| s.parse().ok()).unwrap_or(0),
        };
        Ok(Decoded::Event(self.envelope(symbol, exchange_timestamp, local_timestamp, MarketEventKind::FundingRate(funding))))
    }

    fn decode_kline(&self, symbol: Symbol, row: &Value, _exchange_timestamp: i64, local_timestamp: i64) -> Result<Decoded, DataError> {
        // candle rows are positional arrays: [ts, o, h, l, c, vol, volCcy, volCcyQuote, confirm]
        let array = row.as_array().ok_or_else(|| DataError::Decode {
            exchange: self.id(),
            reason: "candle row is not an array".into(),
        })?;
        let get = |i: usize| array.get(i).and_then(Value::as_str).unwrap_or("0");
        let open_time: i64 = get(0).parse().unwrap_or(0);

        let kline = Kline {
            interval: "1m".to_string(),
            open_time,
            close_time: open_time + 60_000,
            open: Decimal::from_str(get(1)).unwrap_or(Decimal::ZERO),
            high: Decimal::from_str(get(2)).unwrap_or(Decimal::ZERO),
            low: Decimal::from_str(get(3)).unwrap_or(Decimal::ZERO),
            close: Decimal::from_str(get(4)).unwrap_or(Decimal::ZERO),
            volume: Decimal::from_str(get(5)).unwrap_or(Decimal::ZERO),
            quote_volume: Decimal::from_str(get(6)).unwrap_or(Decimal::ZERO),
            trades: 0,
            is_closed: get(8) == "1",
        };
        Ok(Decoded::Event(self.envelope(symbol, open_time, local_timestamp, MarketEventKind::Kline(kline))))
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
            exchange: ExchangeId::Okx,
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
            exchange: ExchangeId::Okx,
            reason: format!("missing or invalid '{key}' levels"),
        })
}

impl ExchangeAdapter for Okx {
    fn id(&self) -> ExchangeId {
        ExchangeId::Okx
    }

    fn trading_type(&self) -> TradingType {
        self.trading_type
    }

    fn ws_url(&self) -> Url {
        Url::parse(WS_URL).expect("static OKX URL is valid")
    }

    fn build_subscribe(&self, symbol: &Symbol, data_type: DataType) -> WsMessage {
        websocket::text(
            json!({
                "op": "subscribe",
                "args": [{"channel": self.channel(data_type), "instId": self.to_native(symbol)}],
            })
            .to_string(),
        )
    }

    fn build_unsubscribe(&self, symbol: &Symbol, data_type: DataType) -> WsMessage {
        websocket::text(
            json!({
                "op": "unsubscribe",
                "args": [{"channel": self.channel(data_type), "instId": self.to_native(symbol)}],
            })
            .to_string(),
        )
    }

    fn heartbeat_frame(&self) -> Option<WsMessage> {
        Some(websocket::text("ping"))
    }

    fn decode(&self, raw: &str, local_timestamp: i64) -> Result<Decoded, DataError> {
        if raw == "pong" {
            return Ok(Decoded::Control(Control::Pong));
        }

        let value: Value = serde_json::from_str(raw).map_err(|error| DataError::Decode {
            exchange: self.id(),
            reason: error.to_string(),
        })?;

        match value.get("event").and_then(Value::as_str) {
            Some("subscribe") => {
                return Ok(Decoded::Control(Control::SubscribeAck {
                    channel: value.pointer("/arg/channel").and_then(Value::as_str).unwrap_or_default().to_string(),
                }));
            }
            Some("error") => {
                return Ok(Decoded::Control(Control::Error {
                    message: value.get("msg").and_then(Value::as_str).unwrap_or("unknown OKX error").to_string(),
                }));
            }
            _ => {}
        }

        self.decode_payload(&value, local_timestamp)
    }

    fn to_native(&self, symbol: &Symbol) -> String {
        let base = format!("{}-{}", symbol.base(), symbol.quote());
        match self.trading_type {
            TradingType::Spot => base,
            TradingType::Futures => format!("{base}-SWAP"),
        }
    }

    fn from_native(&self, native: &str) -> Option<Symbol> {
        let trimmed = native.strip_suffix("-SWAP").unwrap_or(native);
        let mut parts = trimmed.splitn(2, '-');
        let base = parts.next()?;
        let quote = parts.next()?;
        Some(Symbol::new(base, quote))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_roundtrip_swap() {
        let adapter = Okx::swap();
        let symbol = Symbol::new("BTC", "USDT");
        assert_eq!(adapter.to_native(&symbol), "BTC-USDT-SWAP");
        assert_eq!(adapter.from_native("BTC-USDT-SWAP"), Some(symbol));
    }

    #[test]
    fn symbol_roundtrip_spot() {
        let adapter = Okx::spot();
        let symbol = Symbol::new("ETH", "USDT");
        assert_eq!(adapter.to_native(&symbol), "ETH-USDT");
        assert_eq!(adapter.from_native("ETH-USDT"), Some(symbol));
    }

    #[test]
    fn decode_literal_pong_is_control() {
        let adapter = Okx::spot();
        assert!(matches!(adapter.decode("pong", 0).unwrap(), Decoded::Control(Control::Pong)));
    }

    #[test]
    fn decode_ticker_event() {
        let adapter = Okx::spot();
        let raw = json!({
            "arg": {"channel": "tickers", "instId": "BTC-USDT"},
            "data": [{
                "instId": "BTC-USDT", "last": "20010", "bidPx": "20000", "bidSz": "1",
                "askPx": "20020", "askSz": "1", "open24h": "20000", "high24h": "20100",
                "low24h": "19900", "vol24h": "1000", "volCcy24h": "20000000", "ts": "1700000000000"
            }]
        })
        .to_string();

        match adapter.decode(&raw, 1700000000200).unwrap() {
            Decoded::Event(event) => assert_eq!(event.symbol, Symbol::new("BTC", "USDT")),
            other => panic!("expected Event, got {other:?}"),
        }
    }
}
