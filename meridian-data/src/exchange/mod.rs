use crate::error::DataError;
use crate::event::{DataType, MarketEvent};
use meridian_instrument::{ExchangeId, Symbol, TradingType};
use meridian_integration::protocol::websocket::WsMessage;
use url::Url;

/// Binance [`ExchangeAdapter`] - spot and USDT-M futures.
pub mod binance;
/// Bybit [`ExchangeAdapter`] - spot, linear and inverse.
pub mod bybit;
/// Deribit [`ExchangeAdapter`] - JSON-RPC 2.0 framed options/futures/perpetuals.
pub mod deribit;
/// Okx [`ExchangeAdapter`] - unified public channel/instId framing.
pub mod okx;

/// Ordered list of known quote assets used to reverse Binance/Bybit's concatenated
/// native symbols (eg/ `BTCUSDT` -> base `BTC`, quote `USDT`) back into canonical form,
/// per the exact ordering given in spec `4.1`.
pub const KNOWN_QUOTES: &[&str] = &["USDT", "BUSD", "USDC", "BTC", "ETH", "BNB", "USD"];

/// Split a concatenated native symbol (eg/ `BTCUSDT`) into `(base, quote)` by matching
/// the longest known quote suffix. Returns `None` if no known quote matches.
pub fn split_concatenated(native: &str) -> Option<(&str, &str)> {
    let upper_len = native.len();
    KNOWN_QUOTES
        .iter()
        .filter(|quote| native.len() > quote.len())
        .find(|quote| native[upper_len - quote.len()..].eq_ignore_ascii_case(quote))
        .map(|quote| native.split_at(upper_len - quote.len()))
}

/// Outcome of [`ExchangeAdapter::decode`]ing a single raw inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A normalised market data event ready for the [`crate::normalizer`] stage.
    Event(MarketEvent),
    /// A protocol-level control message (subscribe ack, pong, exchange error) that is
    /// meaningful to the session but must never be surfaced as a [`MarketEvent`].
    Control(Control),
    /// Frame carried no application data relevant to this adapter (eg/ an unrelated
    /// channel, or a heartbeat the adapter already stripped).
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    Pong,
    SubscribeAck { channel: String },
    Error { message: String },
}

/// Per-exchange symbol/channel encoding, subscribe/unsubscribe framing, raw-frame
/// decoding and heartbeat idiom - see spec `4.1 ExchangeAdapter (capability)`.
///
/// No other component may peek at raw frames: every exchange-specific detail is
/// encapsulated behind this trait, following the `Connector` polymorphism pattern in
/// `barter_data::exchange::Connector`, simplified here to a single dyn-compatible trait
/// since this workspace does not need Connector's generic `Instrument`/`Kind` axes.
pub trait ExchangeAdapter: Send + Sync + std::fmt::Debug {
    /// Unique identifier for the exchange venue this adapter connects to.
    fn id(&self) -> ExchangeId;

    /// Market this adapter serves - affects native symbol encoding, see spec `4.1`.
    fn trading_type(&self) -> TradingType;

    /// Base WebSocket URL for this adapter's venue/market combination.
    fn ws_url(&self) -> Url;

    /// Build the subscribe frame for the given canonical `symbol`/`data_type`.
    fn build_subscribe(&self, symbol: &Symbol, data_type: DataType) -> WsMessage;

    /// Build the unsubscribe frame for the given canonical `symbol`/`data_type`.
    fn build_unsubscribe(&self, symbol: &Symbol, data_type: DataType) -> WsMessage;

    /// The application-level heartbeat frame this adapter expects to send on a timer,
    /// or `None` if the exchange relies solely on the WebSocket protocol ping/pong.
    fn heartbeat_frame(&self) -> Option<WsMessage>;

    /// Decode one raw inbound frame. Protocol-level pongs MUST be returned as
    /// [`Decoded::Control`], never [`Decoded::Event`] - see spec `4.1`.
    fn decode(&self, raw: &str, local_timestamp: i64) -> Result<Decoded, DataError>;

    /// Translate a canonical [`Symbol`] into this exchange's native encoding.
    fn to_native(&self, symbol: &Symbol) -> String;

    /// Translate a native exchange symbol back into canonical form. Must satisfy
    /// `from_native(to_native(s)) == Some(s)` for every symbol the adapter supports -
    /// invariant `I1`, property `P1`.
    fn from_native(&self, native: &str) -> Option<Symbol>;
}
