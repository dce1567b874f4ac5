#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::unused_self,
    clippy::useless_let_if_seq,
    missing_debug_implementations,
    rust_2018_idioms
)]

//! # Meridian-Instrument
//! Canonical domain vocabulary shared by every Meridian crate: the [`Symbol`] type used
//! as the sole cross-component key, the [`ExchangeId`] enum identifying each supported
//! venue, and small supporting types ([`Side`], [`TradingType`]).
//!
//! This crate has no async runtime dependency and performs no I/O - it exists purely to
//! give every other Meridian crate a shared, allocation-light vocabulary.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Errors that can occur while parsing or constructing domain types.
pub mod error;

/// Unique identifier for a supported exchange venue.
///
/// Mirrors the `barter_instrument::exchange::ExchangeId` pattern of a single flat enum
/// covering every venue the system can talk to, rather than one type per exchange.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeId {
    BinanceSpot,
    BinanceFuturesUsd,
    BybitSpot,
    BybitLinear,
    BybitInverse,
    Okx,
    Deribit,
}

impl ExchangeId {
    /// Return the `&str` representation of this [`ExchangeId`].
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeId::BinanceSpot => "binance_spot",
            ExchangeId::BinanceFuturesUsd => "binance_futures_usd",
            ExchangeId::BybitSpot => "bybit_spot",
            ExchangeId::BybitLinear => "bybit_linear",
            ExchangeId::BybitInverse => "bybit_inverse",
            ExchangeId::Okx => "okx",
            ExchangeId::Deribit => "deribit",
        }
    }
}

impl Display for ExchangeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Market the adapter is subscribing against - affects native symbol encoding
/// (eg/ Okx appends `-SWAP` for non-spot instruments).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingType {
    Spot,
    Futures,
}

/// [`Side`] of a trade or position - Buy/Long or Sell/Short.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub enum Side {
    #[serde(alias = "buy", alias = "BUY", alias = "long", alias = "Long")]
    Buy,
    #[serde(alias = "sell", alias = "SELL", alias = "short", alias = "Short")]
    Sell,
}

impl Side {
    /// The opposite [`Side`] - used when constructing reduce-only closing orders.
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl Display for Side {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Side::Buy => "buy",
                Side::Sell => "sell",
            }
        )
    }
}

/// Position direction - distinct from [`Side`] because a position, unlike an order, has
/// no "neither" state while open.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl Display for PositionSide {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                PositionSide::Long => "long",
                PositionSide::Short => "short",
            }
        )
    }
}

/// Canonical instrument symbol in `BASE/QUOTE` form (eg/ `BTC/USDT`).
///
/// This is the sole cross-component key used by [`crate::ExchangeId`]-agnostic
/// components (cache, aggregator, risk engine) - every adapter owns a bidirectional
/// mapping between this canonical form and its own native encoding (see
/// `meridian_data::exchange::ExchangeAdapter::to_native`/`from_native`).
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct Symbol(smol_str::SmolStr);

impl Symbol {
    /// Construct a canonical [`Symbol`] from a base and quote asset, eg/
    /// `Symbol::new("BTC", "USDT")` yields `BTC/USDT`.
    pub fn new(base: impl AsRef<str>, quote: impl AsRef<str>) -> Self {
        Self(smol_str::SmolStr::new(format!(
            "{}/{}",
            base.as_ref().to_ascii_uppercase(),
            quote.as_ref().to_ascii_uppercase()
        )))
    }

    /// Parse a canonical `BASE/QUOTE` string into a [`Symbol`].
    pub fn parse(canonical: impl AsRef<str>) -> Result<Self, error::SymbolError> {
        let canonical = canonical.as_ref();
        let (base, quote) = canonical
            .split_once('/')
            .ok_or_else(|| error::SymbolError::NotCanonical(canonical.to_string()))?;
        if base.is_empty() || quote.is_empty() {
            return Err(error::SymbolError::NotCanonical(canonical.to_string()));
        }
        Ok(Self::new(base, quote))
    }

    /// The base asset, eg/ `BTC` in `BTC/USDT`.
    pub fn base(&self) -> &str {
        self.0.split_once('/').map(|(b, _)| b).unwrap_or(&self.0)
    }

    /// The quote asset, eg/ `USDT` in `BTC/USDT`.
    pub fn quote(&self) -> &str {
        self.0.split_once('/').map(|(_, q)| q).unwrap_or("")
    }

    /// The canonical `BASE/QUOTE` string representation.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_new_upcases_and_joins() {
        let symbol = Symbol::new("btc", "usdt");
        assert_eq!(symbol.as_str(), "BTC/USDT");
        assert_eq!(symbol.base(), "BTC");
        assert_eq!(symbol.quote(), "USDT");
    }

    #[test]
    fn symbol_parse_roundtrip() {
        let symbol = Symbol::parse("ETH/USD").unwrap();
        assert_eq!(symbol.base(), "ETH");
        assert_eq!(symbol.quote(), "USD");
    }

    #[test]
    fn symbol_parse_rejects_non_canonical() {
        assert!(Symbol::parse("BTCUSDT").is_err());
        assert!(Symbol::parse("BTC/").is_err());
    }

    #[test]
    fn side_opposite() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }
}
