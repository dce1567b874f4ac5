#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::unused_self,
    clippy::useless_let_if_seq,
    missing_debug_implementations,
    rust_2018_idioms
)]

//! # Meridian-Data
//! Market-Data Ingestion & Aggregation - spec components C1-C5:
//!
//! - [`exchange`] - per-venue [`exchange::ExchangeAdapter`] implementations (C1).
//! - [`session`] - [`session::SessionManager`], one per exchange, owning the
//!   connect/heartbeat/backoff-reconnect/resubscribe lifecycle (C2).
//! - [`normalizer`] - timestamp fusion (C3).
//! - [`cache`] - [`cache::MarketDataStore`] durable cache + pub/sub publisher (C4).
//! - [`aggregator`] - [`aggregator::CrossExchangeAggregator`], best-price/spread/
//!   arbitrage detection across venues (C5).

/// Normalised [`event::MarketEvent`] tagged-union data model - spec `3. DATA MODEL`.
pub mod event;

/// [`subscription::SubscriptionKey`] - the `(dataType, symbol)` membership key.
pub mod subscription;

/// Per-exchange [`exchange::ExchangeAdapter`] implementations - spec `4.1`.
pub mod exchange;

/// [`session::SessionManager`] - per-exchange WebSocket session lifecycle - spec `4.2`.
pub mod session;

/// Timestamp fusion - spec `4.3`.
pub mod normalizer;

/// Durable cache + pub/sub publisher - spec `4.4` / `6. EXTERNAL INTERFACES`.
pub mod cache;

/// Cross-exchange aggregation, best-price/spread/arbitrage detection - spec `4.5`.
pub mod aggregator;

/// All errors generated in this crate - spec `7. ERROR HANDLING DESIGN`.
pub mod error;

pub use error::DataError;
pub use event::{DataType as MarketDataType, MarketEvent, MarketEventKind};
pub use exchange::ExchangeAdapter;
pub use session::SessionManager;
