#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::unused_self,
    clippy::useless_let_if_seq,
    missing_debug_implementations,
    rust_2018_idioms
)]

//! # Meridian-Integration
//! Low-level framework for composing the WebSocket plumbing used by `meridian-data`'s
//! exchange sessions.
//!
//! Mirrors `barter-integration`'s split between a generic `Transformer` abstraction and
//! protocol-specific connect helpers, trimmed to the single transport (WebSocket) this
//! workspace needs.

use serde::{Deserialize, Serialize};

/// All [`std::error::Error`]s generated in Meridian-Integration.
pub mod error;

/// Contains the [`protocol::websocket`] connect/split/close helpers used by
/// `meridian-data`'s `SessionManager`.
pub mod protocol;

/// Defines the [`channel::Tx`] abstraction over different channel kinds.
pub mod channel;

/// Cooperative shutdown signalling shared by every long-running component.
pub mod stop;

/// Unique `SmolStr` identifier for a data stream (market data, account data) that has
/// been subscribed to - used to correlate inbound exchange payloads back to the
/// `Subscription` that requested them.
#[derive(
    Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize,
)]
pub struct SubscriptionId(pub smol_str::SmolStr);

impl SubscriptionId {
    pub fn new(id: impl Into<smol_str::SmolStr>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// [`Validator`]s are capable of determining if their internal state is satisfactory to
/// fulfil some use case defined by the implementor.
pub trait Validator {
    fn validate(self) -> Result<Self, error::SocketError>
    where
        Self: Sized;
}

/// [`Transformer`]s are capable of transforming any `Input` into an iterator of
/// `Result<Self::Output, Self::Error>`s - used to decode raw exchange frames into zero,
/// one, or several normalised events (eg/ a single depth update fanning out into
/// several `MarketEvent`s is not needed here, but a heartbeat frame fanning out into
/// zero events is common).
pub trait Transformer {
    type Error;
    type Input;
    type Output;
    type OutputIter: IntoIterator<Item = Result<Self::Output, Self::Error>>;

    fn transform(&mut self, input: Self::Input) -> Self::OutputIter;
}
