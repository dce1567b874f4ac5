#![forbid(unsafe_code)]
#![warn(
    unused,
    clippy::unused_self,
    clippy::useless_let_if_seq,
    missing_debug_implementations,
    rust_2018_idioms
)]

//! # Meridian-Risk
//! Risk Engine & Black-Swan Protector - spec components C6-C8:
//!
//! - [`account`] — `AccountStateRefresher` (C6): polls exchange collaborators for
//!   balances, positions and prices on two independent cadences.
//! - [`engine`] — `RiskEngine` (C7): the `R1..R7` priority-ordered tick pipeline and
//!   the synchronous `checkOrder` order gate.
//! - [`blackswan`] — `BlackSwanProtector` (C8): per-symbol anomaly detectors and the
//!   circuit-breaker state machine with cooldown + stability-based auto-recovery.
//! - [`portfolio`] — the `RiskLevel` severity ladder and `PortfolioState` snapshot
//!   shared by the engine and its callers.
//! - [`equity`] — `EquityDrawdownState`, the all-time-high equity watermark tracker
//!   underlying `RiskEngine` rule R3.
//! - [`config`] — `RiskConfig`/`BlackSwanConfig`, the threshold and cadence surface.
//! - [`collaborator`] — the `Exchange`/`Executor`/`PortfolioRiskManager` contracts this
//!   crate calls out to but does not implement.
//! - [`clock`] — the monotonic time source abstraction that makes window, cooldown
//!   and stability-duration logic testable without sleeping.

pub mod account;
pub mod blackswan;
pub mod clock;
pub mod collaborator;
pub mod config;
pub mod engine;
pub mod equity;
pub mod error;
pub mod portfolio;

pub use account::AccountStateRefresher;
pub use blackswan::{BlackSwanProtector, CircuitBreakerLevel, CircuitBreakerState};
pub use config::{BlackSwanConfig, RiskConfig};
pub use engine::{OrderCheckRequest, OrderCheckResult, RiskEngine};
pub use equity::EquityDrawdownState;
pub use error::RiskError;
pub use portfolio::{PortfolioState, RiskLevel};
