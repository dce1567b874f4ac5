use meridian_instrument::{ExchangeId, Symbol};
use thiserror::Error;

/// All errors generated in `meridian-risk` - see spec `7. ERROR HANDLING DESIGN`.
#[derive(Debug, Error)]
pub enum RiskError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("exchange collaborator unavailable for {exchange}")]
    ExchangeUnavailable { exchange: ExchangeId },

    #[error("executor collaborator unavailable")]
    ExecutorUnavailable,

    #[error("exchange {exchange} call failed: {reason}")]
    ExchangeCallFailed { exchange: ExchangeId, reason: String },

    #[error("executor call failed for {symbol}: {reason}")]
    ExecutorCallFailed { symbol: Symbol, reason: String },
}

impl RiskError {
    /// Whether this error represents a missing collaborator (non-fatal, but serious
    /// enough to demand an `alert` with type `executorUnavailable` so a human can act)
    /// as opposed to a transient call failure that is merely counted - spec `7.`.
    pub fn is_collaborator_unavailable(&self) -> bool {
        matches!(
            self,
            RiskError::ExchangeUnavailable { .. } | RiskError::ExecutorUnavailable
        )
    }
}
