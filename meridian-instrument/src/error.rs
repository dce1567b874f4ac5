use thiserror::Error;

/// Errors produced while parsing or constructing [`crate::Symbol`]s.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum SymbolError {
    #[error("symbol '{0}' is not in canonical BASE/QUOTE form")]
    NotCanonical(String),
}
