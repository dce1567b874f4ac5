use crate::event::DataType;
use meridian_instrument::Symbol;
use serde::{Deserialize, Serialize};

/// `(dataType, symbol)` pair identifying a subscribed stream within one exchange
/// session. Membership is a set, not a list - duplicate subscribes are idempotent,
/// see spec `3. DATA MODEL` and property `P2`.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct SubscriptionKey {
    pub data_type: DataType,
    pub symbol: Symbol,
}

impl SubscriptionKey {
    pub fn new(data_type: DataType, symbol: Symbol) -> Self {
        Self { data_type, symbol }
    }
}

impl std::fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.data_type, self.symbol)
    }
}
