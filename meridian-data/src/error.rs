use meridian_instrument::ExchangeId;
use meridian_integration::error::SocketError;
use thiserror::Error;

/// All errors generated in `meridian-data` - see spec `7. ERROR HANDLING DESIGN`.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("failed to decode frame from {exchange}: {reason}")]
    Decode { exchange: ExchangeId, reason: String },

    #[error("transport error on {exchange}: {0}", exchange = .exchange)]
    Transport {
        exchange: ExchangeId,
        #[source]
        source: SocketError,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("exchange {0} has no adapter registered")]
    UnknownExchange(ExchangeId),

    #[error("SocketError: {0}")]
    Socket(#[from] SocketError),

    #[error("publish failure on channel {channel}: {reason}")]
    Publish { channel: String, reason: String },

    #[error("max reconnect attempts ({attempts}) exceeded for {exchange}")]
    MaxReconnectExceeded { exchange: ExchangeId, attempts: u32 },
}

impl DataError {
    /// Whether this error requires the owning `SessionManager` session to reconnect,
    /// as opposed to being swallowed and counted - see spec `7. ERROR HANDLING DESIGN`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DataError::Transport { .. } | DataError::MaxReconnectExceeded { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_and_max_reconnect_errors_are_terminal() {
        let transport = DataError::Transport {
            exchange: ExchangeId::Okx,
            source: SocketError::Sink,
        };
        assert!(transport.is_terminal());

        let max_reconnect = DataError::MaxReconnectExceeded {
            exchange: ExchangeId::Okx,
            attempts: 10,
        };
        assert!(max_reconnect.is_terminal());

        let decode = DataError::Decode {
            exchange: ExchangeId::Okx,
            reason: "bad json".into(),
        };
        assert!(!decode.is_terminal());
    }
}
