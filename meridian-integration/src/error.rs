use thiserror::Error;

/// All socket-IO related errors generated in `meridian-integration`.
///
/// Mirrors `barter_integration::error::SocketError`, trimmed to the transports this
/// workspace actually speaks (WebSocket only - no REST client, no FIX).
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("sink error sending to WebSocket")]
    Sink,

    #[error("deserialising JSON error: {error} for payload: {payload}")]
    Deserialise {
        error: serde_json::Error,
        payload: String,
    },

    #[error("error parsing Url: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("ExchangeStream terminated with closing frame: {0}")]
    Terminated(String),

    #[error("error subscribing to resources over the socket: {0}")]
    Subscribe(String),
}
