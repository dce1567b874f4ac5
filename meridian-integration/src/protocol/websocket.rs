use crate::error::SocketError;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::protocol::{CloseFrame, frame::coding::CloseCode},
};
use tracing::debug;
use url::Url;

/// Convenience alias for the concrete `tokio-tungstenite` WebSocket message type.
pub type WsMessage = tokio_tungstenite::tungstenite::Message;

/// Convenience alias for a connected `tokio-tungstenite` WebSocket.
pub type WebSocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Sink half of a split [`WebSocket`].
pub type WsSink = futures::stream::SplitSink<WebSocket, WsMessage>;

/// Stream half of a split [`WebSocket`].
pub type WsStream = futures::stream::SplitStream<WebSocket>;

/// Connect to the given `url`, returning a ready-to-use [`WebSocket`].
pub async fn connect(url: Url) -> Result<WebSocket, SocketError> {
    debug!(%url, "connecting to WebSocket server");
    let (stream, _response) = connect_async(url.as_str()).await?;
    Ok(stream)
}

/// Send a protocol-level close frame and flush the sink, used by every component's
/// `stop()` path so a shutdown never just drops the socket.
pub async fn close_gracefully<S>(mut sink: S, reason: &str) -> Result<(), SocketError>
where
    S: Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let frame = WsMessage::Close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: reason.to_string().into(),
    }));
    sink.send(frame).await?;
    sink.flush().await?;
    Ok(())
}

/// Determine whether a WebSocket I/O error indicates the connection is already gone -
/// used to decide whether to keep logging send failures on a sink task.
pub fn is_websocket_disconnected(error: &tokio_tungstenite::tungstenite::Error) -> bool {
    matches!(
        error,
        tokio_tungstenite::tungstenite::Error::ConnectionClosed
            | tokio_tungstenite::tungstenite::Error::AlreadyClosed
    )
}

/// Minimal re-export so callers constructing outbound frames don't need to depend on
/// `tokio-tungstenite` directly.
pub fn text(payload: impl Into<String>) -> WsMessage {
    WsMessage::Text(payload.into().into())
}

pub fn ping() -> WsMessage {
    WsMessage::Ping(Vec::new().into())
}

/// Extract UTF-8 text from an inbound [`WsMessage`], ignoring protocol-level frames
/// (ping/pong/close/binary) that never carry application data.
pub fn as_text(message: &WsMessage) -> Option<&str> {
    match message {
        WsMessage::Text(text) => Some(text.as_str()),
        _ => None,
    }
}

pub type SplitSinkStream = (WsSink, WsStream);

/// Split a [`WebSocket`] into its sink and stream halves.
pub fn split(ws: WebSocket) -> SplitSinkStream {
    ws.split()
}
