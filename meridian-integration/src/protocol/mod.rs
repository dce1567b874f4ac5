/// WebSocket connect/split/close helpers built on `tokio-tungstenite`.
pub mod websocket;
