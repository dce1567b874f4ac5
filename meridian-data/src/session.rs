use crate::event::{DataType, MarketEvent};
use crate::exchange::{Control, Decoded, ExchangeAdapter};
use crate::subscription::SubscriptionKey;
use meridian_instrument::{ExchangeId, Symbol};
use meridian_integration::channel::{ChannelTxDroppable, UnboundedTx};
use meridian_integration::protocol::websocket;
use meridian_integration::stop::{StopSignal, StopToken};
use rand::Rng;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;

/// Lifecycle state of one [`SessionManager`]'s exchange connection - spec
/// `5. CONCURRENCY & RESOURCE MODEL`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Closing => "closing",
        };
        write!(f, "{name}")
    }
}

/// Exponential backoff with jitter for exchange reconnection attempts - spec `4.2`.
///
/// `delay(attempt) = min(base * 2^(attempt-1) + U(0, 1000ms), max)`, following the same
/// multiply-and-cap shape as `barter_data`'s `ReconnectionBackoffPolicy`, with an
/// added uniform jitter term so many sessions reconnecting simultaneously don't
/// stampede the same venue in lockstep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_ms: u64,
    pub max_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { base_ms: 1_000, max_ms: 30_000, max_attempts: 10 }
    }
}

impl ReconnectPolicy {
    /// `attempt` is 1-indexed: the first retry after a disconnect is `attempt == 1`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponential = self.base_ms.saturating_mul(1u64 << attempt.saturating_sub(1).min(32));
        let jitter_ms: u64 = rand::rng().random_range(0..=1_000);
        Duration::from_millis(exponential.saturating_add(jitter_ms).min(self.max_ms))
    }
}

/// Heartbeat cadence - spec `4.2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for HeartbeatPolicy {
    fn default() -> Self {
        Self { interval: Duration::from_secs(20), timeout: Duration::from_secs(30) }
    }
}

enum SessionCommand {
    Subscribe(SubscriptionKey),
    Unsubscribe(SubscriptionKey),
}

/// Owns one exchange's WebSocket connection lifecycle: connect, subscribe, decode,
/// heartbeat, reconnect-with-backoff-and-resubscribe, and graceful shutdown - spec
/// `4.2 SessionManager (capability)`. One `SessionManager` per `ExchangeId`, run on its
/// own `tokio` task so a stuck or slow exchange never blocks another - spec `5.`.
#[derive(Debug)]
pub struct SessionManager {
    adapter: Arc<dyn ExchangeAdapter>,
    commands: mpsc::UnboundedSender<SessionCommand>,
    state: Arc<parking_lot::RwLock<SessionState>>,
    stop: StopToken,
}

impl SessionManager {
    /// Spawn a [`SessionManager`] task for `adapter`, forwarding decoded events to `events`.
    /// Returns the handle immediately; the connection is established in the background.
    pub fn spawn(adapter: Arc<dyn ExchangeAdapter>, events: UnboundedTx<MarketEvent>) -> Self {
        Self::spawn_with_policies(adapter, events, ReconnectPolicy::default(), HeartbeatPolicy::default())
    }

    pub fn spawn_with_policies(
        adapter: Arc<dyn ExchangeAdapter>,
        events: UnboundedTx<MarketEvent>,
        reconnect: ReconnectPolicy,
        heartbeat: HeartbeatPolicy,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (stop_token, stop_signal) = StopToken::new();
        let state = Arc::new(parking_lot::RwLock::new(SessionState::Disconnected));

        tokio::spawn(run(
            Arc::clone(&adapter),
            events,
            commands_rx,
            stop_signal,
            Arc::clone(&state),
            reconnect,
            heartbeat,
        ));

        Self { adapter, commands: commands_tx, state, stop: stop_token }
    }

    pub fn exchange(&self) -> ExchangeId {
        self.adapter.id()
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Subscribe to a `(data_type, symbol)` stream. Idempotent: subscribing twice to the
    /// same key is a no-op on the wire after the first ack - property `P2`.
    pub fn subscribe(&self, data_type: DataType, symbol: Symbol) {
        let _ = self.commands.send(SessionCommand::Subscribe(SubscriptionKey::new(data_type, symbol)));
    }

    pub fn unsubscribe(&self, data_type: DataType, symbol: Symbol) {
        let _ = self.commands.send(SessionCommand::Unsubscribe(SubscriptionKey::new(data_type, symbol)));
    }

    /// Request graceful shutdown. The background task sends a close frame and exits
    /// rather than simply dropping the socket - spec `5.`.
    pub fn stop(&self) {
        self.stop.stop();
    }
}

async fn run(
    adapter: Arc<dyn ExchangeAdapter>,
    events: UnboundedTx<MarketEvent>,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    mut stop: StopSignal,
    state: Arc<parking_lot::RwLock<SessionState>>,
    reconnect: ReconnectPolicy,
    heartbeat: HeartbeatPolicy,
)
{
    let mut events = ChannelTxDroppable::new(events);
    let mut subscriptions: BTreeSet<SubscriptionKey> = BTreeSet::new();
    let mut attempt: u32 = 0;

    'reconnect: loop {
        if stop.is_stopped() {
            break;
        }

        *state.write() = SessionState::Connecting;
        let connection = tokio::select! {
            biased;
            _ = stop.stopped() => break 'reconnect,
            connection = websocket::connect(adapter.ws_url()) => connection,
        };

        let ws = match connection {
            Ok(ws) => {
                attempt = 0;
                ws
            }
            Err(error) => {
                attempt += 1;
                tracing::warn!(exchange = %adapter.id(), attempt, %error, "failed to connect, backing off");
                if attempt >= reconnect.max_attempts {
                    tracing::error!(exchange = %adapter.id(), attempt, "max reconnect attempts exceeded");
                    *state.write() = SessionState::Disconnected;
                    return;
                }
                tokio::select! {
                    biased;
                    _ = stop.stopped() => break 'reconnect,
                    _ = tokio::time::sleep(reconnect.delay(attempt)) => continue 'reconnect,
                }
            }
        };

        let (mut sink, mut stream) = websocket::split(ws);
        *state.write() = SessionState::Open;
        tracing::info!(exchange = %adapter.id(), "session open");

        for key in subscriptions.clone() {
            let frame = adapter.build_subscribe(&key.symbol, key.data_type);
            if let Err(error) = futures::SinkExt::send(&mut sink, frame).await {
                tracing::warn!(exchange = %adapter.id(), %error, "failed to replay subscription on reconnect");
            }
        }

        let mut heartbeat_timer = tokio::time::interval(heartbeat.interval);
        heartbeat_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_message_at = tokio::time::Instant::now();

        loop {
            tokio::select! {
                biased;

                _ = stop.stopped() => {
                    *state.write() = SessionState::Closing;
                    let _ = websocket::close_gracefully(&mut sink, "client shutdown").await;
                    *state.write() = SessionState::Disconnected;
                    break 'reconnect;
                }

                command = commands.recv() => {
                    match command {
                        Some(SessionCommand::Subscribe(key)) => {
                            let is_new = subscriptions.insert(key.clone());
                            if is_new {
                                let frame = adapter.build_subscribe(&key.symbol, key.data_type);
                                let _ = futures::SinkExt::send(&mut sink, frame).await;
                            }
                        }
                        Some(SessionCommand::Unsubscribe(key)) => {
                            if subscriptions.remove(&key) {
                                let frame = adapter.build_unsubscribe(&key.symbol, key.data_type);
                                let _ = futures::SinkExt::send(&mut sink, frame).await;
                            }
                        }
                        None => break 'reconnect,
                    }
                }

                _ = heartbeat_timer.tick() => {
                    if last_message_at.elapsed() > heartbeat.timeout {
                        tracing::warn!(exchange = %adapter.id(), "heartbeat timeout, reconnecting");
                        break;
                    }
                    if let Some(frame) = adapter.heartbeat_frame() {
                        if futures::SinkExt::send(&mut sink, frame).await.is_err() {
                            break;
                        }
                    }
                }

                frame = stream.next() => {
                    match frame {
                        Some(Ok(message)) => {
                            last_message_at = tokio::time::Instant::now();
                            if let Some(text) = websocket::as_text(&message) {
                                match adapter.decode(text, now_millis()) {
                                    Ok(Decoded::Event(event)) => events.send(event),
                                    Ok(Decoded::Control(Control::Error { message })) => {
                                        tracing::warn!(exchange = %adapter.id(), message, "exchange reported an error");
                                    }
                                    Ok(Decoded::Control(_)) | Ok(Decoded::None) => {}
                                    Err(error) => {
                                        tracing::warn!(exchange = %adapter.id(), %error, "failed to decode frame");
                                    }
                                }
                            }
                        }
                        Some(Err(error)) => {
                            tracing::warn!(exchange = %adapter.id(), %error, "transport error, reconnecting");
                            break;
                        }
                        None => {
                            tracing::warn!(exchange = %adapter.id(), "stream ended, reconnecting");
                            break;
                        }
                    }
                }
            }
        }

        *state.write() = SessionState::Disconnected;
    }

    *state.write() = SessionState::Disconnected;
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_delay_grows_exponentially_and_caps() {
        let policy = ReconnectPolicy { base_ms: 1_000, max_ms: 10_000, max_attempts: 10 };
        let d1 = policy.delay(1).as_millis();
        let d2 = policy.delay(2).as_millis();
        let d5 = policy.delay(5).as_millis();

        assert!((1_000..=2_000).contains(&d1));
        assert!((2_000..=3_000).contains(&d2));
        assert_eq!(d5, 10_000);
    }

    #[test]
    fn heartbeat_policy_default_matches_spec() {
        let policy = HeartbeatPolicy::default();
        assert_eq!(policy.interval, Duration::from_secs(20));
        assert_eq!(policy.timeout, Duration::from_secs(30));
    }

    #[test]
    fn session_state_display() {
        assert_eq!(SessionState::Open.to_string(), "open");
        assert_eq!(SessionState::Disconnected.to_string(), "disconnected");
    }
}
