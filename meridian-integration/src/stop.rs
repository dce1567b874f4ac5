/// Cooperative shutdown signal shared between a component's public handle and the
/// background tasks it owns.
///
/// Every long-running loop in this workspace (`SessionManager` per-exchange task,
/// `RiskEngine` tick loop, `BlackSwanProtector` recovery ticker, ...) selects on this
/// token alongside its timers/sockets so `stop()` never blocks waiting for the next
/// tick or frame - see spec `5. CONCURRENCY & RESOURCE MODEL`.
#[derive(Debug, Clone)]
pub struct StopToken {
    tx: tokio::sync::watch::Sender<bool>,
}

#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: tokio::sync::watch::Receiver<bool>,
}

impl StopToken {
    pub fn new() -> (Self, StopSignal) {
        let (tx, rx) = tokio::sync::watch::channel(false);
        (Self { tx }, StopSignal { rx })
    }

    /// Signal every [`StopSignal`] clone that the owning task tree should stop.
    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once [`StopToken::stop`] has been called.
    pub async fn stopped(&mut self) {
        // watch::Receiver::changed returns immediately if the value already changed
        // since the last observation, and the initial value is `false`, so a single
        // `wait_for` is enough to cover both "already stopped" and "stops later".
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stopped_resolves_after_stop_is_called() {
        let (token, mut signal) = StopToken::new();
        assert!(!signal.is_stopped());

        token.stop();
        signal.stopped().await;
        assert!(signal.is_stopped());
    }

    #[tokio::test]
    async fn stopped_resolves_immediately_if_already_stopped() {
        let (token, mut signal) = StopToken::new();
        token.stop();

        tokio::time::timeout(std::time::Duration::from_millis(50), signal.stopped())
            .await
            .expect("stopped() should resolve immediately");
    }
}
