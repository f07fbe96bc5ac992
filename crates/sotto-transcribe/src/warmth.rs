//! Connection pre-warming.
//!
//! A cold TLS handshake to the transcription host costs hundreds of
//! milliseconds that land directly on time-to-first-token. Low-cost HEAD
//! requests establish the connection while the user is still speaking:
//! `prewarm` fires one gated ping, `keep_warm` maintains a rolling window
//! of periodic pings around the recording lifecycle.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use reqwest::Client;
use tracing::debug;

/// Minimum spacing between prewarm pings.
const PREWARM_MIN_INTERVAL: Duration = Duration::from_secs(7);

/// Spacing of pings inside a keep-warm window.
const KEEP_WARM_PING_INTERVAL: Duration = Duration::from_secs(8);

/// Timeout for a single ping; a slow ping is worthless.
const PING_TIMEOUT: Duration = Duration::from_secs(4);

static GLOBAL: OnceLock<ConnectionWarmth> = OnceLock::new();

/// Process-wide prewarm gate and keep-warm controller.
///
/// Intentionally shared across sessions; the internal lock makes the gate
/// safe under concurrent calls.
#[derive(Clone)]
pub struct ConnectionWarmth {
    inner: Arc<WarmthInner>,
}

struct WarmthInner {
    client: Client,
    endpoint: String,
    state: Mutex<WarmthState>,
}

#[derive(Default)]
struct WarmthState {
    last_prewarm: Option<Instant>,
    warm_until: Option<Instant>,
    pinger_running: bool,
}

impl ConnectionWarmth {
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(WarmthInner {
                client,
                endpoint: endpoint.into(),
                state: Mutex::new(WarmthState::default()),
            }),
        }
    }

    /// The shared process-wide instance, pointed at the default endpoint.
    pub fn global() -> &'static Self {
        GLOBAL.get_or_init(|| Self::new(Client::new(), crate::upload::TRANSCRIPTION_ENDPOINT))
    }

    /// Fire one HEAD ping unless one was issued within the last ~7 s.
    ///
    /// Must be called from within a tokio runtime; the ping itself runs in
    /// a background task and its outcome is ignored.
    pub fn prewarm(&self) {
        if !self.inner.try_acquire_prewarm() {
            return;
        }
        let inner = self.inner.clone();
        tokio::spawn(async move {
            inner.ping().await;
        });
    }

    /// Extend the rolling keep-warm window.
    ///
    /// Called when recording starts and again when it stops, so the
    /// connection stays warm until the real request goes out. A single
    /// background pinger serves however many overlapping windows exist.
    pub fn keep_warm(&self, window: Duration) {
        let spawn_pinger = {
            let mut state = self.inner.state.lock();
            state.warm_until = Some(Instant::now() + window);
            if state.pinger_running {
                false
            } else {
                state.pinger_running = true;
                true
            }
        };
        if !spawn_pinger {
            return;
        }

        let inner = self.inner.clone();
        tokio::spawn(async move {
            loop {
                if inner.try_acquire_prewarm() {
                    inner.ping().await;
                }
                tokio::time::sleep(KEEP_WARM_PING_INTERVAL).await;
                let mut state = inner.state.lock();
                if !state.warm_until.is_some_and(|until| Instant::now() < until) {
                    state.pinger_running = false;
                    break;
                }
            }
        });
    }

    /// Whether a keep-warm window is currently open.
    pub fn is_warm(&self) -> bool {
        self.inner
            .state
            .lock()
            .warm_until
            .is_some_and(|until| Instant::now() < until)
    }
}

impl WarmthInner {
    /// Check and update the prewarm rate-limit gate.
    fn try_acquire_prewarm(&self) -> bool {
        let mut state = self.state.lock();
        let now = Instant::now();
        if state
            .last_prewarm
            .is_some_and(|last| now.duration_since(last) < PREWARM_MIN_INTERVAL)
        {
            return false;
        }
        state.last_prewarm = Some(now);
        true
    }

    async fn ping(&self) {
        debug!(endpoint = %self.endpoint, "prewarming connection");
        let _ = self
            .client
            .head(&self.endpoint)
            .timeout(PING_TIMEOUT)
            .send()
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warmth() -> ConnectionWarmth {
        ConnectionWarmth::new(Client::new(), "https://localhost/never-pinged")
    }

    #[test]
    fn test_prewarm_gate_rate_limits() {
        let warmth = warmth();
        assert!(warmth.inner.try_acquire_prewarm());
        assert!(!warmth.inner.try_acquire_prewarm());
    }

    #[test]
    fn test_keep_warm_window_opens_and_expires() {
        let warmth = warmth();
        assert!(!warmth.is_warm());
        warmth.inner.state.lock().warm_until = Some(Instant::now() + Duration::from_secs(5));
        assert!(warmth.is_warm());
        warmth.inner.state.lock().warm_until = Some(Instant::now() - Duration::from_millis(1));
        assert!(!warmth.is_warm());
    }
}
