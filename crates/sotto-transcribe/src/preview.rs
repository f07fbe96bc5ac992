//! Preview delta coalescing.
//!
//! Streaming transports can produce partial-text updates far faster than
//! a UI can usefully repaint. The coalescer keeps only the latest pushed
//! value and delivers it at most once per interval; the last value before
//! any gap is always eventually delivered.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::sleep;

/// Default UI refresh cadence for preview text.
pub const DEFAULT_PREVIEW_INTERVAL: Duration = Duration::from_millis(80);

/// Throttles a high-frequency stream of preview strings down to a fixed
/// cadence without losing the latest value.
#[derive(Clone)]
pub struct PreviewDeltaCoalescer {
    inner: Arc<Inner>,
    interval: Duration,
}

struct Inner {
    state: Mutex<State>,
    callback: Box<dyn Fn(String) + Send + Sync>,
}

#[derive(Default)]
struct State {
    latest: Option<String>,
    flush_scheduled: bool,
}

impl PreviewDeltaCoalescer {
    pub fn new(
        interval: Duration,
        callback: impl Fn(String) + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                callback: Box::new(callback),
            }),
            interval,
        }
    }

    /// Record the latest preview value and schedule a flush if none is
    /// pending. Must be called from within a tokio runtime.
    pub fn push(&self, text: impl Into<String>) {
        let schedule = {
            let mut state = self.inner.state.lock();
            state.latest = Some(text.into());
            if state.flush_scheduled {
                false
            } else {
                state.flush_scheduled = true;
                true
            }
        };
        if !schedule {
            return;
        }

        let inner = self.inner.clone();
        let interval = self.interval;
        tokio::spawn(async move {
            sleep(interval).await;
            let value = {
                let mut state = inner.state.lock();
                state.flush_scheduled = false;
                state.latest.take()
            };
            if let Some(value) = value {
                if !value.is_empty() {
                    (inner.callback)(value);
                }
            }
        });
    }
}
