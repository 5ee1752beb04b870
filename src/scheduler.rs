//! Deferred actions bound to a call's lifetime.

use crate::call::CallStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Absolute emission offsets for a sequence of per-frame delays.
///
/// Each frame waits for its own delay after the previous one, so delays
/// `[100, 200, 50]` fire at `[100, 300, 350]`.
pub fn cumulative_offsets<I>(delays: I) -> Vec<Duration>
where
    I: IntoIterator<Item = Duration>,
{
    delays
        .into_iter()
        .scan(Duration::ZERO, |total, delay| {
            *total = total.saturating_add(delay);
            Some(*total)
        })
        .collect()
}

/// Waits and deferred actions that give up as soon as the call is cancelled.
#[derive(Debug, Clone)]
pub struct DelayScheduler {
    status: Arc<CallStatus>,
}

impl DelayScheduler {
    pub fn new(status: Arc<CallStatus>) -> Self {
        Self { status }
    }

    /// Wait for `delay`. Returns false if the call was cancelled meanwhile.
    pub async fn sleep(&self, delay: Duration) -> bool {
        self.sleep_until(Instant::now() + delay).await
    }

    /// Wait until `deadline`. Returns false if the call was cancelled meanwhile.
    pub async fn sleep_until(&self, deadline: Instant) -> bool {
        if self.status.is_cancelled() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => !self.status.is_cancelled(),
            _ = self.status.cancelled() => false,
        }
    }

    /// Run `action` once after `delay`, unless the call is cancelled first.
    ///
    /// The returned handle resolves to whether the action ran.
    pub fn after<F>(&self, delay: Duration, action: F) -> JoinHandle<bool>
    where
        F: FnOnce() + Send + 'static,
    {
        let scheduler = self.clone();
        tokio::spawn(async move {
            if scheduler.sleep(delay).await {
                action();
                true
            } else {
                false
            }
        })
    }
}
