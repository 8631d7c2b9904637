//! Bounded retry for UI bridge delivery.
//!
//! The UI layer may not be listening yet when an alarm fires. [`RetryPolicy`]
//! retries a delivery a fixed number of times, waiting `n × backoff` before the
//! n-th retry, then gives up. [`RetryingBridge`] runs that policy on a worker
//! thread so the caller's `deliver` returns as soon as the event is queued.

use anyhow::{Context, Result, anyhow};
use std::sync::Arc;
use std::sync::mpsc::{Sender, channel};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::collaborators::{UiBridge, UiEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Wait before the given 1-based retry.
    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        self.backoff.saturating_mul(retry)
    }

    /// Run `op` until it succeeds or the attempts are used up.
    ///
    /// Returns the number of attempts it took. `sleep` is called between
    /// attempts with the backoff for that retry.
    pub fn run<F, S>(&self, mut op: F, mut sleep: S) -> Result<u32>
    where
        F: FnMut() -> Result<()>,
        S: FnMut(Duration),
    {
        let mut last_error = None;

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                sleep(self.delay_before_retry(attempt - 1));
            }
            match op() {
                Ok(()) => return Ok(attempt),
                Err(e) => {
                    log_debug!("Delivery attempt {attempt}/{} failed: {e}", self.max_attempts);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow!("no delivery attempted")))
            .with_context(|| format!("abandoned after {} attempt(s)", self.max_attempts))
    }
}

/// Queues UI events and delivers them with retries on a background thread.
pub struct RetryingBridge {
    tx: Option<Sender<UiEvent>>,
    handle: Option<JoinHandle<()>>,
}

impl RetryingBridge {
    pub fn new(inner: Arc<dyn UiBridge>, policy: RetryPolicy) -> Self {
        let (tx, rx) = channel::<UiEvent>();

        let handle = std::thread::spawn(move || {
            for event in rx {
                let outcome = policy.run(|| inner.deliver(&event), std::thread::sleep);
                if let Err(e) = outcome {
                    log_error!(
                        "UI bridge unreachable, dropped {} for alarm '{}': {e:#}",
                        event.event_type.as_str(),
                        event.alarm_id
                    );
                }
            }
        });

        Self {
            tx: Some(tx),
            handle: Some(handle),
        }
    }
}

impl UiBridge for RetryingBridge {
    fn deliver(&self, event: &UiEvent) -> Result<()> {
        let tx = self.tx.as_ref().context("UI bridge worker has shut down")?;
        tx.send(event.clone())
            .map_err(|_| anyhow!("UI bridge worker has stopped"))
    }
}

impl Drop for RetryingBridge {
    /// Drains the queue before returning.
    fn drop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
