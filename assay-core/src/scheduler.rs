//! Per-session timer scheduling.
//!
//! Delayed trigger transitions (a task that starts five seconds after a
//! concept ends, a scenario that ends after a warning has been shown) are
//! scheduled here. Each timer is a Tokio task racing its sleep against a
//! cancellation token derived from the session's root token:
//!
//! ```text
//!   root token ──┬── timer 1 token ── sleep(delay) ─► fire(handle)
//!                ├── timer 2 token ── cancelled ────► (dropped)
//!                └── ...
//!
//!   shutdown() cancels the root, and with it every pending timer
//! ```
//!
//! A fired timer usually enqueues an event that carries its [`TimerHandle`];
//! the event handler checks [`TimerHandle::is_cancelled`] before applying the
//! transition, so a cancellation that races with firing still wins.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

/// Handle to a scheduled timer.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    id: u64,
    token: CancellationToken,
}

impl TimerHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Cancel the timer. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Timer facility owned by one scenario session.
#[derive(Debug)]
pub struct Scheduler {
    name: String,
    root: CancellationToken,
    next_id: AtomicU64,
}

impl Scheduler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            root: CancellationToken::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Run `fire` after `delay` unless the returned handle is cancelled first.
    ///
    /// Must be called from within a Tokio runtime. Outside of one, or after
    /// [`shutdown`](Self::shutdown), the returned handle is already cancelled
    /// and `fire` never runs.
    pub fn schedule<F>(&self, delay: Duration, fire: F) -> TimerHandle
    where
        F: FnOnce(TimerHandle) + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = self.root.child_token();
        let handle = TimerHandle {
            id,
            token: token.clone(),
        };

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(
                    scheduler = %self.name,
                    error = %e,
                    "Cannot schedule timer outside of a runtime"
                );
                handle.cancel();
                return handle;
            }
        };

        trace!(
            scheduler = %self.name,
            timer = id,
            delay_ms = delay.as_millis() as u64,
            "Timer scheduled"
        );
        let fired = handle.clone();
        runtime.spawn(async move {
            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    trace!(timer = id, "Timer cancelled");
                }

                _ = tokio::time::sleep(delay) => {
                    trace!(timer = id, "Timer fired");
                    fire(fired);
                }
            }
        });

        handle
    }

    /// Cancel every pending timer and refuse new ones.
    pub fn shutdown(&self) {
        trace!(scheduler = %self.name, "Scheduler shutting down");
        self.root.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }
}
