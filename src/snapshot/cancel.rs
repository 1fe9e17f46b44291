//! Cooperative cancellation signal (spec §5).
//!
//! A caller-supplied [`CancelSignal`] lets an external event (Ctrl-C, a
//! parent process shutting down) stop an in-progress [`super::downloader::download`]
//! call: workers observe it alongside [`super::queue::WorkQueue::get`], abort
//! the queue, and the orchestrator surfaces [`super::error::DownloadError::Cancelled`].
//! Built on the same `Notify` race-free-wakeup pattern [`super::queue::WorkQueue`]
//! uses for `close`/`abort`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// Shared, clonable-via-`Arc` cancellation flag.
#[derive(Default)]
pub struct CancelSignal {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelSignal {
    /// Creates a signal that has not yet been tripped.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Trips the signal and wakes every waiter. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// `true` once [`CancelSignal::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the signal has been tripped; returns immediately if it
    /// already has been.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_cancelled() {
                return;
            }

            notified.await;
        }
    }
}
