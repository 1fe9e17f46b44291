//! Bounded work queue (C4) of pending block descriptors.
//!
//! A single internal mutex guards a `VecDeque`; two [`Notify`] instances wake
//! blocked `put`/`get` callers. Two distinct ways to stop the queue exist,
//! matching spec §4.4/§4.5:
//!
//! - [`WorkQueue::close`] — graceful: no more `put`s will arrive, but `get`
//!   drains whatever is already buffered before returning `None`.
//! - [`WorkQueue::abort`] — the "drained" sentinel: discards whatever is
//!   buffered and wakes every blocked consumer immediately. Used when a
//!   worker hits a fatal error and the pool needs every other worker to exit
//!   without processing the remaining backlog.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{Mutex, Notify};

use super::client::BlockDescriptor;

struct Inner {
    items: VecDeque<BlockDescriptor>,
    closed: bool,
    aborted: bool,
}

/// Thread-safe bounded FIFO of [`BlockDescriptor`]s.
pub struct WorkQueue {
    inner: Mutex<Inner>,
    not_empty: Notify,
    not_full: Notify,
    capacity: usize,
}

impl WorkQueue {
    /// Creates a queue with the given capacity (clamped to at least 1).
    #[must_use]
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                closed: false,
                aborted: false,
            }),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            capacity: capacity.max(1),
        })
    }

    /// Enqueues `item`, waiting for free capacity if the queue is full.
    ///
    /// Returns the item back to the caller if the queue has been closed or
    /// aborted in the meantime.
    pub async fn put(&self, item: BlockDescriptor) -> Result<(), BlockDescriptor> {
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock().await;
                if inner.closed || inner.aborted {
                    return Err(item);
                }
                if inner.items.len() < self.capacity {
                    inner.items.push_back(item);
                    drop(inner);
                    self.not_empty.notify_one();
                    return Ok(());
                }
            }

            notified.await;
        }
    }

    /// Pops the next descriptor. Blocks while the queue is empty and open;
    /// returns `None` once the queue is drained-and-closed, or immediately
    /// after an [`WorkQueue::abort`].
    pub async fn get(&self) -> Option<BlockDescriptor> {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock().await;
                if inner.aborted {
                    return None;
                }
                if let Some(item) = inner.items.pop_front() {
                    drop(inner);
                    self.not_full.notify_one();
                    return Some(item);
                }
                if inner.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Graceful close: the producer has no more items. Buffered items are
    /// still handed out by subsequent `get` calls.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        drop(inner);
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    /// Discards whatever remains buffered and wakes every blocked `get`/`put`
    /// immediately — the "drained" sentinel of spec §4.4/§4.5.
    pub async fn abort(&self) {
        let mut inner = self.inner.lock().await;
        inner.aborted = true;
        inner.items.clear();
        drop(inner);
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }
}
