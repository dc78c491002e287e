//! Bounded notification queue with drop-oldest backpressure.
//!
//! Deliveries never block response processing for long: a full queue is given a grace
//! period to drain, after which the oldest queued notification is evicted to make room.

use futures::Stream;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::warn;

use kodi_jsonrpc::Notification;

/// What happened to a pushed notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PushOutcome {
    Queued,
    /// Queued after evicting the oldest entry
    DroppedOldest,
    /// The queue is closed
    Discarded,
}

pub(crate) struct NotificationQueue {
    items: Mutex<VecDeque<Notification>>,
    capacity: usize,
    grace: Duration,
    item_ready: Notify,
    space_ready: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl NotificationQueue {
    pub(crate) fn new(capacity: usize, grace: Duration) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            grace,
            item_ready: Notify::new(),
            space_ready: Notify::new(),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue without waiting. A full queue hands the notification back.
    pub(crate) fn try_push(&self, notification: Notification) -> Result<PushOutcome, Notification> {
        if self.is_closed() {
            return Ok(PushOutcome::Discarded);
        }
        {
            let mut items = self.items.lock();
            if items.len() >= self.capacity {
                return Err(notification);
            }
            items.push_back(notification);
        }
        self.item_ready.notify_one();
        Ok(PushOutcome::Queued)
    }

    /// Enqueue, waiting up to the grace period for space before evicting the oldest entry
    pub(crate) async fn push(&self, notification: Notification) -> PushOutcome {
        let deadline = Instant::now() + self.grace;
        let mut notification = notification;

        loop {
            let space = self.space_ready.notified();
            tokio::pin!(space);
            space.as_mut().enable();

            match self.try_push(notification) {
                Ok(outcome) => return outcome,
                Err(returned) => notification = returned,
            }
            if tokio::time::timeout_at(deadline, space).await.is_err() {
                break;
            }
        }

        if self.is_closed() {
            return PushOutcome::Discarded;
        }
        let method = notification.method.clone();
        let evicted = {
            let mut items = self.items.lock();
            let evicted = if items.len() >= self.capacity {
                items.pop_front()
            } else {
                None
            };
            items.push_back(notification);
            evicted
        };
        self.item_ready.notify_one();

        match evicted {
            Some(oldest) => {
                let dropped = self.dropped.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(
                    method = %method,
                    evicted = %oldest.method,
                    dropped,
                    "Dropped oldest notification, buffer full"
                );
                PushOutcome::DroppedOldest
            }
            None => PushOutcome::Queued,
        }
    }

    pub(crate) fn try_recv(&self) -> Option<Notification> {
        let notification = self.items.lock().pop_front();
        if notification.is_some() {
            self.space_ready.notify_one();
        }
        notification
    }

    pub(crate) async fn recv(&self) -> Option<Notification> {
        loop {
            let ready = self.item_ready.notified();
            tokio::pin!(ready);
            ready.as_mut().enable();

            if let Some(notification) = self.try_recv() {
                return Some(notification);
            }
            if self.is_closed() {
                return None;
            }
            ready.await;
        }
    }

    /// Stop accepting notifications. Queued ones can still be received.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.item_ready.notify_waiters();
        self.space_ready.notify_waiters();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }
}

/// Consumer side of a connection's notification queue.
///
/// Cheap to clone; all clones share one queue, so each notification is received once.
#[derive(Clone)]
pub struct Notifications {
    queue: Arc<NotificationQueue>,
}

impl Notifications {
    pub(crate) fn new(queue: Arc<NotificationQueue>) -> Self {
        Self { queue }
    }

    /// Wait for the next notification. Returns `None` once the connection is closed and
    /// every queued notification has been received.
    pub async fn recv(&self) -> Option<Notification> {
        self.queue.recv().await
    }

    pub fn try_recv(&self) -> Option<Notification> {
        self.queue.try_recv()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Notifications evicted because the consumer fell behind
    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    /// Consume the handle as a stream ending when the queue is closed and drained
    pub fn into_stream(self) -> impl Stream<Item = Notification> + Send + 'static {
        futures::stream::unfold(self, |notifications| async move {
            let next = notifications.recv().await?;
            Some((next, notifications))
        })
    }
}

impl std::fmt::Debug for Notifications {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifications")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("dropped", &self.dropped())
            .field("closed", &self.is_closed())
            .finish()
    }
}
