//! Pending-action queue: the interception point for effect feedback.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use tiller_core::ActionRelay;

/// FIFO buffer of effect-produced actions awaiting an expectation match.
///
/// Append-only from the producer side; consumed head-first by
/// [`TestStore::receive`](crate::TestStore::receive). Concurrent effects
/// deliver in settlement order.
pub(crate) struct PendingQueue<A> {
    entries: Mutex<VecDeque<A>>,
    arrived: Notify,
}

impl<A> PendingQueue<A> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            arrived: Notify::new(),
        }
    }

    pub(crate) fn push(&self, action: A) {
        self.entries.lock().push_back(action);
        self.arrived.notify_one();
    }

    pub(crate) fn try_pop(&self) -> Option<A> {
        self.entries.lock().pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Head of the queue, waiting up to `timeout` for one to arrive.
    pub(crate) async fn pop_within(&self, timeout: Duration) -> Option<A> {
        tokio::time::timeout(timeout, async {
            loop {
                if let Some(action) = self.try_pop() {
                    return action;
                }
                // notify_one stores a permit when nobody waits, so a push
                // racing this gap still wakes the loop.
                self.arrived.notified().await;
            }
        })
        .await
        .ok()
    }
}

/// Relay that buffers effect feedback instead of re-entering the loop.
pub(crate) struct QueueRelay<A> {
    pub(crate) queue: Arc<PendingQueue<A>>,
}

#[async_trait]
impl<A: Send + 'static> ActionRelay<A> for QueueRelay<A> {
    async fn relay(&self, action: A) {
        self.queue.push(action);
    }
}
