//! The deterministic test store.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tiller_core::{ActionRelay, CapturingSink, Diagnostic, Reducer};
use tiller_runtime::{Store, StoreConfig, StoreError, StoreTask};

use crate::queue::{PendingQueue, QueueRelay};

/// Test store knobs.
///
/// Every wait in the harness is bounded: a hanging test is never an
/// acceptable way to report a missing action or an unfinished effect.
#[derive(Clone, Debug)]
pub struct TestStoreConfig {
    /// How long [`TestStore::receive`] waits for a pending action.
    pub receive_timeout: Duration,
    /// How long [`TestStore::finish`] waits for in-flight tasks to settle.
    pub finish_timeout: Duration,
    /// Capacity of the underlying transition request queue.
    pub action_buffer: usize,
}

impl Default for TestStoreConfig {
    fn default() -> Self {
        Self {
            receive_timeout: Duration::from_secs(1),
            finish_timeout: Duration::from_secs(1),
            action_buffer: 64,
        }
    }
}

/// A store wrapped for deterministic observation.
///
/// Externally sent actions apply immediately and drive their reducer as
/// usual. Actions produced by running effects are intercepted into a
/// pending queue instead, and only applied when [`TestStore::receive`]
/// matches them against an expectation. Diagnostics are captured, never
/// process-terminating.
pub struct TestStore<S, A>
where
    S: Clone + PartialEq + fmt::Debug + Send + 'static,
    A: PartialEq + fmt::Debug + Send + 'static,
{
    store: Store<S, A>,
    queue: Arc<PendingQueue<A>>,
    sink: Arc<CapturingSink>,
    config: TestStoreConfig,
}

impl<S, A> TestStore<S, A>
where
    S: Clone + PartialEq + fmt::Debug + Send + 'static,
    A: PartialEq + fmt::Debug + Send + 'static,
{
    /// Test store with default timeouts.
    pub fn new<E: Send + 'static>(initial: S, reducer: Reducer<S, A, E>, environment: E) -> Self {
        Self::with_config(initial, reducer, environment, TestStoreConfig::default())
    }

    /// Test store with explicit configuration.
    pub fn with_config<E: Send + 'static>(
        initial: S,
        reducer: Reducer<S, A, E>,
        environment: E,
        config: TestStoreConfig,
    ) -> Self {
        let queue = Arc::new(PendingQueue::new());
        let sink = Arc::new(CapturingSink::new());
        let relay: Arc<dyn ActionRelay<A>> = Arc::new(QueueRelay {
            queue: Arc::clone(&queue),
        });
        let store = Store::with_feedback_relay(
            initial,
            reducer,
            environment,
            StoreConfig {
                action_buffer: config.action_buffer,
            },
            sink.clone(),
            Some(relay),
        );
        Self {
            store,
            queue,
            sink,
            config,
        }
    }

    /// Apply an external action immediately.
    pub async fn send(&self, action: A) -> StoreTask {
        self.store.send(action).await
    }

    /// Apply an external action and assert the resulting state.
    ///
    /// `update` describes the expected transition as a mutation of the
    /// prior state; the assertion fails with both values on mismatch.
    pub async fn send_expecting(&self, action: A, update: impl FnOnce(&mut S)) -> StoreTask {
        let mut expected = self.state().await;
        update(&mut expected);
        let task = self.store.send(action).await;
        let actual = self.state().await;
        assert_eq!(
            actual, expected,
            "state after the action did not match the expectation"
        );
        task
    }

    /// Expect the next effect-produced action.
    ///
    /// Waits (bounded) for the head of the pending queue, asserts it equals
    /// `expected`, then applies it through the reducer exactly as `send`
    /// would.
    pub async fn receive(&self, expected: A) {
        match self.queue.pop_within(self.config.receive_timeout).await {
            Some(actual) => {
                assert_eq!(
                    actual, expected,
                    "the received effect action did not match the expected action"
                );
                let _applied = self.store.send(actual).await;
            }
            None => panic!(
                "timed out after {:?} waiting to receive {:?}; \
                 no effect delivered an action",
                self.config.receive_timeout, expected
            ),
        }
    }

    /// Wait for all spawned work to settle, bounded by the configured
    /// finish timeout. Panics with the outstanding origins on timeout.
    pub async fn finish(&self) {
        if let Err(failure) = self.finish_within(self.config.finish_timeout).await {
            panic!("{failure}");
        }
    }

    /// Wait for all spawned work to settle, bounded by `timeout`.
    pub async fn finish_within(&self, timeout: Duration) -> Result<(), StoreError> {
        let registry = self.store.registry();
        match tokio::time::timeout(timeout, registry.wait_idle()).await {
            Ok(()) => Ok(()),
            Err(_) => Err(StoreError::FinishTimeout {
                outstanding: registry.outstanding(),
            }),
        }
    }

    /// Current state snapshot.
    pub async fn state(&self) -> S {
        self.store.state().await.expect("transition loop stopped")
    }

    /// Number of effect-produced actions not yet matched by `receive`.
    pub fn pending_actions(&self) -> usize {
        self.queue.len()
    }

    /// Drain every captured diagnostic, oldest first.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.sink.drain()
    }
}

impl<S, A> Drop for TestStore<S, A>
where
    S: Clone + PartialEq + fmt::Debug + Send + 'static,
    A: PartialEq + fmt::Debug + Send + 'static,
{
    fn drop(&mut self) {
        let unasserted = self.queue.len();
        if unasserted > 0 {
            tracing::warn!(
                count = unasserted,
                "test store dropped with effect actions never matched by receive"
            );
        }
        // The inner store's Drop reports outstanding anonymous tasks and
        // signals cancellation to everything still registered.
    }
}
