//! The store: single-owner transition loop.
//!
//! One spawned task owns the state and a serialized queue of requests. Every
//! `send` enqueues an action and waits until the reducer has applied it —
//! together with the whole chain of synchronous `Effect::send` re-entries it
//! triggers — and every produced effect has been initiated. Reducer
//! invocations therefore never interleave and never suspend.
//!
//! Actions produced by running effects re-enter through the same queue;
//! at this level there is no distinction between external and
//! effect-produced actions.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use tiller_core::{ActionRelay, Diagnostic, DiagnosticSink, Effect, Origin, Reducer};

use crate::registry::TaskRegistry;
use crate::runner::EffectRunner;
use crate::sink::LoggingSink;

/// Store construction knobs.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Capacity of the transition request queue.
    pub action_buffer: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { action_buffer: 64 }
    }
}

fn format_origins(origins: &[Origin]) -> String {
    origins
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Store operation failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The transition loop has stopped; only possible after the store was
    /// dropped or a reducer violated its no-panic contract.
    #[error("the state transition loop is no longer running")]
    LoopClosed,

    /// A bounded settlement wait elapsed with work still in flight.
    #[error(
        "timed out waiting for {} in-flight effect task(s), started at: {}",
        .outstanding.len(),
        format_origins(.outstanding)
    )]
    FinishTimeout {
        /// Declaration sites of the tasks still running.
        outstanding: Vec<Origin>,
    },
}

enum StoreMsg<S, A> {
    Action {
        action: A,
        ack: oneshot::Sender<Vec<JoinHandle<()>>>,
    },
    Snapshot {
        reply: oneshot::Sender<S>,
    },
}

/// Handle for one sent action's effects.
///
/// Awaiting it resolves once every effect task that action spawned has
/// settled — completed, cancelled, or failed.
pub struct StoreTask {
    handles: Vec<JoinHandle<()>>,
    registry: Arc<TaskRegistry>,
}

impl StoreTask {
    /// Number of effect tasks this action spawned.
    pub fn effect_count(&self) -> usize {
        self.handles.len()
    }

    /// Wait, unbounded, for every spawned effect task to settle.
    pub async fn finish(self) {
        for handle in self.handles {
            if let Err(join_error) = handle.await {
                tracing::error!(%join_error, "effect task terminated abnormally");
            }
        }
    }

    /// Bounded settlement wait; reports the still-running tasks' origins on
    /// timeout instead of hanging.
    pub async fn finish_within(self, timeout: Duration) -> Result<(), StoreError> {
        let registry = Arc::clone(&self.registry);
        match tokio::time::timeout(timeout, self.finish()).await {
            Ok(()) => Ok(()),
            Err(_) => Err(StoreError::FinishTimeout {
                outstanding: registry.outstanding(),
            }),
        }
    }
}

/// Owns one state value and serializes every transition.
pub struct Store<S, A> {
    tx: mpsc::Sender<StoreMsg<S, A>>,
    registry: Arc<TaskRegistry>,
    sink: Arc<dyn DiagnosticSink>,
}

impl<S, A> Store<S, A>
where
    S: Clone + Send + 'static,
    A: Send + 'static,
{
    /// Store with default configuration and the production logging sink.
    pub fn new<E: Send + 'static>(initial: S, reducer: Reducer<S, A, E>, environment: E) -> Self {
        Self::with_config(
            initial,
            reducer,
            environment,
            StoreConfig::default(),
            Arc::new(LoggingSink),
        )
    }

    /// Store with explicit configuration and diagnostic sink.
    pub fn with_config<E: Send + 'static>(
        initial: S,
        reducer: Reducer<S, A, E>,
        environment: E,
        config: StoreConfig,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Self {
        Self::with_feedback_relay(initial, reducer, environment, config, sink, None)
    }

    /// Full constructor.
    ///
    /// `feedback` overrides where effect-produced actions are delivered.
    /// When absent they round-trip through this store's own transition
    /// loop; the test harness passes a relay that buffers them instead.
    pub fn with_feedback_relay<E: Send + 'static>(
        initial: S,
        reducer: Reducer<S, A, E>,
        environment: E,
        config: StoreConfig,
        sink: Arc<dyn DiagnosticSink>,
        feedback: Option<Arc<dyn ActionRelay<A>>>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.action_buffer);
        let registry = Arc::new(TaskRegistry::new());
        // The relay holds a weak sender: the loop owns the runner, and a
        // strong clone would keep the loop's own channel open forever.
        let relay = feedback.unwrap_or_else(|| {
            Arc::new(LoopRelay {
                tx: tx.downgrade(),
            }) as Arc<dyn ActionRelay<A>>
        });
        let runner = EffectRunner::new(relay, Arc::clone(&registry), Arc::clone(&sink));

        tokio::spawn(transition_loop(initial, reducer, environment, runner, rx));

        Self { tx, registry, sink }
    }

    /// Apply one action.
    ///
    /// Resolves once the action (and its synchronous re-entry chain) has
    /// been applied and every produced effect initiated. The returned
    /// [`StoreTask`] can be awaited for full settlement of those effects.
    pub async fn send(&self, action: A) -> StoreTask {
        let (ack_tx, ack_rx) = oneshot::channel();
        let sent = self
            .tx
            .send(StoreMsg::Action {
                action,
                ack: ack_tx,
            })
            .await;
        if sent.is_err() {
            tracing::error!("send on a stopped transition loop; action dropped");
            return self.empty_task();
        }
        match ack_rx.await {
            Ok(handles) => StoreTask {
                handles,
                registry: Arc::clone(&self.registry),
            },
            Err(_) => {
                tracing::error!("transition loop stopped before applying the action");
                self.empty_task()
            }
        }
    }

    /// Snapshot of the current state, serialized through the loop.
    pub async fn state(&self) -> Result<S, StoreError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(StoreMsg::Snapshot { reply: reply_tx })
            .await
            .map_err(|_| StoreError::LoopClosed)?;
        reply_rx.await.map_err(|_| StoreError::LoopClosed)
    }

    /// The in-flight effect task registry for this store.
    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    fn empty_task(&self) -> StoreTask {
        StoreTask {
            handles: Vec::new(),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<S, A> Drop for Store<S, A> {
    fn drop(&mut self) {
        let outstanding = self.registry.outstanding_anonymous();
        if !outstanding.is_empty() {
            self.sink.report(Diagnostic::outstanding_work(&outstanding));
        }
        self.registry.cancel_everything();
    }
}

struct LoopRelay<S, A> {
    tx: mpsc::WeakSender<StoreMsg<S, A>>,
}

#[async_trait]
impl<S: Send + 'static, A: Send + 'static> ActionRelay<A> for LoopRelay<S, A> {
    async fn relay(&self, action: A) {
        // Store gone; late feedback has nowhere to go.
        let Some(tx) = self.tx.upgrade() else {
            return;
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        if tx
            .send(StoreMsg::Action {
                action,
                ack: ack_tx,
            })
            .await
            .is_err()
        {
            return;
        }
        let _ = ack_rx.await;
    }
}

async fn transition_loop<S, A, E>(
    mut state: S,
    reducer: Reducer<S, A, E>,
    environment: E,
    runner: EffectRunner<A>,
    mut rx: mpsc::Receiver<StoreMsg<S, A>>,
) where
    S: Clone + Send + 'static,
    A: Send + 'static,
    E: Send + 'static,
{
    while let Some(msg) = rx.recv().await {
        match msg {
            StoreMsg::Action { action, ack } => {
                let handles = apply_chain(&mut state, &reducer, &environment, &runner, action);
                let _ = ack.send(handles);
            }
            StoreMsg::Snapshot { reply } => {
                let _ = reply.send(state.clone());
            }
        }
    }
    tracing::debug!("transition loop stopped");
}

/// Apply an action and drain its synchronous re-entry chain, in issuance
/// order. Never suspends.
fn apply_chain<S, A, E>(
    state: &mut S,
    reducer: &Reducer<S, A, E>,
    environment: &E,
    runner: &EffectRunner<A>,
    action: A,
) -> Vec<JoinHandle<()>>
where
    A: Send + 'static,
{
    let mut handles = Vec::new();
    let mut queue = VecDeque::new();
    queue.push_back(action);

    while let Some(action) = queue.pop_front() {
        let effect = reducer.reduce(state, action, environment);
        collect(effect, &mut queue, &mut handles, runner);
    }

    tracing::debug!(spawned = handles.len(), "transition applied");
    handles
}

fn collect<A: Send + 'static>(
    effect: Effect<A>,
    queue: &mut VecDeque<A>,
    handles: &mut Vec<JoinHandle<()>>,
    runner: &EffectRunner<A>,
) {
    match effect {
        Effect::None => {}
        Effect::Send { action, .. } => queue.push_back(action),
        Effect::Merge { effects } => {
            for member in effects {
                collect(member, queue, handles, runner);
            }
        }
        other => handles.extend(runner.initiate(other, None, None)),
    }
}
