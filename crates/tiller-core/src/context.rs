//! Per-invocation execution context for effect operations.
//!
//! Every spawned unit of effect work receives an [`EffectContext`] by value:
//! the feedback channel back into the store, an explicit cancellation token,
//! and the scope it is registered with. Nothing is looked up ambiently.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::cancel::{CancelId, CancelToken, Cancelled, Disposition, SettleGuard, TaskScope};
use crate::diagnostics::Origin;
use crate::effect::EffectResult;

/// Destination for effect-produced feedback actions.
///
/// The runtime store's relay performs a full round trip: the action is
/// applied by the transition loop and its resulting effect initiated before
/// `relay` returns. The test harness's relay buffers the action instead.
#[async_trait]
pub trait ActionRelay<A: Send + 'static>: Send + Sync {
    /// Hand one action off for processing.
    async fn relay(&self, action: A);
}

/// Execution context handed to an effect operation or catch handler.
pub struct EffectContext<A: Send + 'static> {
    relay: Arc<dyn ActionRelay<A>>,
    scope: Arc<dyn TaskScope>,
    token: CancelToken,
    cancel_id: Option<CancelId>,
    origin: Origin,
}

impl<A: Send + 'static> Clone for EffectContext<A> {
    fn clone(&self) -> Self {
        Self {
            relay: Arc::clone(&self.relay),
            scope: Arc::clone(&self.scope),
            token: self.token.clone(),
            cancel_id: self.cancel_id.clone(),
            origin: self.origin,
        }
    }
}

impl<A: Send + 'static> EffectContext<A> {
    /// Context for one task. Called by the runtime when spawning effect
    /// work; operations never construct their own.
    pub fn new(
        relay: Arc<dyn ActionRelay<A>>,
        scope: Arc<dyn TaskScope>,
        token: CancelToken,
        cancel_id: Option<CancelId>,
        origin: Origin,
    ) -> Self {
        Self {
            relay,
            scope,
            token,
            cancel_id,
            origin,
        }
    }

    /// Feed an action back into the store.
    ///
    /// Awaits the full round trip, so successive sends from one operation
    /// are observed in issuance order. A send on a cancelled task is
    /// silently dropped; the wait itself is cancellation-aware.
    pub async fn send(&self, action: A) {
        if self.token.is_cancelled() {
            return;
        }
        tokio::select! {
            () = self.token.cancelled() => {}
            () = self.relay.relay(action) => {}
        }
    }

    /// Cancel this task's own token.
    pub fn cancel_current(&self) {
        self.token.cancel();
    }

    /// Non-blocking cancellation check.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once this task is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Early-exit checkpoint: `Err(Cancelled)` once cancelled, for use with
    /// `?` inside operations.
    pub fn check_cancellation(&self) -> EffectResult {
        if self.token.is_cancelled() {
            Err(Cancelled.into())
        } else {
            Ok(())
        }
    }

    /// This task's cancellation token.
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    /// Declaration site of the effect this context belongs to.
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Structured-concurrency group for fanning out inside one operation.
    pub fn task_group(&self) -> TaskGroup<A> {
        TaskGroup {
            parent: self.clone(),
            children: Vec::new(),
        }
    }
}

struct Child {
    token: CancelToken,
    handle: JoinHandle<EffectResult>,
}

/// A group of sibling tasks spawned from one operation.
///
/// Children get their own child token (cancelling one leaves the others
/// untouched) and their own registry record, and are joined by
/// [`TaskGroup::wait_all`]. A group that is dropped without `wait_all`
/// detaches its children from the parent's result, but never from the
/// registry.
pub struct TaskGroup<A: Send + 'static> {
    parent: EffectContext<A>,
    children: Vec<Child>,
}

impl<A: Send + 'static> TaskGroup<A> {
    /// Spawn a child task unless the group is already cancelled.
    ///
    /// Returns whether the child was started.
    pub fn spawn_unless_cancelled<F, Fut>(&mut self, work: F) -> bool
    where
        F: FnOnce(EffectContext<A>) -> Fut + Send + 'static,
        Fut: Future<Output = EffectResult> + Send + 'static,
    {
        if self.parent.is_cancelled() {
            return false;
        }

        let token = self.parent.token.child();
        let ctx = EffectContext {
            relay: Arc::clone(&self.parent.relay),
            scope: Arc::clone(&self.parent.scope),
            token: token.clone(),
            cancel_id: self.parent.cancel_id.clone(),
            origin: self.parent.origin,
        };
        let scope = Arc::clone(&self.parent.scope);
        let task = scope.register(self.parent.cancel_id.clone(), self.parent.origin, token.clone());

        let child_token = token.clone();
        let handle = tokio::spawn(async move {
            let guard = SettleGuard::new(scope, task);
            let result = work(ctx).await;
            guard.settle(settlement_of(&result, &child_token));
            result
        });

        self.children.push(Child { token, handle });
        true
    }

    /// Wait for every child to settle.
    ///
    /// Returns the first non-cancellation failure raised by a child, if any;
    /// cancellation-derived child outcomes are not failures.
    pub async fn wait_all(self) -> EffectResult {
        let mut first_failure: Option<anyhow::Error> = None;
        for child in self.children {
            match child.handle.await {
                Ok(Ok(())) => {}
                Ok(Err(failure)) => {
                    let cancellation =
                        child.token.is_cancelled() || failure.is::<Cancelled>();
                    if !cancellation && first_failure.is_none() {
                        first_failure = Some(failure);
                    }
                }
                Err(join_error) => {
                    if first_failure.is_none() {
                        first_failure =
                            Some(anyhow::anyhow!("effect child task panicked: {join_error}"));
                    }
                }
            }
        }
        match first_failure {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }
}

/// Disposition for a finished unit of work given its result and token.
pub(crate) fn settlement_of(result: &EffectResult, token: &CancelToken) -> Disposition {
    if token.is_cancelled() {
        return Disposition::Cancelled;
    }
    match result {
        Ok(()) => Disposition::Completed,
        Err(failure) if failure.is::<Cancelled>() => Disposition::Cancelled,
        Err(_) => Disposition::Failed,
    }
}
