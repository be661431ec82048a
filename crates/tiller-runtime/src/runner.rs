//! Effect execution.
//!
//! The runner turns an [`Effect`] description into registered, cancellable
//! tasks. `initiate` never blocks the caller: it spawns one task per
//! spawning leaf (`Send`, `Run`, `Concat`) and returns the join handles.
//! Inside a task, `execute` drives the effect to settlement: concatenated
//! members run strictly in order, merged members fan out into sibling
//! tasks, and operation outcomes are classified into completed, cancelled,
//! or failed.

use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use tokio::task::JoinHandle;

use tiller_core::{
    ActionRelay, CancelId, CancelToken, Cancelled, CatchHandler, Diagnostic, DiagnosticSink,
    Disposition, Effect, EffectContext, Operation, Origin, SettleGuard, TaskScope,
};

use crate::registry::TaskRegistry;

pub(crate) struct EffectRunner<A: Send + 'static> {
    relay: Arc<dyn ActionRelay<A>>,
    registry: Arc<TaskRegistry>,
    sink: Arc<dyn DiagnosticSink>,
}

impl<A: Send + 'static> Clone for EffectRunner<A> {
    fn clone(&self) -> Self {
        Self {
            relay: Arc::clone(&self.relay),
            registry: Arc::clone(&self.registry),
            sink: Arc::clone(&self.sink),
        }
    }
}

impl<A: Send + 'static> EffectRunner<A> {
    pub(crate) fn new(
        relay: Arc<dyn ActionRelay<A>>,
        registry: Arc<TaskRegistry>,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Self {
        Self {
            relay,
            registry,
            sink,
        }
    }

    /// Schedule an effect's work without blocking.
    ///
    /// Tokens of spawned tasks are children of `parent` when one exists, so
    /// cancelling an enclosing task reaches the work it fanned out.
    pub(crate) fn initiate(
        &self,
        effect: Effect<A>,
        parent: Option<&CancelToken>,
        inherited: Option<CancelId>,
    ) -> Vec<JoinHandle<()>> {
        match effect {
            Effect::None => Vec::new(),
            Effect::Cancel { id } => {
                tracing::debug!(%id, "cancellation requested");
                self.registry.cancel_all(&id);
                Vec::new()
            }
            Effect::Cancellable {
                id,
                cancel_in_flight,
                inner,
            } => {
                if cancel_in_flight {
                    self.registry.cancel_all(&id);
                }
                self.initiate(*inner, parent, Some(id))
            }
            Effect::Merge { effects } => effects
                .into_iter()
                .flat_map(|member| self.initiate(member, parent, inherited.clone()))
                .collect(),
            leaf => vec![self.spawn(leaf, parent, inherited)],
        }
    }

    fn spawn(
        &self,
        effect: Effect<A>,
        parent: Option<&CancelToken>,
        cancel_id: Option<CancelId>,
    ) -> JoinHandle<()> {
        let origin = leaf_origin(&effect);
        let token = match parent {
            Some(parent) => parent.child(),
            None => CancelToken::new(),
        };
        let scope: Arc<dyn TaskScope> = self.registry.clone();
        let task = scope.register(cancel_id.clone(), origin, token.clone());
        tracing::debug!(%origin, "effect task spawned");

        let runner = self.clone();
        tokio::spawn(async move {
            let guard = SettleGuard::new(scope, task);
            let disposition = runner.execute(effect, token, cancel_id).await;
            guard.settle(disposition);
        })
    }

    /// Drive an effect to settlement within the current task.
    fn execute(
        &self,
        effect: Effect<A>,
        token: CancelToken,
        cancel_id: Option<CancelId>,
    ) -> BoxFuture<'_, Disposition> {
        Box::pin(async move {
            match effect {
                Effect::None => Disposition::Completed,
                Effect::Cancel { id } => {
                    self.registry.cancel_all(&id);
                    Disposition::Completed
                }
                Effect::Cancellable {
                    id,
                    cancel_in_flight,
                    inner,
                } => {
                    if cancel_in_flight {
                        self.registry.cancel_all(&id);
                    }
                    self.execute(*inner, token, Some(id)).await
                }
                Effect::Send { action, .. } => {
                    if token.is_cancelled() {
                        return Disposition::Cancelled;
                    }
                    tokio::select! {
                        () = token.cancelled() => Disposition::Cancelled,
                        () = self.relay.relay(action) => Disposition::Completed,
                    }
                }
                Effect::Merge { effects } => {
                    let handles = effects
                        .into_iter()
                        .flat_map(|member| self.initiate(member, Some(&token), cancel_id.clone()))
                        .collect::<Vec<_>>();
                    // Members settle their own records; this task only joins.
                    join_all(handles).await;
                    if token.is_cancelled() {
                        Disposition::Cancelled
                    } else {
                        Disposition::Completed
                    }
                }
                Effect::Concat { effects, .. } => {
                    for member in effects {
                        if token.is_cancelled() {
                            return Disposition::Cancelled;
                        }
                        self.execute(member, token.clone(), cancel_id.clone()).await;
                    }
                    if token.is_cancelled() {
                        Disposition::Cancelled
                    } else {
                        Disposition::Completed
                    }
                }
                Effect::Run {
                    operation,
                    catch,
                    origin,
                } => {
                    self.run_operation(operation, catch, origin, token, cancel_id)
                        .await
                }
            }
        })
    }

    async fn run_operation(
        &self,
        operation: Operation<A>,
        catch: Option<CatchHandler<A>>,
        origin: Origin,
        token: CancelToken,
        cancel_id: Option<CancelId>,
    ) -> Disposition {
        let scope: Arc<dyn TaskScope> = self.registry.clone();
        let ctx = EffectContext::new(
            Arc::clone(&self.relay),
            scope,
            token.clone(),
            cancel_id,
            origin,
        );

        match operation(ctx.clone()).await {
            Ok(()) => {
                if token.is_cancelled() {
                    Disposition::Cancelled
                } else {
                    Disposition::Completed
                }
            }
            Err(failure) => {
                // Cancellation short-circuits catch.
                if token.is_cancelled() || failure.is::<Cancelled>() {
                    return Disposition::Cancelled;
                }
                match catch {
                    Some(handler) => {
                        handler(failure, ctx).await;
                        Disposition::Completed
                    }
                    None => {
                        self.sink
                            .report(Diagnostic::unhandled_failure(origin, &failure));
                        Disposition::Failed
                    }
                }
            }
        }
    }
}

fn leaf_origin<A: Send + 'static>(effect: &Effect<A>) -> Origin {
    match effect {
        Effect::Send { origin, .. }
        | Effect::Run { origin, .. }
        | Effect::Concat { origin, .. } => *origin,
        Effect::Cancellable { inner, .. } => leaf_origin(inner),
        Effect::None | Effect::Cancel { .. } | Effect::Merge { .. } => Origin::caller(),
    }
}
