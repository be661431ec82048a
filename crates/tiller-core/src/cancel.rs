//! Cooperative cancellation and in-flight task accounting.
//!
//! Cancellation in Tiller is a signal, never a forced stop: a
//! [`CancelToken`] flips once and stays flipped, and running work observes
//! it at suspension points of its own choosing. Tokens form a parent/child
//! chain so that cancelling a group cancels its descendants while a child
//! cancelling itself leaves its siblings untouched.
//!
//! Every spawned unit of effect work is registered with a [`TaskScope`]
//! under a fresh [`TaskId`] and removed exactly once on settlement.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

use crate::diagnostics::Origin;

/// Identity under which in-flight effect tasks are grouped for bulk
/// cancellation.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct CancelId(Cow<'static, str>);

impl CancelId {
    /// Identity from any string-ish value.
    pub fn new(id: impl Into<Cow<'static, str>>) -> Self {
        Self(id.into())
    }
}

impl From<&'static str> for CancelId {
    fn from(id: &'static str) -> Self {
        Self(Cow::Borrowed(id))
    }
}

impl From<String> for CancelId {
    fn from(id: String) -> Self {
        Self(Cow::Owned(id))
    }
}

impl fmt::Display for CancelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The distinguished failure an operation raises to settle as cancelled.
///
/// Returned by
/// [`EffectContext::check_cancellation`](crate::EffectContext::check_cancellation);
/// the runner suppresses it from diagnostics and short-circuits any catch
/// handler.
#[derive(Debug, Error)]
#[error("the effect task was cancelled")]
pub struct Cancelled;

#[derive(Debug)]
struct TokenInner {
    flag: watch::Sender<bool>,
    parent: Option<CancelToken>,
}

/// Explicit cooperative cancellation token.
///
/// Passed by value into every spawned unit of work; there is no ambient
/// "current task" lookup. Cancelling a token is observed by the token
/// itself and every child derived from it.
#[derive(Clone, Debug)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

impl CancelToken {
    /// Fresh root token.
    pub fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self {
            inner: Arc::new(TokenInner { flag, parent: None }),
        }
    }

    /// Derive a child token: cancelled when either it or any ancestor is.
    pub fn child(&self) -> Self {
        let (flag, _) = watch::channel(false);
        Self {
            inner: Arc::new(TokenInner {
                flag,
                parent: Some(self.clone()),
            }),
        }
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.inner.flag.send_replace(true);
    }

    /// Non-blocking check across this token and its ancestors.
    pub fn is_cancelled(&self) -> bool {
        let mut current = Some(self);
        while let Some(token) = current {
            if *token.inner.flag.borrow() {
                return true;
            }
            current = token.inner.parent.as_ref();
        }
        false
    }

    /// Resolves once this token or any ancestor is cancelled.
    pub async fn cancelled(&self) {
        let mut receivers = Vec::new();
        let mut current = Some(self);
        while let Some(token) = current {
            receivers.push(token.inner.flag.subscribe());
            current = token.inner.parent.as_ref();
        }

        let waits = receivers
            .into_iter()
            .map(|mut rx| {
                Box::pin(async move {
                    loop {
                        if *rx.borrow() {
                            return;
                        }
                        if rx.changed().await.is_err() {
                            // Sender kept alive by the token chain; a closed
                            // channel means the chain is gone and nothing can
                            // cancel us anymore.
                            futures::future::pending::<()>().await;
                        }
                    }
                })
            })
            .collect::<Vec<_>>();

        futures::future::select_all(waits).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Identity of one registered in-flight task.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Fresh random identity.
    pub fn fresh() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// How a task settled.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Disposition {
    /// The work ran to completion (including via a catch handler).
    Completed,
    /// The work observed cancellation.
    Cancelled,
    /// A failure escaped without a handler, or the task panicked.
    Failed,
}

/// Registration surface for spawned effect work.
///
/// Implemented by the runtime's task registry. Contexts and task groups
/// register every unit of work they spawn so bulk cancellation and
/// end-of-session accounting see all of it.
pub trait TaskScope: Send + Sync {
    /// Insert a record for a task about to start.
    fn register(&self, cancel_id: Option<CancelId>, origin: Origin, token: CancelToken) -> TaskId;

    /// Remove the record exactly once, on settlement.
    fn settle(&self, task: TaskId, disposition: Disposition);
}

/// Settles a task's registry record when dropped.
///
/// The default disposition is [`Disposition::Failed`], so a panicking
/// operation still removes its record instead of wedging everyone waiting
/// for the registry to drain.
pub struct SettleGuard {
    scope: Option<Arc<dyn TaskScope>>,
    task: TaskId,
    disposition: Disposition,
}

impl SettleGuard {
    /// Guard for a freshly registered task.
    pub fn new(scope: Arc<dyn TaskScope>, task: TaskId) -> Self {
        Self {
            scope: Some(scope),
            task,
            disposition: Disposition::Failed,
        }
    }

    /// Settle with the given disposition.
    pub fn settle(mut self, disposition: Disposition) {
        self.disposition = disposition;
    }
}

impl Drop for SettleGuard {
    fn drop(&mut self) {
        if let Some(scope) = self.scope.take() {
            scope.settle(self.task, self.disposition);
        }
    }
}
