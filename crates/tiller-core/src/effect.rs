//! The `Effect` description type.
//!
//! An [`Effect`] is a value describing zero, one, or many asynchronous
//! actions-to-be-produced. Reducers return effects; the runtime executes
//! them. Construction goes through the associated functions so every
//! spawning variant captures its declaration site for diagnostics.

use std::fmt;
use std::future::Future;

use futures::future::BoxFuture;

use crate::cancel::CancelId;
use crate::context::EffectContext;
use crate::diagnostics::Origin;

/// Outcome of an effect operation.
///
/// `Err` carries either the distinguished [`Cancelled`](crate::Cancelled)
/// failure (settles the task as cancelled) or an arbitrary failure that must
/// be handled by a catch handler.
pub type EffectResult = Result<(), anyhow::Error>;

/// Boxed asynchronous operation body. Invoked at most once.
pub type Operation<A> =
    Box<dyn FnOnce(EffectContext<A>) -> BoxFuture<'static, EffectResult> + Send>;

/// Boxed failure handler. Infallible by signature: a catch handler must not
/// itself raise.
pub type CatchHandler<A> =
    Box<dyn FnOnce(anyhow::Error, EffectContext<A>) -> BoxFuture<'static, ()> + Send>;

/// A description of deferred asynchronous work that may emit feedback
/// actions.
///
/// Effects carry no cancellation identity by default; attach one with
/// [`Effect::cancellable`].
pub enum Effect<A: Send + 'static> {
    /// No asynchronous work.
    None,
    /// Synchronous re-entry: the action is applied by the transition loop as
    /// part of the current transition, in issuance order.
    Send {
        /// The action to re-enter with.
        action: A,
        /// Declaration site.
        origin: Origin,
    },
    /// An asynchronous operation that may emit actions through its context
    /// and may fail.
    Run {
        /// The operation body.
        operation: Operation<A>,
        /// Handler for non-cancellation failures, if any.
        catch: Option<CatchHandler<A>>,
        /// Declaration site.
        origin: Origin,
    },
    /// Request cooperative cancellation of all in-flight work tagged with
    /// the id. Does not wait for settlement.
    Cancel {
        /// The identity to cancel.
        id: CancelId,
    },
    /// Run all member effects concurrently as sibling tasks.
    Merge {
        /// The members.
        effects: Vec<Effect<A>>,
    },
    /// Run member effects strictly in order, each awaited to settlement
    /// before the next starts.
    Concat {
        /// The members, in execution order.
        effects: Vec<Effect<A>>,
        /// Declaration site.
        origin: Origin,
    },
    /// Attach a cancellation identity to every task the inner effect spawns.
    Cancellable {
        /// The identity.
        id: CancelId,
        /// Cancel in-flight work already registered under `id` before
        /// starting (effect deduplication).
        cancel_in_flight: bool,
        /// The wrapped effect.
        inner: Box<Effect<A>>,
    },
}

impl<A: Send + 'static> Effect<A> {
    /// No asynchronous work.
    pub fn none() -> Self {
        Self::None
    }

    /// Synchronously re-enter the transition loop with `action`.
    #[track_caller]
    pub fn send(action: A) -> Self {
        Self::Send {
            action,
            origin: Origin::caller(),
        }
    }

    /// Asynchronous operation with no catch handler.
    ///
    /// Any non-cancellation failure the operation raises is a contract
    /// violation reported through the store's diagnostic sink.
    #[track_caller]
    pub fn run<F, Fut>(operation: F) -> Self
    where
        F: FnOnce(EffectContext<A>) -> Fut + Send + 'static,
        Fut: Future<Output = EffectResult> + Send + 'static,
    {
        Self::Run {
            operation: Box::new(move |ctx| -> BoxFuture<'static, EffectResult> {
                Box::pin(operation(ctx))
            }),
            catch: None,
            origin: Origin::caller(),
        }
    }

    /// Asynchronous operation with a failure handler.
    ///
    /// The handler receives every non-cancellation failure the operation
    /// raises, together with a context it can emit further actions through.
    /// Cancellation short-circuits the handler.
    #[track_caller]
    pub fn run_catching<F, Fut, C, CFut>(operation: F, catch: C) -> Self
    where
        F: FnOnce(EffectContext<A>) -> Fut + Send + 'static,
        Fut: Future<Output = EffectResult> + Send + 'static,
        C: FnOnce(anyhow::Error, EffectContext<A>) -> CFut + Send + 'static,
        CFut: Future<Output = ()> + Send + 'static,
    {
        Self::Run {
            operation: Box::new(move |ctx| -> BoxFuture<'static, EffectResult> {
                Box::pin(operation(ctx))
            }),
            catch: Some(Box::new(
                move |failure, ctx| -> BoxFuture<'static, ()> { Box::pin(catch(failure, ctx)) },
            )),
            origin: Origin::caller(),
        }
    }

    /// Request cancellation of all in-flight work tagged with `id`.
    pub fn cancel(id: impl Into<CancelId>) -> Self {
        Self::Cancel { id: id.into() }
    }

    /// Run `effects` concurrently. Empty and single-element inputs collapse.
    pub fn merge(effects: impl IntoIterator<Item = Effect<A>>) -> Self {
        let mut effects: Vec<_> = effects.into_iter().filter(|e| !e.is_none()).collect();
        match effects.len() {
            0 => Self::None,
            1 => effects.remove(0),
            _ => Self::Merge { effects },
        }
    }

    /// Run `effects` strictly in order. Empty and single-element inputs
    /// collapse.
    #[track_caller]
    pub fn concatenate(effects: impl IntoIterator<Item = Effect<A>>) -> Self {
        let mut effects: Vec<_> = effects.into_iter().filter(|e| !e.is_none()).collect();
        match effects.len() {
            0 => Self::None,
            1 => effects.remove(0),
            _ => Self::Concat {
                effects,
                origin: Origin::caller(),
            },
        }
    }

    /// Tag every task this effect spawns with `id` for later [`Effect::cancel`].
    pub fn cancellable(self, id: impl Into<CancelId>) -> Self {
        Self::Cancellable {
            id: id.into(),
            cancel_in_flight: false,
            inner: Box::new(self),
        }
    }

    /// Like [`Effect::cancellable`], but first cancels any in-flight work
    /// already registered under `id`, deduplicating repeated triggers.
    pub fn cancellable_replacing(self, id: impl Into<CancelId>) -> Self {
        Self::Cancellable {
            id: id.into(),
            cancel_in_flight: true,
            inner: Box::new(self),
        }
    }

    /// True for [`Effect::None`].
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl<A: Send + 'static> fmt::Debug for Effect<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("Effect::None"),
            Self::Send { origin, .. } => write!(f, "Effect::Send({origin})"),
            Self::Run { origin, catch, .. } => write!(
                f,
                "Effect::Run({origin}, catch: {})",
                if catch.is_some() { "yes" } else { "no" }
            ),
            Self::Cancel { id } => write!(f, "Effect::Cancel({id})"),
            Self::Merge { effects } => write!(f, "Effect::Merge(len: {})", effects.len()),
            Self::Concat { effects, origin } => {
                write!(f, "Effect::Concat({origin}, len: {})", effects.len())
            }
            Self::Cancellable { id, inner, .. } => {
                write!(f, "Effect::Cancellable({id}, {inner:?})")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_capture_this_file_as_origin() {
        let effect: Effect<u8> = Effect::run(|_ctx| async { Ok(()) });
        match effect {
            Effect::Run { origin, .. } => assert!(origin.file().ends_with("effect.rs")),
            other => panic!("expected a run effect, got {other:?}"),
        }
    }

    #[test]
    fn merge_collapses_trivial_inputs() {
        assert!(Effect::<u8>::merge([]).is_none());
        assert!(Effect::merge([Effect::<u8>::none(), Effect::none()]).is_none());

        let single = Effect::merge([Effect::<u8>::send(1), Effect::none()]);
        assert!(matches!(single, Effect::Send { action: 1, .. }));

        let both = Effect::merge([Effect::<u8>::send(1), Effect::send(2)]);
        assert!(matches!(both, Effect::Merge { ref effects } if effects.len() == 2));
    }

    #[test]
    fn concatenate_preserves_member_order() {
        let effect = Effect::concatenate([Effect::<u8>::send(1), Effect::send(2)]);
        match effect {
            Effect::Concat { effects, .. } => {
                assert!(matches!(effects[0], Effect::Send { action: 1, .. }));
                assert!(matches!(effects[1], Effect::Send { action: 2, .. }));
            }
            other => panic!("expected a concat effect, got {other:?}"),
        }
    }

    #[test]
    fn cancellable_wraps_with_the_id() {
        let effect = Effect::<u8>::send(1).cancellable("sync");
        match effect {
            Effect::Cancellable {
                id,
                cancel_in_flight,
                ..
            } => {
                assert_eq!(id, CancelId::from("sync"));
                assert!(!cancel_in_flight);
            }
            other => panic!("expected a cancellable effect, got {other:?}"),
        }

        let replacing = Effect::<u8>::send(1).cancellable_replacing("sync");
        assert!(matches!(
            replacing,
            Effect::Cancellable {
                cancel_in_flight: true,
                ..
            }
        ));
    }
}
