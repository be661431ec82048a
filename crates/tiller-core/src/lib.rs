//! Tiller Core - Effect Engine Contracts
//!
//! This crate provides the foundational types for the Tiller unidirectional
//! state-management engine. It contains descriptions and contracts only; the
//! transition loop and effect scheduler live in `tiller-runtime`.
//!
//! # Model
//!
//! A single state value is advanced exclusively by a pure [`Reducer`]:
//!
//! ```text
//! (state, action, environment) -> (state', Effect)
//! ```
//!
//! The returned [`Effect`] describes deferred asynchronous work. When that
//! work runs, it receives an [`EffectContext`] through which it can feed
//! actions back into the store, observe cooperative cancellation, and fan
//! out into a structured [`TaskGroup`].
//!
//! # Failure discipline
//!
//! An operation either completes, is cancelled, or fails. Cancellation is
//! never a user-visible error. Any other failure must reach a catch handler
//! attached to the effect; a failure with no handler is a programming
//! contract violation surfaced as exactly one [`Diagnostic`] through the
//! configured [`DiagnosticSink`], never a silent drop and never a crash of
//! the transition loop.

#![forbid(unsafe_code)]

/// Cancellation identities, cooperative tokens, and task-scope registration.
pub mod cancel;

/// The per-invocation execution context handed to spawned effect work.
pub mod context;

/// Diagnostic records and the injectable sink contract.
pub mod diagnostics;

/// The `Effect` description type and its combinators.
pub mod effect;

/// The pure reducer contract.
pub mod reducer;

pub use cancel::{CancelId, CancelToken, Cancelled, Disposition, SettleGuard, TaskId, TaskScope};
pub use context::{ActionRelay, EffectContext, TaskGroup};
pub use diagnostics::{CapturingSink, Diagnostic, DiagnosticKind, DiagnosticSink, Origin};
pub use effect::{CatchHandler, Effect, EffectResult, Operation};
pub use reducer::Reducer;
