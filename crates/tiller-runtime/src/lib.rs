//! Tiller Runtime - Transition Loop and Effect Scheduler
//!
//! The execution half of the Tiller engine:
//!
//! - [`Store`]: single-owner transition loop. One spawned task owns the
//!   state and a serialized queue of requests; every mutation passes through
//!   it, reducers never interleave.
//! - Effect runner: executes the [`Effect`](tiller_core::Effect) a reducer
//!   returned as cancellable tasks, feeding produced actions back through
//!   the same loop.
//! - [`TaskRegistry`]: in-flight accounting keyed by task, grouped by
//!   cancellation identity.
//! - [`LoggingSink`]: the production diagnostic sink.

#![forbid(unsafe_code)]

mod registry;
mod runner;
mod sink;
mod store;

pub use registry::TaskRegistry;
pub use sink::LoggingSink;
pub use store::{Store, StoreConfig, StoreError, StoreTask};
