//! Tiller Testing Infrastructure
//!
//! Deterministic observer for stores: [`TestStore`] intercepts every
//! effect-produced action into a pending queue instead of applying it,
//! so tests assert the exact feedback an effect produced — and that all
//! spawned work settled — before moving on.
//!
//! # Usage
//!
//! Add this to your crate's `Cargo.toml` dev-dependencies:
//! ```toml
//! [dev-dependencies]
//! tiller-testkit = { path = "../tiller-testkit" }
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

mod queue;
mod test_store;

pub use test_store::{TestStore, TestStoreConfig};

// Re-export the types tests touch constantly.
pub use tiller_core::{CapturingSink, Diagnostic, DiagnosticKind, Effect, Reducer};
pub use tiller_runtime::{StoreError, StoreTask};

/// Install a compact tracing subscriber honoring `RUST_LOG`, once.
///
/// Call at the top of a test to see the engine's spawn/settle events.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
