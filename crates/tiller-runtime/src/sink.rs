//! Production diagnostic sink.

use tiller_core::{Diagnostic, DiagnosticSink};

/// Logs every diagnostic at error level and trips a debug-build assertion.
///
/// Diagnostics mark programming-contract violations: loud by design, but
/// never process-terminating in release builds. Test harnesses use
/// [`CapturingSink`](tiller_core::CapturingSink) instead.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingSink;

impl DiagnosticSink for LoggingSink {
    fn report(&self, diagnostic: Diagnostic) {
        match diagnostic.origin {
            Some(origin) => {
                tracing::error!(kind = ?diagnostic.kind, %origin, "{}", diagnostic.message);
            }
            None => tracing::error!(kind = ?diagnostic.kind, "{}", diagnostic.message),
        }
        debug_assert!(false, "{}", diagnostic.message);
    }
}
