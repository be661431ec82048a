//! Diagnostic reporting for effect contract violations.
//!
//! The engine never crashes the transition loop when an effect misbehaves.
//! Instead it produces a [`Diagnostic`] and hands it to the injectable
//! [`DiagnosticSink`] the store was configured with. Production wiring uses
//! a logging sink; test wiring uses [`CapturingSink`] so assertions can be
//! made against the reported messages. Sink selection is explicit
//! constructor configuration, never a process-global swap.

use std::fmt;
use std::panic::Location;

use parking_lot::Mutex;

/// Source location at which an effect was constructed.
///
/// Captured via `#[track_caller]` in the [`Effect`](crate::Effect)
/// constructors and carried through task registration so every diagnostic
/// can name the offending effect's declaration site.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Origin(&'static Location<'static>);

impl Origin {
    /// Capture the caller's source location.
    #[track_caller]
    pub fn caller() -> Self {
        Self(Location::caller())
    }

    /// Source file of the effect declaration.
    pub fn file(&self) -> &'static str {
        self.0.file()
    }

    /// Line of the effect declaration.
    pub fn line(&self) -> u32 {
        self.0.line()
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.0.file(), self.0.line())
    }
}

/// Classification of a reported condition.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DiagnosticKind {
    /// A non-cancellation failure escaped an effect with no catch handler.
    UnhandledFailure,
    /// Effect tasks were still in flight when their owning scope ended.
    OutstandingWork,
}

/// A single reported condition, with a human-readable message.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    /// What class of condition this is.
    pub kind: DiagnosticKind,
    /// Declaration site of the offending effect, when there is a single one.
    pub origin: Option<Origin>,
    /// Full human-readable description.
    pub message: String,
}

impl Diagnostic {
    /// Diagnostic for a non-cancellation failure with no catch handler.
    pub fn unhandled_failure(origin: Origin, failure: &anyhow::Error) -> Self {
        Self {
            kind: DiagnosticKind::UnhandledFailure,
            origin: Some(origin),
            message: format!(
                "An effect started at \"{origin}\" raised an unhandled failure:\n\n  \
                 {failure:#}\n\n\
                 Non-cancellation failures must be handled explicitly, either inside \
                 the operation or via a catch handler attached to the effect."
            ),
        }
    }

    /// Diagnostic for tasks still in flight at scope teardown.
    pub fn outstanding_work(origins: &[Origin]) -> Self {
        let listed = origins
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        Self {
            kind: DiagnosticKind::OutstandingWork,
            origin: origins.first().copied(),
            message: format!(
                "{} effect task(s) were still running at teardown, started at: {listed}",
                origins.len()
            ),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Destination for diagnostics.
///
/// Implementations must be cheap and non-blocking; they are invoked from
/// effect task completion paths.
pub trait DiagnosticSink: Send + Sync {
    /// Report one condition.
    fn report(&self, diagnostic: Diagnostic);
}

/// Sink that buffers every diagnostic for later inspection.
#[derive(Debug, Default)]
pub struct CapturingSink {
    entries: Mutex<Vec<Diagnostic>>,
}

impl CapturingSink {
    /// Empty capturing sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every diagnostic reported so far, oldest first.
    pub fn drain(&self) -> Vec<Diagnostic> {
        self.entries.lock().drain(..).collect()
    }

    /// True when nothing has been reported since the last drain.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl DiagnosticSink for CapturingSink {
    fn report(&self, diagnostic: Diagnostic) {
        self.entries.lock().push(diagnostic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_names_this_file() {
        let origin = Origin::caller();
        assert!(origin.file().ends_with("diagnostics.rs"));
        assert!(origin.to_string().contains("diagnostics.rs:"));
    }

    #[test]
    fn capturing_sink_drains_in_order() {
        let sink = CapturingSink::new();
        sink.report(Diagnostic::unhandled_failure(
            Origin::caller(),
            &anyhow::anyhow!("first"),
        ));
        sink.report(Diagnostic::outstanding_work(&[Origin::caller()]));

        let drained = sink.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].kind, DiagnosticKind::UnhandledFailure);
        assert_eq!(drained[1].kind, DiagnosticKind::OutstandingWork);
        assert!(sink.is_empty());
    }

    #[test]
    fn unhandled_failure_message_names_origin_and_failure() {
        let origin = Origin::caller();
        let diagnostic =
            Diagnostic::unhandled_failure(origin, &anyhow::anyhow!("backend unavailable"));
        assert!(diagnostic.message.contains(&origin.to_string()));
        assert!(diagnostic.message.contains("backend unavailable"));
        assert!(diagnostic.message.contains("must be handled explicitly"));
    }
}
