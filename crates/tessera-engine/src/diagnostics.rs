//! Diagnostic sink injected into the scheduler and its collaborators.
//!
//! The scheduler reports caught lifecycle failures and dropped requests only
//! through a [`DiagnosticSink`]. [`TracingSink`] forwards to `tracing`;
//! [`CapturingSink`] keeps the messages in memory.

use parking_lot::Mutex;

/// Severity of a diagnostic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticLevel {
    Info,
    Warning,
    Error,
}

/// Receiver for engine diagnostics.
pub trait DiagnosticSink: Send + Sync {
    fn log(&self, message: &str);
    fn log_warning(&self, message: &str);
    fn log_error(&self, message: &str);
}

// ---------------------------------------------------------------------------
// TracingSink
// ---------------------------------------------------------------------------

/// Forwards diagnostics to the `tracing` macros under the `tessera` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn log(&self, message: &str) {
        tracing::info!(target: "tessera", "{message}");
    }

    fn log_warning(&self, message: &str) {
        tracing::warn!(target: "tessera", "{message}");
    }

    fn log_error(&self, message: &str) {
        tracing::error!(target: "tessera", "{message}");
    }
}

// ---------------------------------------------------------------------------
// CapturingSink
// ---------------------------------------------------------------------------

/// Records every diagnostic in memory.
#[derive(Debug, Default)]
pub struct CapturingSink {
    records: Mutex<Vec<(DiagnosticLevel, String)>>,
}

impl CapturingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records, oldest first.
    pub fn records(&self) -> Vec<(DiagnosticLevel, String)> {
        self.records.lock().clone()
    }

    /// Messages recorded at `level`.
    pub fn messages(&self, level: DiagnosticLevel) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Shorthand for `messages(DiagnosticLevel::Error)`.
    pub fn errors(&self) -> Vec<String> {
        self.messages(DiagnosticLevel::Error)
    }

    /// Shorthand for `messages(DiagnosticLevel::Warning)`.
    pub fn warnings(&self) -> Vec<String> {
        self.messages(DiagnosticLevel::Warning)
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }

    fn push(&self, level: DiagnosticLevel, message: &str) {
        self.records.lock().push((level, message.to_owned()));
    }
}

impl DiagnosticSink for CapturingSink {
    fn log(&self, message: &str) {
        self.push(DiagnosticLevel::Info, message);
    }

    fn log_warning(&self, message: &str) {
        self.push(DiagnosticLevel::Warning, message);
    }

    fn log_error(&self, message: &str) {
        self.push(DiagnosticLevel::Error, message);
    }
}
