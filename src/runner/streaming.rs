//! Streaming support for step output
//!
//! Runners deliver each line of a step's output to an [`OutputCallback`] as
//! soon as it is read, so progress is visible while the command runs and
//! partial output survives a timeout.

use std::sync::{Arc, Mutex};

/// Which pipe a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Callback for processing output lines as they arrive
///
/// This trait is object-safe and can be used as `&dyn OutputCallback`.
pub trait OutputCallback: Send + Sync {
    /// Called once per line, without the trailing newline
    fn on_line(&self, step_id: &str, stream: OutputStream, line: &str);
}

/// No-op callback that does nothing
#[derive(Debug, Clone, Default)]
pub struct NoopCallback;

impl OutputCallback for NoopCallback {
    fn on_line(&self, _step_id: &str, _stream: OutputStream, _line: &str) {}
}

/// Callback that keeps every line, for tests and reports
#[derive(Debug, Clone, Default)]
pub struct CollectingCallback {
    lines: Arc<Mutex<Vec<(String, String)>>>,
}

impl CollectingCallback {
    pub fn new() -> Self {
        Self::default()
    }

    /// (step id, line) pairs in arrival order
    pub fn lines(&self) -> Vec<(String, String)> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl OutputCallback for CollectingCallback {
    fn on_line(&self, step_id: &str, _stream: OutputStream, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push((step_id.to_string(), line.to_string()));
        }
    }
}
