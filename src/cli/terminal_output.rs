//! Terminal output callback for streaming step output
//!
//! Prints each line a step produces as `step-id | line`, stderr lines dimmed.
//! Lines arrive already redacted. When a progress bar is active the lines are
//! printed above it so the bar is not torn.

use crate::runner::{OutputCallback, OutputStream};
use console::style;
use indicatif::ProgressBar;
use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Callback that displays step output in real time
#[derive(Debug)]
pub struct TerminalOutputCallback {
    /// Width the step id column is padded to
    label_width: usize,
    progress: Option<ProgressBar>,
    lines_printed: AtomicUsize,
}

impl TerminalOutputCallback {
    /// # Arguments
    ///
    /// * `label_width` - Length of the longest step id, for alignment
    /// * `progress` - Progress bar to print above, if one is shown
    pub fn new(label_width: usize, progress: Option<ProgressBar>) -> Self {
        Self {
            label_width,
            progress,
            lines_printed: AtomicUsize::new(0),
        }
    }

    pub fn lines_printed(&self) -> usize {
        self.lines_printed.load(Ordering::SeqCst)
    }

    fn format_line(&self, step_id: &str, stream: OutputStream, line: &str) -> String {
        let label = format!("{:width$}", step_id, width = self.label_width);
        match stream {
            OutputStream::Stdout => format!("{} | {}", style(label).cyan(), line),
            OutputStream::Stderr => format!("{} | {}", style(label).cyan(), style(line).dim()),
        }
    }
}

impl OutputCallback for TerminalOutputCallback {
    fn on_line(&self, step_id: &str, stream: OutputStream, line: &str) {
        let text = self.format_line(step_id, stream, line);
        match &self.progress {
            Some(progress) => progress.println(text),
            None => {
                println!("{}", text);
                let _ = io::stdout().flush();
            }
        }
        self.lines_printed.fetch_add(1, Ordering::SeqCst);
    }
}
