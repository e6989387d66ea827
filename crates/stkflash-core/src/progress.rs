//! Progress and log reporting
//!
//! Uploads report through an injected [`UploadObserver`] instead of writing
//! to a console directly: coarse milestones go to `on_progress`, and the
//! fine-grained trail (every reset step, every sync attempt) goes to
//! `on_log`.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

/// A progress milestone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Human readable description of the milestone
    pub message: String,
    /// Completion in percent (0-100)
    pub percent: u8,
}

/// Receiver for upload progress and diagnostic log lines
pub trait UploadObserver {
    /// Called at each milestone with a completion percentage (0-100)
    fn on_progress(&mut self, message: &str, percent: u8);

    /// Called with a plain-text diagnostic line
    fn on_log(&mut self, line: &str);
}

/// An observer that discards everything
pub struct NoProgress;

impl UploadObserver for NoProgress {
    fn on_progress(&mut self, _message: &str, _percent: u8) {}
    fn on_log(&mut self, _line: &str) {}
}

/// An observer that forwards to the `log` facade
pub struct LogObserver;

impl UploadObserver for LogObserver {
    fn on_progress(&mut self, message: &str, percent: u8) {
        log::info!("[{:3}%] {}", percent, message);
    }

    fn on_log(&mut self, line: &str) {
        log::debug!("{}", line);
    }
}

/// An observer that records every event, in order
#[derive(Debug, Default)]
pub struct EventLog {
    /// Progress milestones received
    pub progress: Vec<ProgressEvent>,
    /// Log lines received
    pub lines: Vec<String>,
}

impl EventLog {
    /// Create an empty event log
    pub fn new() -> Self {
        Self::default()
    }

    /// Percentages reported so far
    pub fn percents(&self) -> Vec<u8> {
        self.progress.iter().map(|e| e.percent).collect()
    }

    /// Whether any log line contains `needle`
    pub fn logged(&self, needle: &str) -> bool {
        self.lines.iter().any(|l| l.contains(needle))
    }
}

impl UploadObserver for EventLog {
    fn on_progress(&mut self, message: &str, percent: u8) {
        self.progress.push(ProgressEvent {
            message: message.to_string(),
            percent: percent.min(100),
        });
    }

    fn on_log(&mut self, line: &str) {
        self.lines.push(line.to_string());
    }
}

/// Scale `done` out of `total` linearly onto `from..=to` percent
pub fn scale_percent(done: usize, total: usize, from: u8, to: u8) -> u8 {
    if total == 0 || done >= total {
        return to;
    }
    let span = (to - from) as usize;
    from + (span * done / total) as u8
}
