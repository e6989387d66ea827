//! Console progress reporting

use indicatif::{ProgressBar, ProgressStyle};
use stkflash_core::UploadObserver;

/// Progress reporter using an indicatif progress bar
///
/// Milestones move the bar; protocol log lines are forwarded to the `log`
/// facade (visible with `-v`) without tearing the bar.
pub struct IndicatifProgress {
    bar: ProgressBar,
}

impl IndicatifProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        Self { bar }
    }

    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    pub fn abandon(&self) {
        self.bar.abandon();
    }
}

impl Default for IndicatifProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadObserver for IndicatifProgress {
    fn on_progress(&mut self, message: &str, percent: u8) {
        self.bar.set_position(u64::from(percent.min(100)));
        self.bar.set_message(message.to_string());
    }

    fn on_log(&mut self, line: &str) {
        self.bar.suspend(|| log::debug!("{}", line));
    }
}
