//! Per-upload context

use crate::board::DEFAULT_BOARD;

/// An open serial monitor that holds the port
///
/// The uploader closes it before touching the port.
pub trait MonitorSession {
    /// Whether the monitor currently holds the port
    fn is_active(&self) -> bool;

    /// Release the port
    fn close(&mut self);
}

/// What to upload to, passed explicitly to every operation
pub struct UploadContext {
    /// Selected serial port
    pub port: Option<String>,
    /// Selected board FQBN
    pub board: String,
    /// Serial monitor that may be holding the port
    pub monitor: Option<Box<dyn MonitorSession + Send>>,
}

impl UploadContext {
    /// Context for `port` and `board`
    pub fn new(port: impl Into<String>, board: impl Into<String>) -> Self {
        Self {
            port: Some(port.into()),
            board: board.into(),
            monitor: None,
        }
    }

    /// Attach a monitor session
    pub fn with_monitor(mut self, monitor: Box<dyn MonitorSession + Send>) -> Self {
        self.monitor = Some(monitor);
        self
    }
}

impl Default for UploadContext {
    fn default() -> Self {
        Self {
            port: None,
            board: DEFAULT_BOARD.to_string(),
            monitor: None,
        }
    }
}

impl core::fmt::Debug for UploadContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UploadContext")
            .field("port", &self.port)
            .field("board", &self.board)
            .field("monitor", &self.monitor.as_ref().map(|m| m.is_active()))
            .finish()
    }
}
