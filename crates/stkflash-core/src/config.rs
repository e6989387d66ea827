//! Upload timing and retry configuration
//!
//! The reset and synchronization timings are empirically tuned against real
//! boards and USB-serial adapters. They are collected here as named defaults
//! so they can be overridden (for example from a TOML file with the `std`
//! feature) without touching the protocol code.
//!
//! ```toml
//! verify = true
//!
//! [reset]
//! post_reset_settle_ms = 500
//!
//! [sync]
//! attempts = 10
//! ```

use alloc::vec::Vec;

use crate::image::PAGE_SIZE;

/// Baud rate whose open/close is treated as a reset request
pub const DEFAULT_TOUCH_BAUD: u32 = 1200;
/// Delay between DTR/RTS transitions of the reset pulse
pub const DEFAULT_SIGNAL_STEP_MS: u32 = 50;
/// Wait after the reset before the bootloader listens
pub const DEFAULT_POST_RESET_SETTLE_MS: u32 = 350;
/// Wait after reopening at the bootloader baud
pub const DEFAULT_POST_OPEN_SETTLE_MS: u32 = 200;

/// Sync attempts per candidate baud rate
pub const DEFAULT_SYNC_ATTEMPTS: u32 = 5;
/// Response timeout of a single sync attempt
pub const DEFAULT_SYNC_TIMEOUT_MS: u32 = 150;
/// Pause between sync attempts
pub const DEFAULT_SYNC_RETRY_DELAY_MS: u32 = 30;
/// Timeout of each read while draining stale input
pub const DEFAULT_DRAIN_TIMEOUT_MS: u32 = 50;
/// Upper bound on reads while draining stale input
pub const DEFAULT_DRAIN_MAX_READS: u32 = 16;
/// Width of the DTR pulse sent before syncing
pub const DEFAULT_SYNC_PULSE_MS: u32 = 50;

/// Response timeout for ordinary commands
pub const DEFAULT_COMMAND_TIMEOUT_MS: u32 = 1000;
/// Response timeout for page writes (flash programming is slow)
pub const DEFAULT_PAGE_WRITE_TIMEOUT_MS: u32 = 5000;
/// Wait after closing a serial monitor before the port is reused
pub const DEFAULT_MONITOR_RELEASE_MS: u32 = 500;
/// Bootloader baud rates tried after the preferred one
pub const DEFAULT_FALLBACK_BAUDS: [u32; 2] = [115_200, 57_600];

/// Timing of the bootloader reset sequence
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(serde::Deserialize))]
#[cfg_attr(feature = "std", serde(default, deny_unknown_fields))]
pub struct ResetTiming {
    /// Baud rate used for the reset "touch"
    pub touch_baud: u32,
    /// Delay between DTR/RTS transitions
    pub signal_step_ms: u32,
    /// Wait after closing the touched port
    pub post_reset_settle_ms: u32,
    /// Wait after reopening at the bootloader baud
    pub post_open_settle_ms: u32,
}

impl Default for ResetTiming {
    fn default() -> Self {
        Self {
            touch_baud: DEFAULT_TOUCH_BAUD,
            signal_step_ms: DEFAULT_SIGNAL_STEP_MS,
            post_reset_settle_ms: DEFAULT_POST_RESET_SETTLE_MS,
            post_open_settle_ms: DEFAULT_POST_OPEN_SETTLE_MS,
        }
    }
}

/// Synchronization retry budget
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(serde::Deserialize))]
#[cfg_attr(feature = "std", serde(default, deny_unknown_fields))]
pub struct SyncConfig {
    /// Attempts per candidate baud
    pub attempts: u32,
    /// Response timeout per attempt
    pub attempt_timeout_ms: u32,
    /// Pause between attempts
    pub inter_attempt_delay_ms: u32,
    /// Timeout of each stale-input read
    pub drain_timeout_ms: u32,
    /// Maximum stale-input reads
    pub drain_max_reads: u32,
    /// Pulse DTR before the first attempt
    pub pulse_dtr: bool,
    /// Width of that pulse
    pub pulse_ms: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_SYNC_ATTEMPTS,
            attempt_timeout_ms: DEFAULT_SYNC_TIMEOUT_MS,
            inter_attempt_delay_ms: DEFAULT_SYNC_RETRY_DELAY_MS,
            drain_timeout_ms: DEFAULT_DRAIN_TIMEOUT_MS,
            drain_max_reads: DEFAULT_DRAIN_MAX_READS,
            pulse_dtr: true,
            pulse_ms: DEFAULT_SYNC_PULSE_MS,
        }
    }
}

/// Complete upload configuration
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(serde::Deserialize))]
#[cfg_attr(feature = "std", serde(default, deny_unknown_fields))]
pub struct UploadConfig {
    /// Reset sequence timing
    pub reset: ResetTiming,
    /// Sync retry budget
    pub sync: SyncConfig,
    /// Flash page size in bytes
    pub page_size: usize,
    /// Response timeout for ordinary commands
    pub command_timeout_ms: u32,
    /// Response timeout for page writes
    pub page_write_timeout_ms: u32,
    /// Baud rates tried after the preferred one, in order
    pub fallback_bauds: Vec<u32>,
    /// Wait after closing a serial monitor
    pub monitor_release_ms: u32,
    /// Read back and compare every page after writing
    pub verify: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            reset: ResetTiming::default(),
            sync: SyncConfig::default(),
            page_size: PAGE_SIZE,
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            page_write_timeout_ms: DEFAULT_PAGE_WRITE_TIMEOUT_MS,
            fallback_bauds: DEFAULT_FALLBACK_BAUDS.to_vec(),
            monitor_release_ms: DEFAULT_MONITOR_RELEASE_MS,
            verify: false,
        }
    }
}

impl UploadConfig {
    /// Whether `page_size` fits the 16-bit length field of `PROG_PAGE`
    pub fn page_size_is_valid(&self) -> bool {
        (1..=usize::from(u16::MAX)).contains(&self.page_size)
    }

    /// Ordered, de-duplicated baud rates to try: `preferred` first, then
    /// the fallbacks
    pub fn candidate_bauds(&self, preferred: u32) -> Vec<u32> {
        let mut bauds = Vec::with_capacity(self.fallback_bauds.len() + 1);
        for baud in core::iter::once(preferred).chain(self.fallback_bauds.iter().copied()) {
            if !bauds.contains(&baud) {
                bauds.push(baud);
            }
        }
        bauds
    }
}

/// Configuration file errors
#[cfg(feature = "std")]
#[derive(Debug)]
pub enum ConfigError {
    /// File could not be read
    Io(std::io::Error),
    /// File is not valid configuration TOML
    Parse(String),
    /// A value is out of range
    Invalid(String),
}

#[cfg(feature = "std")]
impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "cannot read config file: {}", e),
            Self::Parse(msg) => write!(f, "invalid config file: {}", msg),
            Self::Invalid(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ConfigError {}

#[cfg(feature = "std")]
impl UploadConfig {
    /// Load a configuration from a TOML file; missing keys keep defaults
    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml_str(&content)
    }

    /// Parse a configuration from a TOML string; missing keys keep defaults
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check values the protocol cannot carry
    ///
    /// `PROG_PAGE` sends the page length as 16 bits, and a zero page size
    /// would never make progress.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.page_size_is_valid() {
            return Err(ConfigError::Invalid(alloc::format!(
                "page_size must be between 1 and {}, got {}",
                u16::MAX,
                self.page_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_bauds() {
        let config = UploadConfig::default();
        assert_eq!(config.candidate_bauds(115_200), [115_200, 57_600]);
        assert_eq!(config.candidate_bauds(57_600), [57_600, 115_200]);
        assert_eq!(config.candidate_bauds(19_200), [19_200, 115_200, 57_600]);
    }

    #[cfg(feature = "std")]
    #[test]
    fn test_parse_toml_overrides() {
        let toml = r#"
verify = true
fallback_bauds = [57600]

[reset]
post_reset_settle_ms = 500

[sync]
attempts = 10
pulse_dtr = false
"#;
        let config = UploadConfig::from_toml_str(toml).unwrap();
        assert!(config.verify);
        assert_eq!(config.fallback_bauds, [57_600]);
        assert_eq!(config.reset.post_reset_settle_ms, 500);
        assert_eq!(config.reset.post_open_settle_ms, DEFAULT_POST_OPEN_SETTLE_MS);
        assert_eq!(config.sync.attempts, 10);
        assert!(!config.sync.pulse_dtr);
        assert_eq!(config.page_size, PAGE_SIZE);
    }

    #[cfg(feature = "std")]
    #[test]
    fn test_parse_toml_rejects_bad_page_size() {
        for toml in ["page_size = 0", "page_size = 65536"] {
            assert!(
                matches!(UploadConfig::from_toml_str(toml), Err(ConfigError::Invalid(_))),
                "{}",
                toml
            );
        }
        let config = UploadConfig::from_toml_str("page_size = 256").unwrap();
        assert_eq!(config.page_size, 256);
        assert!(config.page_size_is_valid());
    }

    #[cfg(feature = "std")]
    #[test]
    fn test_parse_toml_rejects_unknown_key() {
        assert!(matches!(
            UploadConfig::from_toml_str("retries = 3"),
            Err(ConfigError::Parse(_))
        ));
    }
}
