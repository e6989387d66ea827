//! Error types for the upload orchestrator

use stkflash_core::ParseError;
use stkflash_stk500::{Stk500Error, TransportError};
use thiserror::Error;

/// Upload failures
#[derive(Debug, Error)]
pub enum UploadError {
    /// Another upload is already running on this uploader
    #[error("An upload is already in progress")]
    Busy,

    /// Empty sketch source
    #[error("Nothing to upload: the sketch source is empty")]
    NoSource,

    /// No serial port selected
    #[error("No serial port selected")]
    NoPort,

    /// Board not in the catalog
    #[error("Unknown board {0}")]
    UnknownBoard(String),

    /// Board known but not programmable over STK500v1
    #[error("Board {fqbn} is not supported: it {reason}")]
    UnsupportedBoard {
        /// Board FQBN
        fqbn: String,
        /// Explanation
        reason: &'static str,
    },

    /// The compilation service reported a failure
    #[error("Compilation failed: {0}")]
    Compile(String),

    /// The compiled firmware could not be decoded
    #[error("Invalid firmware from compiler: {0}")]
    Firmware(String),

    /// The firmware is not valid Intel HEX
    #[error("Invalid Intel HEX: {0}")]
    Parse(#[from] ParseError),

    /// Bootloader or serial failure
    #[error(transparent)]
    Stk500(#[from] Stk500Error),
}

impl From<TransportError> for UploadError {
    fn from(e: TransportError) -> Self {
        UploadError::Stk500(Stk500Error::Transport(e))
    }
}

/// Result type for upload operations
pub type Result<T> = std::result::Result<T, UploadError>;
