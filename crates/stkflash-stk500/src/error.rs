//! Error types for STK500 uploads

use thiserror::Error;

/// Serial transport failures
///
/// A receive timeout is not an error: `receive` simply returns fewer bytes.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The port could not be opened
    #[error("Cannot open {port}: {reason}")]
    Unavailable {
        /// Port name
        port: String,
        /// Platform error text
        reason: String,
    },

    /// `open` called on a port that is already open
    #[error("Port {0} is already open")]
    AlreadyOpen(String),

    /// I/O attempted on a closed port
    #[error("Port {0} is not open")]
    NotOpen(String),

    /// I/O error during communication
    #[error("I/O error: {0}")]
    Io(String),

    /// DTR/RTS control is not available on this transport
    #[error("Control signals are not supported by this transport")]
    SignalsUnsupported,

    /// The user did not grant access to a port
    #[error("Access to port {0} was not granted")]
    PermissionDenied(String),

    /// Serial port error
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e.to_string())
    }
}

/// STK500 session errors
#[derive(Debug, Error)]
pub enum Stk500Error {
    /// Serial layer failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// No candidate baud rate reached synchronization
    #[error(
        "Programmer is not responding: bootloader not in sync at any baud rate (tried {})",
        join_bauds(.bauds)
    )]
    SyncFailure {
        /// Baud rates that were attempted, in order
        bauds: Vec<u32>,
    },

    /// A command was answered with something other than INSYNC/OK
    #[error("Command 0x{command:02X} not acknowledged: {}", describe_response(.response))]
    Protocol {
        /// Opcode of the rejected command
        command: u8,
        /// Raw bytes received (empty on timeout)
        response: Vec<u8>,
    },

    /// Command issued before `connect` succeeded
    #[error("Not in sync with the bootloader")]
    NotSynchronized,

    /// Page data larger than the flash page
    #[error("Page of {len} bytes exceeds the {page_size} byte flash page")]
    PageTooLarge {
        /// Length supplied
        len: usize,
        /// Configured page size
        page_size: usize,
    },

    /// Page size outside 1..=65535
    #[error("Invalid flash page size {0}")]
    InvalidPageSize(usize),

    /// Byte address beyond the flash reachable with `LOAD_ADDRESS`
    #[error("Flash address 0x{address:08X} is beyond the first 0x{limit:05X} bytes reachable by the bootloader")]
    AddressOutOfRange {
        /// Offending byte address
        address: u32,
        /// Reachable flash size in bytes
        limit: u32,
    },

    /// Readback did not match the image
    #[error("Verify failed at 0x{address:08X}: expected 0x{expected:02X}, read 0x{found:02X}")]
    VerifyMismatch {
        /// Byte address of the first difference
        address: u32,
        /// Byte from the image
        expected: u8,
        /// Byte read from flash
        found: u8,
    },
}

/// Result type for STK500 operations
pub type Result<T> = std::result::Result<T, Stk500Error>;

fn join_bauds(bauds: &[u32]) -> String {
    bauds
        .iter()
        .map(|b| b.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Render a raw response for error messages and logs
pub fn describe_response(response: &[u8]) -> String {
    if response.is_empty() {
        return "no response (timeout)".to_string();
    }
    let bytes: Vec<String> = response.iter().map(|b| format!("{:02X}", b)).collect();
    format!("response [{}]", bytes.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_failure_message() {
        let err = Stk500Error::SyncFailure {
            bauds: vec![115_200, 57_600],
        };
        let msg = err.to_string();
        assert!(msg.contains("not in sync"));
        assert!(msg.contains("115200, 57600"));
    }

    #[test]
    fn test_protocol_message() {
        let err = Stk500Error::Protocol {
            command: 0x50,
            response: vec![],
        };
        assert_eq!(
            err.to_string(),
            "Command 0x50 not acknowledged: no response (timeout)"
        );
        let err = Stk500Error::Protocol {
            command: 0x64,
            response: vec![0x14, 0x11],
        };
        assert!(err.to_string().ends_with("response [14 11]"));
    }
}
