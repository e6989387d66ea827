//! Error types for stkflash-core
//!
//! `no_std` compatible: Display is implemented by hand and
//! `std::error::Error` only with the `std` feature.

use core::fmt;

/// Intel HEX parse failure
///
/// Line numbers are 1-based and refer to the input text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// No data records were found in the input
    NoData,
    /// Record contains a non-hex digit or an odd number of digits
    InvalidHex {
        /// Offending line
        line: usize,
    },
    /// Record length field does not match the record size
    BadLength {
        /// Offending line
        line: usize,
    },
    /// Record checksum does not match its contents
    Checksum {
        /// Offending line
        line: usize,
        /// Checksum byte carried by the record
        expected: u8,
        /// Checksum computed over the record
        computed: u8,
    },
    /// Record type is not one of 0x00-0x05
    UnknownRecord {
        /// Offending line
        line: usize,
        /// Record type byte
        kind: u8,
    },
    /// Two data segments are separated by a hole too large to fill
    GapTooLarge {
        /// First unfilled address
        address: u32,
        /// Size of the hole in bytes
        gap: u32,
    },
    /// A data record overwrites bytes of an earlier record
    Overlap {
        /// Start address of the overlapping segment
        address: u32,
    },
    /// Data runs past the end of the 32-bit address space
    AddressOverflow {
        /// Start address of the offending data
        address: u32,
    },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoData => write!(f, "no valid Intel HEX data records found"),
            Self::InvalidHex { line } => write!(f, "line {}: invalid hex digits", line),
            Self::BadLength { line } => {
                write!(f, "line {}: record length does not match byte count", line)
            }
            Self::Checksum {
                line,
                expected,
                computed,
            } => write!(
                f,
                "line {}: checksum mismatch (record 0x{:02X}, computed 0x{:02X})",
                line, expected, computed
            ),
            Self::UnknownRecord { line, kind } => {
                write!(f, "line {}: unknown record type 0x{:02X}", line, kind)
            }
            Self::GapTooLarge { address, gap } => write!(
                f,
                "gap of {} bytes at 0x{:08X} is too large to fill",
                gap, address
            ),
            Self::Overlap { address } => {
                write!(f, "data at 0x{:08X} overlaps an earlier record", address)
            }
            Self::AddressOverflow { address } => {
                write!(f, "data at 0x{:08X} runs past the 4 GiB address space", address)
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ParseError {}

/// Result type alias using [`ParseError`]
pub type Result<T> = core::result::Result<T, ParseError>;
