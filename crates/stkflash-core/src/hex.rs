//! Intel HEX parsing and encoding
//!
//! Record syntax (digits, byte count, checksum) is handled by the `ihex`
//! crate. This module only places the records in the address space:
//!
//! | Record                   | Effect                          |
//! |--------------------------|---------------------------------|
//! | Data                     | bytes at `base + offset`        |
//! | End of file              | stop scanning                   |
//! | Extended segment address | `base = word << 4`              |
//! | Extended linear address  | `base = word << 16`             |
//! | Start segment / linear   | ignored                         |
//!
//! Data records are collected into contiguous segments which are then
//! folded into a single image. Holes smaller than [`MAX_GAP_FILL`] bytes
//! are filled with erased flash (0xFF); anything larger is rejected rather
//! than silently stretching the image across unrelated flash.

use alloc::string::String;
use alloc::vec::Vec;

use ihex::{ReaderError, Record, WriterError};

use crate::error::{ParseError, Result};
use crate::image::{end_of, FirmwareImage, ERASED_BYTE};

/// Holes of this many bytes or more between segments are a parse error
pub const MAX_GAP_FILL: u32 = 256;

/// Bytes per data record written by [`encode`]
const ENCODE_RECORD_LEN: usize = 16;

/// A run of contiguous data bytes
///
/// `start + data.len()` always fits in a `u32`.
#[derive(Debug)]
struct Segment {
    start: u32,
    data: Vec<u8>,
}

impl Segment {
    fn end(&self) -> u32 {
        self.start + self.data.len() as u32
    }
}

/// Parse Intel HEX text into a contiguous firmware image
///
/// Lines that do not start with `:` are skipped. Fails with
/// [`ParseError::NoData`] when no data record is found.
pub fn parse(text: &str) -> Result<FirmwareImage> {
    let mut base: u32 = 0;
    let mut segments: Vec<Segment> = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let raw = raw.trim();
        if !raw.starts_with(':') {
            continue;
        }

        let record = Record::from_record_string(raw).map_err(|e| record_error(e, line))?;
        match record {
            Record::Data { offset, value } => {
                if value.is_empty() {
                    continue;
                }
                let at = base.wrapping_add(u32::from(offset));
                if end_of(at, value.len()).is_none() {
                    return Err(ParseError::AddressOverflow { address: at });
                }
                match segments.last_mut() {
                    Some(seg) if seg.end() == at => seg.data.extend_from_slice(&value),
                    _ => segments.push(Segment {
                        start: at,
                        data: value,
                    }),
                }
            }
            Record::EndOfFile => break,
            Record::ExtendedSegmentAddress(word) => base = u32::from(word) << 4,
            Record::ExtendedLinearAddress(word) => base = u32::from(word) << 16,
            Record::StartSegmentAddress { .. } | Record::StartLinearAddress(_) => {}
        }
    }

    let (start, data) = coalesce(segments)?;
    log::debug!(
        "hex: parsed {} bytes starting at 0x{:08X}",
        data.len(),
        start
    );
    FirmwareImage::new(start, data)
}

/// Attach the line number to a record syntax error
fn record_error(error: ReaderError, line: usize) -> ParseError {
    match error {
        ReaderError::ChecksumMismatch(found, expected) => ParseError::Checksum {
            line,
            expected: found,
            computed: expected,
        },
        ReaderError::UnsupportedRecordType(kind) => ParseError::UnknownRecord { line, kind },
        ReaderError::ContainsInvalidCharacters
        | ReaderError::RecordNotEvenLength
        | ReaderError::MissingStartCode => ParseError::InvalidHex { line },
        _ => ParseError::BadLength { line },
    }
}

/// Fold segments into one image starting at the lowest address
fn coalesce(mut segments: Vec<Segment>) -> Result<(u32, Vec<u8>)> {
    segments.sort_by_key(|s| s.start);

    let mut iter = segments.into_iter();
    let first = iter.next().ok_or(ParseError::NoData)?;
    let start = first.start;
    let mut data = first.data;

    for seg in iter {
        let end =
            end_of(start, data.len()).ok_or(ParseError::AddressOverflow { address: start })?;
        if seg.start < end {
            return Err(ParseError::Overlap { address: seg.start });
        }
        let gap = seg.start - end;
        if gap >= MAX_GAP_FILL {
            return Err(ParseError::GapTooLarge { address: end, gap });
        }
        if gap > 0 {
            log::debug!("hex: filling {} byte gap at 0x{:08X}", gap, end);
        }
        data.resize(data.len() + gap as usize, ERASED_BYTE);
        data.extend_from_slice(&seg.data);
    }

    Ok((start, data))
}

/// Encode an image as Intel HEX text
///
/// Emits 16-byte data records, an extended linear address record whenever
/// the upper 16 address bits change, and a trailing end-of-file record.
pub fn encode(image: &FirmwareImage) -> core::result::Result<String, WriterError> {
    let data = image.data();
    let mut records = Vec::with_capacity(data.len() / ENCODE_RECORD_LEN + 2);
    let mut upper: Option<u16> = None;
    let mut offset = 0usize;

    while offset < data.len() {
        let addr = image.start_address() + offset as u32;
        let high = (addr >> 16) as u16;
        if upper != Some(high) && (high != 0 || upper.is_some()) {
            records.push(Record::ExtendedLinearAddress(high));
        }
        upper = Some(high);

        // Never let a record straddle a 64 KiB boundary
        let room = 0x1_0000 - (addr & 0xFFFF) as usize;
        let len = ENCODE_RECORD_LEN.min(data.len() - offset).min(room);
        records.push(Record::Data {
            offset: (addr & 0xFFFF) as u16,
            value: data[offset..offset + len].to_vec(),
        });
        offset += len;
    }

    records.push(Record::EndOfFile);
    ihex::create_object_file_representation(&records)
}
