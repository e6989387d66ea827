//! Firmware images and flash pages

use alloc::vec::Vec;

use crate::error::{ParseError, Result};

/// Flash page size used by the ATmega328P family bootloaders
pub const PAGE_SIZE: usize = 128;

/// Value of an erased flash byte, used to pad holes and short pages
pub const ERASED_BYTE: u8 = 0xFF;

/// A contiguous firmware image ready to be programmed
///
/// Holes smaller than the fill limit have already been filled with
/// [`ERASED_BYTE`] by the parser. The image is never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    start_address: u32,
    data: Vec<u8>,
}

impl FirmwareImage {
    /// Create an image from raw bytes located at `start_address`
    ///
    /// Fails when `data` is empty or the image would run past the 32-bit
    /// address space.
    pub fn new(start_address: u32, data: Vec<u8>) -> Result<Self> {
        if data.is_empty() {
            return Err(ParseError::NoData);
        }
        if end_of(start_address, data.len()).is_none() {
            return Err(ParseError::AddressOverflow {
                address: start_address,
            });
        }
        Ok(Self {
            start_address,
            data,
        })
    }

    /// Byte address of the first byte of the image
    pub fn start_address(&self) -> u32 {
        self.start_address
    }

    /// Image contents
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Image length in bytes (always non-zero)
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always false; kept for API symmetry with slices
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// One past the last byte address of the image
    pub fn end_address(&self) -> u32 {
        // Checked in `new`
        self.start_address + self.data.len() as u32
    }

    /// Number of pages of `page_size` bytes needed to hold the image
    ///
    /// Zero when `page_size` is zero.
    pub fn page_count(&self, page_size: usize) -> usize {
        if page_size == 0 {
            return 0;
        }
        self.data.len().div_ceil(page_size)
    }

    /// Iterate over the image in `page_size` strides
    ///
    /// The final page is padded with [`ERASED_BYTE`].
    pub fn pages(&self, page_size: usize) -> Pages<'_> {
        Pages {
            image: self,
            page_size,
            offset: 0,
        }
    }
}

/// `start + len`, or `None` when that does not fit in a `u32`
pub(crate) fn end_of(start: u32, len: usize) -> Option<u32> {
    u32::try_from(len).ok().and_then(|len| start.checked_add(len))
}

/// A single flash page slice of a [`FirmwareImage`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Byte address where the page is written
    pub address: u32,
    /// Exactly `page_size` bytes
    pub data: Vec<u8>,
    /// Number of bytes that came from the image (the rest is padding)
    pub payload_len: usize,
}

impl Page {
    /// Build a page at `address` from `chunk`, padded to `page_size`
    ///
    /// `chunk` longer than `page_size` is truncated.
    pub fn padded(address: u32, chunk: &[u8], page_size: usize) -> Self {
        let payload_len = chunk.len().min(page_size);
        let mut data = Vec::with_capacity(page_size);
        data.extend_from_slice(&chunk[..payload_len]);
        data.resize(page_size, ERASED_BYTE);
        Self {
            address,
            data,
            payload_len,
        }
    }
}

/// Iterator over the pages of an image
pub struct Pages<'a> {
    image: &'a FirmwareImage,
    page_size: usize,
    offset: usize,
}

impl Iterator for Pages<'_> {
    type Item = Page;

    fn next(&mut self) -> Option<Page> {
        if self.page_size == 0 || self.offset >= self.image.data.len() {
            return None;
        }
        let end = (self.offset + self.page_size).min(self.image.data.len());
        let page = Page::padded(
            self.image.start_address + self.offset as u32,
            &self.image.data[self.offset..end],
            self.page_size,
        );
        self.offset = end;
        Some(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_image_rejected() {
        assert_eq!(FirmwareImage::new(0, Vec::new()), Err(ParseError::NoData));
    }

    #[test]
    fn test_image_past_address_space_rejected() {
        assert_eq!(
            FirmwareImage::new(0xFFFF_FFF0, vec![0; 16]),
            Err(ParseError::AddressOverflow {
                address: 0xFFFF_FFF0
            })
        );
        let image = FirmwareImage::new(0xFFFF_FFF0, vec![0; 15]).unwrap();
        assert_eq!(image.end_address(), u32::MAX);
    }

    #[test]
    fn test_zero_page_size_yields_nothing() {
        let image = FirmwareImage::new(0, vec![0xAA; 10]).unwrap();
        assert_eq!(image.page_count(0), 0);
        assert_eq!(image.pages(0).count(), 0);
    }

    #[test]
    fn test_pages_300_bytes() {
        let data: Vec<u8> = (0..300u32).map(|i| i as u8).collect();
        let image = FirmwareImage::new(0, data).unwrap();
        let pages: Vec<Page> = image.pages(PAGE_SIZE).collect();

        assert_eq!(image.page_count(PAGE_SIZE), 3);
        assert_eq!(pages.len(), 3);
        assert_eq!(
            pages.iter().map(|p| p.address).collect::<Vec<_>>(),
            [0, 128, 256]
        );
        assert!(pages.iter().all(|p| p.data.len() == PAGE_SIZE));

        let last = &pages[2];
        assert_eq!(last.payload_len, 44);
        assert_eq!(last.data[..44], image.data()[256..]);
        assert!(last.data[44..].iter().all(|&b| b == ERASED_BYTE));
        assert_eq!(last.data[44..].len(), 84);
    }

    #[test]
    fn test_pages_offset_start() {
        let image = FirmwareImage::new(0x100, vec![0xAA; 128]).unwrap();
        let pages: Vec<Page> = image.pages(PAGE_SIZE).collect();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].address, 0x100);
        assert_eq!(pages[0].payload_len, 128);
        assert_eq!(image.end_address(), 0x180);
    }

    #[test]
    fn test_padded_truncates_long_chunk() {
        let page = Page::padded(0, &[0u8; 200], PAGE_SIZE);
        assert_eq!(page.data.len(), PAGE_SIZE);
        assert_eq!(page.payload_len, PAGE_SIZE);
    }
}
