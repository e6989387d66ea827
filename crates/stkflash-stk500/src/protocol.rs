//! STK500 (version 1) protocol constants and framing
//!
//! Based on Atmel application note AVR061, restricted to the subset spoken
//! by optiboot and the older ATmegaBOOT bootloaders.
//!
//! Every command is `[opcode, params.., CRC_EOP]` and every successful
//! reply starts with `STK_INSYNC` and ends with `STK_OK`.

/// Reply terminator for a successful command
pub const STK_OK: u8 = 0x10;
/// Reply prefix when the bootloader understood the frame
pub const STK_INSYNC: u8 = 0x14;
/// End-of-packet marker closing every command
pub const CRC_EOP: u8 = 0x20;

/// Synchronize with the bootloader
pub const STK_GET_SYNC: u8 = 0x30;
/// Read a parameter value
pub const STK_GET_PARAMETER: u8 = 0x41;
/// Enter programming mode
pub const STK_ENTER_PROGMODE: u8 = 0x50;
/// Leave programming mode
pub const STK_LEAVE_PROGMODE: u8 = 0x51;
/// Load a (word) address
pub const STK_LOAD_ADDRESS: u8 = 0x55;
/// Program a page at the loaded address
pub const STK_PROG_PAGE: u8 = 0x64;
/// Read a page at the loaded address
pub const STK_READ_PAGE: u8 = 0x74;
/// Read the three signature bytes
pub const STK_READ_SIGN: u8 = 0x75;

/// Memory type selector for flash
pub const MEMTYPE_FLASH: u8 = b'F';

/// The two-byte acknowledgement
pub const ACK: [u8; 2] = [STK_INSYNC, STK_OK];

/// Parameter numbers for `STK_GET_PARAMETER`
pub mod param {
    /// Hardware version
    pub const HW_VER: u8 = 0x80;
    /// Software (bootloader) major version
    pub const SW_MAJOR: u8 = 0x81;
    /// Software (bootloader) minor version
    pub const SW_MINOR: u8 = 0x82;
}

/// Build `[opcode, params.., CRC_EOP]`
pub fn frame(opcode: u8, params: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(params.len() + 2);
    frame.push(opcode);
    frame.extend_from_slice(params);
    frame.push(CRC_EOP);
    frame
}

/// Flash bytes reachable through the 16-bit word address of `LOAD_ADDRESS`
pub const MAX_FLASH_BYTES: u32 = 0x2_0000;

/// `LOAD_ADDRESS` for a byte address
///
/// Flash is addressed in 16-bit words, so the byte address is halved and
/// sent low byte first. `None` at or above [`MAX_FLASH_BYTES`].
pub fn load_address_frame(byte_address: u32) -> Option<Vec<u8>> {
    let word = u16::try_from(byte_address >> 1).ok()?;
    Some(frame(STK_LOAD_ADDRESS, &word.to_le_bytes()))
}

/// `PROG_PAGE` for flash, length sent high byte first
pub fn prog_page_frame(page: &[u8]) -> Vec<u8> {
    let len = page.len() as u16;
    let mut params = Vec::with_capacity(page.len() + 3);
    params.extend_from_slice(&len.to_be_bytes());
    params.push(MEMTYPE_FLASH);
    params.extend_from_slice(page);
    frame(STK_PROG_PAGE, &params)
}

/// `READ_PAGE` for `len` bytes of flash
pub fn read_page_frame(len: u16) -> Vec<u8> {
    let [hi, lo] = len.to_be_bytes();
    frame(STK_READ_PAGE, &[hi, lo, MEMTYPE_FLASH])
}

/// Whether `response` is exactly `[INSYNC, OK]`
pub fn is_ack(response: &[u8]) -> bool {
    response == ACK
}

/// Extract the payload of an `[INSYNC, payload.., OK]` reply
pub fn unwrap_reply(response: &[u8], payload_len: usize) -> Option<&[u8]> {
    match response {
        [STK_INSYNC, payload @ .., STK_OK] if payload.len() == payload_len => Some(payload),
        _ => None,
    }
}

/// Device signature as read with `STK_READ_SIGN`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSignature(pub [u8; 3]);

impl DeviceSignature {
    /// ATmega328P (Uno, Nano, Pro Mini)
    pub const ATMEGA328P: Self = Self([0x1E, 0x95, 0x0F]);

    /// Name of the part, if known
    pub fn part_name(&self) -> Option<&'static str> {
        match self.0 {
            [0x1E, 0x95, 0x0F] => Some("ATmega328P"),
            [0x1E, 0x95, 0x14] => Some("ATmega328"),
            [0x1E, 0x94, 0x0B] => Some("ATmega168P"),
            [0x1E, 0x94, 0x06] => Some("ATmega168"),
            [0x1E, 0x93, 0x0A] => Some("ATmega88P"),
            [0x1E, 0x98, 0x01] => Some("ATmega2560"),
            [0x1E, 0x95, 0x87] => Some("ATmega32U4"),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeviceSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02X} {:02X} {:02X}", self.0[0], self.0[1], self.0[2])?;
        if let Some(name) = self.part_name() {
            write!(f, " ({})", name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_sync_frame() {
        assert_eq!(frame(STK_GET_SYNC, &[]), [0x30, 0x20]);
    }

    #[test]
    fn test_load_address_is_word_address() {
        assert_eq!(load_address_frame(0).unwrap(), [0x55, 0x00, 0x00, 0x20]);
        assert_eq!(load_address_frame(128).unwrap(), [0x55, 0x40, 0x00, 0x20]);
        assert_eq!(load_address_frame(256).unwrap(), [0x55, 0x80, 0x00, 0x20]);
        assert_eq!(load_address_frame(0x7F80).unwrap(), [0x55, 0xC0, 0x3F, 0x20]);
    }

    #[test]
    fn test_load_address_range() {
        assert_eq!(
            load_address_frame(MAX_FLASH_BYTES - 2).unwrap(),
            [0x55, 0xFF, 0xFF, 0x20]
        );
        assert_eq!(load_address_frame(MAX_FLASH_BYTES), None);
        assert_eq!(load_address_frame(u32::MAX), None);
    }

    #[test]
    fn test_prog_page_frame_layout() {
        let page = [0xAB; 128];
        let frame = prog_page_frame(&page);
        assert_eq!(frame.len(), 128 + 5);
        assert_eq!(&frame[..4], &[0x64, 0x00, 0x80, b'F']);
        assert_eq!(&frame[4..132], &page);
        assert_eq!(frame[132], CRC_EOP);
    }

    #[test]
    fn test_replies() {
        assert!(is_ack(&[0x14, 0x10]));
        assert!(!is_ack(&[0x14]));
        assert!(!is_ack(&[0x14, 0x11]));
        assert_eq!(
            unwrap_reply(&[0x14, 0x1E, 0x95, 0x0F, 0x10], 3),
            Some(&[0x1E, 0x95, 0x0F][..])
        );
        assert_eq!(unwrap_reply(&[0x14, 0x1E, 0x10], 3), None);
    }

    #[test]
    fn test_signature_display() {
        assert_eq!(
            DeviceSignature::ATMEGA328P.to_string(),
            "1E 95 0F (ATmega328P)"
        );
        assert_eq!(DeviceSignature([1, 2, 3]).to_string(), "01 02 03");
    }
}
