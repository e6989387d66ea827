//! Board catalog
//!
//! Boards are identified by their fully qualified board name (FQBN), the
//! same identifier the compilation service takes.

/// Bootloader protocol spoken by a board
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootloaderProtocol {
    /// STK500 version 1 (optiboot, ATmegaBOOT)
    Stk500v1,
    /// STK500 version 2 (Mega 2560 wiring bootloader)
    Stk500v2,
    /// AVR109 over native USB CDC (Caterina)
    Avr109,
}

/// A board known to the uploader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Board {
    /// Fully qualified board name
    pub fqbn: &'static str,
    /// Display name
    pub name: &'static str,
    /// Baud rate the bootloader listens at
    pub bootloader_baud: u32,
    /// Bootloader protocol
    pub protocol: BootloaderProtocol,
    /// Expected device signature
    pub signature: [u8; 3],
}

impl Board {
    /// Whether this uploader can program the board
    pub fn is_supported(&self) -> bool {
        self.protocol == BootloaderProtocol::Stk500v1
    }

    /// Why the board cannot be programmed, if it cannot
    pub fn unsupported_reason(&self) -> Option<&'static str> {
        match self.protocol {
            BootloaderProtocol::Stk500v1 => None,
            BootloaderProtocol::Stk500v2 => Some("uses the STK500v2 bootloader protocol"),
            BootloaderProtocol::Avr109 => Some("uses the Caterina (AVR109) USB bootloader"),
        }
    }
}

const ATMEGA328P: [u8; 3] = [0x1E, 0x95, 0x0F];

/// FQBN of the Nano with the pre-2018 bootloader
pub const NANO_OLD_BOOTLOADER: &str = "arduino:avr:nano:cpu=atmega328old";

/// FQBN of the Nano with optiboot
pub const NANO: &str = "arduino:avr:nano";

/// Board used when none is selected
pub const DEFAULT_BOARD: &str = "arduino:avr:uno";

/// Every known board
pub static BOARDS: &[Board] = &[
    Board {
        fqbn: "arduino:avr:uno",
        name: "Arduino Uno",
        bootloader_baud: 115_200,
        protocol: BootloaderProtocol::Stk500v1,
        signature: ATMEGA328P,
    },
    Board {
        fqbn: NANO,
        name: "Arduino Nano",
        bootloader_baud: 115_200,
        protocol: BootloaderProtocol::Stk500v1,
        signature: ATMEGA328P,
    },
    Board {
        fqbn: NANO_OLD_BOOTLOADER,
        name: "Arduino Nano (Old Bootloader)",
        bootloader_baud: 57_600,
        protocol: BootloaderProtocol::Stk500v1,
        signature: ATMEGA328P,
    },
    Board {
        fqbn: "arduino:avr:pro:cpu=16MHzatmega328",
        name: "Arduino Pro Mini 328 (5V, 16 MHz)",
        bootloader_baud: 57_600,
        protocol: BootloaderProtocol::Stk500v1,
        signature: ATMEGA328P,
    },
    Board {
        fqbn: "arduino:avr:diecimila:cpu=atmega328",
        name: "Arduino Duemilanove (ATmega328)",
        bootloader_baud: 57_600,
        protocol: BootloaderProtocol::Stk500v1,
        signature: ATMEGA328P,
    },
    Board {
        fqbn: "arduino:avr:leonardo",
        name: "Arduino Leonardo",
        bootloader_baud: 57_600,
        protocol: BootloaderProtocol::Avr109,
        signature: [0x1E, 0x95, 0x87],
    },
    Board {
        fqbn: "arduino:avr:mega:cpu=atmega2560",
        name: "Arduino Mega 2560",
        bootloader_baud: 115_200,
        protocol: BootloaderProtocol::Stk500v2,
        signature: [0x1E, 0x98, 0x01],
    },
];

/// Look up a board by FQBN
pub fn find(fqbn: &str) -> Option<&'static Board> {
    BOARDS.iter().find(|b| b.fqbn == fqbn)
}
