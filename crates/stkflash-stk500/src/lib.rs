//! stkflash-stk500 - STK500v1 bootloader uploads over a serial port
//!
//! This crate talks to the bootloader found on ATmega328P based Arduino
//! boards (optiboot on the Uno, ATmegaBOOT on older Nanos and Duemilanoves):
//!
//! - [`transport`] abstracts the serial port, with native (`serialport`)
//!   and browser (WebSerial) implementations
//! - [`reset`] kicks the board into its bootloader
//! - [`Stk500`] synchronizes, falls back across baud rates and programs
//!   flash page by page
//!
//! # Features
//!
//! - `native` - Native serial ports via the `serialport` crate
//! - `is_sync` - Compile the async API as blocking code
//! - `wasm` - WebSerial transport (use without `is_sync`)
//!
//! # Example
//!
//! ```no_run
//! use stkflash_core::{hex, LogObserver, UploadConfig};
//! use stkflash_stk500::{transport::serial::SerialTransport, Stk500};
//!
//! let image = hex::parse(&std::fs::read_to_string("Blink.ino.hex")?)?;
//! let mut stk = Stk500::new(SerialTransport::new("/dev/ttyUSB0"), UploadConfig::default());
//! let mut observer = LogObserver;
//! let result = stk
//!     .connect(115_200, &mut observer)
//!     .and_then(|_| stk.upload(&image, &mut observer));
//! stk.disconnect();
//! result?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod error;
pub mod protocol;
pub mod reset;
pub mod session;
pub mod transport;

pub use error::{Result, Stk500Error, TransportError};
pub use protocol::DeviceSignature;
pub use reset::{force_bootloader_reset, reset_into_bootloader};
pub use session::{Stk500, UploadStats};
pub use transport::{AdapterKind, FrameConfig, PortInfo, SerialCapability, Transport};
