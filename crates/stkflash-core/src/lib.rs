//! stkflash-core - Core types for AVR bootloader uploads
//!
//! This crate holds everything about an upload that does not touch a serial
//! port: turning Intel HEX text into a [`FirmwareImage`], slicing that image
//! into fixed-size flash [`Page`]s, the observer interface used to report
//! progress, and the empirically tuned timing constants used by the reset
//! and synchronization logic.
//!
//! It is `no_std` compatible (it always needs `alloc`); the HEX codec needs
//! the `std` feature.
//!
//! # Features
//!
//! - `std` - Enable standard library support, `std::error::Error` impls,
//!   the Intel HEX codec in [`hex`] (built on the `ihex` crate) and loading
//!   [`UploadConfig`] from TOML files
//!
//! # Example
//!
//! ```
//! use stkflash_core::hex;
//!
//! let image = hex::parse(":0400000001020304F2\n:00000001FF\n")?;
//! assert_eq!(image.start_address(), 0);
//! assert_eq!(image.data(), &[1, 2, 3, 4]);
//! # Ok::<(), stkflash_core::ParseError>(())
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

extern crate alloc;

pub mod config;
pub mod error;
#[cfg(feature = "std")]
pub mod hex;
pub mod image;
pub mod progress;

pub use config::{ResetTiming, SyncConfig, UploadConfig};
#[cfg(feature = "std")]
pub use config::ConfigError;
pub use error::{ParseError, Result};
pub use image::{FirmwareImage, Page, ERASED_BYTE, PAGE_SIZE};
pub use progress::{EventLog, LogObserver, NoProgress, ProgressEvent, UploadObserver};
