//! Serial transport abstraction
//!
//! The STK500 session only needs a byte pipe that can be opened at a given
//! baud rate, drive DTR/RTS and read with a deadline. Native builds use the
//! `serialport` crate, browser builds use WebSerial and tests use the
//! emulated bootloader from `stkflash-dummy`.
//!
//! Sleeping goes through the transport as well, so that emulated ports can
//! run on a virtual clock.

#[cfg(feature = "native")]
pub mod serial;
#[cfg(feature = "wasm")]
pub mod web;

use crate::error::TransportError;
use maybe_async::maybe_async;

/// Result type for transport operations
pub type TransportResult<T> = core::result::Result<T, TransportError>;

/// Number of data bits per character
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataBits {
    /// 7 data bits
    Seven,
    /// 8 data bits
    Eight,
}

/// Parity checking mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    /// No parity bit
    None,
    /// Even parity
    Even,
    /// Odd parity
    Odd,
}

/// Number of stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBits {
    /// One stop bit
    One,
    /// Two stop bits
    Two,
}

/// Flow control mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    /// No flow control
    None,
    /// RTS/CTS
    Hardware,
}

/// Character framing used when opening a port
///
/// Arduino bootloaders always use 8N1 without flow control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameConfig {
    /// Data bits
    pub data_bits: DataBits,
    /// Parity
    pub parity: Parity,
    /// Stop bits
    pub stop_bits: StopBits,
    /// Flow control
    pub flow_control: FlowControl,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

/// Byte transport to a serial device
#[maybe_async(AFIT)]
pub trait Transport {
    /// Port name used in log messages
    fn name(&self) -> &str;

    /// Whether the port is currently open
    fn is_open(&self) -> bool;

    /// Open the port at `baud`
    async fn open(&mut self, baud: u32, frame: FrameConfig) -> TransportResult<()>;

    /// Close the port
    ///
    /// Never fails; problems are logged. Closing a closed port is a no-op.
    async fn close(&mut self);

    /// Write all of `data`
    async fn send(&mut self, data: &[u8]) -> TransportResult<()>;

    /// Read up to `len` bytes, waiting at most `timeout_ms`
    ///
    /// Returns fewer bytes (possibly none) when the deadline passes.
    async fn receive(&mut self, len: usize, timeout_ms: u32) -> TransportResult<Vec<u8>>;

    /// Drive the DTR and RTS lines
    ///
    /// Returns [`TransportError::SignalsUnsupported`] when the port cannot
    /// control them.
    async fn set_signals(&mut self, dtr: bool, rts: bool) -> TransportResult<()>;

    /// Wait for `ms` milliseconds
    async fn sleep_ms(&mut self, ms: u32);
}

// Blanket impl so a runtime-selected `Box<dyn Transport>` can drive a session.
// Only in sync mode: async traits are not object safe.
#[cfg(feature = "is_sync")]
impl<T: Transport + ?Sized> Transport for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn open(&mut self, baud: u32, frame: FrameConfig) -> TransportResult<()> {
        (**self).open(baud, frame)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn send(&mut self, data: &[u8]) -> TransportResult<()> {
        (**self).send(data)
    }

    fn receive(&mut self, len: usize, timeout_ms: u32) -> TransportResult<Vec<u8>> {
        (**self).receive(len, timeout_ms)
    }

    fn set_signals(&mut self, dtr: bool, rts: bool) -> TransportResult<()> {
        (**self).set_signals(dtr, rts)
    }

    fn sleep_ms(&mut self, ms: u32) {
        (**self).sleep_ms(ms)
    }
}

/// USB-serial adapter family, derived from the USB vendor ID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    /// Arduino or Genuino native USB (16U2 or ATmega32U4)
    ArduinoOfficial,
    /// WCH CH340/CH341, common on clone Nanos
    Ch340,
    /// FTDI FT232
    Ftdi,
    /// Silicon Labs CP210x
    Cp210x,
    /// Adafruit
    Adafruit,
    /// SparkFun
    SparkFun,
    /// Anything else, including non-USB ports
    Generic,
}

impl AdapterKind {
    /// Classify by USB vendor ID
    pub fn from_vid(vid: Option<u16>) -> Self {
        match vid {
            Some(0x2341) | Some(0x2A03) => AdapterKind::ArduinoOfficial,
            Some(0x1A86) => AdapterKind::Ch340,
            Some(0x0403) => AdapterKind::Ftdi,
            Some(0x10C4) => AdapterKind::Cp210x,
            Some(0x239A) => AdapterKind::Adafruit,
            Some(0x1B4F) => AdapterKind::SparkFun,
            _ => AdapterKind::Generic,
        }
    }

    /// Short human readable label
    pub fn label(&self) -> &'static str {
        match self {
            AdapterKind::ArduinoOfficial => "Arduino",
            AdapterKind::Ch340 => "CH340",
            AdapterKind::Ftdi => "FTDI",
            AdapterKind::Cp210x => "CP210x",
            AdapterKind::Adafruit => "Adafruit",
            AdapterKind::SparkFun => "SparkFun",
            AdapterKind::Generic => "generic",
        }
    }
}

impl core::fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.label())
    }
}

/// A serial port visible to the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// OS device name (`/dev/ttyUSB0`, `COM3`) or a browser-assigned label
    pub name: String,
    /// USB vendor ID
    pub vid: Option<u16>,
    /// USB product ID
    pub pid: Option<u16>,
    /// USB manufacturer string
    pub manufacturer: Option<String>,
    /// USB product string
    pub product: Option<String>,
}

impl PortInfo {
    /// A port without USB information
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
        }
    }

    /// Adapter family
    ///
    /// Falls back to the product string for CH340 bridges that report a
    /// rebadged vendor ID.
    pub fn adapter(&self) -> AdapterKind {
        match AdapterKind::from_vid(self.vid) {
            AdapterKind::Generic => {
                let product = self.product.as_deref().unwrap_or("").to_ascii_lowercase();
                if product.contains("ch340") || product.contains("ch341") {
                    AdapterKind::Ch340
                } else {
                    AdapterKind::Generic
                }
            }
            kind => kind,
        }
    }

    /// One-line description for listings
    pub fn description(&self) -> String {
        let mut desc = self.name.clone();
        if let (Some(vid), Some(pid)) = (self.vid, self.pid) {
            desc.push_str(&format!(" [{:04x}:{:04x}]", vid, pid));
        }
        desc.push_str(&format!(" ({})", self.adapter()));
        if let Some(product) = &self.product {
            desc.push_str(&format!(" {}", product));
        }
        desc
    }
}

/// Access to the ports the user has made available
///
/// Native builds can see every port; browsers only expose ports the user
/// granted through a chooser.
#[maybe_async(AFIT)]
pub trait SerialCapability {
    /// Transport produced for a chosen port
    type Transport: Transport;

    /// Ports that can be opened without further prompting
    async fn authorized_ports(&self) -> TransportResult<Vec<PortInfo>>;

    /// Get a closed transport for the named port
    async fn request_port(&self, name: &str) -> TransportResult<Self::Transport>;
}
