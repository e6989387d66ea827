//! stkflash-dummy - Emulated STK500 bootloader for testing
//!
//! [`DummyBootloader`] implements the serial [`Transport`] trait and answers
//! STK500v1 frames from an in-memory flash array, the way optiboot would.
//! It runs on a virtual clock: sleeps and read timeouts only advance a
//! counter, so tests never wait.
//!
//! The board state lives behind an `Arc<Mutex<_>>` shared with
//! [`DummyPorts`], so a test can hand the port to an uploader and inspect
//! what happened afterwards.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use maybe_async::maybe_async;
use stkflash_core::config::DEFAULT_TOUCH_BAUD;
use stkflash_core::FirmwareImage;
use stkflash_stk500::protocol::{self, param};
use stkflash_stk500::transport::{FrameConfig, PortInfo, SerialCapability, Transport};
use stkflash_stk500::TransportError;

/// Port name under which [`DummyPorts`] exposes the board
pub const DUMMY_PORT: &str = "dummy";

/// Reply to a frame that did not end with `CRC_EOP`
const STK_NOSYNC: u8 = 0x15;
/// Reply status for a rejected command
const STK_FAILED: u8 = 0x11;

/// Configuration for the emulated board
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// Baud rate the bootloader listens at
    pub bootloader_baud: u32,
    /// Number of `GET_SYNC` requests ignored before answering
    pub sync_after: u32,
    /// Whether DTR/RTS can be driven
    pub supports_signals: bool,
    /// Only answer after a reset (DTR edge or 1200 baud touch)
    pub require_reset: bool,
    /// Device signature
    pub signature: [u8; 3],
    /// Bootloader version (major, minor)
    pub sw_version: (u8, u8),
    /// Flash size in bytes
    pub flash_size: usize,
    /// Garbage queued the first time the port opens at the bootloader baud
    pub stale_bytes: Vec<u8>,
    /// Fail `open` at this baud rate
    pub fail_open_at: Option<u32>,
    /// Answer `ENTER_PROGMODE` with a failure
    pub reject_enter_progmode: bool,
    /// Answer `LEAVE_PROGMODE` with a failure
    pub reject_leave_progmode: bool,
    /// Fail the Nth `PROG_PAGE` (zero based)
    pub fail_page: Option<usize>,
    /// Store an inverted byte at this address when it is programmed
    pub corrupt_flash_at: Option<u32>,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            bootloader_baud: 115_200,
            sync_after: 0,
            supports_signals: true,
            require_reset: true,
            signature: [0x1E, 0x95, 0x0F], // ATmega328P
            sw_version: (8, 0),            // optiboot 8.0
            flash_size: 32 * 1024,
            stale_bytes: Vec::new(),
            fail_open_at: None,
            reject_enter_progmode: false,
            reject_leave_progmode: false,
            fail_page: None,
            corrupt_flash_at: None,
        }
    }
}

/// Everything the emulated board has seen
#[derive(Debug)]
pub struct DummyState {
    /// Flash contents
    pub flash: Vec<u8>,
    /// Successful opens
    pub opens: usize,
    /// Closes of an open port
    pub closes: usize,
    /// Baud rate of every successful open, in order
    pub open_bauds: Vec<u32>,
    /// Every DTR/RTS change, in order
    pub signals: Vec<(bool, bool)>,
    /// Virtual time spent sleeping and waiting for data
    pub elapsed_ms: u64,
    /// `GET_SYNC` frames received
    pub sync_requests: u32,
    /// Byte addresses loaded with `LOAD_ADDRESS`
    pub load_addresses: Vec<u32>,
    /// Page data of every accepted `PROG_PAGE`
    pub page_writes: Vec<Vec<u8>>,
    /// Bootloader is running (as opposed to the sketch)
    pub in_bootloader: bool,
    /// Between `ENTER_PROGMODE` and `LEAVE_PROGMODE`
    pub in_program_mode: bool,
    /// Resets seen
    pub resets: usize,
    open_baud: Option<u32>,
    dtr: bool,
    word_address: u32,
    page_commands: usize,
    stale_delivered: bool,
    rx: VecDeque<u8>,
}

impl DummyState {
    fn new(config: &DummyConfig) -> Self {
        Self {
            flash: vec![0xFF; config.flash_size],
            opens: 0,
            closes: 0,
            open_bauds: Vec::new(),
            signals: Vec::new(),
            elapsed_ms: 0,
            sync_requests: 0,
            load_addresses: Vec::new(),
            page_writes: Vec::new(),
            in_bootloader: !config.require_reset,
            in_program_mode: false,
            resets: 0,
            open_baud: None,
            dtr: false,
            word_address: 0,
            page_commands: 0,
            stale_delivered: false,
            rx: VecDeque::new(),
        }
    }

    /// Whether the port is currently open
    pub fn is_open(&self) -> bool {
        self.open_baud.is_some()
    }

    fn reset(&mut self) {
        log::debug!("dummy: reset, entering bootloader");
        self.resets += 1;
        self.in_bootloader = true;
        self.in_program_mode = false;
    }
}

fn reply(payload: &[u8]) -> Option<Vec<u8>> {
    let mut r = Vec::with_capacity(payload.len() + 2);
    r.push(protocol::STK_INSYNC);
    r.extend_from_slice(payload);
    r.push(protocol::STK_OK);
    Some(r)
}

/// Emulated Arduino with an STK500v1 bootloader
pub struct DummyBootloader {
    config: DummyConfig,
    state: Arc<Mutex<DummyState>>,
}

impl DummyBootloader {
    /// Create a board with erased flash
    pub fn new(config: DummyConfig) -> Self {
        let state = Arc::new(Mutex::new(DummyState::new(&config)));
        Self { config, state }
    }

    /// Create a board with the default configuration (optiboot on a Uno)
    pub fn new_default() -> Self {
        Self::new(DummyConfig::default())
    }

    fn with_state(config: DummyConfig, state: Arc<Mutex<DummyState>>) -> Self {
        Self { config, state }
    }

    /// Shared handle to the board state
    pub fn state(&self) -> Arc<Mutex<DummyState>> {
        Arc::clone(&self.state)
    }

    /// Get the configuration
    pub fn config(&self) -> &DummyConfig {
        &self.config
    }

    /// Programmed part of the flash, without trailing erased bytes
    pub fn flash_image(&self) -> Option<FirmwareImage> {
        let state = self.lock();
        let end = state.flash.iter().rposition(|&b| b != 0xFF)? + 1;
        FirmwareImage::new(0, state.flash[..end].to_vec()).ok()
    }

    fn lock(&self) -> MutexGuard<'_, DummyState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn handle_frame(&self, state: &mut DummyState, frame: &[u8]) -> Option<Vec<u8>> {
        let (&opcode, rest) = frame.split_first()?;
        if opcode == protocol::STK_GET_SYNC {
            state.sync_requests += 1;
        }

        if state.open_baud != Some(self.config.bootloader_baud) {
            log::debug!("dummy: frame at wrong baud ignored");
            return None;
        }
        if !state.in_bootloader {
            log::debug!("dummy: sketch running, frame ignored");
            return None;
        }
        if rest.last() != Some(&protocol::CRC_EOP) {
            return Some(vec![STK_NOSYNC]);
        }
        let params = &rest[..rest.len() - 1];

        let ack = || Some(protocol::ACK.to_vec());
        let failed = || Some(vec![protocol::STK_INSYNC, STK_FAILED]);

        match opcode {
            protocol::STK_GET_SYNC => {
                if state.sync_requests <= self.config.sync_after {
                    None
                } else {
                    ack()
                }
            }
            protocol::STK_ENTER_PROGMODE => {
                if self.config.reject_enter_progmode {
                    return failed();
                }
                state.in_program_mode = true;
                ack()
            }
            protocol::STK_LEAVE_PROGMODE => {
                if self.config.reject_leave_progmode {
                    return failed();
                }
                state.in_program_mode = false;
                state.in_bootloader = false;
                ack()
            }
            protocol::STK_LOAD_ADDRESS => {
                let [lo, hi] = <[u8; 2]>::try_from(params).ok()?;
                state.word_address = u16::from_le_bytes([lo, hi]) as u32;
                state.load_addresses.push(state.word_address * 2);
                ack()
            }
            protocol::STK_PROG_PAGE => {
                let index = state.page_commands;
                state.page_commands += 1;
                if params.len() < 3 || params[2] != protocol::MEMTYPE_FLASH {
                    return failed();
                }
                let (header, data) = params.split_at(3);
                let len = u16::from_be_bytes([header[0], header[1]]) as usize;
                if data.len() != len {
                    return failed();
                }
                if self.config.fail_page == Some(index) {
                    return failed();
                }
                let start = state.word_address as usize * 2;
                if start + len > state.flash.len() {
                    return failed();
                }
                state.flash[start..start + len].copy_from_slice(data);
                if let Some(addr) = self.config.corrupt_flash_at {
                    let addr = addr as usize;
                    if (start..start + len).contains(&addr) {
                        state.flash[addr] = !state.flash[addr];
                    }
                }
                state.page_writes.push(data.to_vec());
                ack()
            }
            protocol::STK_READ_PAGE => {
                if params.len() != 3 || params[2] != protocol::MEMTYPE_FLASH {
                    return failed();
                }
                let len = u16::from_be_bytes([params[0], params[1]]) as usize;
                let start = state.word_address as usize * 2;
                let data = state.flash.get(start..start + len)?.to_vec();
                reply(&data)
            }
            protocol::STK_READ_SIGN => reply(&self.config.signature),
            protocol::STK_GET_PARAMETER => {
                let value = match *params.first()? {
                    param::HW_VER => 3,
                    param::SW_MAJOR => self.config.sw_version.0,
                    param::SW_MINOR => self.config.sw_version.1,
                    _ => 0x03,
                };
                reply(&[value])
            }
            _ => ack(),
        }
    }
}

#[maybe_async(AFIT)]
impl Transport for DummyBootloader {
    fn name(&self) -> &str {
        DUMMY_PORT
    }

    fn is_open(&self) -> bool {
        self.lock().is_open()
    }

    async fn open(&mut self, baud: u32, _frame: FrameConfig) -> Result<(), TransportError> {
        let mut state = self.lock();
        if state.is_open() {
            return Err(TransportError::AlreadyOpen(DUMMY_PORT.to_string()));
        }
        if self.config.fail_open_at == Some(baud) {
            return Err(TransportError::Unavailable {
                port: DUMMY_PORT.to_string(),
                reason: "Device or resource busy".to_string(),
            });
        }

        state.opens += 1;
        state.open_bauds.push(baud);
        state.open_baud = Some(baud);
        if baud == self.config.bootloader_baud && !state.stale_delivered {
            state.stale_delivered = true;
            state.rx.extend(self.config.stale_bytes.iter().copied());
        }
        log::debug!("dummy: opened at {} baud", baud);
        Ok(())
    }

    async fn close(&mut self) {
        let mut state = self.lock();
        if let Some(baud) = state.open_baud.take() {
            state.closes += 1;
            if baud == DEFAULT_TOUCH_BAUD {
                state.reset();
            }
            log::debug!("dummy: closed");
        }
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let mut state = self.lock();
        if !state.is_open() {
            return Err(TransportError::NotOpen(DUMMY_PORT.to_string()));
        }
        if let Some(response) = self.handle_frame(&mut state, data) {
            state.rx.extend(response);
        }
        Ok(())
    }

    async fn receive(&mut self, len: usize, timeout_ms: u32) -> Result<Vec<u8>, TransportError> {
        let mut state = self.lock();
        if !state.is_open() {
            return Err(TransportError::NotOpen(DUMMY_PORT.to_string()));
        }
        let take = len.min(state.rx.len());
        let data: Vec<u8> = state.rx.drain(..take).collect();
        if data.len() < len {
            state.elapsed_ms += timeout_ms as u64;
        }
        Ok(data)
    }

    async fn set_signals(&mut self, dtr: bool, rts: bool) -> Result<(), TransportError> {
        if !self.config.supports_signals {
            return Err(TransportError::SignalsUnsupported);
        }
        let mut state = self.lock();
        if !state.is_open() {
            return Err(TransportError::NotOpen(DUMMY_PORT.to_string()));
        }
        state.signals.push((dtr, rts));
        if dtr && !state.dtr {
            state.reset();
        }
        state.dtr = dtr;
        Ok(())
    }

    async fn sleep_ms(&mut self, ms: u32) {
        self.lock().elapsed_ms += ms as u64;
    }
}

/// Port capability exposing a single emulated board named `dummy`
#[derive(Clone)]
pub struct DummyPorts {
    config: DummyConfig,
    state: Arc<Mutex<DummyState>>,
}

impl DummyPorts {
    /// Create the capability and its board
    pub fn new(config: DummyConfig) -> Self {
        let state = Arc::new(Mutex::new(DummyState::new(&config)));
        Self { config, state }
    }

    /// Shared handle to the board state
    pub fn state(&self) -> Arc<Mutex<DummyState>> {
        Arc::clone(&self.state)
    }
}

impl Default for DummyPorts {
    fn default() -> Self {
        Self::new(DummyConfig::default())
    }
}

#[maybe_async(AFIT)]
impl SerialCapability for DummyPorts {
    type Transport = DummyBootloader;

    async fn authorized_ports(&self) -> Result<Vec<PortInfo>, TransportError> {
        Ok(vec![PortInfo {
            name: DUMMY_PORT.to_string(),
            vid: Some(0x2341),
            pid: Some(0x0043),
            manufacturer: Some("stkflash".to_string()),
            product: Some("Emulated STK500 bootloader".to_string()),
        }])
    }

    async fn request_port(&self, name: &str) -> Result<DummyBootloader, TransportError> {
        if name != DUMMY_PORT {
            return Err(TransportError::Unavailable {
                port: name.to_string(),
                reason: "No such file or directory".to_string(),
            });
        }
        Ok(DummyBootloader::with_state(
            self.config.clone(),
            Arc::clone(&self.state),
        ))
    }
}

#[cfg(all(test, feature = "is_sync"))]
mod tests {
    use super::*;
    use stkflash_core::{hex, EventLog, ResetTiming, UploadConfig};
    use stkflash_stk500::{
        force_bootloader_reset, reset_into_bootloader, DeviceSignature, Stk500, Stk500Error,
        TransportError,
    };

    fn open_in_bootloader(config: DummyConfig) -> DummyBootloader {
        let mut port = DummyBootloader::new(DummyConfig {
            require_reset: false,
            ..config
        });
        port.open(115_200, FrameConfig::default()).unwrap();
        port
    }

    fn exchange(port: &mut DummyBootloader, frame: &[u8], len: usize) -> Vec<u8> {
        port.send(frame).unwrap();
        port.receive(len, 100).unwrap()
    }

    fn session(config: DummyConfig) -> Stk500<DummyBootloader> {
        Stk500::new(DummyBootloader::new(config), UploadConfig::default())
    }

    fn image_of(len: usize) -> FirmwareImage {
        FirmwareImage::new(0, (0..len).map(|i| (i * 7) as u8).collect()).unwrap()
    }

    // Emulator

    #[test]
    fn test_get_sync() {
        let mut port = open_in_bootloader(DummyConfig::default());
        assert_eq!(exchange(&mut port, &[0x30, 0x20], 2), [0x14, 0x10]);
    }

    #[test]
    fn test_missing_eop_is_nosync() {
        let mut port = open_in_bootloader(DummyConfig::default());
        assert_eq!(exchange(&mut port, &[0x50], 2), [0x15]);
    }

    #[test]
    fn test_silent_until_reset() {
        let mut port = DummyBootloader::new_default();
        port.open(115_200, FrameConfig::default()).unwrap();
        assert!(exchange(&mut port, &[0x30, 0x20], 2).is_empty());

        port.set_signals(true, true).unwrap();
        assert_eq!(exchange(&mut port, &[0x30, 0x20], 2), [0x14, 0x10]);
    }

    #[test]
    fn test_touch_at_1200_resets() {
        let mut port = DummyBootloader::new(DummyConfig {
            supports_signals: false,
            ..DummyConfig::default()
        });
        port.open(1200, FrameConfig::default()).unwrap();
        port.close();
        assert_eq!(port.state().lock().unwrap().resets, 1);
        assert!(port.state().lock().unwrap().in_bootloader);
    }

    #[test]
    fn test_wrong_baud_is_silent() {
        let mut port = DummyBootloader::new(DummyConfig {
            require_reset: false,
            ..DummyConfig::default()
        });
        port.open(57_600, FrameConfig::default()).unwrap();
        assert!(exchange(&mut port, &[0x30, 0x20], 2).is_empty());
        assert_eq!(port.state().lock().unwrap().elapsed_ms, 100);
    }

    #[test]
    fn test_program_and_read_page() {
        let mut port = open_in_bootloader(DummyConfig::default());
        let page: Vec<u8> = (0..128u8).collect();

        assert_eq!(exchange(&mut port, &protocol::load_address_frame(256).unwrap(), 2), protocol::ACK);
        assert_eq!(exchange(&mut port, &protocol::prog_page_frame(&page), 2), protocol::ACK);
        assert_eq!(&port.state().lock().unwrap().flash[256..384], &page[..]);

        exchange(&mut port, &protocol::load_address_frame(256).unwrap(), 2);
        let reply = exchange(&mut port, &protocol::read_page_frame(4), 6);
        assert_eq!(reply, [0x14, 0, 1, 2, 3, 0x10]);
    }

    #[test]
    fn test_signals_unsupported() {
        let mut port = DummyBootloader::new(DummyConfig {
            supports_signals: false,
            ..DummyConfig::default()
        });
        port.open(115_200, FrameConfig::default()).unwrap();
        assert!(matches!(
            port.set_signals(true, true),
            Err(TransportError::SignalsUnsupported)
        ));
    }

    #[test]
    fn test_closed_port_errors() {
        let mut port = DummyBootloader::new_default();
        assert!(matches!(port.send(&[0x30, 0x20]), Err(TransportError::NotOpen(_))));
        assert!(matches!(port.receive(2, 10), Err(TransportError::NotOpen(_))));
        port.close();
        assert_eq!(port.state().lock().unwrap().closes, 0);
    }

    #[test]
    fn test_flash_image() {
        let mut port = open_in_bootloader(DummyConfig::default());
        assert!(port.flash_image().is_none());

        exchange(&mut port, &protocol::load_address_frame(0).unwrap(), 2);
        exchange(&mut port, &protocol::prog_page_frame(&[0xAA; 128]), 2);
        let image = port.flash_image().unwrap();
        assert_eq!(image.len(), 128);
        let text = hex::encode(&image).unwrap();
        assert!(text.trim_end().ends_with(":00000001FF"));
        assert_eq!(hex::parse(&text).unwrap(), image);
    }

    #[test]
    fn test_ports_share_one_board() {
        let ports = DummyPorts::default();
        assert_eq!(ports.authorized_ports().unwrap()[0].name, DUMMY_PORT);
        assert!(ports.request_port("/dev/ttyUSB9").is_err());

        let mut a = ports.request_port(DUMMY_PORT).unwrap();
        a.open(115_200, FrameConfig::default()).unwrap();
        let b = ports.request_port(DUMMY_PORT).unwrap();
        assert!(b.is_open());
        assert_eq!(ports.state().lock().unwrap().opens, 1);
    }

    // Reset sequencing

    #[test]
    fn test_reset_leaves_port_open_at_bootloader_baud() {
        let mut port = DummyBootloader::new_default();
        let mut log = EventLog::new();

        assert!(force_bootloader_reset(&mut port, 115_200, &ResetTiming::default(), &mut log));

        assert!(port.is_open());
        let state = port.state();
        let state = state.lock().unwrap();
        assert_eq!(state.open_bauds, vec![1200, 115_200]);
        assert_eq!(state.closes, 1);
        assert_eq!(
            state.signals,
            vec![(false, false), (true, true), (false, false)]
        );
        // 3 x 50 ms pulse + 350 ms settle + 200 ms after reopen
        assert_eq!(state.elapsed_ms, 700);
        assert!(state.in_bootloader);
    }

    #[test]
    fn test_reset_closes_open_port_first() {
        let mut port = DummyBootloader::new_default();
        port.open(57_600, FrameConfig::default()).unwrap();
        let mut log = EventLog::new();

        assert!(force_bootloader_reset(&mut port, 115_200, &ResetTiming::default(), &mut log));

        let state = port.state();
        let state = state.lock().unwrap();
        assert_eq!(state.open_bauds, vec![57_600, 1200, 115_200]);
        assert_eq!(state.closes, 2);
        assert!(log.logged("reset: closing port"));
    }

    #[test]
    fn test_reset_without_signal_control() {
        let mut port = DummyBootloader::new(DummyConfig {
            supports_signals: false,
            ..DummyConfig::default()
        });
        let mut log = EventLog::new();

        assert!(force_bootloader_reset(&mut port, 115_200, &ResetTiming::default(), &mut log));
        assert!(log.logged("skipping pulse"));
        let state = port.state();
        let state = state.lock().unwrap();
        assert!(state.signals.is_empty());
        // The 1200 baud touch alone reset the board
        assert!(state.in_bootloader);
    }

    #[test]
    fn test_reset_open_failure_returns_false_and_closes() {
        let mut port = DummyBootloader::new(DummyConfig {
            fail_open_at: Some(115_200),
            ..DummyConfig::default()
        });
        let mut log = EventLog::new();

        assert!(!force_bootloader_reset(&mut port, 115_200, &ResetTiming::default(), &mut log));
        assert!(!port.is_open());
        assert!(log.logged("reset: failed"));
        let state = port.state();
        let state = state.lock().unwrap();
        assert_eq!(state.opens, state.closes);
    }

    #[test]
    fn test_reset_keeps_open_error() {
        let mut port = DummyBootloader::new(DummyConfig {
            fail_open_at: Some(1200),
            ..DummyConfig::default()
        });
        let mut log = EventLog::new();

        let err = reset_into_bootloader(&mut port, 115_200, &ResetTiming::default(), &mut log)
            .unwrap_err();
        assert!(matches!(err, TransportError::Unavailable { .. }));
        assert!(!port.is_open());
    }

    // STK500 session

    #[test]
    fn test_commands_require_sync() {
        let mut stk = session(DummyConfig::default());
        assert!(matches!(
            stk.enter_program_mode(),
            Err(Stk500Error::NotSynchronized)
        ));
        assert!(matches!(
            stk.upload(&image_of(10), &mut EventLog::new()),
            Err(Stk500Error::NotSynchronized)
        ));
    }

    #[test]
    fn test_sync_on_third_attempt() {
        let mut stk = session(DummyConfig {
            sync_after: 2,
            ..DummyConfig::default()
        });
        let mut log = EventLog::new();

        assert_eq!(stk.connect(115_200, &mut log).unwrap(), 115_200);
        assert!(stk.is_synchronized());
        assert!(log.logged("in sync after 3 attempt(s)"));
        assert_eq!(stk.transport().state().lock().unwrap().sync_requests, 3);
    }

    #[test]
    fn test_sync_exhausts_attempts() {
        let mut port = DummyBootloader::new(DummyConfig {
            sync_after: 10,
            ..DummyConfig::default()
        });
        port.open(115_200, FrameConfig::default()).unwrap();
        let mut stk = Stk500::new(port, UploadConfig::default());
        let mut log = EventLog::new();

        assert!(!stk.try_quick_sync(5, 150, &mut log).unwrap());
        assert!(!stk.is_synchronized());
        assert_eq!(stk.transport().state().lock().unwrap().sync_requests, 5);
        assert!(log.logged("attempt 5/5: no response (timeout)"));
    }

    #[test]
    fn test_sync_on_last_allowed_attempt() {
        let mut port = DummyBootloader::new(DummyConfig {
            sync_after: 4,
            ..DummyConfig::default()
        });
        port.open(115_200, FrameConfig::default()).unwrap();
        let mut stk = Stk500::new(port, UploadConfig::default());
        let mut log = EventLog::new();

        assert!(stk.try_quick_sync(5, 150, &mut log).unwrap());
        assert!(stk.is_synchronized());
        assert!(log.logged("in sync after 5 attempt(s)"));
        assert_eq!(stk.transport().state().lock().unwrap().sync_requests, 5);
    }

    #[test]
    fn test_sync_one_attempt_short() {
        let mut port = DummyBootloader::new(DummyConfig {
            sync_after: 5,
            ..DummyConfig::default()
        });
        port.open(115_200, FrameConfig::default()).unwrap();
        let mut stk = Stk500::new(port, UploadConfig::default());
        let mut log = EventLog::new();

        assert!(!stk.try_quick_sync(5, 150, &mut log).unwrap());
        assert!(!stk.is_synchronized());
        assert_eq!(stk.transport().state().lock().unwrap().sync_requests, 5);

        // The sixth request is the one the board answers
        assert!(stk.try_quick_sync(1, 150, &mut log).unwrap());
        assert_eq!(stk.transport().state().lock().unwrap().sync_requests, 6);
    }

    #[test]
    fn test_sync_discards_stale_bytes() {
        let mut stk = session(DummyConfig {
            stale_bytes: vec![0x00, 0xF0, 0x14],
            ..DummyConfig::default()
        });
        let mut log = EventLog::new();

        stk.connect(115_200, &mut log).unwrap();
        assert!(log.logged("discarded 3 stale bytes"));
    }

    #[test]
    fn test_connect_falls_back_to_57600() {
        let mut stk = session(DummyConfig {
            bootloader_baud: 57_600,
            ..DummyConfig::default()
        });
        let mut log = EventLog::new();

        assert_eq!(stk.connect(115_200, &mut log).unwrap(), 57_600);
        assert_eq!(stk.negotiated_baud(), Some(57_600));
        let state = stk.transport().state();
        let state = state.lock().unwrap();
        assert_eq!(state.open_bauds, vec![1200, 115_200, 1200, 57_600]);
        assert_eq!(state.opens, state.closes + 1);
    }

    #[test]
    fn test_connect_failure_lists_bauds() {
        let mut stk = session(DummyConfig {
            sync_after: u32::MAX,
            ..DummyConfig::default()
        });
        let mut log = EventLog::new();

        match stk.connect(57_600, &mut log) {
            Err(Stk500Error::SyncFailure { bauds }) => assert_eq!(bauds, vec![57_600, 115_200]),
            other => panic!("unexpected {:?}", other),
        }
        assert!(!stk.transport().is_open());
        let state = stk.transport().state();
        let state = state.lock().unwrap();
        assert_eq!(state.opens, state.closes);
    }

    #[test]
    fn test_connect_reports_open_failure() {
        let mut stk = session(DummyConfig {
            fail_open_at: Some(1200),
            ..DummyConfig::default()
        });
        let mut log = EventLog::new();

        match stk.connect(115_200, &mut log) {
            Err(Stk500Error::Transport(TransportError::Unavailable { reason, .. })) => {
                assert!(reason.contains("busy"))
            }
            other => panic!("unexpected {:?}", other),
        }
        let reset_failures = log
            .lines
            .iter()
            .filter(|l| l.contains("connect: reset failed"))
            .count();
        assert_eq!(reset_failures, 2);
        let state = stk.transport().state();
        let state = state.lock().unwrap();
        assert_eq!(state.opens, 0);
        assert_eq!(state.sync_requests, 0);
    }

    #[test]
    fn test_connect_mixed_failures_are_sync_failure() {
        // 115200 cannot be opened, 57600 opens but nothing answers there
        let mut stk = session(DummyConfig {
            fail_open_at: Some(115_200),
            ..DummyConfig::default()
        });
        let mut log = EventLog::new();

        match stk.connect(115_200, &mut log) {
            Err(Stk500Error::SyncFailure { bauds }) => assert_eq!(bauds, vec![115_200, 57_600]),
            other => panic!("unexpected {:?}", other),
        }
        let state = stk.transport().state();
        let state = state.lock().unwrap();
        assert_eq!(state.opens, state.closes);
    }

    #[test]
    fn test_upload_beyond_addressable_flash_rejected() {
        let mut stk = session(DummyConfig::default());
        let mut log = EventLog::new();
        let image = FirmwareImage::new(0x2_0000, vec![0xAA; 128]).unwrap();

        stk.connect(115_200, &mut log).unwrap();
        match stk.upload(&image, &mut log) {
            Err(Stk500Error::AddressOutOfRange { address, limit }) => {
                assert_eq!(address, 0x2_007F);
                assert_eq!(limit, protocol::MAX_FLASH_BYTES);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            stk.load_address(0x2_0000),
            Err(Stk500Error::AddressOutOfRange { .. })
        ));

        let state = stk.transport().state();
        let state = state.lock().unwrap();
        assert!(state.load_addresses.is_empty());
        assert!(state.page_writes.is_empty());
        assert!(!state.in_program_mode);
        assert!(state.flash.iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_invalid_page_size_rejected() {
        let mut stk = Stk500::new(
            DummyBootloader::new(DummyConfig::default()),
            UploadConfig {
                page_size: 0,
                ..UploadConfig::default()
            },
        );
        let mut log = EventLog::new();

        stk.connect(115_200, &mut log).unwrap();
        assert!(matches!(
            stk.upload(&image_of(10), &mut log),
            Err(Stk500Error::InvalidPageSize(0))
        ));
        assert!(matches!(
            stk.program_page(&[0; 4]),
            Err(Stk500Error::InvalidPageSize(0))
        ));
        assert!(stk.transport().state().lock().unwrap().page_writes.is_empty());
    }

    #[test]
    fn test_upload_300_bytes() {
        let mut stk = session(DummyConfig::default());
        let mut log = EventLog::new();
        let image = image_of(300);

        stk.connect(115_200, &mut log).unwrap();
        let stats = stk.upload(&image, &mut log).unwrap();
        assert_eq!(stats.pages, 3);
        assert_eq!(stats.bytes, 300);
        assert!(!stats.verified);

        let state = stk.transport().state();
        let state = state.lock().unwrap();
        assert_eq!(state.load_addresses, vec![0, 128, 256]);
        assert_eq!(state.page_writes.len(), 3);
        assert!(state.page_writes.iter().all(|p| p.len() == 128));
        assert_eq!(&state.page_writes[2][..44], &image.data()[256..]);
        assert!(state.page_writes[2][44..].iter().all(|&b| b == 0xFF));
        assert_eq!(&state.flash[..300], image.data());
        assert!(!state.in_program_mode);
        drop(state);

        let percents = log.percents();
        assert_eq!(percents.first(), Some(&15));
        assert_eq!(percents.get(1), Some(&20));
        assert_eq!(percents.last(), Some(&100));
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_program_page_pads_every_length() {
        let mut stk = session(DummyConfig::default());
        stk.connect(115_200, &mut EventLog::new()).unwrap();
        let state = stk.transport().state();

        for len in 1..=128usize {
            let data = vec![0x5A; len];
            stk.load_address(0).unwrap();
            stk.program_page(&data).unwrap();
            let state = state.lock().unwrap();
            let written = state.page_writes.last().unwrap();
            assert_eq!(written.len(), 128);
            assert!(written[..len].iter().all(|&b| b == 0x5A));
            assert!(written[len..].iter().all(|&b| b == 0xFF));
        }
    }

    #[test]
    fn test_program_page_too_large() {
        let mut stk = session(DummyConfig::default());
        stk.connect(115_200, &mut EventLog::new()).unwrap();
        assert!(matches!(
            stk.program_page(&[0; 129]),
            Err(Stk500Error::PageTooLarge { len: 129, .. })
        ));
    }

    #[test]
    fn test_enter_progmode_rejected() {
        let mut stk = session(DummyConfig {
            reject_enter_progmode: true,
            ..DummyConfig::default()
        });
        let mut log = EventLog::new();
        stk.connect(115_200, &mut log).unwrap();

        match stk.upload(&image_of(10), &mut log) {
            Err(Stk500Error::Protocol { command, response }) => {
                assert_eq!(command, protocol::STK_ENTER_PROGMODE);
                assert_eq!(response, [0x14, 0x11]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_page_write_failure_stops_upload() {
        let mut stk = session(DummyConfig {
            fail_page: Some(1),
            ..DummyConfig::default()
        });
        let mut log = EventLog::new();
        stk.connect(115_200, &mut log).unwrap();

        let err = stk.upload(&image_of(300), &mut log).unwrap_err();
        assert!(matches!(err, Stk500Error::Protocol { command: 0x64, .. }));
        assert_eq!(stk.transport().state().lock().unwrap().page_writes.len(), 1);
    }

    #[test]
    fn test_leave_progmode_failure_is_not_fatal() {
        let mut stk = session(DummyConfig {
            reject_leave_progmode: true,
            ..DummyConfig::default()
        });
        let mut log = EventLog::new();
        stk.connect(115_200, &mut log).unwrap();

        stk.upload(&image_of(64), &mut log).unwrap();
        assert!(log.logged("leaving programming mode failed"));
        assert_eq!(log.percents().last(), Some(&100));
    }

    #[test]
    fn test_verify_after_upload() {
        let config = UploadConfig {
            verify: true,
            ..UploadConfig::default()
        };
        let mut stk = Stk500::new(DummyBootloader::new_default(), config);
        let mut log = EventLog::new();
        stk.connect(115_200, &mut log).unwrap();

        let image =
            hex::parse(":100000000C9434000C943E000C943E000C943E0082\n:00000001FF\n").unwrap();
        let stats = stk.upload(&image, &mut log).unwrap();
        assert!(stats.verified);
        assert!(log.percents().contains(&95));
    }

    #[test]
    fn test_verify_mismatch() {
        let mut stk = session(DummyConfig {
            corrupt_flash_at: Some(130),
            ..DummyConfig::default()
        });
        let mut log = EventLog::new();
        let image = image_of(200);
        stk.connect(115_200, &mut log).unwrap();
        stk.upload(&image, &mut log).unwrap();

        // Leaving programming mode started the sketch
        stk.connect(115_200, &mut log).unwrap();
        match stk.verify(&image, &mut log) {
            Err(Stk500Error::VerifyMismatch {
                address,
                expected,
                found,
            }) => {
                assert_eq!(address, 130);
                assert_eq!(expected, image.data()[130]);
                assert_eq!(found, !expected);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_signature_and_version() {
        let mut stk = session(DummyConfig::default());
        stk.connect(115_200, &mut EventLog::new()).unwrap();

        assert_eq!(stk.read_signature().unwrap(), DeviceSignature::ATMEGA328P);
        assert_eq!(stk.bootloader_version().unwrap(), (8, 0));
    }

    #[test]
    fn test_disconnect_closes() {
        let mut stk = session(DummyConfig::default());
        stk.connect(115_200, &mut EventLog::new()).unwrap();
        stk.disconnect();
        assert!(!stk.transport().is_open());
        assert!(!stk.is_synchronized());
        assert_eq!(stk.negotiated_baud(), None);
    }
}
