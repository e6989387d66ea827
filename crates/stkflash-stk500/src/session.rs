//! STK500 session: synchronization, page programming and readback

use crate::error::{describe_response, Result, Stk500Error};
use crate::protocol::{self, param, DeviceSignature};
use crate::reset::reset_into_bootloader;
use crate::transport::Transport;
use maybe_async::maybe_async;
use stkflash_core::progress::scale_percent;
use stkflash_core::{FirmwareImage, Page, UploadConfig, UploadObserver};

/// Bytes requested per read while draining stale input
const DRAIN_CHUNK: usize = 64;

/// Summary of a finished upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadStats {
    /// Pages written
    pub pages: usize,
    /// Image bytes written (without padding)
    pub bytes: usize,
    /// Baud rate the session ran at
    pub baud: u32,
    /// Whether the pages were read back and compared
    pub verified: bool,
}

/// An STK500v1 session over a [`Transport`]
///
/// Owns the transport. Nothing but synchronization may be sent before
/// [`connect`](Self::connect) succeeds.
pub struct Stk500<T: Transport> {
    transport: T,
    config: UploadConfig,
    baud: Option<u32>,
    synchronized: bool,
}

impl<T: Transport> Stk500<T> {
    /// Create a session; nothing is sent until [`connect`](Self::connect)
    pub fn new(transport: T, config: UploadConfig) -> Self {
        Self {
            transport,
            config,
            baud: None,
            synchronized: false,
        }
    }

    /// Baud rate at which synchronization succeeded
    pub fn negotiated_baud(&self) -> Option<u32> {
        self.baud
    }

    /// Whether the bootloader answered `GET_SYNC`
    pub fn is_synchronized(&self) -> bool {
        self.synchronized
    }

    /// Session configuration
    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Borrow the transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Give back the transport
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Reset the board and synchronize, trying each candidate baud rate
    ///
    /// Candidates are `preferred_baud` followed by the configured fallbacks.
    /// The port is closed between candidates. Returns the baud rate that
    /// synchronized. When the reset failed for every candidate the last
    /// transport error is returned instead of [`Stk500Error::SyncFailure`].
    #[maybe_async]
    pub async fn connect(
        &mut self,
        preferred_baud: u32,
        observer: &mut dyn UploadObserver,
    ) -> Result<u32> {
        let bauds = self.config.candidate_bauds(preferred_baud);
        let attempts = self.config.sync.attempts;
        let timeout_ms = self.config.sync.attempt_timeout_ms;

        let mut reset_failures = 0;
        let mut last_reset_error = None;
        for &baud in &bauds {
            observer.on_log(&format!("connect: trying {} baud", baud));
            if let Err(e) =
                reset_into_bootloader(&mut self.transport, baud, &self.config.reset, observer).await
            {
                observer.on_log(&format!("connect: reset failed at {} baud", baud));
                reset_failures += 1;
                last_reset_error = Some(e);
                continue;
            }

            match self.try_quick_sync(attempts, timeout_ms, observer).await {
                Ok(true) => {
                    log::info!("Bootloader in sync on {} at {} baud", self.transport.name(), baud);
                    self.baud = Some(baud);
                    return Ok(baud);
                }
                Ok(false) => observer.on_log(&format!("connect: no sync at {} baud", baud)),
                Err(e) => observer.on_log(&format!("connect: sync at {} baud failed: {}", baud, e)),
            }
            self.transport.close().await;
        }

        // Every candidate failed before sync; report why the port would not open
        if reset_failures == bauds.len() {
            if let Some(e) = last_reset_error {
                return Err(Stk500Error::Transport(e));
            }
        }
        log::warn!("No bootloader response on {}", self.transport.name());
        Err(Stk500Error::SyncFailure { bauds })
    }

    /// Send `GET_SYNC` until the bootloader answers `[INSYNC, OK]`
    ///
    /// Stale input is drained first. Returns `Ok(false)` when every attempt
    /// went unanswered; only transport failures are errors.
    #[maybe_async]
    pub async fn try_quick_sync(
        &mut self,
        max_attempts: u32,
        timeout_ms: u32,
        observer: &mut dyn UploadObserver,
    ) -> Result<bool> {
        self.synchronized = false;

        if self.config.sync.pulse_dtr {
            self.pulse_dtr(observer).await;
        }

        let stale = self.drain().await?;
        if stale > 0 {
            observer.on_log(&format!("sync: discarded {} stale bytes", stale));
        }

        let get_sync = protocol::frame(protocol::STK_GET_SYNC, &[]);
        for attempt in 1..=max_attempts {
            self.transport.send(&get_sync).await?;
            let response = self.transport.receive(2, timeout_ms).await?;
            if protocol::is_ack(&response) {
                observer.on_log(&format!("sync: in sync after {} attempt(s)", attempt));
                self.synchronized = true;
                return Ok(true);
            }
            observer.on_log(&format!(
                "sync: attempt {}/{}: {}",
                attempt,
                max_attempts,
                describe_response(&response)
            ));
            if attempt < max_attempts {
                self.transport
                    .sleep_ms(self.config.sync.inter_attempt_delay_ms)
                    .await;
            }
        }

        Ok(false)
    }

    #[maybe_async]
    async fn pulse_dtr(&mut self, observer: &mut dyn UploadObserver) {
        let pulse_ms = self.config.sync.pulse_ms;
        if self.transport.set_signals(true, true).await.is_err() {
            observer.on_log("sync: no signal control, skipping DTR pulse");
            return;
        }
        self.transport.sleep_ms(pulse_ms).await;
        if let Err(e) = self.transport.set_signals(false, false).await {
            log::debug!("sync: releasing DTR failed: {}", e);
        }
    }

    /// Discard pending input, bounded by `drain_max_reads`
    #[maybe_async]
    async fn drain(&mut self) -> Result<usize> {
        let mut discarded = 0;
        for _ in 0..self.config.sync.drain_max_reads {
            let stale = self
                .transport
                .receive(DRAIN_CHUNK, self.config.sync.drain_timeout_ms)
                .await?;
            if stale.is_empty() {
                break;
            }
            discarded += stale.len();
        }
        Ok(discarded)
    }

    /// Configured page size, if `PROG_PAGE` can carry it
    fn page_size(&self) -> Result<usize> {
        if self.config.page_size_is_valid() {
            Ok(self.config.page_size)
        } else {
            Err(Stk500Error::InvalidPageSize(self.config.page_size))
        }
    }

    /// Send a command and require exactly `[INSYNC, OK]`
    #[maybe_async]
    async fn command(&mut self, frame: &[u8], timeout_ms: u32) -> Result<()> {
        if !self.synchronized {
            return Err(Stk500Error::NotSynchronized);
        }
        self.transport.send(frame).await?;
        let response = self.transport.receive(2, timeout_ms).await?;
        if protocol::is_ack(&response) {
            Ok(())
        } else {
            log::debug!("stk500: 0x{:02X} got {}", frame[0], describe_response(&response));
            Err(Stk500Error::Protocol {
                command: frame[0],
                response,
            })
        }
    }

    /// Send a command answered by `[INSYNC, payload.., OK]`
    #[maybe_async]
    async fn query(&mut self, frame: &[u8], payload_len: usize) -> Result<Vec<u8>> {
        if !self.synchronized {
            return Err(Stk500Error::NotSynchronized);
        }
        self.transport.send(frame).await?;
        let response = self
            .transport
            .receive(payload_len + 2, self.config.command_timeout_ms)
            .await?;
        match protocol::unwrap_reply(&response, payload_len) {
            Some(payload) => Ok(payload.to_vec()),
            None => Err(Stk500Error::Protocol {
                command: frame[0],
                response,
            }),
        }
    }

    /// `ENTER_PROGMODE`
    #[maybe_async]
    pub async fn enter_program_mode(&mut self) -> Result<()> {
        let frame = protocol::frame(protocol::STK_ENTER_PROGMODE, &[]);
        self.command(&frame, self.config.command_timeout_ms).await
    }

    /// `LEAVE_PROGMODE`, which also starts the sketch on optiboot
    #[maybe_async]
    pub async fn leave_program_mode(&mut self) -> Result<()> {
        let frame = protocol::frame(protocol::STK_LEAVE_PROGMODE, &[]);
        self.command(&frame, self.config.command_timeout_ms).await
    }

    /// `LOAD_ADDRESS` for a byte address
    #[maybe_async]
    pub async fn load_address(&mut self, byte_address: u32) -> Result<()> {
        let frame = protocol::load_address_frame(byte_address).ok_or(
            Stk500Error::AddressOutOfRange {
                address: byte_address,
                limit: protocol::MAX_FLASH_BYTES,
            },
        )?;
        self.command(&frame, self.config.command_timeout_ms).await
    }

    /// `PROG_PAGE` at the loaded address
    ///
    /// `data` shorter than a page is padded with 0xFF.
    #[maybe_async]
    pub async fn program_page(&mut self, data: &[u8]) -> Result<()> {
        let page_size = self.page_size()?;
        if data.len() > page_size {
            return Err(Stk500Error::PageTooLarge {
                len: data.len(),
                page_size,
            });
        }
        let page = Page::padded(0, data, page_size);
        let frame = protocol::prog_page_frame(&page.data);
        self.command(&frame, self.config.page_write_timeout_ms).await
    }

    /// `READ_PAGE` of `len` flash bytes at the loaded address
    #[maybe_async]
    pub async fn read_page(&mut self, len: usize) -> Result<Vec<u8>> {
        let page_size = self.page_size()?;
        if len > page_size {
            return Err(Stk500Error::PageTooLarge { len, page_size });
        }
        let frame = protocol::read_page_frame(len as u16);
        self.query(&frame, len).await
    }

    /// `READ_SIGN`
    #[maybe_async]
    pub async fn read_signature(&mut self) -> Result<DeviceSignature> {
        let frame = protocol::frame(protocol::STK_READ_SIGN, &[]);
        let sig = self.query(&frame, 3).await?;
        Ok(DeviceSignature([sig[0], sig[1], sig[2]]))
    }

    /// `GET_PARAMETER`
    #[maybe_async]
    pub async fn get_parameter(&mut self, parameter: u8) -> Result<u8> {
        let frame = protocol::frame(protocol::STK_GET_PARAMETER, &[parameter]);
        let value = self.query(&frame, 1).await?;
        Ok(value[0])
    }

    /// Bootloader software version as (major, minor)
    #[maybe_async]
    pub async fn bootloader_version(&mut self) -> Result<(u8, u8)> {
        let major = self.get_parameter(param::SW_MAJOR).await?;
        let minor = self.get_parameter(param::SW_MINOR).await?;
        Ok((major, minor))
    }

    /// Program `image`
    ///
    /// Requires a prior successful [`connect`](Self::connect). Enters
    /// programming mode, writes every page, optionally verifies, then
    /// leaves programming mode. A failure to leave is logged and ignored.
    /// Images reaching past [`protocol::MAX_FLASH_BYTES`] are rejected
    /// before anything is written.
    #[maybe_async]
    pub async fn upload(
        &mut self,
        image: &FirmwareImage,
        observer: &mut dyn UploadObserver,
    ) -> Result<UploadStats> {
        let baud = match (self.synchronized, self.baud) {
            (true, Some(baud)) => baud,
            _ => return Err(Stk500Error::NotSynchronized),
        };
        let page_size = self.page_size()?;
        if image.end_address() > protocol::MAX_FLASH_BYTES {
            return Err(Stk500Error::AddressOutOfRange {
                address: image.end_address() - 1,
                limit: protocol::MAX_FLASH_BYTES,
            });
        }
        observer.on_progress(&format!("In sync with bootloader at {} baud", baud), 15);

        self.enter_program_mode().await?;
        observer.on_progress("Entered programming mode", 20);

        let total = image.page_count(page_size);
        for (index, page) in image.pages(page_size).enumerate() {
            observer.on_log(&format!(
                "write: page {}/{} at 0x{:04X} ({} bytes)",
                index + 1,
                total,
                page.address,
                page.payload_len
            ));
            self.load_address(page.address).await?;
            self.program_page(&page.data).await?;
            observer.on_progress(
                &format!("Writing page {}/{}", index + 1, total),
                scale_percent(index + 1, total, 20, 90),
            );
        }

        let verified = self.config.verify;
        if verified {
            self.verify(image, observer).await?;
        }

        if let Err(e) = self.leave_program_mode().await {
            log::warn!("Leaving programming mode failed: {}", e);
            observer.on_log(&format!("write: leaving programming mode failed: {}", e));
        }
        observer.on_progress("Upload complete", 100);

        Ok(UploadStats {
            pages: total,
            bytes: image.len(),
            baud,
            verified,
        })
    }

    /// Read every page back and compare with `image`
    #[maybe_async]
    pub async fn verify(
        &mut self,
        image: &FirmwareImage,
        observer: &mut dyn UploadObserver,
    ) -> Result<()> {
        let page_size = self.page_size()?;
        let total = image.page_count(page_size);
        for (index, page) in image.pages(page_size).enumerate() {
            self.load_address(page.address).await?;
            let found = self.read_page(page.payload_len).await?;
            let expected = &page.data[..page.payload_len];
            if let Some(offset) = expected.iter().zip(&found).position(|(a, b)| a != b) {
                return Err(Stk500Error::VerifyMismatch {
                    address: page.address + offset as u32,
                    expected: expected[offset],
                    found: found[offset],
                });
            }
            observer.on_progress(
                &format!("Verifying page {}/{}", index + 1, total),
                scale_percent(index + 1, total, 90, 95),
            );
        }
        Ok(())
    }

    /// Close the transport and forget the sync state
    #[maybe_async]
    pub async fn disconnect(&mut self) {
        self.transport.close().await;
        self.synchronized = false;
        self.baud = None;
    }
}
