//! Upload orchestration
//!
//! [`Uploader`] strings the pieces together: compile, decode, parse, get a
//! port from the capability, reset and sync, program. Whatever happens, the
//! port is closed before returning, and only one operation runs at a time
//! per uploader.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::board::{self, Board};
use crate::compile::{firmware_hex, CompileRequest, Compiler};
use crate::context::UploadContext;
use crate::error::{Result, UploadError};
use maybe_async::maybe_async;
use stkflash_core::{hex, FirmwareImage, UploadConfig, UploadObserver};
use stkflash_stk500::{DeviceSignature, SerialCapability, Stk500, Transport, UploadStats};

/// Result of a successful upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    /// Image bytes written
    pub bytes: usize,
    /// Pages written
    pub pages: usize,
    /// Baud rate that synchronized
    pub baud: u32,
    /// Whether the pages were read back
    pub verified: bool,
    /// Wall-clock duration, where a clock is available
    pub elapsed: Option<Duration>,
}

/// What a probe found on the port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReport {
    /// Baud rate that synchronized
    pub baud: u32,
    /// Device signature
    pub signature: DeviceSignature,
    /// Bootloader version (major, minor)
    pub bootloader_version: (u8, u8),
    /// Whether the signature matches the selected board
    pub signature_matches: bool,
}

/// Clears the busy flag on drop
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(not(target_arch = "wasm32"))]
struct Stopwatch(std::time::Instant);

#[cfg(not(target_arch = "wasm32"))]
impl Stopwatch {
    fn start() -> Self {
        Self(std::time::Instant::now())
    }

    fn elapsed(&self) -> Option<Duration> {
        Some(self.0.elapsed())
    }
}

#[cfg(target_arch = "wasm32")]
struct Stopwatch;

#[cfg(target_arch = "wasm32")]
impl Stopwatch {
    fn start() -> Self {
        Self
    }

    fn elapsed(&self) -> Option<Duration> {
        None
    }
}

/// Runs uploads against ports from `C`, compiling with `K`
pub struct Uploader<C: SerialCapability, K: Compiler> {
    ports: C,
    compiler: K,
    config: UploadConfig,
    busy: AtomicBool,
}

impl<C: SerialCapability, K: Compiler> Uploader<C, K> {
    /// Create an uploader
    pub fn new(ports: C, compiler: K, config: UploadConfig) -> Self {
        Self {
            ports,
            compiler,
            config,
            busy: AtomicBool::new(false),
        }
    }

    /// Upload configuration
    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// The port capability
    pub fn ports(&self) -> &C {
        &self.ports
    }

    /// Whether an operation is running
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    fn acquire(&self) -> Result<BusyGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| BusyGuard(&self.busy))
            .map_err(|_| UploadError::Busy)
    }

    /// Compile `source` and upload it
    #[maybe_async]
    pub async fn upload(
        &self,
        ctx: &mut UploadContext,
        source: &str,
        observer: &mut dyn UploadObserver,
    ) -> Result<UploadReport> {
        if source.trim().is_empty() {
            return Err(UploadError::NoSource);
        }
        let (port, board) = validate(ctx)?;
        let _guard = self.acquire()?;
        let monitor_closed = release_monitor(ctx, observer);

        observer.on_progress(&format!("Compiling for {}", board.name), 2);
        let request = CompileRequest {
            source: source.to_string(),
            board: board.fqbn.to_string(),
        };
        let response = self.compiler.compile(&request).await;
        let text = firmware_hex(&response)?;
        let image = hex::parse(&text)?;
        observer.on_progress(
            &format!("Compiled {} bytes at 0x{:04X}", image.len(), image.start_address()),
            10,
        );

        self.flash(&port, board, &image, monitor_closed, observer)
            .await
    }

    /// Upload an already built image
    #[maybe_async]
    pub async fn upload_image(
        &self,
        ctx: &mut UploadContext,
        image: &FirmwareImage,
        observer: &mut dyn UploadObserver,
    ) -> Result<UploadReport> {
        let (port, board) = validate(ctx)?;
        let _guard = self.acquire()?;
        let monitor_closed = release_monitor(ctx, observer);
        self.flash(&port, board, image, monitor_closed, observer)
            .await
    }

    /// Connect and read the signature and bootloader version
    #[maybe_async]
    pub async fn probe(
        &self,
        ctx: &mut UploadContext,
        observer: &mut dyn UploadObserver,
    ) -> Result<ProbeReport> {
        let (port, board) = validate(ctx)?;
        let _guard = self.acquire()?;
        let monitor_closed = release_monitor(ctx, observer);

        let mut stk = self.open_session(&port, monitor_closed, observer).await?;
        let result = identify(&mut stk, board, observer).await;
        stk.disconnect().await;
        observer.on_log("probe: port released");
        result.map_err(UploadError::from)
    }

    #[maybe_async]
    async fn open_session(
        &self,
        port: &str,
        monitor_closed: bool,
        observer: &mut dyn UploadObserver,
    ) -> Result<Stk500<C::Transport>> {
        let mut transport = self.ports.request_port(port).await?;
        if monitor_closed {
            observer.on_log(&format!(
                "upload: waiting {} ms for the monitor to release the port",
                self.config.monitor_release_ms
            ));
            transport.sleep_ms(self.config.monitor_release_ms).await;
        }
        Ok(Stk500::new(transport, self.config.clone()))
    }

    #[maybe_async]
    async fn flash(
        &self,
        port: &str,
        board: &Board,
        image: &FirmwareImage,
        monitor_closed: bool,
        observer: &mut dyn UploadObserver,
    ) -> Result<UploadReport> {
        let stopwatch = Stopwatch::start();
        let mut stk = self.open_session(port, monitor_closed, observer).await?;

        let result = program(&mut stk, board, image, observer).await;
        stk.disconnect().await;
        observer.on_log("upload: port released");

        let stats = result?;
        let report = UploadReport {
            bytes: stats.bytes,
            pages: stats.pages,
            baud: stats.baud,
            verified: stats.verified,
            elapsed: stopwatch.elapsed(),
        };
        log::info!(
            "Uploaded {} bytes ({} pages) to {} at {} baud",
            report.bytes,
            report.pages,
            port,
            report.baud
        );
        Ok(report)
    }
}

fn validate(ctx: &UploadContext) -> Result<(String, &'static Board)> {
    let port = ctx.port.clone().ok_or(UploadError::NoPort)?;
    let board =
        board::find(&ctx.board).ok_or_else(|| UploadError::UnknownBoard(ctx.board.clone()))?;
    if let Some(reason) = board.unsupported_reason() {
        return Err(UploadError::UnsupportedBoard {
            fqbn: board.fqbn.to_string(),
            reason,
        });
    }
    Ok((port, board))
}

/// Close an active monitor; returns whether one was closed
fn release_monitor(ctx: &mut UploadContext, observer: &mut dyn UploadObserver) -> bool {
    match ctx.monitor.as_mut() {
        Some(monitor) if monitor.is_active() => {
            observer.on_log("upload: closing serial monitor");
            monitor.close();
            true
        }
        _ => false,
    }
}

#[maybe_async]
async fn program<T: Transport>(
    stk: &mut Stk500<T>,
    board: &Board,
    image: &FirmwareImage,
    observer: &mut dyn UploadObserver,
) -> stkflash_stk500::Result<UploadStats> {
    stk.connect(board.bootloader_baud, observer).await?;
    stk.upload(image, observer).await
}

#[maybe_async]
async fn identify<T: Transport>(
    stk: &mut Stk500<T>,
    board: &Board,
    observer: &mut dyn UploadObserver,
) -> stkflash_stk500::Result<ProbeReport> {
    let baud = stk.connect(board.bootloader_baud, observer).await?;
    let signature = stk.read_signature().await?;
    let bootloader_version = stk.bootloader_version().await?;
    let signature_matches = signature.0 == board.signature;
    if !signature_matches {
        log::warn!(
            "Signature {} does not match {} ({:02X?})",
            signature,
            board.name,
            board.signature
        );
    }
    Ok(ProbeReport {
        baud,
        signature,
        bootloader_version,
        signature_matches,
    })
}
