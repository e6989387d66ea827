//! Bootloader reset sequencing
//!
//! Arduino boards start the bootloader for a short window after reset, and
//! reset is wired to DTR through a capacitor. The sequence below combines a
//! 1200 baud "touch" (used by native-USB boards) with an explicit DTR/RTS
//! pulse, then reopens the port at the bootloader's baud rate.

use crate::transport::{FrameConfig, Transport, TransportResult};
use crate::error::TransportError;
use maybe_async::maybe_async;
use stkflash_core::{ResetTiming, UploadObserver};

/// DTR/RTS levels driven during the reset pulse
const PULSE_STEPS: [(bool, bool); 3] = [(false, false), (true, true), (false, false)];

/// Reset the board into its bootloader
///
/// On success the transport is left open at `bootloader_baud`. Returns
/// `false` on any failure, in which case the transport is closed.
#[maybe_async]
pub async fn force_bootloader_reset<T: Transport>(
    transport: &mut T,
    bootloader_baud: u32,
    timing: &ResetTiming,
    observer: &mut dyn UploadObserver,
) -> bool {
    reset_into_bootloader(transport, bootloader_baud, timing, observer)
        .await
        .is_ok()
}

/// Like [`force_bootloader_reset`], but keeps the transport error
///
/// The transport is closed whenever an error is returned.
#[maybe_async]
pub async fn reset_into_bootloader<T: Transport>(
    transport: &mut T,
    bootloader_baud: u32,
    timing: &ResetTiming,
    observer: &mut dyn UploadObserver,
) -> TransportResult<()> {
    let result = reset_sequence(transport, bootloader_baud, timing, observer).await;
    if let Err(e) = &result {
        log::warn!("reset: {} failed: {}", transport.name(), e);
        observer.on_log(&format!("reset: failed: {}", e));
        transport.close().await;
    }
    result
}

#[maybe_async]
async fn reset_sequence<T: Transport>(
    transport: &mut T,
    bootloader_baud: u32,
    timing: &ResetTiming,
    observer: &mut dyn UploadObserver,
) -> TransportResult<()> {
    if transport.is_open() {
        observer.on_log("reset: closing port");
        transport.close().await;
    }

    observer.on_log(&format!("reset: opening at {} baud", timing.touch_baud));
    transport.open(timing.touch_baud, FrameConfig::default()).await?;

    pulse_reset(transport, timing.signal_step_ms, observer).await;

    transport.close().await;
    observer.on_log(&format!(
        "reset: waiting {} ms for the bootloader",
        timing.post_reset_settle_ms
    ));
    transport.sleep_ms(timing.post_reset_settle_ms).await;

    observer.on_log(&format!("reset: reopening at {} baud", bootloader_baud));
    transport.open(bootloader_baud, FrameConfig::default()).await?;
    transport.sleep_ms(timing.post_open_settle_ms).await;

    Ok(())
}

/// Pulse DTR/RTS low, high, low
///
/// Skipped when the transport has no signal control.
#[maybe_async]
async fn pulse_reset<T: Transport>(
    transport: &mut T,
    step_ms: u32,
    observer: &mut dyn UploadObserver,
) {
    for (dtr, rts) in PULSE_STEPS {
        match transport.set_signals(dtr, rts).await {
            Ok(()) => observer.on_log(&format!("reset: DTR={} RTS={}", dtr as u8, rts as u8)),
            Err(TransportError::SignalsUnsupported) => {
                observer.on_log("reset: signal control unavailable, skipping pulse");
                return;
            }
            Err(e) => {
                log::warn!("reset: signal pulse failed: {}", e);
                observer.on_log(&format!("reset: signal pulse failed: {}", e));
                return;
            }
        }
        transport.sleep_ms(step_ms).await;
    }
}
