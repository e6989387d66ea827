//! Probe command implementation

use super::progress::IndicatifProgress;
use super::report_failure;
use stkflash_stk500::SerialCapability;
use stkflash_upload::{board, Compiler, UploadContext, Uploader};

/// Reset the board, sync and print what the bootloader reports
pub fn run_probe<C: SerialCapability, K: Compiler>(
    uploader: &Uploader<C, K>,
    ctx: &mut UploadContext,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut progress = IndicatifProgress::new();
    match uploader.probe(ctx, &mut progress) {
        Ok(report) => {
            progress.finish("Probe complete");
            println!("Bootloader found:");
            println!("  Baud:      {}", report.baud);
            println!("  Signature: {}", report.signature);
            println!(
                "  Version:   {}.{}",
                report.bootloader_version.0, report.bootloader_version.1
            );
            if !report.signature_matches {
                let name = board::find(&ctx.board).map_or(ctx.board.as_str(), |b| b.name);
                println!("Warning: the signature does not match {}", name);
            }
            Ok(())
        }
        Err(e) => {
            progress.abandon();
            report_failure(&e.to_string(), &ctx.board);
            Err(Box::new(e))
        }
    }
}
