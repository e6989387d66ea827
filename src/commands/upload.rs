//! Upload command implementation

use super::progress::IndicatifProgress;
use super::report_failure;
use crate::cli::SourceArgs;
use std::fs;
use stkflash_core::hex;
use stkflash_stk500::SerialCapability;
use stkflash_upload::{Compiler, UploadContext, UploadReport, Uploader};

/// Run the upload command
pub fn run_upload<C: SerialCapability, K: Compiler>(
    uploader: &Uploader<C, K>,
    ctx: &mut UploadContext,
    source: &SourceArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut progress = IndicatifProgress::new();

    let result = match (&source.hex, &source.sketch) {
        (Some(path), _) => {
            let text = fs::read_to_string(path)?;
            let image = hex::parse(&text)?;
            println!(
                "Loaded {}: {} bytes at 0x{:04X}",
                path.display(),
                image.len(),
                image.start_address()
            );
            uploader.upload_image(ctx, &image, &mut progress)
        }
        (None, Some(path)) => {
            let sketch = fs::read_to_string(path)?;
            uploader.upload(ctx, &sketch, &mut progress)
        }
        (None, None) => return Err("either --hex or --sketch is required".into()),
    };

    match result {
        Ok(report) => {
            progress.finish("Upload complete");
            print_report(&report);
            Ok(())
        }
        Err(e) => {
            progress.abandon();
            report_failure(&e.to_string(), &ctx.board);
            Err(Box::new(e))
        }
    }
}

fn print_report(report: &UploadReport) {
    println!(
        "Wrote {} bytes ({} pages) at {} baud{}",
        report.bytes,
        report.pages,
        report.baud,
        if report.verified { ", verified" } else { "" }
    );
    if let Some(elapsed) = report.elapsed {
        println!("Took {:.2}s", elapsed.as_secs_f64());
    }
}
