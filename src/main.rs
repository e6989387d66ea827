//! stkflash - Upload firmware to Arduino boards
//!
//! Drives the STK500v1 bootloader found on ATmega328P based boards (Uno,
//! Nano, Pro Mini, Duemilanove) over a serial port.
//!
//! # Architecture
//!
//! The upload pipeline lives in the library crates:
//! - `stkflash-core` parses Intel HEX and slices it into flash pages
//! - `stkflash-stk500` owns the transports, the reset sequence and the
//!   bootloader session
//! - `stkflash-upload` validates the request, compiles, and guarantees the
//!   port is released whatever happens
//!
//! This binary only parses arguments, picks the port capability (real
//! serial ports, or the emulated board behind the `dummy` port) and renders
//! progress.

mod cli;
mod commands;
mod compiler;

use clap::Parser;
use cli::{Cli, Commands, TargetArgs};
use compiler::ArduinoCliCompiler;
use stkflash_core::UploadConfig;
use stkflash_stk500::transport::serial::SystemPorts;
use stkflash_stk500::SerialCapability;
use stkflash_upload::{NoCompiler, UploadContext, Uploader};

/// Run `$body` with `$ports` bound to the capability serving `$port`
macro_rules! with_ports {
    ($port:expr, $ports:ident => $body:expr) => {{
        #[cfg(feature = "dummy")]
        if $port == stkflash_dummy::DUMMY_PORT {
            let $ports = stkflash_dummy::DummyPorts::default();
            return $body;
        }
        let $ports = SystemPorts;
        $body
    }};
}

fn main() {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => {
            let config = UploadConfig::from_toml_file(path)?;
            log::debug!("Loaded upload configuration from {}", path.display());
            config
        }
        None => UploadConfig::default(),
    };

    match cli.command {
        Commands::Upload {
            target,
            source,
            verify,
            arduino_cli,
        } => {
            config.verify |= verify;
            apply_target(&mut config, &target);
            let mut ctx = UploadContext::new(target.port.as_str(), target.board());
            let compiler = ArduinoCliCompiler::new(arduino_cli);
            with_ports!(target.port, ports => {
                let uploader = Uploader::new(ports, compiler, config);
                commands::run_upload(&uploader, &mut ctx, &source)
            })
        }
        Commands::Probe { target } => {
            apply_target(&mut config, &target);
            let mut ctx = UploadContext::new(target.port.as_str(), target.board());
            with_ports!(target.port, ports => {
                let uploader = Uploader::new(ports, NoCompiler, config);
                commands::run_probe(&uploader, &mut ctx)
            })
        }
        Commands::ListPorts { board } => {
            #[allow(unused_mut)]
            let mut ports = SystemPorts.authorized_ports()?;
            #[cfg(feature = "dummy")]
            ports.extend(stkflash_dummy::DummyPorts::default().authorized_ports()?);
            let board = board.as_deref().unwrap_or(stkflash_upload::board::DEFAULT_BOARD);
            commands::list_ports(&ports, board);
            Ok(())
        }
        Commands::ListBoards => {
            commands::list_boards();
            Ok(())
        }
        Commands::Diagnose { text, board } => {
            let board = board.as_deref().unwrap_or(stkflash_upload::board::DEFAULT_BOARD);
            commands::run_diagnose(&text, board);
            Ok(())
        }
    }
}

/// Apply per-invocation overrides to the loaded configuration
fn apply_target(config: &mut UploadConfig, target: &TargetArgs) {
    if !target.fallback_baud.is_empty() {
        config.fallback_bauds = target.fallback_baud.clone();
    }
}
