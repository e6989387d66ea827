//! CLI argument parsing

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use stkflash_upload::board::DEFAULT_BOARD;

/// Generate dynamic help text for the board argument
fn board_help() -> String {
    format!(
        "Board FQBN (see list-boards) [default: {}]",
        DEFAULT_BOARD
    )
}

#[derive(Parser)]
#[command(name = "stkflash")]
#[command(author, version, about = "Arduino STK500v1 bootloader uploader", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Upload configuration file (TOML); missing keys keep their defaults
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Port and board selection shared by commands that talk to a board
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Serial port (e.g. /dev/ttyUSB0, COM3, or "dummy" for the emulator)
    #[arg(short, long)]
    pub port: String,

    #[arg(short, long, help = board_help())]
    pub board: Option<String>,

    /// Baud rates tried after the board's own (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub fallback_baud: Vec<u32>,
}

impl TargetArgs {
    pub fn board(&self) -> &str {
        self.board.as_deref().unwrap_or(DEFAULT_BOARD)
    }
}

/// Firmware source: exactly one of a prebuilt HEX file or a sketch
#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct SourceArgs {
    /// Intel HEX file to upload
    #[arg(long)]
    pub hex: Option<PathBuf>,

    /// Sketch to compile with arduino-cli and upload
    #[arg(long)]
    pub sketch: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Upload firmware to a board
    Upload {
        #[command(flatten)]
        target: TargetArgs,

        #[command(flatten)]
        source: SourceArgs,

        /// Read back and compare every page after writing
        #[arg(long)]
        verify: bool,

        /// arduino-cli executable used for --sketch
        #[arg(long, default_value = "arduino-cli")]
        arduino_cli: PathBuf,
    },

    /// Reset the board and read its signature and bootloader version
    Probe {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// List serial ports
    ListPorts {
        /// Board used for adapter warnings
        #[arg(short, long)]
        board: Option<String>,
    },

    /// List known boards
    ListBoards,

    /// Explain an upload error message
    Diagnose {
        /// Error text (e.g. copied from avrdude output)
        text: String,

        #[arg(short, long, help = board_help())]
        board: Option<String>,
    },
}
