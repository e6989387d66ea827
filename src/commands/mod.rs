//! CLI command implementations
//!
//! Commands that talk to a board are generic over the port capability, so
//! the same code drives real serial ports and the emulated `dummy` board.

mod diagnose;
mod list;
mod probe;
mod progress;
mod upload;

pub use diagnose::run_diagnose;
pub use list::{list_boards, list_ports};
pub use probe::run_probe;
pub use upload::run_upload;

use stkflash_upload::Action;

/// Print the remediation hint for a failed operation
fn report_failure(error: &str, board: &str) {
    let diagnosis = stkflash_upload::diagnose::diagnose(error, board);
    eprintln!("{}", diagnosis.hint);
    if let Some(Action::SwitchBoard(fqbn)) = diagnosis.action {
        eprintln!("Try again with --board {}", fqbn);
    }
}
