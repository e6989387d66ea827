//! List commands implementation

use stkflash_stk500::PortInfo;
use stkflash_upload::{preflight, BOARDS};

/// List serial ports, warning about likely board mismatches
pub fn list_ports(ports: &[PortInfo], board: &str) {
    if ports.is_empty() {
        println!("No serial ports found");
        return;
    }

    println!("Serial ports:");
    println!();
    for port in ports {
        println!("  {}", port.description());
        if let Some(warning) = preflight(port, board) {
            println!("    warning: {}", warning);
        }
    }
}

/// List all known boards
pub fn list_boards() {
    println!("Known boards:");
    println!();
    println!("{:<38} {:<32} {:>8}", "FQBN", "Name", "Baud");
    println!("{}", "-".repeat(80));

    for board in BOARDS {
        println!(
            "{:<38} {:<32} {:>8}",
            board.fqbn, board.name, board.bootloader_baud
        );
        if let Some(reason) = board.unsupported_reason() {
            println!("  (not supported: {})", reason);
        }
    }
}
