//! Diagnose command implementation

use stkflash_upload::{board, diagnose, Action};

/// Classify error text and print the hint
pub fn run_diagnose(text: &str, board: &str) {
    let diagnosis = diagnose(text, board);
    println!("Category: {:?}", diagnosis.kind);
    println!("{}", diagnosis.hint);
    match diagnosis.action {
        Some(Action::SwitchBoard(fqbn)) => {
            let name = board::find(fqbn).map_or(fqbn, |b| b.name);
            println!("Suggestion: retry with --board {} ({})", fqbn, name);
        }
        Some(Action::Retry) => println!("Suggestion: this is usually transient, try again"),
        None => {}
    }
}
