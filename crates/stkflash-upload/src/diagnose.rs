//! Failure classification and remediation hints
//!
//! Everything here is pure: it looks at error text and the selected board
//! and suggests what the user could do. Whether to prompt, retry or switch
//! boards is up to the caller.

use crate::board::{NANO, NANO_OLD_BOOTLOADER};
use stkflash_stk500::{AdapterKind, PortInfo};

/// Failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The OS could not configure the port (Windows "can't set com-state")
    ComState,
    /// Another program holds the port
    PortBusy,
    /// The bootloader never answered
    Sync,
    /// The port does not exist
    PortNotFound,
    /// No permission to open the port
    PermissionDenied,
    /// A command timed out
    Timeout,
    /// Anything else
    Unknown,
}

impl FailureKind {
    /// Whether retrying unchanged may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FailureKind::PortBusy | FailureKind::Timeout | FailureKind::ComState
        )
    }
}

/// Suggested follow-up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Select another board and try again
    SwitchBoard(&'static str),
    /// Try again unchanged
    Retry,
}

/// Classification of a failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnosis {
    /// Category
    pub kind: FailureKind,
    /// Advice for the user
    pub hint: &'static str,
    /// Suggested follow-up, if any
    pub action: Option<Action>,
}

// Checked in order, first match wins
const PATTERNS: &[(FailureKind, &[&str])] = &[
    (FailureKind::ComState, &["com-state", "ser_open"]),
    (FailureKind::PortBusy, &["busy", "in use", "resource busy"]),
    (
        FailureKind::Sync,
        &["not in sync", "sync", "programmer is not responding"],
    ),
    (
        FailureKind::PortNotFound,
        &["no such file", "not found", "can't open device"],
    ),
    (
        FailureKind::PermissionDenied,
        &["permission denied", "access denied"],
    ),
    (FailureKind::Timeout, &["timeout", "timed out"]),
];

fn hint_for(kind: FailureKind) -> &'static str {
    match kind {
        FailureKind::ComState => {
            "The port could not be configured. Unplug and replug the USB cable, try another \
             USB port or cable, and close other programs using the port. Clone Nanos with a \
             CH340 usually need the \"Nano (Old Bootloader)\" board."
        }
        FailureKind::PortBusy => {
            "The port is in use. Close the serial monitor, the Arduino IDE or any other \
             program using it."
        }
        FailureKind::Sync => {
            "The bootloader did not answer. Clone Nanos with a CH340 usually need the \
             \"Nano (Old Bootloader)\" board. Otherwise try a data-capable USB cable, avoid \
             hubs, or press RESET just before uploading."
        }
        FailureKind::PortNotFound => {
            "The port was not found. Check that the board is connected and the cable works."
        }
        FailureKind::PermissionDenied => {
            "Permission denied. On Linux add yourself to the dialout group \
             (sudo usermod -a -G dialout $USER) and log in again."
        }
        FailureKind::Timeout => "The board stopped responding. Reconnect it and try again.",
        FailureKind::Unknown => "Upload failed. Run with -v for the full protocol log.",
    }
}

/// Classify failure text for the selected board
pub fn diagnose(text: &str, board: &str) -> Diagnosis {
    let lower = text.to_lowercase();
    let kind = PATTERNS
        .iter()
        .find(|(_, needles)| needles.iter().any(|n| lower.contains(n)))
        .map(|(kind, _)| *kind)
        .unwrap_or(FailureKind::Unknown);

    let action = match kind {
        FailureKind::Sync | FailureKind::ComState if board == NANO => {
            Some(Action::SwitchBoard(NANO_OLD_BOOTLOADER))
        }
        kind if kind.is_transient() => Some(Action::Retry),
        _ => None,
    };

    Diagnosis {
        kind,
        hint: hint_for(kind),
        action,
    }
}

/// Warn about a port/board pairing that usually fails
///
/// Clone Nanos built around a CH340 ship with the old bootloader.
pub fn preflight(port: &PortInfo, board: &str) -> Option<&'static str> {
    if port.adapter() == AdapterKind::Ch340 && board == NANO {
        Some(
            "CH340 adapter detected with \"Arduino Nano\" selected. Clone Nanos usually \
             need \"Arduino Nano (Old Bootloader)\".",
        )
    } else {
        None
    }
}

/// Whether the failure text describes a transient problem
pub fn is_transient(text: &str) -> bool {
    diagnose(text, "").kind.is_transient()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let cases = [
            ("avrdude: ser_open(): can't set com-state for \"\\\\.\\COM3\"", FailureKind::ComState),
            ("Cannot open /dev/ttyUSB0: Device or resource busy", FailureKind::PortBusy),
            ("Access is denied; port in use", FailureKind::PortBusy),
            ("avrdude: stk500_recv(): programmer is not responding", FailureKind::Sync),
            ("stk500_getsync() attempt 10 of 10: not in sync: resp=0x00", FailureKind::Sync),
            ("Cannot open /dev/ttyUSB7: No such file or directory", FailureKind::PortNotFound),
            ("Cannot open /dev/ttyACM0: Permission denied", FailureKind::PermissionDenied),
            ("Command 0x50 not acknowledged: no response (timeout)", FailureKind::Timeout),
            ("operation timed out", FailureKind::Timeout),
            ("Verify failed at 0x00000082", FailureKind::Unknown),
        ];
        for (text, kind) in cases {
            assert_eq!(diagnose(text, "arduino:avr:uno").kind, kind, "{}", text);
        }
    }

    #[test]
    fn test_first_match_wins() {
        // "ser_open" beats the busy keyword
        let d = diagnose("ser_open(): device busy", "arduino:avr:uno");
        assert_eq!(d.kind, FailureKind::ComState);
        // Permission denied also mentions "can't open device"
        let d = diagnose("can't open device: permission denied", "arduino:avr:uno");
        assert_eq!(d.kind, FailureKind::PortNotFound);
    }

    #[test]
    fn test_nano_sync_suggests_old_bootloader() {
        let d = diagnose("programmer is not responding", NANO);
        assert_eq!(d.action, Some(Action::SwitchBoard(NANO_OLD_BOOTLOADER)));

        let d = diagnose("can't set com-state", NANO);
        assert_eq!(d.action, Some(Action::SwitchBoard(NANO_OLD_BOOTLOADER)));

        let d = diagnose("programmer is not responding", "arduino:avr:uno");
        assert_eq!(d.action, None);

        let d = diagnose("programmer is not responding", NANO_OLD_BOOTLOADER);
        assert_eq!(d.action, None);
    }

    #[test]
    fn test_transient() {
        assert!(is_transient("resource busy"));
        assert!(is_transient("timed out"));
        assert!(is_transient("can't set com-state"));
        assert!(!is_transient("not in sync"));
        assert!(!is_transient("permission denied"));
        assert_eq!(
            diagnose("resource busy", "arduino:avr:uno").action,
            Some(Action::Retry)
        );
    }

    #[test]
    fn test_preflight() {
        let mut port = PortInfo::named("/dev/ttyUSB0");
        port.vid = Some(0x1A86);
        assert!(preflight(&port, NANO).is_some());
        assert!(preflight(&port, NANO_OLD_BOOTLOADER).is_none());

        port.vid = Some(0x2341);
        assert!(preflight(&port, NANO).is_none());
    }
}
