//! Compilation collaborator
//!
//! Sketch compilation happens outside this crate. The service receives the
//! sketch source and board FQBN, and answers with base64-encoded Intel HEX.

use crate::error::{Result, UploadError};
use base64::Engine;
use maybe_async::maybe_async;

/// A compilation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileRequest {
    /// Sketch source text
    pub source: String,
    /// Target board FQBN
    pub board: String,
}

/// A compilation result
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompileResponse {
    /// Whether compilation succeeded
    pub success: bool,
    /// Intel HEX text, base64 encoded
    pub firmware_base64: Option<String>,
    /// Compiler output
    pub diagnostics: String,
}

impl CompileResponse {
    /// A successful response carrying `hex` text
    pub fn from_hex(hex: &str) -> Self {
        Self {
            success: true,
            firmware_base64: Some(base64::engine::general_purpose::STANDARD.encode(hex)),
            diagnostics: String::new(),
        }
    }

    /// A failed response with compiler output
    pub fn failed(diagnostics: impl Into<String>) -> Self {
        Self {
            success: false,
            firmware_base64: None,
            diagnostics: diagnostics.into(),
        }
    }
}

/// Turns sketch source into firmware
///
/// Failures to reach the service are reported as unsuccessful responses.
#[maybe_async(AFIT)]
pub trait Compiler {
    /// Compile `request`
    async fn compile(&self, request: &CompileRequest) -> CompileResponse;
}

/// A compiler that rejects every request
///
/// For front ends that only upload prebuilt HEX files.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCompiler;

#[maybe_async(AFIT)]
impl Compiler for NoCompiler {
    async fn compile(&self, _request: &CompileRequest) -> CompileResponse {
        CompileResponse::failed("no compiler configured")
    }
}

/// Decode a successful response into Intel HEX text
pub fn firmware_hex(response: &CompileResponse) -> Result<String> {
    if !response.success {
        return Err(UploadError::Compile(response.diagnostics.trim().to_string()));
    }
    let encoded = response
        .firmware_base64
        .as_deref()
        .ok_or_else(|| UploadError::Firmware("no firmware in response".to_string()))?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| UploadError::Firmware(e.to_string()))?;
    String::from_utf8(bytes).map_err(|_| UploadError::Firmware("firmware is not text".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let hex = ":00000001FF\n";
        assert_eq!(firmware_hex(&CompileResponse::from_hex(hex)).unwrap(), hex);
    }

    #[test]
    fn test_failed_response() {
        let response = CompileResponse::failed("sketch.ino:3: error: expected ';'\n");
        match firmware_hex(&response) {
            Err(UploadError::Compile(msg)) => assert_eq!(msg, "sketch.ino:3: error: expected ';'"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_or_bad_firmware() {
        let mut response = CompileResponse {
            success: true,
            ..CompileResponse::default()
        };
        assert!(matches!(firmware_hex(&response), Err(UploadError::Firmware(_))));

        response.firmware_base64 = Some("not base64!".to_string());
        assert!(matches!(firmware_hex(&response), Err(UploadError::Firmware(_))));

        // 0xFF 0xFE is not UTF-8
        response.firmware_base64 = Some("//4=".to_string());
        assert!(matches!(firmware_hex(&response), Err(UploadError::Firmware(_))));
    }
}
