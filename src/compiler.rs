//! Sketch compilation through arduino-cli

use maybe_async::maybe_async;
use std::path::{Path, PathBuf};
use std::process::Command;
use stkflash_upload::{CompileRequest, CompileResponse, Compiler};
use thiserror::Error;

/// Sketch name inside the scratch directory; arduino-cli wants the
/// directory and the main file to share it
const SKETCH_NAME: &str = "sketch";

#[derive(Debug, Error)]
enum CompilerError {
    #[error("cannot prepare sketch directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot run {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("{0}")]
    Failed(String),
}

/// Compiles sketches by shelling out to `arduino-cli compile`
pub struct ArduinoCliCompiler {
    program: PathBuf,
}

impl ArduinoCliCompiler {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn build(&self, request: &CompileRequest, workdir: &Path) -> Result<String, CompilerError> {
        let sketch_dir = workdir.join(SKETCH_NAME);
        let output_dir = workdir.join("build");
        std::fs::create_dir_all(&sketch_dir)?;
        std::fs::create_dir_all(&output_dir)?;
        std::fs::write(sketch_dir.join(format!("{}.ino", SKETCH_NAME)), &request.source)?;

        log::debug!(
            "compile: {} compile --fqbn {} {}",
            self.program.display(),
            request.board,
            sketch_dir.display()
        );
        let output = Command::new(&self.program)
            .arg("compile")
            .arg("--fqbn")
            .arg(&request.board)
            .arg("--output-dir")
            .arg(&output_dir)
            .arg(&sketch_dir)
            .output()
            .map_err(|source| CompilerError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            let mut text = String::from_utf8_lossy(&output.stderr).into_owned();
            if text.trim().is_empty() {
                text = String::from_utf8_lossy(&output.stdout).into_owned();
            }
            return Err(CompilerError::Failed(text));
        }

        let hex = std::fs::read_to_string(output_dir.join(format!("{}.ino.hex", SKETCH_NAME)))?;
        Ok(hex)
    }
}

#[maybe_async(AFIT)]
impl Compiler for ArduinoCliCompiler {
    async fn compile(&self, request: &CompileRequest) -> CompileResponse {
        let workdir = std::env::temp_dir().join(format!("stkflash-{}", std::process::id()));
        let result = self.build(request, &workdir);
        if let Err(e) = std::fs::remove_dir_all(&workdir) {
            log::debug!("compile: cannot remove {}: {}", workdir.display(), e);
        }

        match result {
            Ok(hex) => CompileResponse::from_hex(&hex),
            Err(e) => CompileResponse::failed(e.to_string()),
        }
    }
}
