//! stkflash-upload - Upload orchestration for Arduino boards
//!
//! [`Uploader`] runs a complete upload against a [`SerialCapability`]: it
//! validates the [`UploadContext`], compiles through a [`Compiler`],
//! parses the Intel HEX result and drives the STK500 session, releasing the
//! port on every path. Only one upload runs at a time per uploader; a
//! concurrent call fails with [`UploadError::Busy`].
//!
//! [`diagnose`](diagnose::diagnose) turns failure text into a hint and a
//! suggested follow-up.
//!
//! [`SerialCapability`]: stkflash_stk500::SerialCapability

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod board;
pub mod compile;
pub mod context;
pub mod diagnose;
pub mod error;
pub mod uploader;

pub use board::{Board, BootloaderProtocol, BOARDS};
pub use compile::{CompileRequest, CompileResponse, Compiler, NoCompiler};
pub use context::{MonitorSession, UploadContext};
pub use diagnose::{diagnose, preflight, Action, Diagnosis, FailureKind};
pub use error::{Result, UploadError};
pub use uploader::{ProbeReport, UploadReport, Uploader};
