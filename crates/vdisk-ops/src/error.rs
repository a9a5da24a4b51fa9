//! Error types for the operation layer

use thiserror::Error;
use vdisk_common::ResultCode;

/// Registry construction and lookup failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OpsError {
    /// No template is registered for the opcode
    #[error("unknown operation {0:#04x}")]
    UnknownOperation(u8),

    #[error("operation {0} registered twice")]
    DuplicateOperation(&'static str),

    /// The template lacks a handler its class requires, or has one it forbids
    #[error("operation {name}: {reason}")]
    MissingHandler {
        name: &'static str,
        reason: &'static str,
    },
}

/// Failure of a main-stage handler
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MainError {
    /// Ordinary failure, copied into the response
    #[error(transparent)]
    Code(#[from] ResultCode),

    /// Cluster state can no longer be trusted; the node must stop
    #[error("fatal: {0}")]
    Fatal(String),
}

impl MainError {
    /// Create a fatal error
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    /// Result code reported when the error is not fatal
    #[must_use]
    pub const fn code(&self) -> ResultCode {
        match self {
            Self::Code(code) => *code,
            Self::Fatal(_) => ResultCode::SystemError,
        }
    }
}

/// Result of a main-stage handler
pub type MainResult = std::result::Result<(), MainError>;
