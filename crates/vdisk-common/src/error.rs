//! Error types for vdisk
//!
//! [`ResultCode`] is the result taxonomy carried in every response. It is
//! also a regular error type so handlers can return
//! `Result<(), ResultCode>` and propagate with `?`. [`Error`] covers the
//! failures that happen outside the request path (configuration, local
//! I/O, metadata decoding) and maps onto a result code at the boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Common result type for vdisk operations
pub type Result<T> = std::result::Result<T, Error>;

/// Result type returned by operation handlers
pub type OpResult<T = ()> = std::result::Result<T, ResultCode>;

/// Response result code
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Error)]
#[repr(u8)]
pub enum ResultCode {
    #[error("success")]
    Success = 0x00,
    #[error("unknown error")]
    Unknown = 0x01,
    #[error("no object found")]
    NoObject = 0x02,
    #[error("I/O error")]
    Eio = 0x03,
    #[error("VDI exists already")]
    VdiExists = 0x04,
    #[error("invalid parameters")]
    InvalidParameters = 0x05,
    #[error("system error")]
    SystemError = 0x06,
    #[error("no VDI found")]
    NoVdi = 0x08,
    #[error("VDI is read-only")]
    ReadOnly = 0x09,
    #[error("cluster is shutting down")]
    Shutdown = 0x11,
    #[error("no space left")]
    NoSpace = 0x15,
    #[error("waiting for cluster to be formatted")]
    WaitForFormat = 0x16,
    #[error("waiting for other nodes to join cluster")]
    WaitForJoin = 0x17,
    #[error("request has an old epoch")]
    OldNodeVersion = 0x1b,
    #[error("request has a new epoch")]
    NewNodeVersion = 0x1c,
    #[error("cluster cannot be recovered without force")]
    ForceRecoverNeeded = 0x20,
    #[error("store driver not found")]
    NoStore = 0x21,
    #[error("operation is not supported")]
    NoSupport = 0x22,
    #[error("buffer is too small")]
    BufferSmall = 0x25,
    #[error("VDI id space is exhausted")]
    FullVdi = 0x26,
    #[error("node was killed")]
    Killed = 0x27,
}

impl ResultCode {
    /// Numeric code as carried in a response
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// True for [`ResultCode::Success`]
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    /// `Ok(())` for success, `Err(self)` otherwise
    pub const fn into_result(self) -> OpResult {
        match self {
            Self::Success => Ok(()),
            other => Err(other),
        }
    }

    /// Fold a handler result into a response code
    #[must_use]
    pub const fn from_result(result: &OpResult) -> Self {
        match result {
            Ok(()) => Self::Success,
            Err(code) => *code,
        }
    }

    /// Whether the caller may reasonably retry later
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::WaitForFormat | Self::WaitForJoin | Self::OldNodeVersion | Self::NewNodeVersion
        )
    }
}

/// Common error type for vdisk
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("corrupt inode for VDI {vid:#x}: {reason}")]
    CorruptInode { vid: u32, reason: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("operation failed: {0}")]
    Result(#[from] ResultCode),
}

impl Error {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Result code reported to a client for this error
    #[must_use]
    pub const fn code(&self) -> ResultCode {
        match self {
            Self::Io(_) => ResultCode::Eio,
            Self::Configuration(_) | Self::CorruptInode { .. } => ResultCode::SystemError,
            Self::InvalidArgument(_) => ResultCode::InvalidParameters,
            Self::Result(code) => *code,
        }
    }
}

impl From<Error> for ResultCode {
    fn from(err: Error) -> Self {
        err.code()
    }
}
