//! Synchronous error taxonomy.
//!
//! Asynchronous operations never raise one of these; they report an
//! [`crate::io::IoResult`] through the completion handler instead. `VsmError`
//! is reserved for constructors, parsers, and lookups that fail immediately
//! on the calling thread.

use std::io;

pub type VsmResult<T> = Result<T, VsmError>;

/// Kinds of synchronous failure a VSM entry point can raise.
#[derive(thiserror::Error, Debug)]
pub enum VsmError {
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("invalid operation state: {0}")]
    InvalidOpState(String),

    #[error("null reference: {0}")]
    NullPtr(String),

    #[error("stream already closed: {0}")]
    AlreadyClosedStream(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("unknown message id: {0}")]
    InvalidId(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("system error: {0}")]
    System(#[from] io::Error),
}

impl VsmError {
    pub fn invalid_param(msg: impl Into<String>) -> Self {
        VsmError::InvalidParam(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        VsmError::NotFound(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        VsmError::Parse(msg.into())
    }

    /// Maps a raw OS errno-bearing [`io::Error`] the way file/socket open
    /// paths in the File Processor do: ENOENT -> NotFound,
    /// EACCES -> PermissionDenied, EEXIST -> AlreadyExists, else System.
    pub fn from_open_error(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => VsmError::NotFound(err.to_string()),
            io::ErrorKind::PermissionDenied => VsmError::PermissionDenied(err.to_string()),
            io::ErrorKind::AlreadyExists => VsmError::AlreadyExists(err.to_string()),
            _ => VsmError::System(err),
        }
    }
}
