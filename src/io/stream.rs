//! Io_stream vocabulary: the type/state enums and result codes
//! shared by every concrete stream and both reactors.

use std::io;

/// Use the stream's own maintained position rather than an explicit offset.
pub const OFFSET_NONE: i64 = -1;
/// Append at the current end of the stream.
pub const OFFSET_END: i64 = -2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoType {
    File,
    Serial,
    AndroidSerial,
    Tcp,
    Udp,
    UdpMulticast,
    Can,
    Undefined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoState {
    Closed,
    Opening,
    OpeningPassive,
    Opened,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoResult {
    Ok,
    TimedOut,
    Canceled,
    BadAddress,
    ConnectionRefused,
    Closed,
    PermissionDenied,
    EndOfFile,
    LockError,
    OtherFailure,
}

impl IoResult {
    /// Maps an `errno`-bearing I/O error the way the Socket Processor does
    /// on a failed connect.
    pub fn from_connect_error(err: &io::Error) -> IoResult {
        match err.kind() {
            io::ErrorKind::TimedOut => IoResult::TimedOut,
            io::ErrorKind::ConnectionRefused => IoResult::ConnectionRefused,
            io::ErrorKind::PermissionDenied => IoResult::PermissionDenied,
            _ => IoResult::OtherFailure,
        }
    }

    pub fn from_io_error(err: &io::Error) -> IoResult {
        match err.kind() {
            io::ErrorKind::PermissionDenied => IoResult::PermissionDenied,
            io::ErrorKind::ConnectionRefused => IoResult::ConnectionRefused,
            io::ErrorKind::TimedOut => IoResult::TimedOut,
            io::ErrorKind::UnexpectedEof => IoResult::EndOfFile,
            _ => IoResult::OtherFailure,
        }
    }
}
