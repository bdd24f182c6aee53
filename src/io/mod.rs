//! Uniform I/O stream contract and the two reactors that drive it, built on
//! mio's `deprecated::io::{TryRead, TryWrite}` non-blocking adapter traits
//! and its `sys/unix` socket/fd wrappers.

mod stream;
mod socket_stream;
mod file_stream;
mod socket_processor;
mod file_processor;

pub use file_processor::FileProcessor;
pub use file_stream::FileStream;
pub use socket_processor::SocketProcessor;
pub use socket_stream::SocketStream;
pub use stream::{IoResult, IoState, IoType, OFFSET_END, OFFSET_NONE};
