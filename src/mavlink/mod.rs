//! Streaming MAVLink v1/v2 frame decoder with per-sender statistics: a
//! state machine feeding off a byte cursor, with `get_next_read_size`
//! driving exactly-sized reads, built around MAVLink's specific header
//! layouts rather than a generic byte buffer.

mod crc;
mod decoder;
mod stats;

pub use crc::{crc16_x25, ExtraByteTable};
pub use decoder::{Decoder, Frame};
pub use stats::{SenderStats, Stats};
