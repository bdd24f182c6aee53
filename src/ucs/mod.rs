//! Cucs: the UCS (Universal Ground Control Station) TCP multiplexer.
//! Listens for inbound connections via the transport detector's `ucs` rule
//! family, speaks varint-length-prefixed `VsmMessage` framing, and routes
//! device-scoped traffic to/from the Request framework that owns each
//! `Device`.

mod multiplexer;
mod message;
mod peer;
mod varint;

pub use message::{encode_framed, proto, DeviceResponse, DeviceStatus, FrameDecoder, RegisterDevice, RegisterPeer, ResponseCode, VsmMessage, MAX_PAYLOAD_LEN};
pub use multiplexer::{InboundOutcome, Multiplexer, PendingRegistration, Routed};
pub use peer::{ConnectionId, PeerRegistry};
pub use varint::{encode as encode_varint, TakeResult as VarintTakeResult, VarintDecoder};
