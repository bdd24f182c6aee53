//! Thin wrappers over the `prost`-generated `VsmMessage` tree plus the
//! length-prefixed wire encoding/decoding that sits on top of it.

use prost::Message as _;

use super::varint::{self, TakeResult, VarintDecoder};
use crate::error::{VsmError, VsmResult};

pub mod proto {
    include!(concat!(env!("OUT_DIR"), "/ugcs.vsm.rs"));
}

pub use proto::{
    CommandAvailability, DeviceCommand, DeviceResponse, DeviceStatus, PeerType, RegisterDevice, RegisterPeer,
    ResponseCode, TelemetryField, UnregisterDevice, VsmMessage,
};

/// Default maximum decoded payload size, 1 MiB; messages whose declared
/// length exceeds this close the connection.
pub const MAX_PAYLOAD_LEN: u64 = 1024 * 1024;

pub fn encode_framed(message: &VsmMessage) -> Vec<u8> {
    let body = message.encode_to_vec();
    let mut out = varint::encode(body.len() as u64);
    out.extend_from_slice(&body);
    out
}

enum FrameState {
    Length(VarintDecoder),
    Body { len: usize, buf: Vec<u8> },
}

/// Incrementally reassembles `varint(len) || VsmMessage` frames out of an
/// arbitrarily chunked byte stream, the same shape as
/// [`crate::mavlink::decoder::Decoder`] but for the UCS wire format.
pub struct FrameDecoder {
    state: FrameState,
}

impl FrameDecoder {
    pub fn new() -> Self {
        FrameDecoder { state: FrameState::Length(VarintDecoder::new()) }
    }

    /// Feeds one byte; returns `Some(message)` once a full frame decodes,
    /// or an error if the declared length exceeds [`MAX_PAYLOAD_LEN`] or the
    /// payload fails to parse as a `VsmMessage`.
    pub fn push_byte(&mut self, byte: u8) -> VsmResult<Option<VsmMessage>> {
        match &mut self.state {
            FrameState::Length(decoder) => match decoder.push_byte(byte) {
                TakeResult::NeedMore => Ok(None),
                TakeResult::TooLong => Err(VsmError::parse("varint length prefix exceeded 10 bytes")),
                TakeResult::Value(len) => {
                    if len > MAX_PAYLOAD_LEN {
                        return Err(VsmError::parse(format!("declared payload length {len} exceeds the 1 MiB ceiling")));
                    }
                    if len == 0 {
                        // An empty body is already a complete frame; staying
                        // in Body{len: 0} would swallow the next frame's
                        // first length byte as a spurious body byte.
                        self.state = FrameState::Length(VarintDecoder::new());
                        let message = VsmMessage::decode(&[][..]).map_err(|e| VsmError::parse(e.to_string()))?;
                        return Ok(Some(message));
                    }
                    self.state = FrameState::Body { len: len as usize, buf: Vec::with_capacity(len as usize) };
                    Ok(None)
                }
            },
            FrameState::Body { len, buf } => {
                buf.push(byte);
                if buf.len() < *len {
                    return Ok(None);
                }
                let body = std::mem::take(buf);
                self.state = FrameState::Length(VarintDecoder::new());
                let message = VsmMessage::decode(body.as_slice()).map_err(|e| VsmError::parse(e.to_string()))?;
                Ok(Some(message))
            }
        }
    }

    pub fn feed(&mut self, bytes: &[u8]) -> VsmResult<Vec<VsmMessage>> {
        let mut messages = Vec::new();
        for &byte in bytes {
            if let Some(message) = self.push_byte(byte)? {
                messages.push(message);
            }
        }
        Ok(messages)
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        FrameDecoder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_register_peer_message() {
        let message = VsmMessage {
            register_peer: Some(RegisterPeer { peer_id: 7, peer_type: PeerType::Vsm as i32, version_major: 1, version_minor: 0, version_build: 0 }),
            ..Default::default()
        };
        let framed = encode_framed(&message);

        let mut decoder = FrameDecoder::new();
        let decoded = decoder.feed(&framed).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].register_peer.as_ref().unwrap().peer_id, 7);
    }

    #[test]
    fn rejects_a_declared_length_over_the_payload_ceiling() {
        let mut decoder = FrameDecoder::new();
        let oversized_len = varint::encode(MAX_PAYLOAD_LEN + 1);
        let result = decoder.feed(&oversized_len);
        assert!(result.is_err());
    }

    #[test]
    fn reassembles_a_frame_delivered_one_byte_at_a_time() {
        let message = VsmMessage { device_id: 3, ..Default::default() };
        let framed = encode_framed(&message);

        let mut decoder = FrameDecoder::new();
        let mut decoded = Vec::new();
        for &byte in &framed {
            if let Some(m) = decoder.push_byte(byte).unwrap() {
                decoded.push(m);
            }
        }
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].device_id, 3);
    }
}
