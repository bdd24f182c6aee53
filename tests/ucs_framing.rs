//! Cross-module UCS wire framing: `Multiplexer` handshake messages encoded
//! with `encode_framed` and fed back through `FrameDecoder` one byte at a
//! time, the way a real socket stream would deliver them.

use vsm_core::ucs::{encode_framed, FrameDecoder, Multiplexer, RegisterPeer};

#[test]
fn a_register_peer_message_survives_a_byte_at_a_time_round_trip() {
    let mux = Multiplexer::new(42);
    let outgoing = mux.our_register_peer();

    let framed = encode_framed(&outgoing);
    let mut decoder = FrameDecoder::new();
    let mut decoded = Vec::new();
    for byte in &framed {
        if let Some(message) = decoder.push_byte(*byte).unwrap() {
            decoded.push(message);
        }
    }

    assert_eq!(decoded.len(), 1);
    let register = decoded[0].register_peer.as_ref().unwrap();
    assert_eq!(register.peer_id, 42);
}

#[test]
fn two_frames_back_to_back_in_one_chunk_both_decode() {
    let a = RegisterPeer { peer_id: 1, ..Default::default() };
    let b = RegisterPeer { peer_id: 2, ..Default::default() };
    let mut wire = encode_framed(&vsm_core::ucs::VsmMessage { register_peer: Some(a), ..Default::default() });
    wire.extend(encode_framed(&vsm_core::ucs::VsmMessage { register_peer: Some(b), ..Default::default() }));

    let mut decoder = FrameDecoder::new();
    let decoded = decoder.feed(&wire).unwrap();

    assert_eq!(decoded.len(), 2);
    assert_eq!(decoded[0].register_peer.as_ref().unwrap().peer_id, 1);
    assert_eq!(decoded[1].register_peer.as_ref().unwrap().peer_id, 2);
}

#[test]
fn a_zero_length_frame_decodes_immediately_without_swallowing_the_next_frames_length_byte() {
    let empty = encode_framed(&vsm_core::ucs::VsmMessage::default());
    assert_eq!(empty, vec![0u8]);

    let a = RegisterPeer { peer_id: 5, ..Default::default() };
    let mut wire = empty;
    wire.extend(encode_framed(&vsm_core::ucs::VsmMessage { register_peer: Some(a), ..Default::default() }));

    let mut decoder = FrameDecoder::new();
    let decoded = decoder.feed(&wire).unwrap();

    assert_eq!(decoded.len(), 2);
    assert!(decoded[0].register_peer.is_none());
    assert_eq!(decoded[1].register_peer.as_ref().unwrap().peer_id, 5);
}
