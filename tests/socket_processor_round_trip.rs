//! Listen, connect, accept, write, read — one full request/completion
//! round trip through the Socket Processor's reactor.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use vsm_core::io::{IoResult, SocketProcessor};

#[test]
fn a_connected_client_and_its_accepted_peer_exchange_a_message() {
    let processor = SocketProcessor::new().unwrap();

    let bound_addr = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 18453);
    let listener = processor.listen_tcp("test-listener", bound_addr).unwrap();

    let accept_waiter = processor.accept(&listener);
    let (client, connect_waiter) = processor.connect_tcp("test-client", bound_addr).unwrap();

    assert!(connect_waiter.wait(Some(Duration::from_secs(5))), "connect timed out");
    assert_eq!(connect_waiter.result(), Some(IoResult::Ok));

    assert!(accept_waiter.wait(Some(Duration::from_secs(5))), "accept timed out");
    let (accept_result, server_peer) = accept_waiter.result().unwrap();
    assert_eq!(accept_result, IoResult::Ok);

    let write_waiter = processor.write(&client, b"ping".to_vec());
    assert!(write_waiter.wait(Some(Duration::from_secs(5))));
    assert_eq!(write_waiter.result(), Some((IoResult::Ok, 4)));

    let read_waiter = processor.read(&server_peer, 1, 64);
    assert!(read_waiter.wait(Some(Duration::from_secs(5))), "read timed out");
    let (read_result, data) = read_waiter.result().unwrap();
    assert_eq!(read_result, IoResult::Ok);
    assert_eq!(data, b"ping");

    processor.stop();
}

#[test]
fn a_read_waits_for_min_to_read_bytes_across_two_separate_writes() {
    let processor = SocketProcessor::new().unwrap();

    let bound_addr = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 18454);
    let listener = processor.listen_tcp("test-listener-min", bound_addr).unwrap();

    let accept_waiter = processor.accept(&listener);
    let (client, connect_waiter) = processor.connect_tcp("test-client-min", bound_addr).unwrap();
    assert!(connect_waiter.wait(Some(Duration::from_secs(5))));
    assert!(accept_waiter.wait(Some(Duration::from_secs(5))));
    let (_, server_peer) = accept_waiter.result().unwrap();

    // Ask for at least 8 bytes; only 4 are written up front, so the read
    // must keep the op queued rather than completing on the first recv.
    let read_waiter = processor.read(&server_peer, 8, 64);

    let first_write = processor.write(&client, b"ping".to_vec());
    assert!(first_write.wait(Some(Duration::from_secs(5))));

    assert!(!read_waiter.wait(Some(Duration::from_millis(200))), "read completed before min_to_read was satisfied");

    let second_write = processor.write(&client, b"pong".to_vec());
    assert!(second_write.wait(Some(Duration::from_secs(5))));

    assert!(read_waiter.wait(Some(Duration::from_secs(5))), "read timed out after the second write");
    let (read_result, data) = read_waiter.result().unwrap();
    assert_eq!(read_result, IoResult::Ok);
    assert_eq!(data, b"pingpong");

    processor.stop();
}
