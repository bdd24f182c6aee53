//! Proxy handshake protocol: after TCP connect,
//! write a 4-byte signature and a HELLO command, then read 5-byte responses
//! until READY, NOTREADY, or a keepalive-starved timeout.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use crate::error::{VsmError, VsmResult};

const SIGNATURE: [u8; 4] = [0x56, 0x53, 0x4D, 0x50];
const CMD_HELLO: u8 = 0;
const CMD_WAIT: u8 = 1;
const CMD_READY: u8 = 2;
const CMD_NOTREADY: u8 = 3;

/// No `WAIT` keepalive for this long closes the connection as failed.
const PROXY_TIMEOUT: Duration = Duration::from_secs(4);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyOutcome {
    Ready,
    NotReady,
}

/// Runs the handshake to completion on `stream`, which must already be a
/// connected, blocking-mode socket handed off to this helper for the
/// duration of the handshake (the caller is expected to have removed it
/// from the reactor first).
pub fn run_proxy_handshake(stream: &mut TcpStream, peer_id: u32) -> VsmResult<ProxyOutcome> {
    let mut request = Vec::with_capacity(9);
    request.extend_from_slice(&SIGNATURE);
    request.push(CMD_HELLO);
    request.extend_from_slice(&peer_id.to_le_bytes());
    stream.write_all(&request)?;

    let deadline = Instant::now() + PROXY_TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(VsmError::Internal("proxy handshake timed out waiting for a keepalive".into()));
        }
        stream.set_read_timeout(Some(remaining))?;

        let mut response = [0u8; 5];
        stream.read_exact(&mut response)?;
        if response[..4] != SIGNATURE {
            return Err(VsmError::parse("proxy response missing the VSMP signature"));
        }
        match response[4] {
            CMD_WAIT => continue,
            CMD_READY => return Ok(ProxyOutcome::Ready),
            CMD_NOTREADY => return Ok(ProxyOutcome::NotReady),
            other => return Err(VsmError::parse(format!("unexpected proxy command byte {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn completes_on_an_immediate_ready() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut hello = [0u8; 9];
            sock.read_exact(&mut hello).unwrap();
            assert_eq!(&hello[..4], &SIGNATURE);
            assert_eq!(hello[4], CMD_HELLO);

            let mut response = SIGNATURE.to_vec();
            response.push(CMD_READY);
            sock.write_all(&response).unwrap();
        });

        let mut client = TcpStream::connect(addr).unwrap();
        let outcome = run_proxy_handshake(&mut client, 42).unwrap();
        assert_eq!(outcome, ProxyOutcome::Ready);
        server.join().unwrap();
    }

    #[test]
    fn wait_keepalives_are_swallowed_until_a_final_verdict() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut hello = [0u8; 9];
            sock.read_exact(&mut hello).unwrap();

            let mut wait = SIGNATURE.to_vec();
            wait.push(CMD_WAIT);
            sock.write_all(&wait).unwrap();

            let mut notready = SIGNATURE.to_vec();
            notready.push(CMD_NOTREADY);
            sock.write_all(&notready).unwrap();
        });

        let mut client = TcpStream::connect(addr).unwrap();
        let outcome = run_proxy_handshake(&mut client, 7).unwrap();
        assert_eq!(outcome, ProxyOutcome::NotReady);
        server.join().unwrap();
    }
}
