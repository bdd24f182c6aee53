//! Socket-backed [`Io_stream`](super::stream) implementation: TCP and UDP,
//! including UDP "accept" sub-streams. Follows the shape of mio's
//! non-blocking read/write adapter traits (`deprecated::io::{TryRead,
//! TryWrite}`) and its `sys/unix/net.rs` socket-option helpers, reworked
//! onto `std::net` sockets set non-blocking via `libc` rather than mio's
//! own `mio::net` registration (this core's reactor is a single `select()`
//! loop, not an epoll `Poll`).

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::{Arc, Mutex};

use super::stream::{IoResult, IoState, IoType};
use crate::error::{VsmError, VsmResult};
use crate::request::Request;

/// Bound on the per-sub-stream datagram cache.
const UDP_SUBSTREAM_CACHE_CAP: usize = 50;

pub(crate) enum RawSocket {
    TcpStream(TcpStream),
    TcpListener(TcpListener),
    Udp(UdpSocket),
}

impl RawSocket {
    pub(crate) fn raw_fd(&self) -> RawFd {
        match self {
            RawSocket::TcpStream(s) => s.as_raw_fd(),
            RawSocket::TcpListener(s) => s.as_raw_fd(),
            RawSocket::Udp(s) => s.as_raw_fd(),
        }
    }
}

pub(crate) struct ReadOp {
    pub request: Request<(IoResult, Vec<u8>)>,
    pub min_to_read: usize,
    pub max_to_read: usize,
    /// Bytes already gathered across prior reactor ticks, for ops that
    /// needed more than one `recv`/`read` to reach `min_to_read`.
    pub accumulated: Vec<u8>,
}

pub(crate) struct WriteOp {
    pub request: Request<(IoResult, usize)>,
    pub buf: Vec<u8>,
    pub written: usize,
}

pub(crate) struct UdpSubstream {
    pub peer: SocketAddr,
    pub cache: VecDeque<Vec<u8>>,
    pub read_queue: VecDeque<ReadOp>,
}

pub(crate) struct Inner {
    pub io_type: IoType,
    pub state: IoState,
    pub socket: Option<RawSocket>,
    pub read_queue: VecDeque<ReadOp>,
    pub write_queue: VecDeque<WriteOp>,
    pub accept_queue: VecDeque<Request<(IoResult, Arc<SocketStream>)>>,
    pub udp_substreams: HashMap<SocketAddr, UdpSubstream>,
    pub udp_accept_queue: VecDeque<Request<(IoResult, SocketAddr)>>,
    pub local_addr: Option<SocketAddr>,
}

/// A socket stream shared by every in-flight request touching it.
///
/// Owned exclusively by one [`super::SocketProcessor`] while live; clones of
/// the `Arc` may still be held by requests that completed but whose caller
/// has not dropped its result yet.
pub struct SocketStream {
    pub(crate) name: String,
    pub(crate) inner: Mutex<Inner>,
}

impl SocketStream {
    pub(crate) fn new(name: impl Into<String>, io_type: IoType, state: IoState, socket: Option<RawSocket>) -> Arc<Self> {
        Arc::new(SocketStream {
            name: name.into(),
            inner: Mutex::new(Inner {
                io_type,
                state,
                socket,
                read_queue: VecDeque::new(),
                write_queue: VecDeque::new(),
                accept_queue: VecDeque::new(),
                udp_substreams: HashMap::new(),
                udp_accept_queue: VecDeque::new(),
                local_addr: None,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn io_type(&self) -> IoType {
        self.inner.lock().unwrap().io_type
    }

    pub fn state(&self) -> IoState {
        self.inner.lock().unwrap().state
    }

    pub(crate) fn raw_fd(&self) -> Option<RawFd> {
        self.inner.lock().unwrap().socket.as_ref().map(|s| s.raw_fd())
    }

    /// Closes the stream and aborts every request still queued against it
    /// with `IoResult::Closed`.
    pub fn close(&self) {
        let (reads, writes, accepts, udp_accepts, substream_reads) = {
            let mut inner = self.inner.lock().unwrap();
            inner.state = IoState::Closed;
            inner.socket = None;
            let substream_reads: Vec<_> = inner.udp_substreams.values_mut().flat_map(|s| s.read_queue.drain(..)).collect();
            (
                std::mem::take(&mut inner.read_queue),
                std::mem::take(&mut inner.write_queue),
                std::mem::take(&mut inner.accept_queue),
                std::mem::take(&mut inner.udp_accept_queue),
                substream_reads,
            )
        };
        for op in reads.into_iter().chain(substream_reads) {
            op.request.complete((IoResult::Closed, Vec::new()));
        }
        for op in writes {
            op.request.complete((IoResult::Closed, op.written));
        }
        for req in accepts {
            req.abort();
        }
        for req in udp_accepts {
            req.abort();
        }
    }
}

pub(crate) fn set_nonblocking(raw: &RawSocket) -> io::Result<()> {
    match raw {
        RawSocket::TcpStream(s) => s.set_nonblocking(true),
        RawSocket::TcpListener(s) => s.set_nonblocking(true),
        RawSocket::Udp(s) => s.set_nonblocking(true),
    }
}

/// Non-blocking read/write, mirroring mio's `deprecated::io::{TryRead,
/// TryWrite}` `WouldBlock`-swallowing adapters.
pub(crate) fn try_read(raw: &mut RawSocket, buf: &mut [u8]) -> VsmResult<Option<usize>> {
    let result = match raw {
        RawSocket::TcpStream(s) => s.read(buf),
        RawSocket::Udp(s) => s.recv(buf),
        RawSocket::TcpListener(_) => return Err(VsmError::invalid_param("listener is not readable")),
    };
    map_would_block(result)
}

pub(crate) fn try_write(raw: &mut RawSocket, buf: &[u8]) -> VsmResult<Option<usize>> {
    let result = match raw {
        RawSocket::TcpStream(s) => s.write(buf),
        RawSocket::Udp(s) => s.send(buf),
        RawSocket::TcpListener(_) => return Err(VsmError::invalid_param("listener is not writable")),
    };
    map_would_block(result)
}

fn map_would_block(result: io::Result<usize>) -> VsmResult<Option<usize>> {
    match result {
        Ok(n) => Ok(Some(n)),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
        Err(e) => Err(VsmError::from(e)),
    }
}

pub(crate) const _CACHE_CAP_DOC: usize = UDP_SUBSTREAM_CACHE_CAP;
