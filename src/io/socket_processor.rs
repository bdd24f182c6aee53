//! Socket Processor: a single dedicated thread runs `select()` over a
//! self-pipe plus every open socket, deriving each socket's interest bits
//! from its queue contents and connection state. The wake mechanism follows
//! mio's self-pipe `Awakener` (`sys/unix/awakener.rs`, `pipe` variant),
//! generalized from mio's edge-triggered `epoll` registration to a
//! level-triggered `select()` loop because the interest set here is
//! recomputed from live queue state every tick rather than registered once
//! per socket.

use std::collections::HashMap;
use std::mem::MaybeUninit;
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::os::fd::{FromRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::socket_stream::{try_read, try_write, ReadOp, WriteOp};
use super::stream::{IoResult, IoState, IoType};
use super::socket_stream::RawSocket;
use crate::error::VsmResult;
use crate::request::{OperationWaiter, Request};
use super::socket_stream::SocketStream;

pub struct SocketProcessor {
    streams: Mutex<Vec<Arc<SocketStream>>>,
    connects: Mutex<HashMap<usize, Request<IoResult>>>,
    wake_reader: RawFd,
    wake_writer: RawFd,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SocketProcessor {
    pub fn new() -> VsmResult<Arc<Self>> {
        let mut fds = [0; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        unsafe {
            libc::fcntl(fds[0], libc::F_SETFL, libc::O_NONBLOCK);
            libc::fcntl(fds[1], libc::F_SETFL, libc::O_NONBLOCK);
        }
        let this = Arc::new(SocketProcessor {
            streams: Mutex::new(Vec::new()),
            connects: Mutex::new(HashMap::new()),
            wake_reader: fds[0],
            wake_writer: fds[1],
            running: Arc::new(AtomicBool::new(true)),
            handle: Mutex::new(None),
        });
        let worker = this.clone();
        let handle = thread::Builder::new()
            .name("vsm-socket-processor".into())
            .spawn(move || worker.run())
            .expect("failed to spawn socket processor thread");
        *this.handle.lock().unwrap() = Some(handle);
        Ok(this)
    }

    fn wake(&self) {
        unsafe {
            let byte = [1u8];
            libc::write(self.wake_writer, byte.as_ptr() as *const _, 1);
        }
    }

    fn add_stream(&self, stream: Arc<SocketStream>) {
        self.streams.lock().unwrap().push(stream);
        self.wake();
    }

    /// Starts a non-blocking TCP connect; the returned waiter's result
    /// resolves via `connect_result()` read off the stream once OPENED.
    pub fn connect_tcp(self: &Arc<Self>, name: impl Into<String>, addr: SocketAddr) -> VsmResult<(Arc<SocketStream>, OperationWaiter<IoResult>)> {
        let std_listener_domain = if addr.is_ipv6() { libc::AF_INET6 } else { libc::AF_INET };
        let fd = unsafe { libc::socket(std_listener_domain, libc::SOCK_STREAM | libc::SOCK_NONBLOCK, 0) };
        if fd < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        let stream = unsafe { TcpStream::from_raw_fd(fd) };
        let sockaddr = socket_addr_to_raw(&addr);
        let rc = unsafe { libc::connect(fd, sockaddr.0.as_ptr() as *const libc::sockaddr, sockaddr.1) };
        let in_progress = rc != 0 && std::io::Error::last_os_error().raw_os_error() == Some(libc::EINPROGRESS);
        if rc != 0 && !in_progress {
            return Err(std::io::Error::last_os_error().into());
        }

        let io_stream = SocketStream::new(name, IoType::Tcp, IoState::Opening, Some(RawSocket::TcpStream(stream)));
        let req: Request<IoResult> = Request::new();
        self.connects.lock().unwrap().insert(Arc::as_ptr(&io_stream) as usize, req.clone());
        self.add_stream(io_stream.clone());
        Ok((io_stream, OperationWaiter::new(req)))
    }

    pub fn listen_tcp(self: &Arc<Self>, name: impl Into<String>, addr: SocketAddr) -> VsmResult<Arc<SocketStream>> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let stream = SocketStream::new(name, IoType::Tcp, IoState::OpeningPassive, Some(RawSocket::TcpListener(listener)));
        stream.inner.lock().unwrap().state = IoState::Opened;
        self.add_stream(stream.clone());
        Ok(stream)
    }

    pub fn open_udp(self: &Arc<Self>, name: impl Into<String>, bind_addr: SocketAddr) -> VsmResult<Arc<SocketStream>> {
        let socket = UdpSocket::bind(bind_addr)?;
        socket.set_nonblocking(true)?;
        let stream = SocketStream::new(name, IoType::Udp, IoState::Opened, Some(RawSocket::Udp(socket)));
        self.add_stream(stream.clone());
        Ok(stream)
    }

    pub fn read(&self, stream: &Arc<SocketStream>, min_to_read: usize, max_to_read: usize) -> OperationWaiter<(IoResult, Vec<u8>)> {
        let req = Request::new();
        stream.inner.lock().unwrap().read_queue.push_back(ReadOp { request: req.clone(), min_to_read, max_to_read, accumulated: Vec::new() });
        self.wake();
        OperationWaiter::new(req)
    }

    pub fn write(&self, stream: &Arc<SocketStream>, buf: Vec<u8>) -> OperationWaiter<(IoResult, usize)> {
        let req = Request::new();
        stream.inner.lock().unwrap().write_queue.push_back(WriteOp { request: req.clone(), buf, written: 0 });
        self.wake();
        OperationWaiter::new(req)
    }

    pub fn accept(&self, stream: &Arc<SocketStream>) -> OperationWaiter<(IoResult, Arc<SocketStream>)> {
        let req = Request::new();
        stream.inner.lock().unwrap().accept_queue.push_back(req.clone());
        self.wake();
        OperationWaiter::new(req)
    }

    /// UDP's analogue of `accept()`: resolves once a datagram arrives from a
    /// source address this socket has not seen before, handing back that
    /// peer's address so the caller can address sub-stream reads/writes to
    /// it via [`SocketProcessor::read_udp_substream`]/`write`.
    pub fn accept_udp(&self, stream: &Arc<SocketStream>) -> OperationWaiter<(IoResult, SocketAddr)> {
        let req = Request::new();
        stream.inner.lock().unwrap().udp_accept_queue.push_back(req.clone());
        self.wake();
        OperationWaiter::new(req)
    }

    /// Reads the next datagram from an already-accepted UDP peer: served
    /// immediately from the sub-stream's cache if one is already buffered,
    /// otherwise queued until the next datagram from that peer arrives.
    pub fn read_udp_substream(&self, stream: &Arc<SocketStream>, peer: SocketAddr) -> OperationWaiter<(IoResult, Vec<u8>)> {
        let req: Request<(IoResult, Vec<u8>)> = Request::new();
        let mut inner = stream.inner.lock().unwrap();
        match inner.udp_substreams.get_mut(&peer) {
            Some(sub) => match sub.cache.pop_front() {
                Some(data) => {
                    drop(inner);
                    req.complete((IoResult::Ok, data));
                }
                None => {
                    sub.read_queue.push_back(ReadOp { request: req.clone(), min_to_read: 1, max_to_read: usize::MAX, accumulated: Vec::new() });
                }
            },
            None => {
                drop(inner);
                req.complete((IoResult::OtherFailure, Vec::new()));
            }
        }
        self.wake();
        OperationWaiter::new(req)
    }

    fn run(&self) {
        let mut buf = vec![0u8; 64 * 1024];
        while self.running.load(Ordering::Acquire) {
            let streams = self.streams.lock().unwrap().clone();

            let mut read_set = unsafe { MaybeUninit::<libc::fd_set>::zeroed().assume_init() };
            let mut write_set = unsafe { MaybeUninit::<libc::fd_set>::zeroed().assume_init() };
            unsafe {
                libc::FD_ZERO(&mut read_set);
                libc::FD_ZERO(&mut write_set);
                libc::FD_SET(self.wake_reader, &mut read_set);
            }
            let mut max_fd = self.wake_reader;

            for stream in &streams {
                let inner = stream.inner.lock().unwrap();
                let Some(raw) = inner.socket.as_ref() else { continue };
                let fd = raw.raw_fd();
                max_fd = max_fd.max(fd);
                let wants_read = inner.state == IoState::OpeningPassive
                    || !inner.read_queue.is_empty()
                    || !inner.accept_queue.is_empty()
                    || inner.io_type == IoType::Udp;
                let wants_write = inner.state == IoState::Opening || !inner.write_queue.is_empty();
                unsafe {
                    if wants_read {
                        libc::FD_SET(fd, &mut read_set);
                    }
                    if wants_write {
                        libc::FD_SET(fd, &mut write_set);
                    }
                }
            }

            let mut timeout = libc::timeval { tv_sec: 0, tv_usec: 200_000 };
            let rc = unsafe {
                libc::select(
                    max_fd + 1,
                    &mut read_set,
                    &mut write_set,
                    std::ptr::null_mut(),
                    &mut timeout,
                )
            };
            if rc < 0 {
                continue;
            }

            if unsafe { libc::FD_ISSET(self.wake_reader, &read_set) } {
                let mut drain = [0u8; 256];
                unsafe {
                    while libc::read(self.wake_reader, drain.as_mut_ptr() as *mut _, drain.len()) > 0 {}
                }
            }

            for stream in &streams {
                self.service_stream(stream, &read_set, &write_set, &mut buf);
            }
        }
    }

    fn service_stream(&self, stream: &Arc<SocketStream>, read_set: &libc::fd_set, write_set: &libc::fd_set, buf: &mut [u8]) {
        let fd = match stream.raw_fd() {
            Some(fd) => fd,
            None => return,
        };
        let readable = unsafe { libc::FD_ISSET(fd, read_set) };
        let writable = unsafe { libc::FD_ISSET(fd, write_set) };
        if !readable && !writable {
            return;
        }

        let is_connecting = stream.inner.lock().unwrap().state == IoState::Opening;
        if is_connecting && writable {
            self.finish_connect(stream, fd);
            return;
        }

        let is_listener = matches!(stream.inner.lock().unwrap().socket, Some(RawSocket::TcpListener(_)));
        if is_listener && readable {
            self.service_accept(stream);
            return;
        }

        let is_udp = stream.inner.lock().unwrap().io_type == IoType::Udp;
        if is_udp && readable {
            self.service_udp_read(stream, buf);
        }

        if writable {
            self.service_write(stream);
        }
        if readable && !is_udp {
            self.service_read(stream, buf);
        }
    }

    fn finish_connect(&self, stream: &Arc<SocketStream>, fd: RawFd) {
        let mut err: libc::c_int = 0;
        let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
        unsafe {
            libc::getsockopt(fd, libc::SOL_SOCKET, libc::SO_ERROR, &mut err as *mut _ as *mut _, &mut len);
        }
        let req = self.connects.lock().unwrap().remove(&(Arc::as_ptr(stream) as usize));
        if err == 0 {
            stream.inner.lock().unwrap().state = IoState::Opened;
            if let Some(req) = req {
                req.complete(IoResult::Ok);
            }
        } else {
            let io_err = std::io::Error::from_raw_os_error(err);
            let result = IoResult::from_connect_error(&io_err);
            stream.close();
            if let Some(req) = req {
                req.complete(result);
            }
        }
    }

    fn service_accept(&self, stream: &Arc<SocketStream>) {
        loop {
            let has_waiter = !stream.inner.lock().unwrap().accept_queue.is_empty();
            if !has_waiter {
                break;
            }
            let accepted = {
                let inner = stream.inner.lock().unwrap();
                match inner.socket.as_ref() {
                    Some(RawSocket::TcpListener(l)) => l.accept(),
                    _ => break,
                }
            };
            match accepted {
                Ok((sock, peer)) => {
                    let _ = sock.set_nonblocking(true);
                    let child = SocketStream::new(format!("{}-accepted-{peer}", stream.name), IoType::Tcp, IoState::Opened, Some(RawSocket::TcpStream(sock)));
                    let req = stream.inner.lock().unwrap().accept_queue.pop_front().unwrap();
                    self.streams.lock().unwrap().push(child.clone());
                    req.complete((IoResult::Ok, child));
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
    }

    fn service_write(&self, stream: &Arc<SocketStream>) {
        loop {
            let (buf_slice, is_udp) = {
                let inner = stream.inner.lock().unwrap();
                match inner.write_queue.front() {
                    Some(op) => (op.buf[op.written..].to_vec(), inner.io_type == IoType::Udp),
                    None => return,
                }
            };
            let _ = is_udp;
            if buf_slice.is_empty() {
                self.complete_head_write(stream, IoResult::Ok);
                continue;
            }
            let result = {
                let mut inner = stream.inner.lock().unwrap();
                match inner.socket.as_mut() {
                    Some(raw) => try_write(raw, &buf_slice),
                    None => return,
                }
            };
            match result {
                Ok(Some(0)) | Ok(None) => return,
                Ok(Some(n)) => {
                    let done = {
                        let mut inner = stream.inner.lock().unwrap();
                        let op = inner.write_queue.front_mut().unwrap();
                        op.written += n;
                        op.written >= op.buf.len()
                    };
                    if done {
                        self.complete_head_write(stream, IoResult::Ok);
                    }
                }
                Err(_) => {
                    self.complete_head_write(stream, IoResult::OtherFailure);
                }
            }
        }
    }

    fn complete_head_write(&self, stream: &Arc<SocketStream>, result: IoResult) {
        let op = stream.inner.lock().unwrap().write_queue.pop_front();
        if let Some(op) = op {
            op.request.complete((result, op.written));
        }
    }

    /// Loops `recv`/`read` against the head-of-queue op until it has
    /// gathered `min_to_read` bytes, `max_to_read` is reached, EAGAIN is hit,
    /// or the connection ends/errors — never completing early on a short
    /// read the way a single `recv` call would.
    fn service_read(&self, stream: &Arc<SocketStream>, buf: &mut [u8]) {
        loop {
            let (min_to_read, want) = match stream.inner.lock().unwrap().read_queue.front() {
                Some(op) => {
                    let remaining = op.max_to_read.saturating_sub(op.accumulated.len());
                    (op.min_to_read, remaining.min(buf.len()).max(1))
                }
                None => return,
            };
            let result = {
                let mut inner = stream.inner.lock().unwrap();
                match inner.socket.as_mut() {
                    Some(raw) => try_read(raw, &mut buf[..want]),
                    None => return,
                }
            };
            match result {
                Ok(None) => return,
                Ok(Some(0)) => {
                    let op = stream.inner.lock().unwrap().read_queue.pop_front();
                    if let Some(op) = op {
                        let result = if op.accumulated.is_empty() { IoResult::EndOfFile } else { IoResult::Ok };
                        op.request.complete((result, op.accumulated));
                    }
                    stream.close();
                    return;
                }
                Ok(Some(n)) => {
                    let mut inner = stream.inner.lock().unwrap();
                    let satisfied = match inner.read_queue.front_mut() {
                        Some(op) => {
                            op.accumulated.extend_from_slice(&buf[..n]);
                            op.accumulated.len() >= min_to_read.max(1) || op.accumulated.len() >= op.max_to_read
                        }
                        None => false,
                    };
                    if satisfied {
                        if let Some(op) = inner.read_queue.pop_front() {
                            drop(inner);
                            op.request.complete((IoResult::Ok, op.accumulated));
                        }
                    }
                }
                Err(_) => {
                    let op = stream.inner.lock().unwrap().read_queue.pop_front();
                    if let Some(op) = op {
                        op.request.complete((IoResult::OtherFailure, op.accumulated));
                    }
                    return;
                }
            }
        }
    }

    fn service_udp_read(&self, stream: &Arc<SocketStream>, buf: &mut [u8]) {
        loop {
            let recvd = {
                let mut inner = stream.inner.lock().unwrap();
                match inner.socket.as_mut() {
                    Some(RawSocket::Udp(s)) => s.recv_from(buf),
                    _ => return,
                }
            };
            match recvd {
                Ok((n, SocketAddr::V4(addr))) => self.dispatch_udp_datagram(stream, SocketAddr::V4(addr), &buf[..n]),
                Ok((n, SocketAddr::V6(addr))) => self.dispatch_udp_datagram(stream, SocketAddr::V6(addr), &buf[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(_) => return,
            }
        }
    }

    /// Routes one datagram to its sub-stream, synthesizing the sub-stream on
    /// first sight of a new source address and completing a waiting
    /// `accept()`, otherwise
    /// either completing a queued read or caching the datagram (bounded FIFO,
    /// oldest dropped on overflow).
    fn dispatch_udp_datagram(&self, stream: &Arc<SocketStream>, peer: SocketAddr, data: &[u8]) {
        let mut inner = stream.inner.lock().unwrap();
        if !inner.udp_substreams.contains_key(&peer) {
            inner.udp_substreams.insert(
                peer,
                super::socket_stream::UdpSubstream { peer, cache: std::collections::VecDeque::new(), read_queue: std::collections::VecDeque::new() },
            );
            if let Some(req) = inner.udp_accept_queue.pop_front() {
                req.complete((IoResult::Ok, peer));
            }
        }
        let sub = inner.udp_substreams.get_mut(&peer).unwrap();
        if let Some(op) = sub.read_queue.pop_front() {
            op.request.complete((IoResult::Ok, data.to_vec()));
        } else {
            if sub.cache.len() >= super::socket_stream::_CACHE_CAP_DOC {
                sub.cache.pop_front();
            }
            sub.cache.push_back(data.to_vec());
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.wake();
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SocketProcessor {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.wake();
        unsafe {
            libc::close(self.wake_reader);
            libc::close(self.wake_writer);
        }
    }
}

fn socket_addr_to_raw(addr: &SocketAddr) -> (Vec<u8>, libc::socklen_t) {
    match addr {
        SocketAddr::V4(v4) => {
            let mut sa: libc::sockaddr_in = unsafe { std::mem::zeroed() };
            sa.sin_family = libc::AF_INET as libc::sa_family_t;
            sa.sin_port = v4.port().to_be();
            sa.sin_addr.s_addr = u32::from_ne_bytes(v4.ip().octets());
            let bytes = unsafe { std::slice::from_raw_parts(&sa as *const _ as *const u8, std::mem::size_of::<libc::sockaddr_in>()) }.to_vec();
            (bytes, std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t)
        }
        SocketAddr::V6(v6) => {
            let mut sa: libc::sockaddr_in6 = unsafe { std::mem::zeroed() };
            sa.sin6_family = libc::AF_INET6 as libc::sa_family_t;
            sa.sin6_port = v6.port().to_be();
            sa.sin6_addr.s6_addr = v6.ip().octets();
            let bytes = unsafe { std::slice::from_raw_parts(&sa as *const _ as *const u8, std::mem::size_of::<libc::sockaddr_in6>()) }.to_vec();
            (bytes, std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t)
        }
    }
}
