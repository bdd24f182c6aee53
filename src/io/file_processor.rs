//! File Processor: a `poll()`-based reactor
//! for file, serial, and pipe descriptors, with per-stream op serialization
//! and advisory locking offloaded to detached helper threads (a blocking
//! `flock()` call must never stall the reactor thread). Grounded on the
//! teacher's self-pipe wake mechanism (`sys/unix/awakener.rs`) adapted from
//! `select()` to `poll()`, since file/serial/pipe descriptor counts here are
//! small and `poll()`'s flat `pollfd` array is the simpler, more idiomatic
//! fit than rebuilding `select()`'s fd_set bitmasks for non-socket fds.

use std::fs::OpenOptions;
use std::os::fd::AsRawFd;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use super::file_stream::{FileStream, ReadOp, WriteOp};
use super::stream::{IoResult, IoType, OFFSET_END, OFFSET_NONE};
use crate::error::VsmResult;
use crate::request::{OperationWaiter, Request, RequestState};

pub struct FileProcessor {
    streams: Mutex<Vec<Arc<FileStream>>>,
    wake_reader: i32,
    wake_writer: i32,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl FileProcessor {
    pub fn new() -> VsmResult<Arc<Self>> {
        let mut fds = [0; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        unsafe {
            libc::fcntl(fds[0], libc::F_SETFL, libc::O_NONBLOCK);
        }
        let this = Arc::new(FileProcessor {
            streams: Mutex::new(Vec::new()),
            wake_reader: fds[0],
            wake_writer: fds[1],
            running: Arc::new(AtomicBool::new(true)),
            handle: Mutex::new(None),
        });
        let worker = this.clone();
        let handle = thread::Builder::new()
            .name("vsm-file-processor".into())
            .spawn(move || worker.run())
            .expect("failed to spawn file processor thread");
        *this.handle.lock().unwrap() = Some(handle);
        Ok(this)
    }

    fn wake(&self) {
        unsafe {
            let byte = [1u8];
            libc::write(self.wake_writer, byte.as_ptr() as *const _, 1);
        }
    }

    pub fn open_file(self: &Arc<Self>, path: impl AsRef<Path>, read: bool, write: bool, create: bool) -> VsmResult<Arc<FileStream>> {
        let file = OpenOptions::new().read(read).write(write).create(create).open(path.as_ref())?;
        let stream = FileStream::new(path.as_ref().to_string_lossy().into_owned(), IoType::File, file);
        self.streams.lock().unwrap().push(stream.clone());
        Ok(stream)
    }

    pub fn read(&self, stream: &Arc<FileStream>, offset: i64, min_to_read: usize, max_to_read: usize) -> OperationWaiter<(IoResult, Vec<u8>)> {
        let req = Request::new();
        stream.inner.lock().unwrap().read_queue.push_back(ReadOp { request: req.clone(), offset, min_to_read, max_to_read });
        self.wake();
        OperationWaiter::new(req)
    }

    pub fn write(&self, stream: &Arc<FileStream>, offset: i64, buf: Vec<u8>) -> OperationWaiter<(IoResult, usize)> {
        let req = Request::new();
        stream.inner.lock().unwrap().write_queue.push_back(WriteOp { request: req.clone(), offset, buf });
        self.wake();
        OperationWaiter::new(req)
    }

    /// Acquires an advisory `flock` on a detached helper thread from a small
    /// pool reserved for blocking `flock` calls — this call never blocks the
    /// reactor thread. A second `lock()` while one is already held or still
    /// being acquired is rejected with `LockError` rather than spawning a
    /// competing helper thread against the same fd. If the request is
    /// canceled or the stream is closed while the helper is still blocked in
    /// `flock()`, the helper releases whatever it ends up acquiring instead
    /// of committing `lock_held`.
    pub fn lock(&self, stream: &Arc<FileStream>, exclusive: bool) -> OperationWaiter<IoResult> {
        let req: Request<IoResult> = Request::new();
        {
            let mut inner = stream.inner.lock().unwrap();
            if inner.lock_held || inner.acquire_requested {
                req.complete(IoResult::LockError);
                return OperationWaiter::new(req);
            }
            inner.acquire_requested = true;
        }

        let stream = stream.clone();
        let req2 = req.clone();
        thread::spawn(move || {
            let fd = {
                let inner = stream.inner.lock().unwrap();
                match inner.file.as_ref() {
                    Some(f) => f.as_raw_fd(),
                    None => {
                        stream.inner.lock().unwrap().acquire_requested = false;
                        req2.complete(IoResult::Closed);
                        return;
                    }
                }
            };
            let op = if exclusive { libc::LOCK_EX } else { libc::LOCK_SH };
            let rc = unsafe { libc::flock(fd, op) };

            let mut inner = stream.inner.lock().unwrap();
            inner.acquire_requested = false;
            let gave_up = inner.file.is_none() || req2.state() == RequestState::CancellationPending || req2.is_done();
            if gave_up {
                drop(inner);
                if rc == 0 {
                    unsafe {
                        libc::flock(fd, libc::LOCK_UN);
                    }
                }
                req2.complete(IoResult::Canceled);
                return;
            }
            if rc == 0 {
                inner.lock_held = true;
                drop(inner);
                req2.complete(IoResult::Ok);
            } else {
                drop(inner);
                req2.complete(IoResult::LockError);
            }
        });
        OperationWaiter::new(req)
    }

    /// Releases a previously acquired lock. Returns `LockError` if the
    /// stream isn't currently locked, matching `lock()`'s own rejection of a
    /// redundant acquire.
    pub fn unlock(&self, stream: &Arc<FileStream>) -> IoResult {
        let fd = {
            let inner = stream.inner.lock().unwrap();
            if !inner.lock_held {
                return IoResult::LockError;
            }
            match inner.file.as_ref() {
                Some(f) => f.as_raw_fd(),
                None => return IoResult::LockError,
            }
        };
        let rc = unsafe { libc::flock(fd, libc::LOCK_UN) };
        let mut inner = stream.inner.lock().unwrap();
        inner.lock_held = false;
        if rc == 0 {
            IoResult::Ok
        } else {
            IoResult::LockError
        }
    }

    fn run(&self) {
        let mut buf = vec![0u8; 64 * 1024];
        while self.running.load(Ordering::Acquire) {
            let streams = self.streams.lock().unwrap().clone();

            let mut pollfds = vec![libc::pollfd { fd: self.wake_reader, events: libc::POLLIN, revents: 0 }];
            for stream in &streams {
                let inner = stream.inner.lock().unwrap();
                if let Some(file) = inner.file.as_ref() {
                    let mut events = 0;
                    if !inner.read_queue.is_empty() {
                        events |= libc::POLLIN;
                    }
                    if !inner.write_queue.is_empty() {
                        events |= libc::POLLOUT;
                    }
                    if events != 0 {
                        pollfds.push(libc::pollfd { fd: file.as_raw_fd(), events, revents: 0 });
                    }
                }
            }

            let rc = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, 200) };
            if rc < 0 {
                continue;
            }

            if pollfds[0].revents & libc::POLLIN != 0 {
                let mut drain = [0u8; 256];
                unsafe {
                    while libc::read(self.wake_reader, drain.as_mut_ptr() as *mut _, drain.len()) > 0 {}
                }
            }

            // Regular files are always "ready": pread/pwrite never block on
            // a seekable fd. Pipes and serial ports are gated on poll's
            // revents, so drain every stream with pending ops each tick and
            // let a non-blocking read/write naturally no-op when not ready.
            for stream in &streams {
                self.drain_reads(stream, &mut buf);
                self.drain_writes(stream);
            }
        }
    }

    fn drain_reads(&self, stream: &Arc<FileStream>, buf: &mut [u8]) {
        loop {
            let (offset, max_to_read) = {
                let inner = stream.inner.lock().unwrap();
                match inner.read_queue.front() {
                    Some(op) => (op.offset, op.max_to_read.min(buf.len()).max(1)),
                    None => return,
                }
            };
            let read_result = {
                let mut inner = stream.inner.lock().unwrap();
                let position = inner.position;
                match inner.file.as_mut() {
                    Some(file) => {
                        let use_offset = if offset == OFFSET_NONE { position } else { offset as u64 };
                        file.read_at(&mut buf[..max_to_read], use_offset)
                    }
                    None => return,
                }
            };
            match read_result {
                Ok(0) => {
                    let op = stream.inner.lock().unwrap().read_queue.pop_front();
                    if let Some(op) = op {
                        op.request.complete((IoResult::EndOfFile, Vec::new()));
                    }
                    return;
                }
                Ok(n) => {
                    let op = stream.inner.lock().unwrap().read_queue.pop_front();
                    if let Some(op) = op {
                        stream.inner.lock().unwrap().position += n as u64;
                        op.request.complete((IoResult::Ok, buf[..n].to_vec()));
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(_) => {
                    let op = stream.inner.lock().unwrap().read_queue.pop_front();
                    if let Some(op) = op {
                        op.request.complete((IoResult::OtherFailure, Vec::new()));
                    }
                    return;
                }
            }
        }
    }

    fn drain_writes(&self, stream: &Arc<FileStream>) {
        loop {
            let (offset, buf) = {
                let inner = stream.inner.lock().unwrap();
                match inner.write_queue.front() {
                    Some(op) => (op.offset, op.buf.clone()),
                    None => return,
                }
            };
            let write_result = {
                let mut inner = stream.inner.lock().unwrap();
                let position = inner.position;
                let file_len = inner.file.as_ref().and_then(|f| f.metadata().ok()).map(|m| m.len()).unwrap_or(position);
                match inner.file.as_mut() {
                    Some(file) => {
                        let use_offset = match offset {
                            OFFSET_NONE => position,
                            OFFSET_END => file_len,
                            other => other as u64,
                        };
                        file.write_at(&buf, use_offset)
                    }
                    None => return,
                }
            };
            match write_result {
                Ok(n) => {
                    let op = stream.inner.lock().unwrap().write_queue.pop_front();
                    if let Some(op) = op {
                        stream.inner.lock().unwrap().position += n as u64;
                        op.request.complete((IoResult::Ok, n));
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
                Err(_) => {
                    let op = stream.inner.lock().unwrap().write_queue.pop_front();
                    if let Some(op) = op {
                        op.request.complete((IoResult::OtherFailure, 0));
                    }
                    return;
                }
            }
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

impl Drop for FileProcessor {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.wake();
        unsafe {
            libc::close(self.wake_reader);
            libc::close(self.wake_writer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::time::Duration;

    #[test]
    fn reads_back_what_was_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stream.bin");
        std::fs::File::create(&path).unwrap().write_all(b"hello").unwrap();

        let proc = FileProcessor::new().unwrap();
        let stream = proc.open_file(&path, true, true, false).unwrap();
        let waiter = proc.read(&stream, OFFSET_NONE, 5, 5);
        assert!(waiter.wait(Some(Duration::from_secs(5))));
        let (result, data) = waiter.result().unwrap();
        assert_eq!(result, IoResult::Ok);
        assert_eq!(data, b"hello");
        proc.stop();
    }

    #[test]
    fn a_second_lock_while_one_is_held_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locked.bin");
        std::fs::File::create(&path).unwrap();

        let proc = FileProcessor::new().unwrap();
        let stream = proc.open_file(&path, true, true, false).unwrap();

        let first = proc.lock(&stream, true);
        assert!(first.wait(Some(Duration::from_secs(5))));
        assert_eq!(first.result(), Some(IoResult::Ok));

        let second = proc.lock(&stream, true);
        assert!(second.wait(Some(Duration::from_secs(5))));
        assert_eq!(second.result(), Some(IoResult::LockError));

        proc.stop();
    }

    #[test]
    fn unlock_without_a_held_lock_reports_lock_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("unlocked.bin");
        std::fs::File::create(&path).unwrap();

        let proc = FileProcessor::new().unwrap();
        let stream = proc.open_file(&path, true, true, false).unwrap();

        assert_eq!(proc.unlock(&stream), IoResult::LockError);
        proc.stop();
    }

    #[test]
    fn unlocking_a_held_lock_allows_a_fresh_lock_afterwards() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relock.bin");
        std::fs::File::create(&path).unwrap();

        let proc = FileProcessor::new().unwrap();
        let stream = proc.open_file(&path, true, true, false).unwrap();

        let first = proc.lock(&stream, true);
        assert!(first.wait(Some(Duration::from_secs(5))));
        assert_eq!(first.result(), Some(IoResult::Ok));

        assert_eq!(proc.unlock(&stream), IoResult::Ok);

        let second = proc.lock(&stream, true);
        assert!(second.wait(Some(Duration::from_secs(5))));
        assert_eq!(second.result(), Some(IoResult::Ok));

        proc.stop();
    }
}
