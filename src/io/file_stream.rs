//! File/serial/pipe-backed [`Io_stream`](super::stream).

use std::collections::VecDeque;
use std::fs::File;
use std::sync::{Arc, Mutex};

use super::stream::{IoState, IoType};
use crate::request::Request;

use super::stream::IoResult;

pub(crate) struct ReadOp {
    pub request: Request<(IoResult, Vec<u8>)>,
    pub offset: i64,
    pub min_to_read: usize,
    pub max_to_read: usize,
}

pub(crate) struct WriteOp {
    pub request: Request<(IoResult, usize)>,
    pub offset: i64,
    pub buf: Vec<u8>,
}

pub(crate) struct Inner {
    pub io_type: IoType,
    pub state: IoState,
    pub file: Option<File>,
    pub position: u64,
    pub read_queue: VecDeque<ReadOp>,
    pub write_queue: VecDeque<WriteOp>,
    /// Set once a helper thread's `flock` call has returned successfully and
    /// the lock is actually held.
    pub lock_held: bool,
    /// Set from the moment a `lock()` call is accepted until its helper
    /// thread commits or backs out, so a second `lock()` racing in while
    /// the first is still blocked in `flock()` is rejected rather than
    /// spawning a second helper thread against the same fd.
    pub acquire_requested: bool,
}

/// A file, serial port, or named-pipe stream, exclusively owned by one
/// [`super::FileProcessor`] while live.
pub struct FileStream {
    pub(crate) name: String,
    pub(crate) inner: Mutex<Inner>,
}

impl FileStream {
    pub(crate) fn new(name: impl Into<String>, io_type: IoType, file: File) -> Arc<Self> {
        Arc::new(FileStream {
            name: name.into(),
            inner: Mutex::new(Inner {
                io_type,
                state: IoState::Opened,
                file: Some(file),
                position: 0,
                read_queue: VecDeque::new(),
                write_queue: VecDeque::new(),
                lock_held: false,
                acquire_requested: false,
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

    pub fn close(&self) {
        let (reads, writes) = {
            let mut inner = self.inner.lock().unwrap();
            inner.state = IoState::Closed;
            inner.file = None;
            (std::mem::take(&mut inner.read_queue), std::mem::take(&mut inner.write_queue))
        };
        for op in reads {
            op.request.complete((IoResult::Closed, Vec::new()));
        }
        for op in writes {
            op.request.complete((IoResult::Closed, 0));
        }
    }
}
