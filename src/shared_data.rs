//! Cross-process shared-memory mutex used by the transport detector to
//! arbitrate access to a serial device across multiple VSM processes on one
//! host. A named POSIX semaphore guards a named `shm_open` region laid out
//! as a fixed client table; the current holder heartbeats periodically and
//! a waiter takes over once that heartbeat goes stale.
//!
//! Grounded on the raw `libc` syscall style of [`crate::io::socket_processor`]
//! (unsafe FFI calls checked against `-1`/null, errno surfaced via
//! `io::Error::last_os_error`) applied to `shm_open`/`mmap`/`sem_open`
//! instead of sockets.

use std::ffi::CString;
use std::io;
use std::mem::size_of;
use std::os::unix::io::RawFd;
use std::ptr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{VsmError, VsmResult};

pub const MAX_SIM_CLIENTS: usize = 8;

/// A holder goes stale, and may be taken over by the next waiter, once its
/// heartbeat is older than this.
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(3);
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// Acquired cleanly; no prior holder was present.
    Acquired,
    /// Acquired by taking over from a holder whose heartbeat had lapsed.
    Recovered,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct ClientSlot {
    client_id: u32,
    last_heartbeat_secs: u64,
}

/// The metadata header written into the shared region. `repr(C)` so every
/// attaching process agrees on the byte layout regardless of which binary
/// created the segment.
#[repr(C)]
struct SharedLayout {
    version: u32,
    next_client_id: u32,
    current_client_id: u32,
    client_count: u32,
    clients: [ClientSlot; MAX_SIM_CLIENTS],
}

const LAYOUT_VERSION: u32 = 1;

/// A handle to one named cross-process mutex plus an optional trailing data
/// region the lock holder may read and write freely.
pub struct SharedData {
    name: String,
    shm_fd: RawFd,
    sem: *mut libc::sem_t,
    base: *mut u8,
    total_len: usize,
    extra_len: usize,
    client_id: u32,
    held: bool,
}

unsafe impl Send for SharedData {}

impl SharedData {
    /// Opens (creating if absent) the named region, sized for the metadata
    /// header plus `extra_len` bytes of caller-defined data.
    pub fn open(name: &str, extra_len: usize) -> VsmResult<SharedData> {
        let shm_name = CString::new(format!("/{name}")).map_err(|e| VsmError::invalid_param(e.to_string()))?;
        let sem_name = CString::new(format!("/{name}.lock")).map_err(|e| VsmError::invalid_param(e.to_string()))?;
        let total_len = size_of::<SharedLayout>() + extra_len;

        // SAFETY: standard POSIX shm_open/ftruncate/mmap sequence; every
        // call result is checked before use.
        unsafe {
            let fd = libc::shm_open(shm_name.as_ptr(), libc::O_CREAT | libc::O_RDWR, 0o600);
            if fd < 0 {
                return Err(VsmError::System(io::Error::last_os_error()));
            }
            if libc::ftruncate(fd, total_len as libc::off_t) != 0 {
                let err = io::Error::last_os_error();
                libc::close(fd);
                return Err(VsmError::System(err));
            }

            let base = libc::mmap(ptr::null_mut(), total_len, libc::PROT_READ | libc::PROT_WRITE, libc::MAP_SHARED, fd, 0);
            if base == libc::MAP_FAILED {
                let err = io::Error::last_os_error();
                libc::close(fd);
                return Err(VsmError::System(err));
            }

            let sem = libc::sem_open(sem_name.as_ptr(), libc::O_CREAT, 0o600u32, 1u32);
            if sem == libc::SEM_FAILED {
                let err = io::Error::last_os_error();
                libc::munmap(base, total_len);
                libc::close(fd);
                return Err(VsmError::System(err));
            }

            let layout = base as *mut SharedLayout;
            // First creator to see an uninitialized version stamps the
            // header; later openers just attach.
            if (*layout).version != LAYOUT_VERSION {
                (*layout).version = LAYOUT_VERSION;
                (*layout).next_client_id = 1;
                (*layout).current_client_id = 0;
                (*layout).client_count = 0;
                (*layout).clients = [ClientSlot { client_id: 0, last_heartbeat_secs: 0 }; MAX_SIM_CLIENTS];
            }

            Ok(SharedData {
                name: name.to_string(),
                shm_fd: fd,
                sem,
                base: base as *mut u8,
                total_len,
                extra_len,
                client_id: 0,
                held: false,
            })
        }
    }

    fn layout(&self) -> *mut SharedLayout {
        self.base as *mut SharedLayout
    }

    /// The embedded data region following the metadata header, valid to
    /// access only while this handle holds the lock.
    pub fn data(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.base.add(size_of::<SharedLayout>()), self.extra_len) }
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.base.add(size_of::<SharedLayout>()), self.extra_len) }
    }

    /// Blocks on the named semaphore, then registers this process in the
    /// client table and determines whether it is taking over from a stale
    /// holder.
    pub fn lock(&mut self) -> VsmResult<LockOutcome> {
        unsafe {
            if libc::sem_wait(self.sem) != 0 {
                return Err(VsmError::System(io::Error::last_os_error()));
            }
        }
        self.held = true;

        let now = now_secs();
        let layout = unsafe { &mut *self.layout() };
        if self.client_id == 0 {
            self.client_id = layout.next_client_id;
            layout.next_client_id += 1;
        }

        let prior_holder_stale = layout.current_client_id != 0
            && layout.current_client_id != self.client_id
            && layout
                .clients
                .iter()
                .find(|c| c.client_id == layout.current_client_id)
                .map(|c| now.saturating_sub(c.last_heartbeat_secs) >= HEARTBEAT_TIMEOUT.as_secs())
                .unwrap_or(true);

        let outcome = if layout.current_client_id == 0 || layout.current_client_id == self.client_id {
            LockOutcome::Acquired
        } else if prior_holder_stale {
            LockOutcome::Recovered
        } else {
            LockOutcome::Acquired
        };

        layout.current_client_id = self.client_id;
        if let Some(slot) = layout.clients.iter_mut().find(|c| c.client_id == self.client_id) {
            slot.last_heartbeat_secs = now;
        } else if let Some(slot) = layout.clients.iter_mut().find(|c| c.client_id == 0) {
            *slot = ClientSlot { client_id: self.client_id, last_heartbeat_secs: now };
            layout.client_count += 1;
        }

        Ok(outcome)
    }

    /// Refreshes this holder's heartbeat without releasing the semaphore.
    /// Callers on a roughly one-second timer call this while they keep the
    /// lock for an extended operation.
    pub fn heartbeat(&mut self) {
        let now = now_secs();
        let layout = unsafe { &mut *self.layout() };
        if let Some(slot) = layout.clients.iter_mut().find(|c| c.client_id == self.client_id) {
            slot.last_heartbeat_secs = now;
        }
    }

    pub fn unlock(&mut self) {
        if !self.held {
            return;
        }
        unsafe {
            libc::sem_post(self.sem);
        }
        self.held = false;
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

impl Drop for SharedData {
    fn drop(&mut self) {
        self.unlock();
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.total_len);
            libc::close(self.shm_fd);
            libc::sem_close(self.sem);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_opener_acquires_cleanly() {
        let name = format!("vsm-test-{}", std::process::id());
        let mut shared = SharedData::open(&name, 16).unwrap();
        let outcome = shared.lock().unwrap();
        assert_eq!(outcome, LockOutcome::Acquired);
        shared.unlock();
    }

    #[test]
    fn data_region_is_readable_and_writable_while_held() {
        let name = format!("vsm-test-data-{}", std::process::id());
        let mut shared = SharedData::open(&name, 8).unwrap();
        shared.lock().unwrap();
        shared.data_mut()[0] = 0xAB;
        assert_eq!(shared.data()[0], 0xAB);
        shared.unlock();
    }
}
