use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// The thing a [`super::RequestWorker`](crate::worker::RequestWorker) blocks
/// on between drains: one or more [`super::RequestContainer`]s share (or
/// each own) a `RequestWaiter`, and every `submit()` wakes whoever is
/// parked on it.
pub struct RequestWaiter {
    mutex: Mutex<()>,
    cv: Condvar,
}

impl RequestWaiter {
    pub fn new() -> Self {
        RequestWaiter { mutex: Mutex::new(()), cv: Condvar::new() }
    }

    /// Locks the waiter and returns a guard that notifies every waiting
    /// thread when dropped. Callers that mutate a shared queue take this
    /// lock around the mutation so the wake-up can't be missed between the
    /// mutation and the notify.
    pub fn lock_notify(&self) -> NotifyGuard<'_> {
        NotifyGuard { guard: Some(self.mutex.lock().unwrap()), cv: &self.cv }
    }

    /// Blocks until notified or `timeout` elapses. Returns `true` if
    /// notified, `false` on timeout. A `None` timeout blocks indefinitely.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let guard = self.mutex.lock().unwrap();
        match timeout {
            None => {
                drop(self.cv.wait(guard).unwrap());
                true
            }
            Some(dur) => {
                let (guard, result) = self.cv.wait_timeout(guard, dur).unwrap();
                drop(guard);
                !result.timed_out()
            }
        }
    }
}

impl Default for RequestWaiter {
    fn default() -> Self {
        RequestWaiter::new()
    }
}

pub struct NotifyGuard<'a> {
    guard: Option<MutexGuard<'a, ()>>,
    cv: &'a Condvar,
}

impl Drop for NotifyGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.cv.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn lock_notify_wakes_a_parked_waiter() {
        let waiter = Arc::new(RequestWaiter::new());
        let w2 = waiter.clone();
        let handle = thread::spawn(move || w2.wait(Some(Duration::from_secs(5))));
        thread::sleep(Duration::from_millis(50));
        drop(waiter.lock_notify());
        assert!(handle.join().unwrap());
    }

    #[test]
    fn wait_times_out_without_a_notify() {
        let waiter = RequestWaiter::new();
        assert!(!waiter.wait(Some(Duration::from_millis(20))));
    }
}
