use std::time::Duration;

use super::request::Request;
use super::state::RequestState;

/// The caller-facing handle for an in-flight [`Request`]. Obtained from whatever call kicked off the
/// asynchronous operation; dropping it does not cancel the request — call
/// [`OperationWaiter::cancel`] or [`OperationWaiter::abort`] explicitly.
pub struct OperationWaiter<S> {
    request: Request<S>,
}

impl<S> OperationWaiter<S> {
    pub fn new(request: Request<S>) -> Self {
        OperationWaiter { request }
    }

    /// Blocks the calling thread until the operation completes, or
    /// `timeout` elapses. Returns `true` iff it completed in time. On a
    /// timeout the request is marked timed-out but is left running — call
    /// [`OperationWaiter::abort`] or [`OperationWaiter::cancel`] if the
    /// caller wants the timeout to also stop the underlying work.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let done = self.request.wait_done(timeout);
        if !done {
            self.request.set_timed_out();
        }
        done
    }

    /// Cooperative cancel: asks the operation to stop, but only takes
    /// effect at the next point the processor checks.
    pub fn cancel(&self) {
        self.request.cancel();
    }

    /// Non-cooperative abort: the completion handler will never run, no
    /// matter how far processing has already gotten.
    pub fn abort(&self) {
        self.request.abort();
    }

    /// Convenience: wait up to `timeout`, and `abort()` if it didn't
    /// complete in time. Returns `true` iff it completed before the
    /// timeout.
    pub fn timeout(&self, timeout: Duration) -> bool {
        if self.wait(Some(timeout)) {
            true
        } else {
            self.abort();
            false
        }
    }

    pub fn state(&self) -> RequestState {
        self.request.state()
    }

    pub fn timed_out(&self) -> bool {
        self.request.timed_out()
    }

    pub fn result(&self) -> Option<S>
    where
        S: Clone,
    {
        self.request.result()
    }

    pub fn request(&self) -> &Request<S> {
        &self.request
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn timeout_aborts_a_request_that_never_completes() {
        let req: Request<i32> = Request::new();
        req.set_processing_handler(|_r| {});
        req.process();
        let waiter = OperationWaiter::new(req.clone());
        assert!(!waiter.timeout(Duration::from_millis(20)));
        assert_eq!(req.state(), RequestState::Aborted);
    }

    #[test]
    fn wait_returns_true_when_another_thread_completes_in_time() {
        let req: Request<i32> = Request::new();
        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        req.set_completion_handler(move |_| ran2.store(true, Ordering::SeqCst));
        let req2 = req.clone();
        req.set_processing_handler(move |r| r.complete(7));
        let waiter = OperationWaiter::new(req.clone());
        thread::spawn(move || req2.process());
        assert!(waiter.wait(Some(Duration::from_secs(5))));
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(waiter.result(), Some(7));
    }
}
