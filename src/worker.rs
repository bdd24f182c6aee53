//! Request Worker: a dedicated thread that
//! drains one or more [`RequestContainer`]s, parking on their shared
//! [`RequestWaiter`] between ticks when nothing is pending. Grounded on the
//! teacher's `deprecated::EventLoop::run` tick loop (`src/deprecated/event_loop.rs`),
//! generalized from a single-handler event loop to an arbitrary set of
//! request containers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::request::{RequestContainer, RequestWaiter};

/// Maximum requests drained from a single container per tick, so one
/// container's backlog never starves the others sharing this worker.
const MESSAGES_PER_TICK: usize = 256;

/// How long to park on the waiter when every container was empty, so the
/// worker still wakes periodically even if a `submit()` notification were
/// ever missed.
const IDLE_TICK: Duration = Duration::from_millis(100);

/// Drives a fixed set of containers on one OS thread until stopped.
pub struct RequestWorker<S> {
    name: String,
    running: Arc<AtomicBool>,
    waiter: Arc<RequestWaiter>,
    handle: Option<JoinHandle<()>>,
    _marker: std::marker::PhantomData<fn() -> S>,
}

impl<S: Send + 'static> RequestWorker<S> {
    /// Spawns the worker thread. All `containers` must share `waiter`, or
    /// submissions to a container with a different waiter will not wake
    /// this thread promptly (it will still notice on the next `IDLE_TICK`).
    pub fn spawn(name: impl Into<String>, waiter: Arc<RequestWaiter>, containers: Vec<Arc<RequestContainer<S>>>) -> Self {
        let name = name.into();
        let running = Arc::new(AtomicBool::new(true));
        let running2 = running.clone();
        let waiter2 = waiter.clone();
        let thread_name = name.clone();
        let handle = thread::Builder::new()
            .name(thread_name)
            .spawn(move || Self::run(running2, waiter2, containers))
            .expect("failed to spawn request worker thread");
        RequestWorker { name, running, waiter, handle: Some(handle), _marker: std::marker::PhantomData }
    }

    fn run(running: Arc<AtomicBool>, waiter: Arc<RequestWaiter>, containers: Vec<Arc<RequestContainer<S>>>) {
        while running.load(Ordering::Acquire) {
            let mut processed_any = false;
            for container in &containers {
                if container.process_requests(Some(MESSAGES_PER_TICK)) > 0 {
                    processed_any = true;
                }
            }
            if !running.load(Ordering::Acquire) {
                break;
            }
            if !processed_any {
                waiter.wait(Some(IDLE_TICK));
            }
        }
        // Drain whatever was left queued up to the moment of shutdown so a
        // stop() doesn't strand requests mid-flight.
        for container in &containers {
            container.process_requests(None);
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signals the worker to stop after its current tick and waits for the
    /// thread to exit.
    pub fn stop(mut self) {
        self.running.store(false, Ordering::Release);
        drop(self.waiter.lock_notify());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl<S> Drop for RequestWorker<S> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.running.store(false, Ordering::Release);
            drop(self.waiter.lock_notify());
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{ContainerKind, Request};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn drains_submitted_requests_without_manual_ticking() {
        let waiter = Arc::new(RequestWaiter::new());
        let container = RequestContainer::<i32>::new("test", ContainerKind::Processor, waiter.clone());
        let worker = RequestWorker::spawn("test-worker", waiter, vec![container.clone()]);

        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        let req: Request<i32> = Request::new();
        req.set_processing_handler(move |r| {
            ran2.fetch_add(1, Ordering::SeqCst);
            r.complete(0);
        });
        container.submit(req.clone());

        assert!(req.wait_done(Some(Duration::from_secs(5))));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        worker.stop();
    }
}
