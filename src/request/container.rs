use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::request::Request;
use super::waiter::RequestWaiter;

/// What a [`RequestContainer`] does with a request once it reaches the head
/// of its queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// Runs the processing (or cancellation) handler.
    Processor,
    /// Runs the completion handler.
    CompletionContext,
}

struct State<S> {
    queue: VecDeque<Request<S>>,
    enabled: bool,
    abort_queue: VecDeque<Request<S>>,
}

/// A named FIFO of pending requests plus enabled/abort bookkeeping. One
/// `RequestContainer` can serve as either a processor (drains by calling
/// `Request::process`) or a completion context (drains by calling
/// `Request::deliver_completion`), selected by `kind`.
pub struct RequestContainer<S> {
    name: String,
    kind: ContainerKind,
    state: Mutex<State<S>>,
    waiter: Arc<RequestWaiter>,
}

impl<S> RequestContainer<S> {
    pub fn new(name: impl Into<String>, kind: ContainerKind, waiter: Arc<RequestWaiter>) -> Arc<Self> {
        Arc::new(RequestContainer {
            name: name.into(),
            kind,
            state: Mutex::new(State { queue: VecDeque::new(), enabled: true, abort_queue: VecDeque::new() }),
            waiter,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ContainerKind {
        self.kind
    }

    pub fn waiter(&self) -> &Arc<RequestWaiter> {
        &self.waiter
    }

    /// Enqueues `req`, or — if the container has been disabled — aborts it
    /// immediately instead.
    pub fn submit(&self, req: Request<S>) {
        let locker = self.waiter.lock_notify();
        let enabled = {
            let mut state = self.state.lock().unwrap();
            if state.enabled {
                state.queue.push_back(req.clone());
                true
            } else {
                false
            }
        };
        drop(locker);
        if !enabled {
            req.abort();
        }
    }

    /// True if there is work ready to drain without blocking.
    pub fn has_pending(&self) -> bool {
        !self.state.lock().unwrap().queue.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    /// Drains up to `limit` (or all, if `None`) requests, dispatching each
    /// to `process()` or `deliver_completion()` depending on `kind`.
    /// Returns the number processed.
    pub fn process_requests(&self, limit: Option<usize>) -> usize {
        let mut processed = 0;
        loop {
            if let Some(limit) = limit {
                if processed >= limit {
                    break;
                }
            }
            let req = {
                let mut state = self.state.lock().unwrap();
                state.queue.pop_front()
            };
            let Some(req) = req else { break };
            match self.kind {
                ContainerKind::Processor => req.process(),
                ContainerKind::CompletionContext => req.deliver_completion(),
            }
            processed += 1;
        }
        processed
    }

    /// Atomically disables the container: no further submissions are
    /// accepted, and every request still queued is moved to the abort queue
    /// and aborted. Must be called from the same thread that originally
    /// enabled the container (i.e. the owning processor's worker thread).
    pub fn disable(&self) {
        let drained: Vec<Request<S>> = {
            let mut state = self.state.lock().unwrap();
            state.enabled = false;
            let drained: Vec<_> = state.queue.drain(..).collect();
            state.abort_queue.extend(drained.iter().cloned());
            drained
        };
        for req in drained {
            req.abort();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().unwrap().enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn processes_in_submission_order() {
        let container = RequestContainer::<i32>::new("test", ContainerKind::Processor, Arc::new(RequestWaiter::new()));
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let req = Request::new();
            let order2 = order.clone();
            req.set_processing_handler(move |r| {
                order2.lock().unwrap().push(i);
                r.complete(i);
            });
            container.submit(req);
        }
        container.process_requests(None);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn disable_aborts_queued_requests_instead_of_running_them() {
        let container = RequestContainer::<i32>::new("test", ContainerKind::Processor, Arc::new(RequestWaiter::new()));
        let ran = Arc::new(AtomicUsize::new(0));
        let req = Request::new();
        let ran2 = ran.clone();
        req.set_processing_handler(move |r| {
            ran2.fetch_add(1, Ordering::SeqCst);
            r.complete(0);
        });
        container.submit(req.clone());
        container.disable();
        container.process_requests(None);
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(req.state(), super::super::state::RequestState::Aborted);
    }

    #[test]
    fn submit_to_disabled_container_aborts_immediately() {
        let container = RequestContainer::<i32>::new("test", ContainerKind::Processor, Arc::new(RequestWaiter::new()));
        container.disable();
        let req: Request<i32> = Request::new();
        container.submit(req.clone());
        assert_eq!(req.state(), super::super::state::RequestState::Aborted);
    }
}
