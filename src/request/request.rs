use std::fmt;
use std::sync::{Arc, Condvar, Mutex};

use super::state::RequestState;
use super::container::RequestContainer;

type ProcessingHandler<S> = Box<dyn FnOnce(Request<S>) + Send>;
type CompletionHandler<S> = Box<dyn FnOnce(&Request<S>) + Send>;
type DoneHandler<S> = Box<dyn FnOnce(&Request<S>) + Send>;

struct Inner<S> {
    state: RequestState,
    timed_out: bool,
    result: Option<S>,
    processing: Option<ProcessingHandler<S>>,
    cancellation: Option<ProcessingHandler<S>>,
    completion: Option<CompletionHandler<S>>,
    done: Vec<DoneHandler<S>>,
    completion_ctx: Option<Arc<RequestContainer<S>>>,
    completion_delivered: bool,
    done_delivered: bool,
}

/// A unit of asynchronous work.
///
/// Cloning a `Request` clones the handle; all clones observe and drive the
/// same underlying state machine. This is deliberate: the processing
/// handler, the processor's queue, and the caller's [`super::OperationWaiter`]
/// all hold independent clones of the same request.
pub struct Request<S> {
    inner: Arc<Mutex<Inner<S>>>,
    done_cv: Arc<Condvar>,
}

impl<S> Clone for Request<S> {
    fn clone(&self) -> Self {
        Request { inner: self.inner.clone(), done_cv: self.done_cv.clone() }
    }
}

impl<S> fmt::Debug for Request<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("Request").field("state", &inner.state).finish()
    }
}

impl<S> Request<S> {
    pub fn new() -> Self {
        Request {
            inner: Arc::new(Mutex::new(Inner {
                state: RequestState::Pending,
                timed_out: false,
                result: None,
                processing: None,
                cancellation: None,
                completion: None,
                done: Vec::new(),
                completion_ctx: None,
                completion_delivered: false,
                done_delivered: false,
            })),
            done_cv: Arc::new(Condvar::new()),
        }
    }

    pub fn set_processing_handler<F>(&self, f: F)
    where
        F: FnOnce(Request<S>) + Send + 'static,
    {
        self.inner.lock().unwrap().processing = Some(Box::new(f));
    }

    pub fn set_cancellation_handler<F>(&self, f: F)
    where
        F: FnOnce(Request<S>) + Send + 'static,
    {
        self.inner.lock().unwrap().cancellation = Some(Box::new(f));
    }

    pub fn set_completion_handler<F>(&self, f: F)
    where
        F: FnOnce(&Request<S>) + Send + 'static,
    {
        self.inner.lock().unwrap().completion = Some(Box::new(f));
    }

    /// Registers a done handler. Runs exactly once: immediately, inline, if
    /// the request has already delivered completion; otherwise queued to run
    /// after the completion handler.
    pub fn set_done_handler<F>(&self, f: F)
    where
        F: FnOnce(&Request<S>) + Send + 'static,
    {
        let mut inner = self.inner.lock().unwrap();
        if inner.done_delivered {
            drop(inner);
            f(self);
        } else {
            inner.done.push(Box::new(f));
        }
    }

    pub fn bind_completion_context(&self, ctx: Arc<RequestContainer<S>>) {
        self.inner.lock().unwrap().completion_ctx = Some(ctx);
    }

    pub fn state(&self) -> RequestState {
        self.inner.lock().unwrap().state
    }

    pub fn is_done(&self) -> bool {
        self.inner.lock().unwrap().state.is_terminal()
    }

    pub fn timed_out(&self) -> bool {
        self.inner.lock().unwrap().timed_out
    }

    pub fn set_timed_out(&self) {
        self.inner.lock().unwrap().timed_out = true;
    }

    pub fn result(&self) -> Option<S>
    where
        S: Clone,
    {
        self.inner.lock().unwrap().result.clone()
    }

    /// Transitions PENDING -> PROCESSING and runs the processing handler
    /// inline on the calling (processor) thread. Called by the processor
    /// that popped this request off its queue.
    pub fn process(&self) {
        let handler = {
            let mut inner = self.inner.lock().unwrap();
            match inner.state {
                RequestState::Pending => {
                    inner.state = RequestState::Processing;
                    inner.processing.take()
                }
                RequestState::CancellationPending => {
                    inner.state = RequestState::Canceling;
                    inner.cancellation.take().or_else(|| inner.processing.take())
                }
                _ => None,
            }
        };
        if let Some(handler) = handler {
            handler(self.clone());
        }
    }

    /// Cooperative cancel:
    /// PENDING -> CANCELLATION_PENDING, PROCESSING -> CANCELING (and runs the
    /// cancellation handler immediately, since the request is no longer
    /// sitting in a processor queue to be popped again).
    pub fn cancel(&self) {
        let to_run = {
            let mut inner = self.inner.lock().unwrap();
            match inner.state {
                RequestState::Pending => {
                    inner.state = RequestState::CancellationPending;
                    None
                }
                RequestState::Processing => {
                    inner.state = RequestState::Canceling;
                    inner.cancellation.take()
                }
                _ => None,
            }
        };
        if let Some(handler) = to_run {
            handler(self.clone());
        }
    }

    /// Non-cooperative abort:
    /// suppresses completion delivery. If still PENDING it is simply marked
    /// ABORTED; if PROCESSING it becomes ABORT_PENDING so the eventual
    /// `complete()` call is swallowed instead of invoking the completion
    /// handler.
    pub fn abort(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            RequestState::Processing => inner.state = RequestState::AbortPending,
            s if !s.is_terminal() => {
                inner.state = RequestState::Aborted;
                inner.processing = None;
                inner.cancellation = None;
                inner.completion = None;
            }
            _ => {}
        }
    }

    /// Called by the processing (or cancellation) handler to report a
    /// result. Moves the request onto its completion context's queue, or —
    /// if no completion context was bound, or the request was aborted while
    /// processing — delivers/discards inline.
    pub fn complete(&self, result: S) {
        let (ctx, should_deliver, was_canceled_path) = {
            let mut inner = self.inner.lock().unwrap();
            let was_canceled_path = inner.state == RequestState::Canceling;
            match inner.state {
                RequestState::AbortPending => {
                    inner.state = RequestState::Aborted;
                    inner.result = Some(result);
                    inner.completion = None;
                    (None, false, was_canceled_path)
                }
                s if !s.is_terminal() => {
                    inner.result = Some(result);
                    (inner.completion_ctx.clone(), true, was_canceled_path)
                }
                _ => (None, false, was_canceled_path),
            }
        };
        let _ = was_canceled_path;
        if !should_deliver {
            self.finish_done();
            return;
        }
        match ctx {
            Some(ctx) => ctx.submit(self.clone()),
            None => self.deliver_completion(),
        }
    }

    /// Invoked by a completion context worker when this request reaches the
    /// head of its queue. Runs the completion handler, marks the terminal
    /// state from whatever non-terminal holding-state it was in, then runs
    /// the done handler(s).
    pub fn deliver_completion(&self) {
        let (completion, terminal) = {
            let mut inner = self.inner.lock().unwrap();
            inner.state = match inner.state {
                RequestState::Canceling | RequestState::CancellationPending => RequestState::Canceled,
                _ => RequestState::Ok,
            };
            inner.completion_delivered = true;
            (inner.completion.take(), inner.state)
        };
        let _ = terminal;
        if let Some(completion) = completion {
            completion(self);
        }
        self.finish_done();
    }

    fn finish_done(&self) {
        let handlers = {
            let mut inner = self.inner.lock().unwrap();
            inner.done_delivered = true;
            std::mem::take(&mut inner.done)
        };
        for handler in handlers {
            handler(self);
        }
        self.done_cv.notify_all();
    }

    /// Blocks the calling thread until the request reaches a terminal state,
    /// or `timeout` elapses. Returns `true` iff it became done in time.
    pub fn wait_done(&self, timeout: Option<std::time::Duration>) -> bool {
        let inner = self.inner.lock().unwrap();
        if inner.state.is_terminal() && inner.done_delivered {
            return true;
        }
        match timeout {
            None => {
                let mut inner = self
                    .done_cv
                    .wait_while(inner, |i| !(i.state.is_terminal() && i.done_delivered))
                    .unwrap();
                let _ = &mut inner;
                true
            }
            Some(dur) => {
                let (inner, result) = self
                    .done_cv
                    .wait_timeout_while(inner, dur, |i| !(i.state.is_terminal() && i.done_delivered))
                    .unwrap();
                drop(inner);
                !result.timed_out()
            }
        }
    }
}

impl<S> Default for Request<S> {
    fn default() -> Self {
        Request::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn processing_then_completion_then_done_runs_once_each() {
        let req: Request<i32> = Request::new();
        let completed = Arc::new(AtomicBool::new(false));
        let done = Arc::new(AtomicBool::new(false));
        let c2 = completed.clone();
        let d2 = done.clone();
        req.set_completion_handler(move |_| c2.store(true, Ordering::SeqCst));
        req.set_done_handler(move |_| d2.store(true, Ordering::SeqCst));

        let req2 = req.clone();
        req.set_processing_handler(move |r| r.complete(42));
        req2.process();

        assert!(req.wait_done(None));
        assert!(completed.load(Ordering::SeqCst));
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(req.state(), RequestState::Ok);
        assert_eq!(req.result(), Some(42));
    }

    #[test]
    fn abort_suppresses_completion_but_still_runs_done() {
        let req: Request<i32> = Request::new();
        let completed = Arc::new(AtomicBool::new(false));
        let c2 = completed.clone();
        req.set_completion_handler(move |_| c2.store(true, Ordering::SeqCst));
        req.set_done_handler(|_| {});

        let req2 = req.clone();
        req.set_processing_handler(move |r| {
            // Simulate the abort racing in after processing started but
            // before the handler calls complete().
            r.abort();
            r.complete(1);
        });
        req2.process();

        assert!(req.wait_done(None));
        assert!(!completed.load(Ordering::SeqCst));
        assert_eq!(req.state(), RequestState::Aborted);
    }

    #[test]
    fn cancel_while_pending_runs_cancellation_handler_on_pop() {
        let req: Request<i32> = Request::new();
        req.set_processing_handler(|r| r.complete(0));
        req.set_cancellation_handler(|r| r.complete(-1));
        req.cancel();
        assert_eq!(req.state(), RequestState::CancellationPending);
        req.process();
        assert!(req.wait_done(None));
        assert_eq!(req.state(), RequestState::Canceled);
        assert_eq!(req.result(), Some(-1));
    }
}
