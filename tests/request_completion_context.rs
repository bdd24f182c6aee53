//! A processing handler submits onto a dedicated completion context instead
//! of delivering inline, and a worker thread drains that context — the
//! same indirection the Socket/File/Timer Processors route their
//! completions through.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use vsm_core::request::{ContainerKind, OperationWaiter, Request, RequestContainer, RequestWaiter};

#[test]
fn completion_runs_on_the_bound_context_once_the_context_is_drained() {
    let waiter = Arc::new(RequestWaiter::new());
    let completion_ctx: Arc<RequestContainer<i32>> = RequestContainer::new("test-completion", ContainerKind::CompletionContext, waiter);

    let req: Request<i32> = Request::new();
    req.bind_completion_context(completion_ctx.clone());

    let seen = Arc::new(AtomicI32::new(0));
    let seen2 = seen.clone();
    req.set_completion_handler(move |r| seen2.store(r.result().unwrap_or(-1), Ordering::SeqCst));

    // The request is still PENDING here; complete() routes through the
    // bound completion context rather than delivering inline.
    req.complete(99);

    // The result is queued on the completion context, not yet delivered.
    assert_eq!(seen.load(Ordering::SeqCst), 0);
    assert!(completion_ctx.has_pending());

    let drained = completion_ctx.process_requests(None);
    assert_eq!(drained, 1);
    assert_eq!(seen.load(Ordering::SeqCst), 99);
}

#[test]
fn an_operation_waiter_reports_timed_out_when_nothing_ever_completes() {
    let req: Request<i32> = Request::new();
    let waiter = OperationWaiter::new(req);
    assert!(!waiter.wait(Some(Duration::from_millis(50))));
    assert!(waiter.timed_out());
    assert_eq!(waiter.result(), None);
}
