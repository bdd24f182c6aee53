//! Timer Processor: one dedicated thread
//! sleeps to the next deadline in an ordered set of pending timers, then
//! submits the due callback onto its target worker's processor queue.
//! Rearming happens from the *completion* of that submitted request
//! ("period-from-completion", not period-from-dispatch) so a slow callback
//! can never cause the timer to fire back-to-back in a storm.
//!
//! mio's timer wheel uses the same shape of dedicated timer thread plus a
//! token-addressed table of entries; here that's reworked from a fixed-size
//! wheel into a deadline-ordered heap (this core's timer counts are small —
//! dozens, not millions — so a heap's `O(log n)` is simpler to get right
//! than a wheel's slot math) and wired through [`crate::request`] so rearm
//! logic reuses the same Request/Container/Waiter machinery as every other
//! asynchronous op.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::request::{ContainerKind, Request, RequestContainer, RequestWaiter};

type Callback = Box<dyn FnMut() -> bool + Send>;

struct TimerEntry {
    interval: Duration,
    target: Arc<RequestContainer<bool>>,
    callback: Mutex<Callback>,
    canceled: Arc<AtomicBool>,
}

#[derive(Clone, Copy)]
struct Scheduled {
    deadline: Instant,
    id: u64,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}
impl Eq for Scheduled {}
impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}
impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reversed: BinaryHeap is a max-heap, we want the earliest deadline on top.
        other.deadline.cmp(&self.deadline).then_with(|| other.id.cmp(&self.id))
    }
}

struct State {
    heap: BinaryHeap<Scheduled>,
    entries: HashMap<u64, Arc<TimerEntry>>,
    running: bool,
}

/// A handle to a still-live (or already-fired one-shot) timer registration.
/// Cancellation is lazy: the entry is marked canceled and skipped the next
/// time it would otherwise fire, which is safe to do from any thread
/// without touching the timer thread's heap directly.
#[derive(Clone)]
pub struct TimerHandle {
    id: u64,
    canceled: Arc<AtomicBool>,
}

impl TimerHandle {
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }
}

pub struct TimerProcessor {
    state: Arc<Mutex<State>>,
    waiter: Arc<RequestWaiter>,
    completion_ctx: Arc<RequestContainer<bool>>,
    next_id: AtomicU64,
    handle: Option<JoinHandle<()>>,
}

impl TimerProcessor {
    pub fn new() -> Self {
        let waiter = Arc::new(RequestWaiter::new());
        let completion_ctx = RequestContainer::new("timer-completion", ContainerKind::CompletionContext, waiter.clone());
        let state = Arc::new(Mutex::new(State { heap: BinaryHeap::new(), entries: HashMap::new(), running: true }));

        let state2 = state.clone();
        let waiter2 = waiter.clone();
        let completion_ctx2 = completion_ctx.clone();
        let handle = thread::Builder::new()
            .name("vsm-timer".into())
            .spawn(move || Self::run(state2, waiter2, completion_ctx2))
            .expect("failed to spawn timer thread");

        TimerProcessor { state, waiter, completion_ctx, next_id: AtomicU64::new(1), handle: Some(handle) }
    }

    /// Schedules `callback` to run on `target`'s processor queue after
    /// `interval`. While `callback` returns `true` and the handle has not
    /// been canceled, it is rescheduled for `interval` after the *previous
    /// run's completion* was delivered.
    pub fn schedule<F>(&self, interval: Duration, target: Arc<RequestContainer<bool>>, callback: F) -> TimerHandle
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let canceled = Arc::new(AtomicBool::new(false));
        let entry = Arc::new(TimerEntry { interval, target, callback: Mutex::new(Box::new(callback)), canceled: canceled.clone() });
        {
            let mut state = self.state.lock().unwrap();
            state.entries.insert(id, entry);
            state.heap.push(Scheduled { deadline: Instant::now() + interval, id });
        }
        drop(self.waiter.lock_notify());
        TimerHandle { id, canceled }
    }

    fn run(state: Arc<Mutex<State>>, waiter: Arc<RequestWaiter>, completion_ctx: Arc<RequestContainer<bool>>) {
        loop {
            completion_ctx.process_requests(None);

            let fired_now = {
                let mut guard = state.lock().unwrap();
                if !guard.running {
                    break;
                }
                match guard.heap.peek().copied() {
                    None => None,
                    Some(next) => {
                        let now = Instant::now();
                        if next.deadline <= now {
                            guard.heap.pop();
                            Self::fire(&mut guard, &state, &completion_ctx, next.id);
                            Some(None)
                        } else {
                            Some(Some(next.deadline - now))
                        }
                    }
                }
            };
            match fired_now {
                Some(None) => continue,
                Some(Some(dur)) => {
                    waiter.wait(Some(dur));
                }
                None => {
                    waiter.wait(Some(Duration::from_secs(1)));
                }
            }
        }
        completion_ctx.process_requests(None);
    }

    fn fire(guard: &mut State, state: &Arc<Mutex<State>>, completion_ctx: &Arc<RequestContainer<bool>>, id: u64) {
        let Some(entry) = guard.entries.get(&id).cloned() else { return };
        if entry.canceled.load(Ordering::SeqCst) {
            guard.entries.remove(&id);
            return;
        }

        let req: Request<bool> = Request::new();
        let entry_for_processing = entry.clone();
        req.set_processing_handler(move |r| {
            let rearm = (entry_for_processing.callback.lock().unwrap())();
            r.complete(rearm && !entry_for_processing.canceled.load(Ordering::SeqCst));
        });
        req.bind_completion_context(completion_ctx.clone());

        let state_for_completion = state.clone();
        let interval = entry.interval;
        let target = entry.target.clone();
        req.set_completion_handler(move |r| {
            let rearm = r.result().unwrap_or(false);
            if rearm {
                let mut guard = state_for_completion.lock().unwrap();
                if guard.entries.contains_key(&id) {
                    guard.heap.push(Scheduled { deadline: Instant::now() + interval, id });
                }
            } else {
                state_for_completion.lock().unwrap().entries.remove(&id);
            }
        });

        target.submit(req);
    }

    /// Stops the timer thread. Already-fired-but-not-yet-delivered
    /// completions are drained before returning.
    pub fn stop(mut self) {
        self.state.lock().unwrap().running = false;
        drop(self.waiter.lock_notify());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Default for TimerProcessor {
    fn default() -> Self {
        TimerProcessor::new()
    }
}

impl Drop for TimerProcessor {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.state.lock().unwrap().running = false;
            drop(self.waiter.lock_notify());
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn one_shot_timer_fires_once_on_its_target() {
        let timer = TimerProcessor::new();
        let waiter = Arc::new(RequestWaiter::new());
        let target = RequestContainer::<bool>::new("target", ContainerKind::Processor, waiter.clone());
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();

        let target_thread_running = Arc::new(AtomicBool::new(true));
        let running2 = target_thread_running.clone();
        let target2 = target.clone();
        let waiter2 = waiter.clone();
        let drain = thread::spawn(move || {
            while running2.load(Ordering::SeqCst) {
                target2.process_requests(None);
                waiter2.wait(Some(Duration::from_millis(20)));
            }
        });

        timer.schedule(Duration::from_millis(10), target, move || {
            count2.fetch_add(1, Ordering::SeqCst);
            false
        });

        thread::sleep(Duration::from_millis(200));
        target_thread_running.store(false, Ordering::SeqCst);
        drop(waiter.lock_notify());
        drain.join().unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        timer.stop();
    }

    #[test]
    fn cancel_prevents_a_pending_timer_from_firing() {
        let timer = TimerProcessor::new();
        let waiter = Arc::new(RequestWaiter::new());
        let target = RequestContainer::<bool>::new("target", ContainerKind::Processor, waiter);
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();

        let handle = timer.schedule(Duration::from_millis(50), target, move || {
            count2.fetch_add(1, Ordering::SeqCst);
            false
        });
        handle.cancel();
        thread::sleep(Duration::from_millis(150));
        assert_eq!(count.load(Ordering::SeqCst), 0);
        timer.stop();
    }
}
