//! Queue Item Model: the FIFO scheduling primitive shared by the instance
//! and keyed mutex variants.
//!
//! A [`Signal`] is a single-resolution gate: any number of tasks can
//! register a [`Waker`] against it before it resolves, and all of them are
//! woken, in registration order, the moment it does. It is the only
//! suspension point in an acquisition path. Signals are shared via `Rc` so
//! a handle can outlive any reshuffling of the queue that holds the other
//! reference to it.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::task::Waker;

#[derive(Default)]
struct SignalState {
    resolved: bool,
    wakers: Vec<Waker>,
}

/// A one-shot, many-waiter readiness gate.
#[derive(Default)]
pub(crate) struct Signal(RefCell<SignalState>);

impl Signal {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub(crate) fn resolved() -> Rc<Self> {
        let signal = Self::new();
        signal.resolve();
        signal
    }

    pub(crate) fn is_resolved(&self) -> bool {
        self.0.borrow().resolved
    }

    /// Resolves the signal, waking every task that registered with it.
    ///
    /// Idempotent: resolving an already-resolved signal does nothing.
    pub(crate) fn resolve(&self) {
        let wakers = {
            let mut state = self.0.borrow_mut();
            if state.resolved {
                return;
            }
            state.resolved = true;
            std::mem::take(&mut state.wakers)
        };
        for waker in wakers {
            waker.wake();
        }
    }

    /// Registers interest in this signal. Returns `true` if already
    /// resolved (the caller need not poll again).
    pub(crate) fn register(&self, waker: &Waker) -> bool {
        let mut state = self.0.borrow_mut();
        if state.resolved {
            return true;
        }
        if !state.wakers.iter().any(|w| w.will_wake(waker)) {
            state.wakers.push(waker.clone());
        }
        false
    }
}

/// One coalesced slot of exclusive acquirers. `steps` is the re-entrant
/// chain: only `steps.front()` is ever resolved, and it is resolved
/// exactly when that step becomes runnable (either because the item just
/// became queue head, or because the previous step was released). A
/// writer body that re-enters its own lock pushes its nested step onto
/// the *front* instead, so it runs immediately while the outer step is
/// suspended at its own `await` — see [`arrive_writer`].
pub(crate) struct WriterItem {
    pub(crate) steps: VecDeque<Rc<Signal>>,
}

impl WriterItem {
    /// A brand-new writer item for an empty queue: immediately runnable.
    fn fresh_head() -> Self {
        Self {
            steps: VecDeque::from([Signal::resolved()]),
        }
    }

    /// A brand-new writer item appended behind a reader cohort or barrier:
    /// not yet runnable until it becomes head.
    fn fresh_tail() -> Self {
        Self {
            steps: VecDeque::from([Signal::new()]),
        }
    }

    /// Marks this item as having just become queue head, making its
    /// current step runnable.
    pub(crate) fn activate(&self) {
        if let Some(front) = self.steps.front() {
            front.resolve();
        }
    }
}

/// The currently-admitted cohort of readers.
pub(crate) struct ReaderItem {
    pub(crate) ready: Rc<Signal>,
    pub(crate) count: usize,
}

impl ReaderItem {
    fn fresh_head() -> Self {
        Self {
            ready: Signal::resolved(),
            count: 1,
        }
    }

    fn fresh_tail() -> Self {
        Self {
            ready: Signal::new(),
            count: 1,
        }
    }
}

/// KRM-only barrier placeholder standing in a per-key queue to mirror an
/// outstanding unkeyed (global) acquisition.
pub(crate) struct GlobalItem {
    pub(crate) ready: Rc<Signal>,
}

impl GlobalItem {
    pub(crate) fn fresh_tail() -> Self {
        Self { ready: Signal::new() }
    }
}

pub(crate) enum QueueItem {
    Writer(WriterItem),
    Reader(ReaderItem),
    Global(GlobalItem),
}

impl QueueItem {
    pub(crate) fn activate(&self) {
        match self {
            QueueItem::Writer(w) => w.activate(),
            QueueItem::Reader(r) => r.ready.resolve(),
            QueueItem::Global(g) => g.ready.resolve(),
        }
    }

    pub(crate) fn as_writer(&self) -> Option<&WriterItem> {
        match self {
            QueueItem::Writer(w) => Some(w),
            _ => None,
        }
    }

    pub(crate) fn as_writer_mut(&mut self) -> Option<&mut WriterItem> {
        match self {
            QueueItem::Writer(w) => Some(w),
            _ => None,
        }
    }

    pub(crate) fn as_reader_mut(&mut self) -> Option<&mut ReaderItem> {
        match self {
            QueueItem::Reader(r) => Some(r),
            _ => None,
        }
    }

    pub(crate) fn as_reader(&self) -> Option<&ReaderItem> {
        match self {
            QueueItem::Reader(r) => Some(r),
            _ => None,
        }
    }
}

/// Arrives a writer onto `queue`, applying the writer-coalescing protocol.
/// Returns the signal the caller must await.
///
/// `reentrant` tells apart two arrivals that both see a `WriterItem` as
/// the relevant item: a writer body synchronously re-entering its own
/// lock (calling back into an acquire while its own step is the one
/// currently running), versus an unrelated writer that merely happens to
/// arrive while this queue's tail is a `WriterItem`. The caller is
/// expected to compute this from whether it is, at the moment of arrival,
/// executing inside the body of the queue's own running head step — not
/// from any state that can still be "on" after that body has suspended at
/// an `.await`, which would also be visible to an unrelated sibling polled
/// for the first time during that suspension.
///
/// A reentrant arrival is pushed to the *front* of the head item's steps,
/// already resolved, so it runs immediately — the outer call is suspended
/// at its own `.await` and cannot observe anything until this nested step
/// releases. Popping it back off on release leaves the outer step exactly
/// where it was. Any other arrival coalesces at the *back*, FIFO, as
/// before.
///
/// `queue` must only ever contain `Writer`/`Reader` items when called from
/// the instance mutex; the keyed mutex additionally may see `Global` items
/// at the tail, in which case the writer always starts a fresh item behind
/// it (a `Global` item never coalesces).
pub(crate) fn arrive_writer(queue: &mut VecDeque<QueueItem>, reentrant: bool) -> Rc<Signal> {
    if reentrant {
        let head = queue
            .front_mut()
            .and_then(QueueItem::as_writer_mut)
            .expect("reentrant writer arrival requires a running writer head");
        let signal = Signal::resolved();
        head.steps.push_front(Rc::clone(&signal));
        tracing::trace!("writer re-entered its own running head item");
        return signal;
    }

    match queue.back_mut() {
        Some(QueueItem::Writer(tail)) => {
            tracing::trace!(queue_len = queue.len(), "writer coalesced into tail item");
            let signal = Signal::new();
            tail.steps.push_back(Rc::clone(&signal));
            signal
        }
        Some(QueueItem::Reader(_)) | Some(QueueItem::Global(_)) => {
            queue.push_back(QueueItem::Writer(WriterItem::fresh_tail()));
            tracing::trace!(queue_len = queue.len(), "writer arrived behind non-writer tail");
            Rc::clone(queue.back().unwrap().as_writer().unwrap().steps.front().unwrap())
        }
        None => {
            queue.push_back(QueueItem::Writer(WriterItem::fresh_head()));
            tracing::trace!("writer arrived on empty queue, runnable immediately");
            Rc::clone(queue.back().unwrap().as_writer().unwrap().steps.front().unwrap())
        }
    }
}

/// Arrives a reader onto `queue`, applying the reader-coalescing
/// protocol. Returns the signal the caller must await.
pub(crate) fn arrive_reader(queue: &mut VecDeque<QueueItem>) -> Rc<Signal> {
    match queue.back_mut() {
        Some(QueueItem::Reader(tail)) => {
            tail.count += 1;
            tracing::trace!(count = tail.count, "reader coalesced into tail cohort");
            Rc::clone(&tail.ready)
        }
        None => {
            queue.push_back(QueueItem::Reader(ReaderItem::fresh_head()));
            tracing::trace!("reader arrived on empty queue, runnable immediately");
            Rc::clone(&queue.back().unwrap().as_reader().unwrap().ready)
        }
        Some(QueueItem::Writer(_)) | Some(QueueItem::Global(_)) => {
            queue.push_back(QueueItem::Reader(ReaderItem::fresh_tail()));
            tracing::trace!(queue_len = queue.len(), "reader arrived behind non-reader tail");
            Rc::clone(&queue.back().unwrap().as_reader().unwrap().ready)
        }
    }
}

/// Releases one writer step from the head of `queue`. Advances the queue
/// (waking the new head) if the head item is now exhausted. Returns
/// `true` if the queue is now empty.
pub(crate) fn release_writer_step(queue: &mut VecDeque<QueueItem>) -> bool {
    let exhausted = {
        let head = queue
            .front_mut()
            .and_then(QueueItem::as_writer_mut)
            .expect("release_writer_step called with non-writer head");
        head.steps.pop_front();
        head.steps.is_empty()
    };

    if exhausted {
        queue.pop_front();
        tracing::trace!(queue_len = queue.len(), "writer item exhausted, advancing queue");
        if let Some(new_head) = queue.front() {
            new_head.activate();
        }
    } else {
        tracing::trace!("writer released one step, next coalesced step runnable");
        let head = queue.front().and_then(QueueItem::as_writer).unwrap();
        head.steps.front().unwrap().resolve();
    }

    queue.is_empty()
}

/// Releases one reader from the head reader cohort of `queue`. Advances
/// the queue if the cohort's count reaches zero. Returns `true` if the
/// queue is now empty.
pub(crate) fn release_reader(queue: &mut VecDeque<QueueItem>) -> bool {
    let emptied = {
        let head = queue
            .front_mut()
            .and_then(QueueItem::as_reader_mut)
            .expect("release_reader called with non-reader head");
        head.count -= 1;
        head.count == 0
    };

    if emptied {
        queue.pop_front();
        tracing::trace!(queue_len = queue.len(), "reader cohort drained, advancing queue");
        if let Some(new_head) = queue.front() {
            new_head.activate();
        }
    }

    queue.is_empty()
}

/// Removes a canceled, not-yet-run writer step from `queue`: a step that
/// never got to run must still be popped out of the chain it sits in,
/// exactly as if it had run and released immediately, without resolving
/// the signal of whatever step (if any) comes after it prematurely.
///
/// `signal` identifies the step by pointer identity. If the step is
/// currently the running head step, this degrades to a normal release
/// (the step did not actually run, but queue bookkeeping must still
/// advance as though it had).
pub(crate) fn cancel_writer_step(queue: &mut VecDeque<QueueItem>, signal: &Rc<Signal>) {
    let is_head_step = queue
        .front()
        .and_then(QueueItem::as_writer)
        .and_then(|w| w.steps.front())
        .map(|front| Rc::ptr_eq(front, signal))
        .unwrap_or(false);

    if is_head_step {
        release_writer_step(queue);
        return;
    }

    let mut emptied_at = None;
    for (idx, item) in queue.iter_mut().enumerate() {
        if let QueueItem::Writer(w) = item {
            if let Some(pos) = w.steps.iter().position(|s| Rc::ptr_eq(s, signal)) {
                w.steps.remove(pos);
                if w.steps.is_empty() {
                    emptied_at = Some(idx);
                }
                break;
            }
        }
    }

    // A non-head WriterItem that loses its last step must be removed too,
    // or it would sit in the queue forever with nothing left to release it
    // and no one to resolve the items behind it (§3's "non-empty while
    // present" invariant).
    if let Some(idx) = emptied_at {
        queue.remove(idx);
    }
}

/// Removes a canceled, not-yet-run reader arrival from `queue`, decrementing
/// the cohort it joined. Mirrors [`cancel_writer_step`] for readers.
pub(crate) fn cancel_reader(queue: &mut VecDeque<QueueItem>, signal: &Rc<Signal>) {
    let is_head = queue
        .front()
        .and_then(QueueItem::as_reader)
        .map(|r| Rc::ptr_eq(&r.ready, signal))
        .unwrap_or(false);

    if is_head {
        release_reader(queue);
        return;
    }

    for item in queue.iter_mut() {
        if let QueueItem::Reader(r) = item {
            if Rc::ptr_eq(&r.ready, signal) {
                r.count -= 1;
                if r.count == 0 {
                    // A non-head reader item can become empty here only if
                    // every member canceled; remove it so it doesn't linger
                    // violating the "count >= 1 while present" invariant.
                    let pos = queue
                        .iter()
                        .position(|it| matches!(it, QueueItem::Reader(other) if Rc::ptr_eq(&other.ready, signal)))
                        .unwrap();
                    queue.remove(pos);
                }
                break;
            }
        }
    }
}
