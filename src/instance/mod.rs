//! Instance RW-mux (IRM): a single-owner lock holding one queue plus the
//! "current holder kind" tag used to reject read-to-write escalation.

pub mod guard;

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::future::Future;
use std::rc::Rc;

use crate::acquire::{Acquire, TrackedPoll};
use crate::cancel::CancelToken;
use crate::error::{CancelReason, MuxError};
use crate::queue::{self, QueueItem};

pub use guard::LockHandle;

/// The enclosing critical section a nested acquisition on the same owner
/// would see. Set on entry to a critical section and restored to its
/// prior value on exit, so nested scopes compose correctly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum HolderKind {
    None,
    Writer,
    Reader,
}

/// Options accepted by every acquisition path.
#[derive(Default)]
pub struct AcquireOptions {
    /// Cancels a still-pending acquisition. Has no effect once the lock is
    /// held.
    pub cancel: Option<CancelToken<CancelReason>>,
}

/// A single-owner readers-writer lock.
///
/// Bind one `InstanceMutex` per logical owner. It carries no internal
/// synchronization primitive of its own: correctness comes from the
/// single-threaded cooperative scheduling model, not from a
/// lock-within-the-lock.
pub struct InstanceMutex {
    queue: Rc<RefCell<VecDeque<QueueItem>>>,
    holder_kind: Cell<HolderKind>,
    /// `true` exactly while a poll of the currently-running writer body is
    /// on the call stack; see [`TrackedPoll`].
    in_body: Cell<bool>,
}

impl Default for InstanceMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceMutex {
    /// Creates a lock with an empty queue.
    pub fn new() -> Self {
        Self {
            queue: Rc::new(RefCell::new(VecDeque::new())),
            holder_kind: Cell::new(HolderKind::None),
            in_body: Cell::new(false),
        }
    }

    /// Acquires exclusively, runs `body`, then releases.
    ///
    /// Fails with [`MuxError::Escalation`] without touching the queue if
    /// the caller is already running inside a shared critical section on
    /// this same instance.
    ///
    /// `body` may itself call `acquire_exclusive` (or
    /// `manual_acquire_exclusive`) back on this same instance. Such a
    /// nested call runs immediately — it does not wait behind `body`'s own
    /// acquisition, since that would deadlock against the release this
    /// call is itself waiting on — while an unrelated writer that merely
    /// arrives during `body`'s execution still queues normally behind it.
    pub async fn acquire_exclusive<F, Fut, R>(&self, body: F) -> Result<R, MuxError<CancelReason>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = R>,
    {
        use tracing::Instrument;
        async move {
            let handle = self
                .manual_acquire_exclusive(AcquireOptions::default())
                .await?;
            let prior = self.holder_kind.replace(HolderKind::Writer);
            let result = TrackedPoll::new(body(), &self.in_body).await;
            self.holder_kind.set(prior);
            handle.release();
            Ok(result)
        }
        .instrument(crate::util::log::acquire_span("exclusive", None))
        .await
    }

    /// Acquires shared, runs `body`, then releases. Never fails due to
    /// escalation; readers nesting inside readers is always permitted.
    pub async fn acquire_shared<F, Fut, R>(&self, body: F) -> Result<R, MuxError<CancelReason>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = R>,
    {
        use tracing::Instrument;
        async move {
            let handle = self
                .manual_acquire_shared(AcquireOptions::default())
                .await?;
            let prior = self.holder_kind.replace(HolderKind::Reader);
            let result = body().await;
            self.holder_kind.set(prior);
            handle.release();
            Ok(result)
        }
        .instrument(crate::util::log::acquire_span("shared", None))
        .await
    }

    /// Acquires exclusively without running a body, returning a handle the
    /// caller releases explicitly (or lets drop).
    pub async fn manual_acquire_exclusive(
        &self,
        opts: AcquireOptions,
    ) -> Result<LockHandle, MuxError<CancelReason>> {
        if self.holder_kind.get() == HolderKind::Reader {
            return Err(MuxError::Escalation);
        }

        let signal = queue::arrive_writer(&mut self.queue.borrow_mut(), self.in_body.get());
        let cleanup_queue = Rc::clone(&self.queue);
        let cleanup_signal = Rc::clone(&signal);

        Acquire::new(signal, opts.cancel, move || {
            queue::cancel_writer_step(&mut cleanup_queue.borrow_mut(), &cleanup_signal);
        })
        .await?;

        let release_queue = Rc::clone(&self.queue);
        Ok(LockHandle::new(move || {
            queue::release_writer_step(&mut release_queue.borrow_mut());
        }))
    }

    /// Acquires shared without running a body, returning a handle the
    /// caller releases explicitly (or lets drop).
    pub async fn manual_acquire_shared(
        &self,
        opts: AcquireOptions,
    ) -> Result<LockHandle, MuxError<CancelReason>> {
        let signal = queue::arrive_reader(&mut self.queue.borrow_mut());
        let cleanup_queue = Rc::clone(&self.queue);
        let cleanup_signal = Rc::clone(&signal);

        Acquire::new(signal, opts.cancel, move || {
            queue::cancel_reader(&mut cleanup_queue.borrow_mut(), &cleanup_signal);
        })
        .await?;

        let release_queue = Rc::clone(&self.queue);
        Ok(LockHandle::new(move || {
            queue::release_reader(&mut release_queue.borrow_mut());
        }))
    }
}

impl std::fmt::Debug for InstanceMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceMutex")
            .field("queue", &crate::util::log::QueueShape::of(&self.queue.borrow()))
            .field("holder_kind", &self.holder_kind.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;
    use std::rc::Rc as StdRc;

    #[tokio::test(flavor = "current_thread")]
    async fn exclusive_then_exclusive_runs_serially() {
        let mux = InstanceMutex::new();
        let log = StdRc::new(StdRefCell::new(Vec::new()));

        let l1 = StdRc::clone(&log);
        mux.acquire_exclusive(|| async move {
            l1.borrow_mut().push("a");
        })
        .await
        .unwrap();

        let l2 = StdRc::clone(&log);
        mux.acquire_exclusive(|| async move {
            l2.borrow_mut().push("b");
        })
        .await
        .unwrap();

        assert_eq!(*log.borrow(), vec!["a", "b"]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn reader_escalating_to_writer_fails_without_blocking() {
        let mux = InstanceMutex::new();
        let log = StdRc::new(StdRefCell::new(Vec::new()));

        let l1 = StdRc::clone(&log);
        let result = mux
            .acquire_shared(|| async {
                l1.borrow_mut().push("R:A");
                mux.acquire_exclusive(|| async { "unreachable" }).await
            })
            .await;

        assert_eq!(*log.borrow(), vec!["R:A"]);
        assert!(matches!(result, Ok(Err(MuxError::Escalation))));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn manual_release_is_idempotent() {
        let mux = InstanceMutex::new();
        let handle = mux
            .manual_acquire_exclusive(AcquireOptions::default())
            .await
            .unwrap();
        handle.release();

        // A second writer must now be immediately runnable.
        let handle2 = mux
            .manual_acquire_exclusive(AcquireOptions::default())
            .await
            .unwrap();
        handle2.release();
    }
}
