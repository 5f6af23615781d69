//! The single suspension point shared by every acquisition path: a future
//! that resolves once a [`Signal`] fires, racing against an optional
//! [`CancelToken`].

use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::cancel::CancelToken;
use crate::error::{CancelReason, MuxError};
use crate::queue::Signal;

/// Awaits `signal`, running `cleanup` exactly once if canceled before the
/// signal resolves. `cleanup` performs the same release bookkeeping a
/// normal completion would, so the queue never wedges on an abandoned
/// waiter.
pub(crate) struct Acquire<F: FnOnce()> {
    signal: Rc<Signal>,
    cancel: Option<CancelToken<CancelReason>>,
    cleanup: Option<F>,
}

impl<F: FnOnce()> Acquire<F> {
    pub(crate) fn new(
        signal: Rc<Signal>,
        cancel: Option<CancelToken<CancelReason>>,
        cleanup: F,
    ) -> Self {
        Self {
            signal,
            cancel,
            cleanup: Some(cleanup),
        }
    }
}

impl<F: FnOnce()> Future for Acquire<F> {
    type Output = Result<(), MuxError<CancelReason>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Some(cancel) = &this.cancel {
            if cancel.is_canceled() {
                if let Some(cleanup) = this.cleanup.take() {
                    cleanup();
                }
                let reason = cancel.reason().unwrap_or_default();
                return Poll::Ready(Err(MuxError::Canceled(reason)));
            }
        }

        if this.signal.is_resolved() {
            this.cleanup.take();
            return Poll::Ready(Ok(()));
        }

        this.signal.register(cx.waker());
        if let Some(cancel) = &this.cancel {
            cancel.signal().register(cx.waker());
        }

        Poll::Pending
    }
}

/// The keyed mutex's barrier variant of [`Acquire`]: ready only once every
/// fanned-out signal has resolved. Expressed as fan-out acquire / fan-in
/// release rather than as a dedicated queue item.
pub(crate) struct AcquireAll<F: FnOnce()> {
    signals: Vec<Rc<Signal>>,
    cancel: Option<CancelToken<CancelReason>>,
    cleanup: Option<F>,
}

impl<F: FnOnce()> AcquireAll<F> {
    pub(crate) fn new(
        signals: Vec<Rc<Signal>>,
        cancel: Option<CancelToken<CancelReason>>,
        cleanup: F,
    ) -> Self {
        Self {
            signals,
            cancel,
            cleanup: Some(cleanup),
        }
    }
}

impl<F: FnOnce()> Future for AcquireAll<F> {
    type Output = Result<(), MuxError<CancelReason>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Some(cancel) = &this.cancel {
            if cancel.is_canceled() {
                if let Some(cleanup) = this.cleanup.take() {
                    cleanup();
                }
                let reason = cancel.reason().unwrap_or_default();
                return Poll::Ready(Err(MuxError::Canceled(reason)));
            }
        }

        if this.signals.iter().all(|signal| signal.is_resolved()) {
            this.cleanup.take();
            return Poll::Ready(Ok(()));
        }

        for signal in &this.signals {
            signal.register(cx.waker());
        }
        if let Some(cancel) = &this.cancel {
            cancel.signal().register(cx.waker());
        }

        Poll::Pending
    }
}

/// Wraps a future so `flag` is `true` for exactly the duration of each
/// individual `poll()` call on it, and restored to its prior value the
/// rest of the time — including while the future sits suspended between
/// polls, whether or not that poll returned `Ready`.
///
/// The instance mutex uses this around a writer body: a nested exclusive
/// acquisition made synchronously from within that body's own call stack
/// sees `flag` as `true`, while an unrelated writer task merely polled for
/// the first time during the body's suspension (e.g. while it's asleep)
/// sees `flag` as `false`, because by then this wrapper's poll has already
/// returned and restored it. A plain flag set once before the body's
/// `await` and cleared once after could not make that distinction: it
/// would still read `true` during the body's own suspensions, which is
/// exactly when an unrelated sibling can be polled for the first time.
///
/// The inner future is boxed so this type is `Unpin` regardless of what
/// the body captures, the same way `Acquire`/`AcquireAll` avoid needing a
/// pin-projecting `Future` impl by only ever holding `Unpin` fields.
pub(crate) struct TrackedPoll<'a, Fut> {
    inner: Pin<Box<Fut>>,
    flag: &'a Cell<bool>,
}

impl<'a, Fut: Future> TrackedPoll<'a, Fut> {
    pub(crate) fn new(inner: Fut, flag: &'a Cell<bool>) -> Self {
        Self {
            inner: Box::pin(inner),
            flag,
        }
    }
}

impl<'a, Fut: Future> Future for TrackedPoll<'a, Fut> {
    type Output = Fut::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let prior = this.flag.replace(true);
        let result = this.inner.as_mut().poll(cx);
        this.flag.set(prior);
        result
    }
}
