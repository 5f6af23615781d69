//! Cancellation glue.
//!
//! A single-threaded analog of `tokio_util::sync::CancellationToken`,
//! built directly on this crate's [`Signal`](crate::queue::Signal) rather
//! than pulling in `tokio-util` for one small piece of surface.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::CancelReason;
use crate::queue::Signal;

struct Inner<R> {
    signal: Rc<Signal>,
    reason: RefCell<Option<R>>,
}

/// The caller-held half of a cancellation pair. Clone to share it with an
/// in-flight acquire; cancel it via the paired [`CancelGuard`].
pub struct CancelToken<R = CancelReason>(Rc<Inner<R>>);

/// The canceling half of a cancellation pair.
pub struct CancelGuard<R = CancelReason>(Rc<Inner<R>>);

/// Creates a fresh, not-yet-canceled token/guard pair.
pub fn cancel_pair<R>() -> (CancelToken<R>, CancelGuard<R>) {
    let inner = Rc::new(Inner {
        signal: Signal::new(),
        reason: RefCell::new(None),
    });
    (CancelToken(Rc::clone(&inner)), CancelGuard(inner))
}

impl<R> Clone for CancelToken<R> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<R: Clone> CancelToken<R> {
    /// Returns `true` if this token has already been canceled.
    pub fn is_canceled(&self) -> bool {
        self.0.signal.is_resolved()
    }

    /// Returns the cancellation reason, if canceled.
    pub fn reason(&self) -> Option<R> {
        self.0.reason.borrow().clone()
    }

    pub(crate) fn signal(&self) -> &Rc<Signal> {
        &self.0.signal
    }
}

impl<R> CancelGuard<R> {
    /// Cancels the paired token, waking anything waiting on it.
    ///
    /// Idempotent: canceling twice keeps the first reason.
    pub fn cancel(&self, reason: R) {
        let mut slot = self.0.reason.borrow_mut();
        if slot.is_none() {
            *slot = Some(reason);
        }
        drop(slot);
        self.0.signal.resolve();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_idempotent_and_keeps_first_reason() {
        let (token, guard) = cancel_pair::<CancelReason>();
        assert!(!token.is_canceled());

        guard.cancel(CancelReason::from("first"));
        guard.cancel(CancelReason::from("second"));

        assert!(token.is_canceled());
        assert_eq!(token.reason(), Some(CancelReason::from("first")));
    }
}
