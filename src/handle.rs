//! The `LockHandle` returned by manual acquisition: a scoped resource
//! carrying a one-shot release action. Shared by the instance and keyed
//! forms since both reduce, in the end, to "run this closure exactly
//! once, on explicit release or on drop."

/// A held lock, released by calling [`LockHandle::release`] or by letting
/// it drop.
///
/// Releasing twice is a no-op: the second call (explicit or via `Drop`)
/// finds nothing left to run.
pub struct LockHandle {
    release: Option<Box<dyn FnOnce()>>,
}

impl LockHandle {
    pub(crate) fn new(release: impl FnOnce() + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Releases the lock, advancing its queue. Idempotent.
    pub fn release(mut self) {
        self.run_release();
    }

    fn run_release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.run_release();
    }
}

impl std::fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockHandle")
            .field("released", &self.release.is_none())
            .finish()
    }
}
