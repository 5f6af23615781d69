//! Owner-introspection scaffolding.
//!
//! A decorator-style method instrumentation layer, built as an external
//! collaborator, needs an attachment point on the owner type: a
//! lazily-initialized [`InstanceMutex`] it can acquire around a method
//! body. This module is that attachment point, not the decorator itself.
//!
//! [`OwnerLock`] is the trait the decorator sugar would call through;
//! [`owner_lock!`] is the minimal way to implement it on a struct without
//! hand-writing the lazy-init boilerplate.

use std::cell::OnceCell;

use crate::error::{CancelReason, MuxError};
use crate::instance::InstanceMutex;

/// Implemented by a type that exposes one [`InstanceMutex`] for
/// method-instrumentation sugar to acquire around its own methods.
///
/// A type with no owner lock attached returns
/// [`MuxError::UnsupportedInstrumentation`] rather than panicking, since
/// this is a capability query, not a precondition violation.
pub trait OwnerLock {
    /// Returns the lock guarding this owner's instrumented methods, or
    /// [`MuxError::UnsupportedInstrumentation`] if this owner never
    /// attached one.
    fn owner_lock(&self) -> Result<&InstanceMutex, MuxError<CancelReason>>;
}

/// Lazily-initialized storage for one [`InstanceMutex`]; the field type
/// [`owner_lock!`] expects the owner struct to declare.
///
/// A plain [`OnceCell`] rather than `RefCell<Option<_>>`: the lock is
/// built at most once and never replaced, so there is no runtime borrow
/// state to track, only a one-time write.
#[derive(Default)]
pub struct OwnerLockCell(OnceCell<InstanceMutex>);

impl OwnerLockCell {
    /// Creates an empty cell; the lock is built on first use.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lock, building it on first call.
    pub fn get_or_init(&self) -> &InstanceMutex {
        self.0.get_or_init(InstanceMutex::new)
    }
}

impl std::fmt::Debug for OwnerLockCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnerLockCell")
            .field("initialized", &self.0.get().is_some())
            .finish()
    }
}

/// Implements [`OwnerLock`] for a struct that declares an
/// [`OwnerLockCell`] field, lazily building the [`InstanceMutex`] behind
/// it on first access.
///
/// ```ignore
/// struct Account {
///     lock: OwnerLockCell,
/// }
/// owner_lock!(Account, lock);
/// ```
#[macro_export]
macro_rules! owner_lock {
    ($ty:ty, $field:ident) => {
        impl $crate::OwnerLock for $ty {
            fn owner_lock(
                &self,
            ) -> ::std::result::Result<&$crate::InstanceMutex, $crate::MuxError> {
                ::std::result::Result::Ok(self.$field.get_or_init())
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Account {
        lock: OwnerLockCell,
    }

    owner_lock!(Account, lock);

    #[test]
    fn same_cell_hands_back_the_same_lock_on_every_call() {
        let account = Account {
            lock: OwnerLockCell::new(),
        };

        let first: *const InstanceMutex = account.owner_lock().unwrap();
        let second: *const InstanceMutex = account.owner_lock().unwrap();
        assert_eq!(first, second);
    }
}
