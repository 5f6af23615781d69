#![deny(rust_2018_idioms)]
#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

mod acquire;
mod cancel;
mod error;
mod handle;
mod owner;
mod queue;
mod singleton;
mod util;

pub mod instance;
pub mod keyed;

pub use cancel::{cancel_pair, CancelGuard, CancelToken};
pub use error::{locale, set_default_locale, CancelReason, Locale, MuxError};
pub use handle::LockHandle;
pub use instance::{AcquireOptions, InstanceMutex};
pub use keyed::{KeyedAcquireOptions, KeyedMutex};
pub use owner::{OwnerLock, OwnerLockCell};
pub use singleton::{singleton, SingletonCache};
