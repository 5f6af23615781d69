//! The scoped release handle for the keyed form. Shares its shape with
//! the instance form's handle; see [`crate::instance::guard`].

pub use crate::handle::LockHandle;
