//! Small internal helpers shared across modules, split the way the
//! teacher's own `util` module is split (one file per concern rather
//! than one catch-all).

pub(crate) mod log;
