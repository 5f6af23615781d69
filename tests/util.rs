//! Shared scaffolding for the integration test suite: an append-only,
//! `Rc`-shared log, matching the "log is an append-only list of strings"
//! convention used throughout these scenarios.

use std::cell::RefCell;
use std::rc::Rc;

#[derive(Clone, Default)]
pub struct Log(Rc<RefCell<Vec<String>>>);

impl Log {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.borrow_mut().push(entry.into());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.0.borrow().clone()
    }
}
