//! Tracing span/event helpers: a single place that builds the
//! `rwmux::acquire` span so the instance and keyed forms produce
//! identically-shaped spans, plus the queue-shape summary used by both
//! mutexes' `Debug` impls.

use std::collections::VecDeque;

use crate::queue::QueueItem;

/// Builds the span entered for the duration of one acquisition.
/// `key` is `None` for the instance form and for an unkeyed (barrier)
/// keyed acquisition.
pub(crate) fn acquire_span(kind: &'static str, key: Option<&str>) -> tracing::Span {
    tracing::debug_span!("rwmux::acquire", kind, key = key.unwrap_or("<none>"))
}

/// A compact summary of a queue's shape: counts of each item kind, not
/// the items themselves. Used by `Debug` impls so printing a mutex never
/// dumps waker lists or closures.
#[derive(Debug)]
pub(crate) struct QueueShape {
    pub(crate) writers: usize,
    pub(crate) readers: usize,
    pub(crate) globals: usize,
}

impl QueueShape {
    pub(crate) fn of(queue: &VecDeque<QueueItem>) -> Self {
        let mut shape = Self {
            writers: 0,
            readers: 0,
            globals: 0,
        };
        for item in queue {
            match item {
                QueueItem::Writer(_) => shape.writers += 1,
                QueueItem::Reader(_) => shape.readers += 1,
                QueueItem::Global(_) => shape.globals += 1,
            }
        }
        shape
    }
}
