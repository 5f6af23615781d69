//! Keyed RW-mux (KRM): one global queue plus a per-key queue mapping. An
//! unkeyed acquisition acts as a barrier across every key currently in
//! flight; a keyed acquisition is independent of other keys but must
//! observe any outstanding barrier placed ahead of it.

pub mod guard;

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use crate::acquire::{Acquire, AcquireAll};
use crate::cancel::CancelToken;
use crate::error::{CancelReason, MuxError};
use crate::queue::{self, GlobalItem, QueueItem, Signal};

pub use guard::LockHandle;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    Writer,
    Reader,
}

fn arrive(kind: Kind, queue: &mut VecDeque<QueueItem>) -> Rc<Signal> {
    match kind {
        // The keyed mutex has no body-wrapping decorator, so a call here
        // is never a re-entrant nested acquisition on the same queue.
        Kind::Writer => queue::arrive_writer(queue, false),
        Kind::Reader => queue::arrive_reader(queue),
    }
}

fn release(kind: Kind, queue: &mut VecDeque<QueueItem>) -> bool {
    match kind {
        Kind::Writer => queue::release_writer_step(queue),
        Kind::Reader => queue::release_reader(queue),
    }
}

fn cancel(kind: Kind, queue: &mut VecDeque<QueueItem>, signal: &Rc<Signal>) {
    match kind {
        Kind::Writer => queue::cancel_writer_step(queue, signal),
        Kind::Reader => queue::cancel_reader(queue, signal),
    }
}

/// Options accepted by [`KeyedMutex::exclusive`]/[`KeyedMutex::shared`].
/// Omitting `key` targets the global (barrier) queue.
#[derive(Default)]
pub struct KeyedAcquireOptions {
    /// The resource key to acquire. `None` targets the global (barrier)
    /// queue instead of any single key.
    pub key: Option<String>,
    /// Cancels a still-pending acquisition. Has no effect once the lock is
    /// held.
    pub cancel: Option<CancelToken<CancelReason>>,
}

/// A bare key is shorthand for `{ key: Some(key), .. }`.
impl From<&str> for KeyedAcquireOptions {
    fn from(key: &str) -> Self {
        Self {
            key: Some(key.to_owned()),
            cancel: None,
        }
    }
}

impl From<String> for KeyedAcquireOptions {
    fn from(key: String) -> Self {
        Self {
            key: Some(key),
            cancel: None,
        }
    }
}

/// An outstanding trailing placeholder in the global queue, reserving a
/// brand-new per-key queue's place in global FIFO order. A fan-out
/// barrier reserves its own place the same way (see
/// [`KeyedMutex::acquire_unkeyed`]) so a key created while that barrier
/// is outstanding still seeds behind it, but a fan-out barrier's
/// placeholder carries no key of its own and is released directly rather
/// than through this struct.
struct Marker {
    signal: Rc<Signal>,
    key: String,
}

/// A multi-resource readers-writer lock, keyed by string.
pub struct KeyedMutex {
    global_queue: Rc<RefCell<VecDeque<QueueItem>>>,
    key_queues: Rc<RefCell<HashMap<String, VecDeque<QueueItem>>>>,
    markers: Rc<RefCell<Vec<Marker>>>,
}

impl Default for KeyedMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyedMutex {
    /// Creates a lock with no outstanding keys.
    pub fn new() -> Self {
        Self {
            global_queue: Rc::new(RefCell::new(VecDeque::new())),
            key_queues: Rc::new(RefCell::new(HashMap::new())),
            markers: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Alias for [`KeyedMutex::new`].
    pub fn create() -> Self {
        Self::new()
    }

    /// Acquires exclusively, returning a handle the caller releases
    /// explicitly (or lets drop).
    pub async fn exclusive(
        &self,
        opts: impl Into<KeyedAcquireOptions>,
    ) -> Result<LockHandle, MuxError<CancelReason>> {
        self.acquire(Kind::Writer, opts.into()).await
    }

    /// Acquires shared, returning a handle the caller releases explicitly
    /// (or lets drop).
    pub async fn shared(
        &self,
        opts: impl Into<KeyedAcquireOptions>,
    ) -> Result<LockHandle, MuxError<CancelReason>> {
        self.acquire(Kind::Reader, opts.into()).await
    }

    async fn acquire(
        &self,
        kind: Kind,
        opts: KeyedAcquireOptions,
    ) -> Result<LockHandle, MuxError<CancelReason>> {
        use tracing::Instrument;
        let kind_str = match kind {
            Kind::Writer => "exclusive",
            Kind::Reader => "shared",
        };
        let span = crate::util::log::acquire_span(kind_str, opts.key.as_deref());
        async move {
            match opts.key {
                Some(key) => self.acquire_keyed(kind, key, opts.cancel).await,
                None => self.acquire_unkeyed(kind, opts.cancel).await,
            }
        }
        .instrument(span)
        .await
    }

    /// An unkeyed acquisition. If no per-key queues exist it behaves
    /// exactly like a plain IRM-style arrival on the global queue;
    /// otherwise it becomes a barrier, fanning out onto every existing
    /// per-key queue and fanning back in on release.
    ///
    /// Either way it also reserves its own place in the global queue's
    /// FIFO order (directly, in the first case; via an extra marker
    /// signal folded into the fan-out, in the second) so a brand-new key
    /// arriving while this barrier is outstanding — one that did not
    /// exist yet when the fan-out was computed — still seeds its queue
    /// behind this barrier instead of running ahead of it.
    async fn acquire_unkeyed(
        &self,
        kind: Kind,
        cancel_token: Option<CancelToken<CancelReason>>,
    ) -> Result<LockHandle, MuxError<CancelReason>> {
        let keys: Vec<String> = self.key_queues.borrow().keys().cloned().collect();

        if keys.is_empty() {
            let signal = arrive(kind, &mut self.global_queue.borrow_mut());

            let cleanup_global = Rc::clone(&self.global_queue);
            let cleanup_keys = Rc::clone(&self.key_queues);
            let cleanup_markers = Rc::clone(&self.markers);
            let cleanup_signal = Rc::clone(&signal);
            Acquire::new(signal, cancel_token, move || {
                cancel(kind, &mut cleanup_global.borrow_mut(), &cleanup_signal);
                drain_markers(&cleanup_global, &cleanup_keys, &cleanup_markers);
            })
            .await?;

            let release_global = Rc::clone(&self.global_queue);
            let release_keys = Rc::clone(&self.key_queues);
            let release_markers = Rc::clone(&self.markers);
            return Ok(LockHandle::new(move || {
                release(kind, &mut release_global.borrow_mut());
                drain_markers(&release_global, &release_keys, &release_markers);
            }));
        }

        let mut key_signals = Vec::with_capacity(keys.len());
        {
            let mut map = self.key_queues.borrow_mut();
            for key in &keys {
                if let Some(q) = map.get_mut(key) {
                    key_signals.push(arrive(kind, q));
                }
            }
        }

        // Reserve this barrier's own turn in the global queue too, keyed
        // as a writer regardless of `kind` — same discipline as the
        // per-key markers below, used purely for ordering. A fresh key's
        // queue, if created while this signal is still unresolved, seeds
        // itself behind it.
        let marker_signal = queue::arrive_writer(&mut self.global_queue.borrow_mut(), false);

        let mut all_signals = key_signals.clone();
        all_signals.push(Rc::clone(&marker_signal));

        let cleanup_keys = keys.clone();
        let cleanup_signals = key_signals;
        let cleanup_queues = Rc::clone(&self.key_queues);
        let cleanup_global = Rc::clone(&self.global_queue);
        let cleanup_marker = Rc::clone(&marker_signal);
        AcquireAll::new(all_signals, cancel_token, move || {
            let mut map = cleanup_queues.borrow_mut();
            for (key, signal) in cleanup_keys.iter().zip(cleanup_signals.iter()) {
                let emptied = match map.get_mut(key) {
                    Some(q) => {
                        cancel(kind, q, signal);
                        q.is_empty()
                    }
                    None => false,
                };
                if emptied {
                    map.remove(key);
                }
            }
            drop(map);
            queue::cancel_writer_step(&mut cleanup_global.borrow_mut(), &cleanup_marker);
        })
        .await?;

        let release_keys = keys;
        let release_queues = Rc::clone(&self.key_queues);
        let release_global = Rc::clone(&self.global_queue);
        let release_markers = Rc::clone(&self.markers);
        Ok(LockHandle::new(move || {
            {
                let mut map = release_queues.borrow_mut();
                for key in &release_keys {
                    let emptied = match map.get_mut(&key) {
                        Some(q) => release(kind, q),
                        None => false,
                    };
                    if emptied {
                        map.remove(&key);
                    }
                }
            }
            queue::release_writer_step(&mut release_global.borrow_mut());
            drain_markers(&release_global, &release_queues, &release_markers);
        }))
    }

    /// A keyed acquisition: joins the existing per-key queue, or seeds a
    /// fresh one behind a global-order marker if the key doesn't exist yet.
    async fn acquire_keyed(
        &self,
        kind: Kind,
        key: String,
        cancel_token: Option<CancelToken<CancelReason>>,
    ) -> Result<LockHandle, MuxError<CancelReason>> {
        let existed = self.key_queues.borrow().contains_key(&key);

        let signal = if existed {
            let mut map = self.key_queues.borrow_mut();
            let q = map.get_mut(&key).expect("checked above");
            arrive(kind, q)
        } else {
            let marker_signal = queue::arrive_writer(&mut self.global_queue.borrow_mut(), false);
            let mut fresh = VecDeque::new();
            fresh.push_back(QueueItem::Global(GlobalItem {
                ready: Rc::clone(&marker_signal),
            }));
            let real_signal = arrive(kind, &mut fresh);
            self.key_queues.borrow_mut().insert(key.clone(), fresh);
            self.markers.borrow_mut().push(Marker {
                signal: marker_signal,
                key: key.clone(),
            });
            drain_markers(&self.global_queue, &self.key_queues, &self.markers);
            real_signal
        };

        let cleanup_queues = Rc::clone(&self.key_queues);
        let cleanup_key = key.clone();
        let cleanup_signal = Rc::clone(&signal);
        Acquire::new(signal, cancel_token, move || {
            let mut map = cleanup_queues.borrow_mut();
            let emptied = match map.get_mut(&cleanup_key) {
                Some(q) => {
                    cancel(kind, q, &cleanup_signal);
                    q.is_empty()
                }
                None => false,
            };
            if emptied {
                map.remove(&cleanup_key);
            }
        })
        .await?;

        let release_queues = Rc::clone(&self.key_queues);
        let release_global = Rc::clone(&self.global_queue);
        let release_markers = Rc::clone(&self.markers);
        let release_key = key;
        Ok(LockHandle::new(move || {
            let emptied = {
                let mut map = release_queues.borrow_mut();
                match map.get_mut(&release_key) {
                    Some(q) => release(kind, q),
                    None => false,
                }
            };
            if emptied {
                release_queues.borrow_mut().remove(&release_key);
            }
            drain_markers(&release_global, &release_queues, &release_markers);
        }))
    }
}

/// Pops every marker that has become head of the global queue, running
/// its one-shot release there and waking the per-key queue it reserved a
/// place for. A marker carries no body of its own, so nothing else ever
/// calls release on it; this is the only place that does.
fn drain_markers(
    global_queue: &Rc<RefCell<VecDeque<QueueItem>>>,
    key_queues: &Rc<RefCell<HashMap<String, VecDeque<QueueItem>>>>,
    markers: &Rc<RefCell<Vec<Marker>>>,
) {
    loop {
        let ready_key = {
            let markers_ref = markers.borrow();
            markers_ref
                .iter()
                .find(|m| m.signal.is_resolved())
                .map(|m| m.key.clone())
        };

        let Some(key) = ready_key else {
            break;
        };

        {
            let mut markers_mut = markers.borrow_mut();
            if let Some(pos) = markers_mut.iter().position(|m| m.key == key) {
                markers_mut.remove(pos);
            }
        }

        queue::release_writer_step(&mut global_queue.borrow_mut());

        let mut map = key_queues.borrow_mut();
        if let Some(q) = map.get_mut(&key) {
            q.pop_front();
            if let Some(new_head) = q.front() {
                new_head.activate();
            }
            if q.is_empty() {
                map.remove(&key);
            }
        }
    }
}

impl std::fmt::Debug for KeyedMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedMutex")
            .field(
                "global_queue",
                &crate::util::log::QueueShape::of(&self.global_queue.borrow()),
            )
            .field("key_count", &self.key_queues.borrow().len())
            .finish()
    }
}
