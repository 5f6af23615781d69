//! Singleton-per-key cache: runs an async initializer at most once per
//! key, caching its success. Concurrent callers for the same key that
//! both miss the cache share one in-flight initializer run rather than
//! racing separate calls. An async failure evicts the entry so a later
//! caller can retry; a synchronous panic unwinding through the
//! initializer leaves no entry at all.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use crate::queue::Signal;

enum Entry<T> {
    Done(T),
    Pending(Rc<Signal>),
}

/// A process-wide cache of one value per key, filled lazily by
/// [`singleton`].
pub struct SingletonCache<K, T> {
    entries: RefCell<HashMap<K, Entry<T>>>,
}

impl<K: Eq + Hash, T: Clone> Default for SingletonCache<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash, T: Clone> SingletonCache<K, T> {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self {
            entries: RefCell::new(HashMap::new()),
        }
    }
}

/// Awaits a bare [`Signal`] with no cancellation of its own; a waiter
/// following someone else's in-flight initializer has nothing to cancel
/// back to, it just rechecks the cache once woken.
struct WaitFor(Rc<Signal>);

impl Future for WaitFor {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.0.is_resolved() {
            return Poll::Ready(());
        }
        self.0.register(cx.waker());
        Poll::Pending
    }
}

/// Runs `init` for `key` if no value is cached yet, caching the result on
/// success. If another caller is already running `init` for the same
/// key, this call waits for that run instead of starting its own, then
/// rechecks the cache.
///
/// On failure the entry is evicted so a later call retries; the entry is
/// only written after `init` runs to completion, so a panic unwinding
/// through `init` leaves the cache untouched (though it does leave the
/// `Pending` marker behind — a caller who unwinds out of this function
/// without the `Err` path running is not something this cache can
/// recover from on its own).
pub async fn singleton<K, F, Fut, T, E>(
    cache: &SingletonCache<K, T>,
    key: K,
    init: F,
) -> Result<T, E>
where
    K: Eq + Hash + Clone,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    T: Clone,
{
    loop {
        let signal_to_await = {
            let mut entries = cache.entries.borrow_mut();
            match entries.get(&key) {
                Some(Entry::Done(value)) => {
                    tracing::trace!("singleton cache hit");
                    return Ok(value.clone());
                }
                Some(Entry::Pending(signal)) => Some(Rc::clone(signal)),
                None => {
                    tracing::trace!("singleton cache miss, running initializer");
                    entries.insert(key.clone(), Entry::Pending(Signal::new()));
                    None
                }
            }
        };

        let Some(signal) = signal_to_await else {
            break;
        };

        tracing::trace!("singleton initializer already in flight, waiting for it");
        WaitFor(signal).await;
    }

    let result = init().await;

    match result {
        Ok(value) => {
            let signal = match cache.entries.borrow_mut().insert(key, Entry::Done(value.clone())) {
                Some(Entry::Pending(signal)) => signal,
                _ => unreachable!("this call's own Pending marker must still be present"),
            };
            signal.resolve();
            Ok(value)
        }
        Err(err) => {
            if let Some(Entry::Pending(signal)) = cache.entries.borrow_mut().remove(&key) {
                signal.resolve();
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[tokio::test(flavor = "current_thread")]
    async fn caches_success_and_runs_initializer_once() {
        let cache = SingletonCache::<&str, u32>::new();
        let calls = Rc::new(Cell::new(0));

        let c1 = Rc::clone(&calls);
        let first = singleton(&cache, "k", || async move {
            c1.set(c1.get() + 1);
            Ok::<_, &str>(42)
        })
        .await;
        assert_eq!(first, Ok(42));

        let c2 = Rc::clone(&calls);
        let second = singleton(&cache, "k", || async move {
            c2.set(c2.get() + 1);
            Ok::<_, &str>(99)
        })
        .await;
        assert_eq!(second, Ok(42));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn async_failure_evicts_so_retry_can_succeed() {
        let cache = SingletonCache::<&str, u32>::new();

        let first = singleton(&cache, "k", || async { Err::<u32, _>("boom") }).await;
        assert_eq!(first, Err("boom"));

        let second = singleton(&cache, "k", || async { Ok::<_, &str>(7) }).await;
        assert_eq!(second, Ok(7));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn concurrent_callers_for_the_same_key_share_one_initializer_run() {
        let cache = SingletonCache::<&str, u32>::new();
        let calls = Rc::new(Cell::new(0));

        let c1 = Rc::clone(&calls);
        let leader = singleton(&cache, "k", || async move {
            c1.set(c1.get() + 1);
            tokio::task::yield_now().await;
            Ok::<_, &str>(7)
        });

        let c2 = Rc::clone(&calls);
        let follower = singleton(&cache, "k", || async move {
            c2.set(c2.get() + 1);
            Ok::<_, &str>(999)
        });

        let (first, second) = tokio::join!(leader, follower);
        assert_eq!(first, Ok(7));
        assert_eq!(second, Ok(7));
        assert_eq!(calls.get(), 1);
    }
}
