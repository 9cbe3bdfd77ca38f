//! Parks clients executing `BLPOP` or `XREAD BLOCK` and wakes them, in
//! strict FIFO order per key, when a qualifying write happens on another
//! task.
//!
//! `rredis` never finished this: `src/redis/client.rs`'s `RedisClient` has a
//! `blocking_keys: Vec<Arc<RedisObject>>` field and comments describing the
//! intent ("The key we are waiting to terminate a blocking operation such as
//! BLPOP"), but the single-threaded event loop (`src/ae.rs`) never grew the
//! wake path. This module is that wake path, built for a multi-task server:
//! each waiter is a `oneshot` channel shared across every key it registered
//! under (a `BLPOP a b c` call waits on all three at once), so whichever key
//! fires first both delivers the result and retires the waiter everywhere
//! else it was parked — no broadcast, just insertion-ordered per-key queues
//! walked from the front, which is what gives the global FIFO guarantee in
//! SPEC_FULL.md §4.7.

use crate::store::list::ListStore;
use crate::store::stream::{StreamEntry, StreamId, StreamStore};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

struct ListWaiter {
    keys: Vec<Vec<u8>>,
    tx: Mutex<Option<oneshot::Sender<(Vec<u8>, Vec<u8>)>>>,
}

struct StreamWaiter {
    streams: Vec<(Vec<u8>, StreamId)>,
    tx: Mutex<Option<oneshot::Sender<Vec<(Vec<u8>, Vec<StreamEntry>)>>>>,
}

#[derive(Default)]
pub struct BlockingCoordinator {
    next_seq: AtomicU64,
    list_waiters: Mutex<HashMap<Vec<u8>, VecDeque<Arc<ListWaiter>>>>,
    stream_waiters: Mutex<HashMap<Vec<u8>, VecDeque<Arc<StreamWaiter>>>>,
}

impl BlockingCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// `timeout_ms`: `None` means "try once, never park" (used to degrade
    /// blocking commands inside a transaction per §4.8); `Some(0)` means
    /// park with no deadline; `Some(n)` parks for `n` milliseconds.
    pub async fn blpop<C>(
        &self,
        list_store: &ListStore,
        keys: &[Vec<u8>],
        timeout_ms: Option<u64>,
        cancel: C,
    ) -> Option<(Vec<u8>, Vec<u8>)>
    where
        C: Future<Output = ()>,
    {
        if let Some(hit) = Self::try_pop_any(list_store, keys) {
            return Some(hit);
        }
        let Some(timeout_ms) = timeout_ms else {
            return None;
        };

        let (tx, rx) = oneshot::channel();
        let waiter = Arc::new(ListWaiter { keys: keys.to_vec(), tx: Mutex::new(Some(tx)) });
        {
            let mut waiters = self.list_waiters.lock().unwrap();
            for key in keys {
                waiters.entry(key.clone()).or_default().push_back(waiter.clone());
            }
        }

        tokio::pin!(cancel);
        tokio::pin!(rx);
        let result = if timeout_ms == 0 {
            tokio::select! {
                r = &mut rx => r.ok(),
                _ = &mut cancel => None,
            }
        } else {
            let sleep = tokio::time::sleep(Duration::from_millis(timeout_ms));
            tokio::pin!(sleep);
            tokio::select! {
                r = &mut rx => r.ok(),
                _ = &mut sleep => None,
                _ = &mut cancel => None,
            }
        };

        if result.is_none() {
            self.retire_list_waiter(&waiter);
        }
        result
    }

    fn try_pop_any(list_store: &ListStore, keys: &[Vec<u8>]) -> Option<(Vec<u8>, Vec<u8>)> {
        for key in keys {
            if let Some(mut popped) = list_store.lpop(key, 1) {
                if let Some(value) = popped.pop() {
                    return Some((key.clone(), value));
                }
            }
        }
        None
    }

    /// Called by the list store's write path after a successful `RPUSH`/
    /// `LPUSH` commits. Wakes as many waiters of `key` as the new elements
    /// allow, oldest arrival first; stops as soon as a pop attempt fails
    /// (meaning no more data is available for this key).
    pub fn notify_list_key(&self, list_store: &ListStore, key: &[u8]) {
        loop {
            let candidate = {
                let mut waiters = self.list_waiters.lock().unwrap();
                let Some(queue) = waiters.get_mut(key) else { return };
                loop {
                    match queue.front() {
                        Some(w) if w.tx.lock().unwrap().is_none() => {
                            queue.pop_front();
                        }
                        other => break other.cloned(),
                    }
                }
            };
            let Some(waiter) = candidate else { return };
            let Some(mut popped) = list_store.lpop(key, 1) else { return };
            let Some(value) = popped.pop() else { return };
            let tx = waiter.tx.lock().unwrap().take();
            match tx {
                Some(tx) => {
                    let _ = tx.send((key.to_vec(), value));
                    self.retire_list_waiter(&waiter);
                }
                None => {
                    // A concurrent notifier on one of this waiter's *other*
                    // keys claimed it first, between our candidate lookup
                    // and our take() above — both can observe the same
                    // still-`Some` waiter before either claims it, since
                    // the store pop happens outside the `list_waiters`
                    // lock. We've already destructively popped `value` from
                    // `key`, so put it back at the head before retrying,
                    // or it disappears without ever reaching a client.
                    list_store.lpush(key, [value]);
                    continue;
                }
            }
        }
    }

    fn retire_list_waiter(&self, waiter: &Arc<ListWaiter>) {
        let mut waiters = self.list_waiters.lock().unwrap();
        for key in &waiter.keys {
            if let Some(queue) = waiters.get_mut(key) {
                queue.retain(|w| !Arc::ptr_eq(w, waiter));
                if queue.is_empty() {
                    waiters.remove(key);
                }
            }
        }
    }

    /// `last_seen`: per-stream cursor captured at registration time (the
    /// `$` sentinel resolves to each stream's current `last_id` before this
    /// is called). Same park/timeout/cancel shape as [`Self::blpop`].
    pub async fn xread_block<C>(
        &self,
        stream_store: &StreamStore,
        last_seen: &[(Vec<u8>, StreamId)],
        timeout_ms: Option<u64>,
        cancel: C,
    ) -> Option<Vec<(Vec<u8>, Vec<StreamEntry>)>>
    where
        C: Future<Output = ()>,
    {
        if let Some(hit) = Self::collect_new_entries(stream_store, last_seen) {
            return Some(hit);
        }
        let Some(timeout_ms) = timeout_ms else {
            return None;
        };

        let (tx, rx) = oneshot::channel();
        let waiter = Arc::new(StreamWaiter { streams: last_seen.to_vec(), tx: Mutex::new(Some(tx)) });
        {
            let mut waiters = self.stream_waiters.lock().unwrap();
            for (key, _) in last_seen {
                waiters.entry(key.clone()).or_default().push_back(waiter.clone());
            }
        }

        tokio::pin!(cancel);
        tokio::pin!(rx);
        let result = if timeout_ms == 0 {
            tokio::select! {
                r = &mut rx => r.ok(),
                _ = &mut cancel => None,
            }
        } else {
            let sleep = tokio::time::sleep(Duration::from_millis(timeout_ms));
            tokio::pin!(sleep);
            tokio::select! {
                r = &mut rx => r.ok(),
                _ = &mut sleep => None,
                _ = &mut cancel => None,
            }
        };

        if result.is_none() {
            self.retire_stream_waiter(&waiter);
        }
        result
    }

    fn collect_new_entries(
        stream_store: &StreamStore,
        last_seen: &[(Vec<u8>, StreamId)],
    ) -> Option<Vec<(Vec<u8>, Vec<StreamEntry>)>> {
        let mut out = Vec::new();
        for (key, after) in last_seen {
            let entries = stream_store.entries_after(key, *after);
            if !entries.is_empty() {
                out.push((key.clone(), entries));
            }
        }
        if out.is_empty() {
            None
        } else {
            Some(out)
        }
    }

    /// Called after a successful `XADD` commits.
    pub fn notify_stream_key(&self, stream_store: &StreamStore, key: &[u8]) {
        loop {
            let candidate = {
                let mut waiters = self.stream_waiters.lock().unwrap();
                let Some(queue) = waiters.get_mut(key) else { return };
                loop {
                    match queue.front() {
                        Some(w) if w.tx.lock().unwrap().is_none() => {
                            queue.pop_front();
                        }
                        other => break other.cloned(),
                    }
                }
            };
            let Some(waiter) = candidate else { return };
            // Unlike `notify_list_key`'s `lpop`, this read is non-destructive:
            // a stream is append-only, so a notifier that loses the claim
            // race below has not consumed anything and there is nothing to
            // restore. The winner recomputes `collect_new_entries` itself,
            // so it always observes every entry available at that moment.
            let Some(entries) = Self::collect_new_entries(stream_store, &waiter.streams) else { return };
            let tx = waiter.tx.lock().unwrap().take();
            match tx {
                Some(tx) => {
                    let _ = tx.send(entries);
                    self.retire_stream_waiter(&waiter);
                }
                None => continue,
            }
        }
    }

    fn retire_stream_waiter(&self, waiter: &Arc<StreamWaiter>) {
        let mut waiters = self.stream_waiters.lock().unwrap();
        for (key, _) in &waiter.streams {
            if let Some(queue) = waiters.get_mut(key) {
                queue.retain(|w| !Arc::ptr_eq(w, waiter));
                if queue.is_empty() {
                    waiters.remove(key);
                }
            }
        }
    }

    /// Monotonically increasing token, exposed for callers that want to
    /// assert FIFO ordering in tests without reaching into private state.
    pub fn next_sequence(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst)
    }
}
