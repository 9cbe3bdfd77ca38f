//! Keyed ordered sequences of byte strings.
//!
//! `rredis`'s `src/adlist.rs` models a list key as an `Rc<RefCell<ListNode>>`
//! doubly linked list (`add_node_head`/`add_node_tail`); under concurrent
//! access several clients hold references into the same key, so this store
//! keeps one `VecDeque` per key behind the store's `RwLock` instead — O(1)
//! push/pop from both ends without per-node `Rc` bookkeeping, and Redis's
//! own list encoding has long since moved to contiguous storage for the same
//! reason.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

#[derive(Default)]
pub struct ListStore {
    lists: RwLock<HashMap<Vec<u8>, VecDeque<Vec<u8>>>>,
}

impl ListStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rpush(&self, key: &[u8], elems: impl IntoIterator<Item = Vec<u8>>) -> usize {
        let mut lists = self.lists.write().unwrap();
        let list = lists.entry(key.to_vec()).or_default();
        for e in elems {
            list.push_back(e);
        }
        list.len()
    }

    pub fn lpush(&self, key: &[u8], elems: impl IntoIterator<Item = Vec<u8>>) -> usize {
        let mut lists = self.lists.write().unwrap();
        let list = lists.entry(key.to_vec()).or_default();
        for e in elems {
            list.push_front(e);
        }
        list.len()
    }

    /// Pops up to `count` elements from the head. `None` if the key does not
    /// exist; deletes the key if the list becomes empty.
    pub fn lpop(&self, key: &[u8], count: usize) -> Option<Vec<Vec<u8>>> {
        let mut lists = self.lists.write().unwrap();
        let list = lists.get_mut(key)?;
        let n = count.min(list.len());
        let popped: Vec<Vec<u8>> = list.drain(..n).collect();
        if list.is_empty() {
            lists.remove(key);
        }
        Some(popped)
    }

    pub fn llen(&self, key: &[u8]) -> usize {
        self.lists.read().unwrap().get(key).map_or(0, |l| l.len())
    }

    pub fn exists(&self, key: &[u8]) -> bool {
        self.lists.read().unwrap().contains_key(key)
    }

    pub fn del(&self, key: &[u8]) -> bool {
        self.lists.write().unwrap().remove(key).is_some()
    }

    pub fn keys_snapshot(&self) -> Vec<Vec<u8>> {
        self.lists.read().unwrap().keys().cloned().collect()
    }

    /// `lrange` index semantics: negative indices count from the tail,
    /// `start` beyond length yields empty, `stop` clamps to `length - 1`.
    pub fn lrange(&self, key: &[u8], start: i64, stop: i64) -> Vec<Vec<u8>> {
        let lists = self.lists.read().unwrap();
        let Some(list) = lists.get(key) else { return Vec::new() };
        let len = list.len() as i64;
        if len == 0 {
            return Vec::new();
        }
        let (start, stop) = normalize_range(start, stop, len);
        if start > stop {
            return Vec::new();
        }
        list.iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .cloned()
            .collect()
    }
}

/// Shared by [`ListStore::lrange`] and the sorted-set store's `zrange`.
pub fn normalize_range(start: i64, stop: i64, len: i64) -> (i64, i64) {
    let norm = |i: i64| if i < 0 { (len + i).max(0) } else { i };
    let start = norm(start).min(len);
    let stop = norm(stop).min(len - 1);
    (start, stop)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpush_preserves_argument_order() {
        let s = ListStore::new();
        s.rpush(b"k", [b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert_eq!(s.lrange(b"k", 0, -1), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn lpush_applies_left_to_right_so_head_is_last_arg() {
        let s = ListStore::new();
        s.lpush(b"k", [b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert_eq!(s.lrange(b"k", 0, -1), vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);
    }

    #[test]
    fn lrange_start_beyond_length_is_empty() {
        let s = ListStore::new();
        s.rpush(b"k", [b"a".to_vec()]);
        assert_eq!(s.lrange(b"k", 5, -1), Vec::<Vec<u8>>::new());
    }

    #[test]
    fn lpop_missing_key_is_none() {
        let s = ListStore::new();
        assert_eq!(s.lpop(b"missing", 1), None);
    }

    #[test]
    fn lpop_count_beyond_length_drains_and_deletes() {
        let s = ListStore::new();
        s.rpush(b"k", [b"a".to_vec(), b"b".to_vec()]);
        let popped = s.lpop(b"k", 10).unwrap();
        assert_eq!(popped, vec![b"a".to_vec(), b"b".to_vec()]);
        assert!(!s.exists(b"k"));
    }
}
