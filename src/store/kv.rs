//! Keyed strings with optional absolute expiry.
//!
//! Grounded on `rredis`'s `src/redis/db.rs` (`dict`/`expires` as separate
//! maps) and `src/cmd.rs`'s `set_command`/`get_command`/`incr_command`, here
//! consolidated into one map of `key -> Entry` (value + optional deadline)
//! behind a single `RwLock`, since lazy expiry needs to mutate on read and a
//! single-writer/multi-reader discipline is all §5 requires.

use crate::error::RedisError;
use std::collections::HashMap;
use std::sync::RwLock;

struct Entry {
    value: Vec<u8>,
    expire_at_ms: Option<u64>,
}

#[derive(Default)]
pub struct KvStore {
    entries: RwLock<HashMap<Vec<u8>, Entry>>,
}

impl KvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: Vec<u8>, value: Vec<u8>, expire_in_ms: Option<u64>, now_ms: u64) {
        let expire_at_ms = expire_in_ms.map(|ms| now_ms + ms);
        self.entries.write().unwrap().insert(key, Entry { value, expire_at_ms });
    }

    pub fn get(&self, key: &[u8], now_ms: u64) -> Option<Vec<u8>> {
        self.expire_if_needed(key, now_ms);
        self.entries.read().unwrap().get(key).map(|e| e.value.clone())
    }

    pub fn incr(&self, key: &[u8], now_ms: u64) -> Result<i64, RedisError> {
        self.expire_if_needed(key, now_ms);
        let mut entries = self.entries.write().unwrap();
        let current = match entries.get(key) {
            Some(e) => std::str::from_utf8(&e.value)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or(RedisError::NotAnInteger)?,
            None => 0,
        };
        let next = current.checked_add(1).ok_or(RedisError::NotAnInteger)?;
        entries.insert(
            key.to_vec(),
            Entry { value: next.to_string().into_bytes(), expire_at_ms: None },
        );
        Ok(next)
    }

    /// Removes `key` if present, returning whether it was.
    pub fn del(&self, key: &[u8]) -> bool {
        self.entries.write().unwrap().remove(key).is_some()
    }

    pub fn contains(&self, key: &[u8], now_ms: u64) -> bool {
        self.expire_if_needed(key, now_ms);
        self.entries.read().unwrap().contains_key(key)
    }

    pub fn keys(&self, now_ms: u64) -> Vec<Vec<u8>> {
        let all: Vec<Vec<u8>> = self.entries.read().unwrap().keys().cloned().collect();
        for k in &all {
            self.expire_if_needed(k, now_ms);
        }
        self.entries.read().unwrap().keys().cloned().collect()
    }

    fn expire_if_needed(&self, key: &[u8], now_ms: u64) {
        let expired = matches!(
            self.entries.read().unwrap().get(key),
            Some(e) if e.expire_at_ms.is_some_and(|at| at <= now_ms)
        );
        if expired {
            self.entries.write().unwrap().remove(key);
        }
    }
}
