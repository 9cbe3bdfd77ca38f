//! The four keyspaces and the cross-store operations (`DEL`, `TYPE`,
//! `KEYS`, `EXISTS`) that have to consult all of them.
//!
//! `rredis`'s `src/redis/db.rs` held one `RedisDB` per logical database with
//! a single `dict` of dynamically-typed `RedisObject`s (see `src/obj.rs`'s
//! `RedisObject` enum). §3 of this spec assigns each key to exactly one of
//! four *independently typed* stores instead, so `Database` here holds one
//! typed store per data kind — `rredis`'s single dynamically-tagged
//! keyspace becomes four statically-typed ones, dispatched over only at the
//! handful of operations (`DEL`/`TYPE`/`KEYS`) that are genuinely
//! cross-type.

pub mod kv;
pub mod list;
pub mod stream;
pub mod zset;

use kv::KvStore;
use list::ListStore;
use stream::StreamStore;
use zset::ZSetStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    String,
    List,
    ZSet,
    Stream,
}

impl KeyType {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyType::String => "string",
            KeyType::List => "list",
            KeyType::ZSet => "zset",
            KeyType::Stream => "stream",
        }
    }
}

#[derive(Default)]
pub struct Database {
    pub kv: KvStore,
    pub lists: ListStore,
    pub zsets: ZSetStore,
    pub streams: StreamStore,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn type_of(&self, key: &[u8], now_ms: u64) -> Option<KeyType> {
        if self.kv.contains(key, now_ms) {
            Some(KeyType::String)
        } else if self.lists.exists(key) {
            Some(KeyType::List)
        } else if self.zsets.exists(key) {
            Some(KeyType::ZSet)
        } else if self.streams.exists(key) {
            Some(KeyType::Stream)
        } else {
            None
        }
    }

    /// Removes `key` from whichever store holds it. Returns whether it was
    /// present in any of them.
    pub fn del_one(&self, key: &[u8], now_ms: u64) -> bool {
        let mut removed = false;
        if self.kv.contains(key, now_ms) {
            removed |= self.kv.del(key);
        }
        removed |= self.lists.del(key);
        removed |= self.zsets.del(key);
        removed |= self.streams.del(key);
        removed
    }

    /// Purges any residual `list`/`zset`/`stream` entry for `key`, leaving
    /// `kv` untouched. `SET` always creates or overwrites a string entry
    /// regardless of the key's previous type (§4.2), so it must not leave
    /// the key simultaneously present in another store.
    pub fn clear_non_string(&self, key: &[u8]) {
        self.lists.del(key);
        self.zsets.del(key);
        self.streams.del(key);
    }

    /// `KEYS` is a maintenance command, not a hot path, so a direct scan
    /// across all four stores on every call is fine.
    pub fn keys_matching(&self, pattern: &[u8], now_ms: u64) -> Vec<Vec<u8>> {
        let mut out = self.kv.keys(now_ms);
        out.extend(self.lists.keys_snapshot());
        out.extend(self.zsets.keys_snapshot());
        out.extend(self.streams.keys_snapshot());
        out.retain(|k| pattern == b"*" || crate::util::string_pattern_match(pattern, k));
        out
    }
}
