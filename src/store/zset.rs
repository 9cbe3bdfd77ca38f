//! Sorted sets ordered by `(score, member)`.
//!
//! `rredis`'s `src/redis/skiplist.rs` ports the classic Redis skip list
//! (`Arc<RwLock<SkipListNode>>` with per-level `forward`/`span` pointers) to
//! get O(log n) insert/rank/range over the same `(score, member)` dual
//! ordering this store needs. The pointer-chasing skip list exists to answer
//! "what's at rank k" in a mutable in-place structure; a `BTreeSet` of
//! `(OrderedScore, member)` pairs plus a `member -> score` side index gives
//! the identical ordering and rank-by-position query with standard library
//! types, which is what §4.4 asks for ("efficient implementation expected
//! ... the spec requires correctness, not a specific structure").

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq)]
struct OrderedScore(f64);

impl Eq for OrderedScore {}
impl PartialOrd for OrderedScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for OrderedScore {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Default)]
struct ZSet {
    ordered: BTreeSet<(OrderedScore, Vec<u8>)>,
    scores: HashMap<Vec<u8>, f64>,
}

#[derive(Default)]
pub struct ZSetStore {
    sets: RwLock<HashMap<Vec<u8>, ZSet>>,
}

impl ZSetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `member` was newly inserted, `false` if it updated
    /// an existing member's score.
    pub fn zadd(&self, key: &[u8], score: f64, member: Vec<u8>) -> bool {
        let mut sets = self.sets.write().unwrap();
        let zset = sets.entry(key.to_vec()).or_default();
        let is_new = match zset.scores.get(&member) {
            Some(&old) => {
                zset.ordered.remove(&(OrderedScore(old), member.clone()));
                false
            }
            None => true,
        };
        zset.ordered.insert((OrderedScore(score), member.clone()));
        zset.scores.insert(member, score);
        is_new
    }

    pub fn zscore(&self, key: &[u8], member: &[u8]) -> Option<f64> {
        self.sets.read().unwrap().get(key)?.scores.get(member).copied()
    }

    /// 0-based rank in `(score asc, member asc)` order.
    pub fn zrank(&self, key: &[u8], member: &[u8]) -> Option<usize> {
        let sets = self.sets.read().unwrap();
        let zset = sets.get(key)?;
        let score = *zset.scores.get(member)?;
        let target = (OrderedScore(score), member.to_vec());
        Some(zset.ordered.range(..&target).count())
    }

    pub fn zcard(&self, key: &[u8]) -> usize {
        self.sets.read().unwrap().get(key).map_or(0, |z| z.scores.len())
    }

    pub fn zrem(&self, key: &[u8], member: &[u8]) -> bool {
        let mut sets = self.sets.write().unwrap();
        let Some(zset) = sets.get_mut(key) else { return false };
        let Some(score) = zset.scores.remove(member) else { return false };
        zset.ordered.remove(&(OrderedScore(score), member.to_vec()));
        if zset.scores.is_empty() {
            sets.remove(key);
        }
        true
    }

    pub fn exists(&self, key: &[u8]) -> bool {
        self.sets.read().unwrap().contains_key(key)
    }

    pub fn del(&self, key: &[u8]) -> bool {
        self.sets.write().unwrap().remove(key).is_some()
    }

    pub fn keys_snapshot(&self) -> Vec<Vec<u8>> {
        self.sets.read().unwrap().keys().cloned().collect()
    }

    /// `zrange` uses the same negative-index/clamping semantics as lists.
    pub fn zrange(&self, key: &[u8], start: i64, stop: i64) -> Vec<(Vec<u8>, f64)> {
        let sets = self.sets.read().unwrap();
        let Some(zset) = sets.get(key) else { return Vec::new() };
        let len = zset.ordered.len() as i64;
        if len == 0 {
            return Vec::new();
        }
        let (start, stop) = super::list::normalize_range(start, stop, len);
        if start > stop {
            return Vec::new();
        }
        zset.ordered
            .iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .map(|(score, member)| (member.clone(), score.0))
            .collect()
    }
}
