//! Memoization for expensive layer producers (memory recall, skill text).
//!
//! Entries are keyed by `(session, layer)` and validated against both a
//! wall-clock TTL and the epochs of their inputs: any memory write or
//! active-skills change bumps an epoch and invalidates immediately, so the
//! TTL only bounds staleness of inputs the epochs cannot see.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// Input versions a cached body was produced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStamp {
    pub skills_hash: u64,
    pub memory_epoch: u64,
}

struct CachedBody {
    body: Option<String>,
    stamp: CacheStamp,
    inserted_at: Instant,
}

pub struct LayerCache {
    ttl: Duration,
    entries: RwLock<HashMap<(String, &'static str), CachedBody>>,
}

impl LayerCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch a valid cached body or run the producer and remember it.
    pub fn get_or_produce<F>(
        &self,
        session: &str,
        layer: &'static str,
        stamp: CacheStamp,
        produce: F,
    ) -> Option<String>
    where
        F: FnOnce() -> Option<String>,
    {
        let key = (session.to_string(), layer);

        {
            let entries = self.entries.read();
            if let Some(cached) = entries.get(&key) {
                if cached.stamp == stamp && cached.inserted_at.elapsed() < self.ttl {
                    return cached.body.clone();
                }
            }
        }

        let body = produce();
        let mut entries = self.entries.write();
        // Opportunistic cleanup keeps the map bounded without a sweeper task.
        if entries.len() >= 1_024 {
            let ttl = self.ttl;
            entries.retain(|_, v| v.inserted_at.elapsed() < ttl);
        }
        entries.insert(
            key,
            CachedBody {
                body: body.clone(),
                stamp,
                inserted_at: Instant::now(),
            },
        );
        body
    }

    /// Non-producing lookup: `None` = miss, `Some(body)` = hit (the body
    /// itself may be `None` when the producer yielded nothing). For
    /// producers that must run async — fetch on miss, then [`insert`].
    ///
    /// [`insert`]: Self::insert
    pub fn get(
        &self,
        session: &str,
        layer: &'static str,
        stamp: CacheStamp,
    ) -> Option<Option<String>> {
        let entries = self.entries.read();
        let cached = entries.get(&(session.to_string(), layer))?;
        if cached.stamp == stamp && cached.inserted_at.elapsed() < self.ttl {
            Some(cached.body.clone())
        } else {
            None
        }
    }

    pub fn insert(
        &self,
        session: &str,
        layer: &'static str,
        stamp: CacheStamp,
        body: Option<String>,
    ) {
        let mut entries = self.entries.write();
        if entries.len() >= 1_024 {
            let ttl = self.ttl;
            entries.retain(|_, v| v.inserted_at.elapsed() < ttl);
        }
        entries.insert(
            (session.to_string(), layer),
            CachedBody {
                body,
                stamp,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop every cached body for one session (used on `/reset`).
    pub fn invalidate_session(&self, session: &str) {
        self.entries.write().retain(|(s, _), _| s != session);
    }
}

/// Order-independent hash of the active-skills set.
pub fn skills_hash<'a, I: IntoIterator<Item = &'a String>>(skills: I) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut names: Vec<&String> = skills.into_iter().collect();
    names.sort();
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    names.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamp(skills: u64, epoch: u64) -> CacheStamp {
        CacheStamp {
            skills_hash: skills,
            memory_epoch: epoch,
        }
    }

    #[test]
    fn second_call_hits_cache() {
        let cache = LayerCache::new(Duration::from_secs(60));
        let mut calls = 0;
        for _ in 0..2 {
            cache.get_or_produce("s1", "memory", stamp(1, 1), || {
                calls += 1;
                Some("body".into())
            });
        }
        assert_eq!(calls, 1);
    }

    #[test]
    fn epoch_bump_invalidates() {
        let cache = LayerCache::new(Duration::from_secs(60));
        cache.get_or_produce("s1", "memory", stamp(1, 1), || Some("old".into()));
        let body = cache.get_or_produce("s1", "memory", stamp(1, 2), || Some("new".into()));
        assert_eq!(body.as_deref(), Some("new"));
    }

    #[test]
    fn skills_change_invalidates() {
        let cache = LayerCache::new(Duration::from_secs(60));
        cache.get_or_produce("s1", "skills", stamp(1, 1), || Some("old".into()));
        let body = cache.get_or_produce("s1", "skills", stamp(2, 1), || Some("new".into()));
        assert_eq!(body.as_deref(), Some("new"));
    }

    #[test]
    fn sessions_are_isolated() {
        let cache = LayerCache::new(Duration::from_secs(60));
        cache.get_or_produce("s1", "memory", stamp(1, 1), || Some("one".into()));
        let body = cache.get_or_produce("s2", "memory", stamp(1, 1), || Some("two".into()));
        assert_eq!(body.as_deref(), Some("two"));
    }

    #[test]
    fn invalidate_session_clears_only_that_session() {
        let cache = LayerCache::new(Duration::from_secs(60));
        cache.get_or_produce("s1", "memory", stamp(1, 1), || Some("one".into()));
        cache.get_or_produce("s2", "memory", stamp(1, 1), || Some("two".into()));
        cache.invalidate_session("s1");

        let mut recomputed = false;
        cache.get_or_produce("s1", "memory", stamp(1, 1), || {
            recomputed = true;
            Some("fresh".into())
        });
        assert!(recomputed);

        let mut recomputed2 = false;
        cache.get_or_produce("s2", "memory", stamp(1, 1), || {
            recomputed2 = true;
            None
        });
        assert!(!recomputed2);
    }

    #[test]
    fn get_insert_pair_for_async_producers() {
        let cache = LayerCache::new(Duration::from_secs(60));
        assert!(cache.get("s1", "memory", stamp(1, 1)).is_none());
        cache.insert("s1", "memory", stamp(1, 1), Some("fetched".into()));
        assert_eq!(
            cache.get("s1", "memory", stamp(1, 1)),
            Some(Some("fetched".into()))
        );
        // Stale stamp misses.
        assert!(cache.get("s1", "memory", stamp(1, 2)).is_none());
    }

    #[test]
    fn skills_hash_is_order_independent() {
        let a = vec!["alpha".to_string(), "beta".to_string()];
        let b = vec!["beta".to_string(), "alpha".to_string()];
        assert_eq!(skills_hash(a.iter()), skills_hash(b.iter()));
    }
}
