//! Bounded LRU cache of prepared statements, keyed by normalized SQL text.
//!
//! `Conn::prepare` already allocates a fresh wire name for every call; this
//! cache sits in front of that so that repeated calls with the same SQL reuse
//! the same server-side statement instead of re-parsing it. Eviction only
//! removes the cache's own bookkeeping — the caller is responsible for
//! sending `Close(Statement)` + `Sync` for whatever comes back from
//! `StatementCache::put`, via `Conn::close_statement`.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;

use crate::state::extended::PreparedStatement;

struct CacheEntry {
    statement: PreparedStatement,
    created_at: Instant,
}

/// Outcome of a cache lookup. `Expired` carries the stale statement back so
/// the caller can send `Close(Statement)` for it before re-preparing.
pub enum Lookup {
    Hit(PreparedStatement),
    Miss,
    Expired(PreparedStatement),
}

/// Maps normalized SQL text to the `PreparedStatement` last parsed for it.
///
/// Bounded by `Opts::statement_cache_size`. A size of 0 disables caching
/// entirely: `put` always reports the statement it was just given as
/// evicted, so the caller closes it immediately rather than holding it.
pub struct StatementCache {
    inner: Option<LruCache<String, CacheEntry>>,
    max_lifetime: Option<Duration>,
}

impl StatementCache {
    pub fn new(capacity: usize, max_lifetime: Option<Duration>) -> Self {
        let inner = NonZeroUsize::new(capacity).map(LruCache::new);
        Self { inner, max_lifetime }
    }

    /// Look up a cached statement for `sql`, promoting it to most-recently-used.
    ///
    /// An entry older than `max_lifetime` is popped and returned as
    /// `Lookup::Expired` rather than handed back as a hit.
    pub fn get(&mut self, sql: &str) -> Lookup {
        let Some(cache) = self.inner.as_mut() else {
            return Lookup::Miss;
        };
        let Some(entry) = cache.get(sql) else {
            return Lookup::Miss;
        };
        if self
            .max_lifetime
            .is_some_and(|max| entry.created_at.elapsed() >= max)
        {
            let statement = entry.statement.clone();
            cache.pop(sql);
            return Lookup::Expired(statement);
        }
        Lookup::Hit(entry.statement.clone())
    }

    /// Insert a freshly prepared statement for `sql`.
    ///
    /// Returns the evicted statement, if any — either the LRU victim that
    /// made room for this insert, or (when the cache is disabled, or `sql`
    /// was already cached) the statement that didn't end up kept. Either way
    /// the caller must close whatever comes back.
    pub fn put(&mut self, sql: String, statement: PreparedStatement) -> Option<PreparedStatement> {
        let Some(cache) = self.inner.as_mut() else {
            return Some(statement);
        };
        let entry = CacheEntry {
            statement,
            created_at: Instant::now(),
        };
        let (evicted_key, evicted_entry) = cache.push(sql, entry).unzip();
        let _ = evicted_key;
        evicted_entry.map(|e| e.statement)
    }

    /// Remove and return every cached statement, e.g. when the connection is closing.
    pub fn drain(&mut self) -> Vec<PreparedStatement> {
        match &mut self.inner {
            Some(cache) => std::iter::from_fn(|| cache.pop_lru().map(|(_, e)| e.statement)).collect(),
            None => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.as_ref().map_or(0, LruCache::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stmt(idx: u64) -> PreparedStatement {
        PreparedStatement::new(idx, Vec::new(), None, format!("_test_{idx}"))
    }

    #[test]
    fn caches_and_evicts_lru() {
        let mut cache = StatementCache::new(2, None);
        assert!(cache.put("a".into(), stmt(1)).is_none());
        assert!(cache.put("b".into(), stmt(2)).is_none());
        // touch "a" so "b" becomes the LRU victim
        assert!(matches!(cache.get("a"), Lookup::Hit(_)));
        let evicted = cache.put("c".into(), stmt(3));
        assert_eq!(evicted.map(|s| s.idx), Some(2));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn zero_capacity_disables_caching() {
        let mut cache = StatementCache::new(0, None);
        let evicted = cache.put("a".into(), stmt(1));
        assert_eq!(evicted.map(|s| s.idx), Some(1));
        assert!(cache.is_empty());
    }

    #[test]
    fn drain_returns_everything() {
        let mut cache = StatementCache::new(4, None);
        cache.put("a".into(), stmt(1));
        cache.put("b".into(), stmt(2));
        let mut drained: Vec<_> = cache.drain().into_iter().map(|s| s.idx).collect();
        drained.sort_unstable();
        assert_eq!(drained, vec![1, 2]);
        assert!(cache.is_empty());
    }

    #[test]
    fn expired_entry_returned_for_close_instead_of_reused() {
        let mut cache = StatementCache::new(4, Some(Duration::from_millis(0)));
        cache.put("a".into(), stmt(1));
        match cache.get("a") {
            Lookup::Expired(s) => assert_eq!(s.idx, 1),
            _ => panic!("expected expired entry"),
        }
        assert!(cache.is_empty());
    }
}
