//! Expiring LRU cache of attribute snapshots.
//!
//! Directory listings come back with size, times and DOS attributes for every
//! entry. Keeping those for a few seconds lets the `getattr` storm that
//! follows an `ls -l` be answered without another round trip per entry.
//! Anything that changes a file's size must [`StatCache::erase`] it.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;

use crate::stat::StatSnapshot;

/// Default number of cached snapshots.
pub const DEFAULT_STAT_CACHE_CAPACITY: usize = 1024;

/// Default snapshot lifetime; matches the attribute timeout given to the kernel.
pub const DEFAULT_STAT_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
struct CachedStat {
    stat: StatSnapshot,
    expires: Instant,
}

impl CachedStat {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires
    }
}

/// Bounded mapping inode -> (snapshot, expiry).
pub struct StatCache {
    entries: LruCache<u64, CachedStat>,
    ttl: Duration,
}

impl StatCache {
    /// Creates a cache holding at most `capacity` snapshots for `ttl` each.
    ///
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            ttl,
        }
    }

    /// Inserts or replaces the snapshot for `stat.inode`, evicting the least
    /// recently used entry when full.
    pub fn put(&mut self, stat: StatSnapshot) {
        let expires = Instant::now() + self.ttl;
        self.entries.push(stat.inode, CachedStat { stat, expires });
    }

    /// Returns the snapshot for `inode` if present and unexpired.
    ///
    /// A hit is promoted to most recently used; an expired entry is removed.
    pub fn get(&mut self, inode: u64) -> Option<StatSnapshot> {
        let now = Instant::now();
        let expired = match self.entries.get(&inode) {
            Some(cached) if !cached.is_expired(now) => return Some(cached.stat),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.pop(&inode);
        }
        None
    }

    /// Removes the snapshot for `inode`, if any.
    pub fn erase(&mut self, inode: u64) {
        self.entries.pop(&inode);
    }

    /// Returns true if a snapshot for `inode` is held, expired or not,
    /// without touching LRU order.
    pub fn contains(&self, inode: u64) -> bool {
        self.entries.contains(&inode)
    }

    /// Number of held snapshots, including expired ones not yet dropped.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of snapshots held.
    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    /// Snapshot lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl Default for StatCache {
    fn default() -> Self {
        Self::new(DEFAULT_STAT_CACHE_CAPACITY, DEFAULT_STAT_TTL)
    }
}

impl std::fmt::Debug for StatCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatCache")
            .field("len", &self.entries.len())
            .field("capacity", &self.entries.cap())
            .field("ttl", &self.ttl)
            .finish()
    }
}
