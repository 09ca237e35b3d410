use parking_lot::Mutex;
use std::{
    collections::{hash_map::DefaultHasher, HashMap, VecDeque},
    hash::{Hash, Hasher},
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};
use tokio::time::Instant;
use tracing::debug;

/// Cache entry with its insertion stamp
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    seq: u64,
}

#[derive(Debug)]
struct Inner<V> {
    entries: HashMap<u64, CacheEntry<V>>,
    // Insertion order as (key, seq). Entries whose seq no longer matches
    // the live entry are stale and skipped.
    order: VecDeque<(u64, u64)>,
    next_seq: u64,
}

/// Bounded, insertion-ordered cache with a fixed time-to-live.
///
/// Keys are 64-bit hashes of the normalized query text. Expired entries
/// are dropped lazily when looked up; on overflow the oldest-inserted
/// entry goes first. The clock is [`tokio::time::Instant`], so tests can
/// pause and advance it.
#[derive(Debug)]
pub struct TtlCache<V> {
    inner: Mutex<Inner<V>>,
    capacity: usize,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expired_removals: AtomicU64,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::with_capacity(capacity),
                order: VecDeque::with_capacity(capacity),
                next_seq: 0,
            }),
            capacity: capacity.max(1),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expired_removals: AtomicU64::new(0),
        }
    }

    pub fn lookup(&self, query: &str) -> Option<V> {
        let key = cache_key(query);
        let mut inner = self.inner.lock();

        let expired = match inner.entries.get(&key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            inner.entries.remove(&key);
            self.expired_removals.fetch_add(1, Ordering::Relaxed);
            debug!("⏰ Cache entry expired: {}", query);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn store(&self, query: &str, value: V) {
        let key = cache_key(query);
        let mut inner = self.inner.lock();

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
                seq,
            },
        );
        inner.order.push_back((key, seq));

        while inner.entries.len() > self.capacity {
            let Some((old_key, old_seq)) = inner.order.pop_front() else {
                break;
            };
            let live = inner.entries.get(&old_key).map(|e| e.seq) == Some(old_seq);
            if live {
                inner.entries.remove(&old_key);
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        // Overwrites and lazy expiry leave stale markers behind.
        if inner.order.len() > self.capacity * 2 {
            let Inner { entries, order, .. } = &mut *inner;
            order.retain(|(k, s)| entries.get(k).map(|e| e.seq) == Some(*s));
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        let ttl = self.ttl;
        inner.entries.retain(|_, entry| entry.inserted_at.elapsed() < ttl);
        let removed = before - inner.entries.len();

        if removed > 0 {
            let Inner { entries, order, .. } = &mut *inner;
            order.retain(|(k, s)| entries.get(k).map(|e| e.seq) == Some(*s));
            self.expired_removals.fetch_add(removed as u64, Ordering::Relaxed);
            debug!("Cleaned {} expired cache entries", removed);
        }

        removed
    }

    pub fn metrics(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expired_removals: self.expired_removals.load(Ordering::Relaxed),
        }
    }
}

/// Basic cache counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expired_removals: u64,
}

impl CacheMetrics {
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            self.hits as f64 / (self.hits + self.misses) as f64
        }
    }
}

/// Stable key for a query: trimmed, lowercased, whitespace collapsed.
pub fn cache_key(query: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    for (i, word) in query.split_whitespace().enumerate() {
        if i > 0 {
            ' '.hash(&mut hasher);
        }
        for c in word.chars().flat_map(char::to_lowercase) {
            c.hash(&mut hasher);
        }
    }
    hasher.finish()
}
