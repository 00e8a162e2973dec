use lru::LruCache;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

/// Cached rendered fragments, keyed by fragment name plus page number.
///
/// Entries age out after the configured TTL; the only other invalidation is
/// [`clear`](FragmentCache::clear), which drops everything at once.
pub struct FragmentCache {
    inner: LruCache<(String, u32), Entry>,
    ttl: Duration,
}

struct Entry {
    html: String,
    inserted: Instant,
}

impl FragmentCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        FragmentCache {
            inner: LruCache::new(NonZeroUsize::new(capacity.max(1)).unwrap()),
            ttl,
        }
    }

    pub fn get(&mut self, name: &str, page: u32) -> Option<String> {
        let key = (name.to_string(), page);
        match self.inner.get(&key) {
            Some(entry) if entry.inserted.elapsed() < self.ttl => Some(entry.html.clone()),
            Some(_) => {
                self.inner.pop(&key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&mut self, name: &str, page: u32, html: String) {
        self.inner.put(
            (name.to_string(), page),
            Entry {
                html,
                inserted: Instant::now(),
            },
        );
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }
}
