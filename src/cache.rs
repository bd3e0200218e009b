//! Cache Table
//!
//! Per-key entries with data, timestamps, retry counter, and TTL, plus
//! prune-on-write. Generalizes the teacher's `CacheEntry`/`QueryMeta`
//! (`client/mod.rs`, `types/mod.rs`) `is_stale`/`is_expired` pair into the
//! richer entry shape spec §3 calls for (a retry counter and error info
//! living alongside the data, rather than a parallel struct).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::Error;

/// `errorInfo` on a cache entry (spec §3): present only when the last
/// operation for this key failed and has not yet exhausted its retries.
#[derive(Clone, Debug)]
pub struct ErrorInfo {
    pub error: Error,
    pub last_failed_at: Instant,
    /// Always in `[1, max_retries]`.
    pub retry_count: u32,
}

/// `E<D>` from spec §3.
#[derive(Clone, Debug)]
pub struct CacheEntry<D> {
    pub cache_time: Duration,
    pub data: Option<D>,
    pub last_fetched_at: Option<Instant>,
    pub error_info: Option<ErrorInfo>,
}

impl<D> CacheEntry<D> {
    fn new(cache_time: Duration) -> Self {
        Self {
            cache_time,
            data: None,
            last_fetched_at: None,
            error_info: None,
        }
    }

    /// The timestamp pruning compares against: `last_fetched_at` if present,
    /// else the last failure's timestamp.
    fn last_meaningful_timestamp(&self) -> Option<Instant> {
        self.last_fetched_at
            .or_else(|| self.error_info.as_ref().map(|e| e.last_failed_at))
    }

    /// Whether this entry's age exceeds `cache_time` as of `now`. An entry
    /// with no timestamp at all (freshly created, never written) is always
    /// considered expired.
    pub fn is_expired(&self, now: Instant) -> bool {
        match self.last_meaningful_timestamp() {
            Some(ts) => now.duration_since(ts) > self.cache_time,
            None => true,
        }
    }

    /// Whether this entry's age exceeds `stale_time` as of `now`, given
    /// `last_fetched_at` (absence of a successful fetch reports "stale").
    pub fn is_stale(&self, now: Instant, stale_time: Duration) -> bool {
        match self.last_fetched_at {
            Some(ts) => now.duration_since(ts) >= stale_time,
            None => true,
        }
    }

    /// An error is "resolved" once retries are exhausted (spec §4.3 step 5).
    pub fn has_unresolved_error(&self, max_retries: u32) -> bool {
        self.error_info
            .as_ref()
            .map(|e| e.retry_count < max_retries)
            .unwrap_or(false)
    }
}

/// The cache: a mapping from query key to entry, plus prune-on-write.
#[derive(Clone)]
pub struct CacheTable<D> {
    entries: HashMap<String, CacheEntry<D>>,
}

impl<D> Default for CacheTable<D> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<D: Clone> CacheTable<D> {
    pub fn get(&self, key: &str) -> Option<&CacheEntry<D>> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CacheEntry<D>)> {
        self.entries.iter()
    }

    /// Record a successful fetch for `key`. Overwrites any prior entry.
    pub fn record_success(&mut self, key: &str, data: Option<D>, cache_time: Duration, now: Instant) {
        let mut entry = CacheEntry::new(cache_time);
        entry.data = data;
        entry.last_fetched_at = Some(now);
        entry.error_info = None;
        self.entries.insert(key.to_string(), entry);
    }

    /// Record a failed fetch for `key`, bumping (or initializing) the retry
    /// counter while preserving any previously cached `data`/`last_fetched_at`
    /// (spec §4.3 error path step 3).
    pub fn record_error(&mut self, key: &str, error: Error, max_retries: u32, cache_time: Duration, now: Instant) -> u32 {
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| CacheEntry::new(cache_time));
        let previous_count = entry.error_info.as_ref().map(|e| e.retry_count).unwrap_or(0);
        let retry_count = if max_retries == 0 {
            1
        } else {
            (previous_count + 1).min(max_retries)
        };
        entry.error_info = Some(ErrorInfo {
            error,
            last_failed_at: now,
            retry_count,
        });
        retry_count
    }

    /// Prune every entry whose age exceeds its recorded `cache_time`, except
    /// `current_key` and (when supplied) `keep_key` — the previous query key
    /// under "keep previous data". No-op when `cache_time == infinite`
    /// callers should check before calling; this function always prunes
    /// using each entry's own recorded TTL.
    pub fn prune(&mut self, now: Instant, current_key: &str, keep_key: Option<&str>) {
        self.entries.retain(|key, entry| {
            key == current_key || keep_key == Some(key.as_str()) || !entry.is_expired(now)
        });
    }

    /// `getData` (spec §4.5), ignoring the "keep previous data" override —
    /// callers decide which branch to take.
    pub fn get_fresh_data(&self, key: &str, now: Instant) -> Option<D> {
        let entry = self.entries.get(key)?;
        let ts = entry.last_fetched_at?;
        if now.duration_since(ts) <= entry.cache_time {
            entry.data.clone()
        } else {
            None
        }
    }

    /// Data for `key` regardless of expiry — used under "keep previous data".
    pub fn get_data_ignoring_expiry(&self, key: &str) -> Option<D> {
        self.entries.get(key).and_then(|e| e.data.clone())
    }
}
