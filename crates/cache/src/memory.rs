//! In-process cache tier: TTL expiry enforced at read time, LRU eviction
//! past a soft entry cap, copy-on-read values.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;

struct StoredEntry {
    value: Value,
    expires_at: Instant,
    last_accessed: Instant,
}

/// A single namespace's in-process store.
///
/// A `Mutex` rather than `RwLock` because reads also touch `last_accessed`;
/// it is never held across an await point.
pub struct MemoryStore {
    entries: Mutex<HashMap<String, StoredEntry>>,
    max_entries: usize,
}

impl MemoryStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }

    /// Read a value. Expired entries are dropped on access and count as a
    /// miss even when physically present.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        match entries.get_mut(key) {
            Some(entry) if entry.expires_at > now => {
                entry.last_accessed = now;
                Some(entry.value.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn set(&self, key: &str, value: Value, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.insert(
            key.to_string(),
            StoredEntry {
                value,
                expires_at: now + ttl,
                last_accessed: now,
            },
        );
        if entries.len() > self.max_entries {
            Self::evict(&mut entries, self.max_entries, now);
        }
    }

    /// Drop expired entries, then least-recently-accessed ones until the
    /// store is back at 90% of its cap.
    fn evict(entries: &mut HashMap<String, StoredEntry>, max_entries: usize, now: Instant) {
        entries.retain(|_, e| e.expires_at > now);

        let target = max_entries * 9 / 10;
        if entries.len() <= target {
            return;
        }
        let mut by_access: Vec<(String, Instant)> = entries
            .iter()
            .map(|(k, e)| (k.clone(), e.last_accessed))
            .collect();
        by_access.sort_by_key(|(_, accessed)| *accessed);
        for (key, _) in by_access.iter().take(entries.len() - target) {
            entries.remove(key);
        }
    }

    /// Remove every key matching the glob pattern. Returns the number
    /// removed.
    pub fn invalidate_pattern(&self, pattern: &str) -> u64 {
        let regex = match glob_to_regex(pattern) {
            Some(r) => r,
            None => return 0,
        };
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|k, _| !regex.is_match(k));
        (before - entries.len()) as u64
    }

    pub fn clear(&self) -> u64 {
        let mut entries = self.entries.lock();
        let count = entries.len() as u64;
        entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Translate a glob (`*` wildcard only) into an anchored regex.
pub fn glob_to_regex(pattern: &str) -> Option<regex::Regex> {
    let escaped = regex::escape(pattern).replace(r"\*", ".*");
    match regex::Regex::new(&format!("^{escaped}$")) {
        Ok(r) => Some(r),
        Err(e) => {
            tracing::warn!(%pattern, error = %e, "invalid invalidation pattern");
            None
        }
    }
}
