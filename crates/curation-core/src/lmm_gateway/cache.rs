//! In-process bookkeeping for context-cache reuse, keyed by
//! `(sessionId, operation)`. The cache itself lives on the model side; this
//! registry only remembers which cache id is still live so repeat calls in
//! the same session avoid re-sending media.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;

use super::request::ContextCache;

#[derive(Default)]
pub struct CacheRegistry {
    entries: Mutex<HashMap<(String, String), ContextCache>>,
}

impl CacheRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a still-live cache for this key, evicting it first if its
    /// TTL has already elapsed.
    pub fn get(&self, session_id: &str, operation: &str) -> Option<ContextCache> {
        let key = (session_id.to_string(), operation.to_string());
        let mut entries = self.entries.lock().expect("cache registry mutex poisoned");
        match entries.get(&key) {
            Some(cache) if cache.expires_at > Utc::now() => Some(cache.clone()),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, session_id: &str, operation: &str, cache: ContextCache) {
        let key = (session_id.to_string(), operation.to_string());
        self.entries
            .lock()
            .expect("cache registry mutex poisoned")
            .insert(key, cache);
    }

    /// Session teardown deletes every cache entry scoped to that session.
    pub fn evict_session(&self, session_id: &str) -> Vec<ContextCache> {
        let mut entries = self.entries.lock().expect("cache registry mutex poisoned");
        let keys: Vec<_> = entries
            .keys()
            .filter(|(sid, _)| sid == session_id)
            .cloned()
            .collect();
        keys.into_iter()
            .filter_map(|key| entries.remove(&key))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn expired_entries_are_evicted_on_read() {
        let registry = CacheRegistry::new();
        registry.put(
            "s1",
            "triage",
            ContextCache {
                cache_id: "c1".into(),
                expires_at: Utc::now() - chrono::Duration::from_std(Duration::from_secs(1)).unwrap(),
            },
        );
        assert!(registry.get("s1", "triage").is_none());
    }

    #[test]
    fn live_entries_are_returned() {
        let registry = CacheRegistry::new();
        registry.put(
            "s1",
            "triage",
            ContextCache {
                cache_id: "c1".into(),
                expires_at: Utc::now() + chrono::Duration::hours(1),
            },
        );
        assert_eq!(registry.get("s1", "triage").unwrap().cache_id, "c1");
    }
}
