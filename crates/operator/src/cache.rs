use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::Result;

/// Entries live this long after their last write.
pub const DEFAULT_TTL: Duration = Duration::from_secs(6 * 60 * 60);

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    written_at: Instant,
}

/// Process-local store of the last observed body of every watched object.
///
/// Expiry is lazy: an entry older than the TTL is dropped the next time it is
/// read (or listed), there is no background sweeper.
#[derive(Debug)]
pub struct ObjectCache {
    entries: DashMap<String, Entry>,
    ttl: Duration,
}

impl Default for ObjectCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(
            key.into(),
            Entry {
                value: value.into(),
                written_at: Instant::now(),
            },
        );
    }

    /// Serialize `value` as JSON and store it under `key`.
    pub fn set_json<T: Serialize>(&self, key: impl Into<String>, value: &T) -> Result<()> {
        self.set(key, serde_json::to_string(value)?);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        {
            let entry = self.entries.get(key)?;
            if !self.is_expired(&entry) {
                return Some(entry.value.clone());
            }
        }

        // Only drop it if nobody rewrote the key in the meantime.
        self.entries.remove_if(key, |_, entry| self.is_expired(entry));
        None
    }

    /// Remove `key`, reporting whether a live entry was present.
    pub fn delete(&self, key: &str) -> bool {
        self.entries
            .remove(key)
            .is_some_and(|(_, entry)| !self.is_expired(&entry))
    }

    /// Keys of all live entries.
    pub fn keys(&self) -> Vec<String> {
        self.entries.retain(|_, entry| !self.is_expired(entry));
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_expired(&self, entry: &Entry) -> bool {
        entry.written_at.elapsed() >= self.ttl
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn set_then_get_until_ttl_elapses() {
        let cache = ObjectCache::new();
        cache.set("k", "v");
        assert_eq!(cache.get("k").as_deref(), Some("v"));

        tokio::time::advance(DEFAULT_TTL - Duration::from_secs(1)).await;
        assert_eq!(cache.get("k").as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get("k"), None);
        assert!(cache.keys().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_is_measured_from_last_write() {
        let cache = ObjectCache::with_ttl(Duration::from_secs(10));
        cache.set("k", "v1");
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.set("k", "v2");
        tokio::time::advance(Duration::from_secs(8)).await;

        assert_eq!(cache.get("k").as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn delete_reports_presence() {
        let cache = ObjectCache::new();
        assert!(!cache.delete("missing"));

        cache.set("k", "v");
        assert!(cache.delete("k"));
        assert_eq!(cache.get("k"), None);
        assert!(!cache.delete("k"));
    }

    #[tokio::test]
    async fn overwrite_and_list_keys() {
        let cache = ObjectCache::new();
        cache.set("a", "1");
        cache.set("b", "2");
        cache.set("a", "3");

        let mut keys = cache.keys();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(cache.get("a").as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn stores_json() {
        let cache = ObjectCache::new();
        cache
            .set_json("cm", &serde_json::json!({ "data": { "name": "dc-1" } }))
            .unwrap();
        assert_eq!(cache.get("cm").as_deref(), Some(r#"{"data":{"name":"dc-1"}}"#));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_never_tear_values() {
        let cache = Arc::new(ObjectCache::new());

        let writers = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move {
                    for n in 0..200 {
                        cache.set("shared", format!("writer-{i}-{n}"));
                        if let Some(v) = cache.get("shared") {
                            assert!(v.starts_with("writer-"));
                        }
                    }
                })
            })
            .collect::<Vec<_>>();

        for w in writers {
            w.await.unwrap();
        }
        assert!(cache.get("shared").unwrap().starts_with("writer-"));
    }
}
