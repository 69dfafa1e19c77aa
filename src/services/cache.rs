use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    Branches,
    Commits,
    PullRequests,
    Issues,
    CommitDetail,
}

struct CacheEntry {
    payload: Value,
    expires_at: Instant,
}

/// Short-lived, in-process response cache. Not shared across pipeline runs:
/// the pipeline clears it at the start of every run to bound memory in a
/// long-lived host.
pub struct ResponseCache {
    ttl: Duration,
    entries: RwLock<HashMap<(CacheKind, String), CacheEntry>>,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the cached payload, evicting it first if the TTL elapsed.
    pub async fn get<T: DeserializeOwned>(&self, kind: CacheKind, key: &str) -> Option<T> {
        let map_key = (kind, key.to_string());
        {
            let entries = self.entries.read().await;
            match entries.get(&map_key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return serde_json::from_value(entry.payload.clone()).ok();
                }
                Some(_) => {}
                None => return None,
            }
        }
        // Expired: evict under the write lock.
        self.entries.write().await.remove(&map_key);
        None
    }

    pub async fn set<T: Serialize>(&self, kind: CacheKind, key: &str, payload: &T) {
        let value = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(_) => return,
        };
        let mut entries = self.entries.write().await;
        entries.insert(
            (kind, key.to_string()),
            CacheEntry {
                payload: value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn clear_kind(&self, kind: CacheKind) {
        self.entries.write().await.retain(|(k, _), _| *k != kind);
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
