//! TTL cache of resolved folder identifiers.
//!
//! Resolving `projects/42/files` costs one `files.list` round-trip per path
//! component, so the provider remembers the folder ids it has resolved,
//! keyed by `(parent folder id, child name)`. Entries expire after
//! [`DEFAULT_FOLDER_TTL`] to bound staleness when folders are renamed or
//! deleted out-of-band in the drive UI.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// How long a resolved folder id is trusted before it is looked up again.
pub const DEFAULT_FOLDER_TTL: Duration = Duration::from_secs(300);

struct CacheEntry {
    node_id: String,
    inserted: Instant,
}

/// Maps `(parent folder id, child name)` pairs to drive node ids.
pub struct FolderCache {
    ttl: Duration,
    entries: RwLock<HashMap<(String, String), CacheEntry>>,
}

impl FolderCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: RwLock::new(HashMap::new()) }
    }

    /// Look up a child folder id, ignoring entries older than the TTL.
    pub async fn get(&self, parent_id: &str, name: &str) -> Option<String> {
        let entries = self.entries.read().await;
        entries
            .get(&(parent_id.to_string(), name.to_string()))
            .filter(|entry| entry.inserted.elapsed() < self.ttl)
            .map(|entry| entry.node_id.clone())
    }

    pub async fn insert(&self, parent_id: impl Into<String>, name: impl Into<String>, node_id: impl Into<String>) {
        let mut entries = self.entries.write().await;
        entries.insert(
            (parent_id.into(), name.into()),
            CacheEntry { node_id: node_id.into(), inserted: Instant::now() },
        );
    }

    /// Drop every cached mapping. Called when a mutation makes cached ids
    /// suspect, and exposed so operators can force re-resolution.
    pub async fn invalidate(&self) {
        let mut entries = self.entries.write().await;
        entries.clear();
    }
}

impl Default for FolderCache {
    fn default() -> Self {
        Self::new(DEFAULT_FOLDER_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hit_within_ttl() {
        let cache = FolderCache::default();
        cache.insert("root-0", "projects", "node-a").await;
        assert_eq!(cache.get("root-0", "projects").await.as_deref(), Some("node-a"));
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let cache = FolderCache::new(Duration::ZERO);
        cache.insert("root-0", "projects", "node-a").await;
        assert_eq!(cache.get("root-0", "projects").await, None);
    }

    #[tokio::test]
    async fn test_same_name_under_different_parents() {
        let cache = FolderCache::default();
        cache.insert("parent-1", "files", "node-a").await;
        cache.insert("parent-2", "files", "node-b").await;
        assert_eq!(cache.get("parent-1", "files").await.as_deref(), Some("node-a"));
        assert_eq!(cache.get("parent-2", "files").await.as_deref(), Some("node-b"));
    }

    #[tokio::test]
    async fn test_invalidate_clears_everything() {
        let cache = FolderCache::default();
        cache.insert("root-0", "a", "1").await;
        cache.insert("1", "b", "2").await;
        cache.invalidate().await;
        assert_eq!(cache.get("root-0", "a").await, None);
        assert_eq!(cache.get("1", "b").await, None);
    }

    #[tokio::test]
    async fn test_insert_overwrites() {
        let cache = FolderCache::default();
        cache.insert("root-0", "a", "old").await;
        cache.insert("root-0", "a", "new").await;
        assert_eq!(cache.get("root-0", "a").await.as_deref(), Some("new"));
    }
}
