//! Working-memory storage boundary.
//!
//! The scheduler never owns memory storage. It fetches a snapshot, runs
//! the pipeline over it, and issues at most one `replace` per successful
//! run. The provider is expected to make `replace` atomic from a reader's
//! perspective; single-writer semantics per user are assumed, not
//! enforced here.

use super::error::{CuratorError, Result};
use super::models::MemoryItem;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

#[async_trait]
pub trait WorkingMemoryProvider: Send + Sync {
    /// Fetch the user's working memory, ordered by insertion.
    async fn fetch(&self, user_id: &str) -> Result<Vec<MemoryItem>>;

    /// Replace the user's working memory wholesale.
    async fn replace(&self, user_id: &str, items: Vec<MemoryItem>) -> Result<()>;
}

/// In-process working-memory store backing the default deployment and
/// the test suite. Each user holds a capped, insertion-ordered vector.
pub struct InMemoryWorkingMemory {
    entries: RwLock<HashMap<String, Vec<MemoryItem>>>,
    cap: usize,
}

impl InMemoryWorkingMemory {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            cap,
        }
    }

    /// Append a memory for a user, evicting the oldest item when the cap
    /// is exceeded. This is the ingestion path the chat turn writes
    /// through; the caller is expected to also invoke
    /// `notify_memory_added` on the scheduler.
    pub async fn insert(&self, user_id: &str, item: MemoryItem) {
        let mut entries = self.entries.write().await;
        let items = entries.entry(user_id.to_string()).or_default();
        items.push(item);
        if items.len() > self.cap {
            let overflow = items.len() - self.cap;
            items.drain(..overflow);
            debug!(user_id, overflow, "working memory cap exceeded, evicted oldest");
        }
    }

    pub async fn len(&self, user_id: &str) -> usize {
        self.entries
            .read()
            .await
            .get(user_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub async fn is_empty(&self, user_id: &str) -> bool {
        self.len(user_id).await == 0
    }
}

#[async_trait]
impl WorkingMemoryProvider for InMemoryWorkingMemory {
    async fn fetch(&self, user_id: &str) -> Result<Vec<MemoryItem>> {
        Ok(self
            .entries
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn replace(&self, user_id: &str, items: Vec<MemoryItem>) -> Result<()> {
        if items.len() > self.cap {
            return Err(CuratorError::Configuration(format!(
                "replace of {} items exceeds working memory cap {}",
                items.len(),
                self.cap
            )));
        }
        let mut entries = self.entries.write().await;
        entries.insert(user_id.to_string(), items);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_and_fetch_preserves_order() {
        let store = InMemoryWorkingMemory::new(10);
        store.insert("u1", MemoryItem::new("first")).await;
        store.insert("u1", MemoryItem::new("second")).await;

        let items = store.fetch("u1").await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].text, "first");
        assert_eq!(items[1].text, "second");
    }

    #[tokio::test]
    async fn test_insert_evicts_oldest_at_cap() {
        let store = InMemoryWorkingMemory::new(2);
        store.insert("u1", MemoryItem::new("a")).await;
        store.insert("u1", MemoryItem::new("b")).await;
        store.insert("u1", MemoryItem::new("c")).await;

        let items = store.fetch("u1").await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].text, "b");
        assert_eq!(items[1].text, "c");
    }

    #[tokio::test]
    async fn test_replace_swaps_whole_list() {
        let store = InMemoryWorkingMemory::new(10);
        store.insert("u1", MemoryItem::new("old")).await;
        store
            .replace("u1", vec![MemoryItem::new("new")])
            .await
            .unwrap();

        let items = store.fetch("u1").await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].text, "new");
    }

    #[tokio::test]
    async fn test_fetch_unknown_user_is_empty() {
        let store = InMemoryWorkingMemory::new(10);
        assert!(store.fetch("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_users_are_isolated() {
        let store = InMemoryWorkingMemory::new(10);
        store.insert("u1", MemoryItem::new("mine")).await;
        store.insert("u2", MemoryItem::new("yours")).await;

        assert_eq!(store.fetch("u1").await.unwrap()[0].text, "mine");
        assert_eq!(store.fetch("u2").await.unwrap()[0].text, "yours");
    }
}
