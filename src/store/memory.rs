// ============================================================================
// In-Memory Stores
// ============================================================================
//
// Process-local versions of both storage models, for development and tests.
// Each holds its whole state behind one mutex, so every operation is atomic.
//
// ============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::{MessageStore, StoreCapabilities, StoreError, StoreResult};
use crate::message::{Message, StoredMessage};

/// Set-store semantics: destructive read, no ids
#[derive(Default)]
pub struct MemorySetStore {
    inboxes: Mutex<HashMap<String, Vec<StoredMessage>>>,
}

impl MemorySetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for MemorySetStore {
    fn backend(&self) -> &'static str {
        "memory-set"
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::SET
    }

    async fn deliver(
        &self,
        receiver: &str,
        message: &Message,
        created_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut inboxes = self.inboxes.lock().await;
        let inbox = inboxes.entry(receiver.to_string()).or_default();
        let copy = StoredMessage {
            id: None,
            receiver: receiver.to_string(),
            sender: message.sender.clone(),
            content: message.content.clone(),
            read: false,
            created_at,
        };
        // Same member twice is one member
        if !inbox.contains(&copy) {
            inbox.push(copy);
        }
        Ok(())
    }

    async fn read(&self, receiver: &str, _only_unread: bool) -> StoreResult<Vec<StoredMessage>> {
        let mut inboxes = self.inboxes.lock().await;
        Ok(inboxes.remove(receiver).unwrap_or_default())
    }

    async fn count_unread(&self, receiver: &str) -> StoreResult<u64> {
        let inboxes = self.inboxes.lock().await;
        Ok(inboxes.get(receiver).map_or(0, |inbox| inbox.len() as u64))
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Table-store semantics: ids, read flags, explicit delete
#[derive(Default)]
pub struct MemoryTableStore {
    state: Mutex<TableState>,
}

#[derive(Default)]
struct TableState {
    next_id: i64,
    rows: Vec<StoredMessage>,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(receiver: &str, id: i64) -> StoreError {
    StoreError::NotFound {
        receiver: receiver.to_string(),
        id,
    }
}

#[async_trait]
impl MessageStore for MemoryTableStore {
    fn backend(&self) -> &'static str {
        "memory-table"
    }

    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::TABLE
    }

    async fn deliver(
        &self,
        receiver: &str,
        message: &Message,
        created_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = state.next_id;
        state.rows.push(StoredMessage {
            id: Some(id),
            receiver: receiver.to_string(),
            sender: message.sender.clone(),
            content: message.content.clone(),
            read: false,
            created_at,
        });
        Ok(())
    }

    async fn read(&self, receiver: &str, only_unread: bool) -> StoreResult<Vec<StoredMessage>> {
        let state = self.state.lock().await;
        Ok(state
            .rows
            .iter()
            .filter(|row| row.receiver == receiver && !(only_unread && row.read))
            .cloned()
            .collect())
    }

    async fn set_read(&self, receiver: &str, id: i64, read: bool) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let row = state
            .rows
            .iter_mut()
            .find(|row| row.receiver == receiver && row.id == Some(id))
            .ok_or_else(|| not_found(receiver, id))?;
        row.read |= read;
        Ok(())
    }

    async fn count_unread(&self, receiver: &str) -> StoreResult<u64> {
        let state = self.state.lock().await;
        Ok(state
            .rows
            .iter()
            .filter(|row| row.receiver == receiver && !row.read)
            .count() as u64)
    }

    async fn delete(&self, receiver: &str, id: i64) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let position = state
            .rows
            .iter()
            .position(|row| row.receiver == receiver && row.id == Some(id))
            .ok_or_else(|| not_found(receiver, id))?;
        state.rows.remove(position);
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(receivers: &[&str], text: &str) -> Message {
        Message {
            sender: "alice".to_string(),
            receivers: receivers.iter().map(|r| r.to_string()).collect(),
            content: json!({ "text": text }),
        }
    }

    #[tokio::test]
    async fn test_set_store_read_is_destructive() {
        let store = MemorySetStore::new();
        let report = store.send(&message(&["bob", "carol"], "hi")).await;
        assert_eq!(report.delivered_count(), 2);
        assert_eq!(store.count_unread("bob").await.unwrap(), 1);

        let messages = store.read("bob", false).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender, "alice");
        assert_eq!(messages[0].id, None);

        assert!(store.read("bob", false).await.unwrap().is_empty());
        assert_eq!(store.count_unread("bob").await.unwrap(), 0);
        assert_eq!(store.count_unread("carol").await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reads_consume_each_message_once() {
        let store = std::sync::Arc::new(MemorySetStore::new());
        for i in 0..50 {
            store.send(&message(&["bob"], &format!("m{}", i))).await;
        }

        let (a, b) = tokio::join!(
            tokio::spawn({
                let store = store.clone();
                async move { store.read("bob", false).await }
            }),
            tokio::spawn({
                let store = store.clone();
                async move { store.read("bob", false).await }
            })
        );
        let a = a.unwrap().unwrap();
        let b = b.unwrap().unwrap();

        assert_eq!(a.len() + b.len(), 50);
        assert!(a.iter().all(|m| !b.contains(m)));
        assert_eq!(store.count_unread("bob").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_set_store_is_not_addressable() {
        let store = MemorySetStore::new();
        assert!(!store.capabilities().addressable);
        assert!(matches!(
            store.set_read("bob", 1, true).await,
            Err(StoreError::Unsupported {
                backend: "memory-set",
                operation: "set-read"
            })
        ));
        assert!(matches!(
            store.delete("bob", 1).await,
            Err(StoreError::Unsupported { .. })
        ));
    }

    #[tokio::test]
    async fn test_table_store_lifecycle() {
        let store = MemoryTableStore::new();
        store.send(&message(&["bob"], "one")).await;
        store.send(&message(&["bob", "carol"], "two")).await;

        let messages = store.read("bob", false).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, json!({"text": "one"}));
        assert_eq!(store.read("bob", false).await.unwrap(), messages);

        let first = messages[0].id.unwrap();
        store.set_read("bob", first, true).await.unwrap();
        assert_eq!(store.count_unread("bob").await.unwrap(), 1);

        let unread = store.read("bob", true).await.unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].content, json!({"text": "two"}));

        store.delete("bob", first).await.unwrap();
        assert_eq!(store.read("bob", false).await.unwrap().len(), 1);
        assert_eq!(store.read("carol", false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_table_store_read_flag_is_monotonic() {
        let store = MemoryTableStore::new();
        store.send(&message(&["bob"], "hi")).await;
        let id = store.read("bob", false).await.unwrap()[0].id.unwrap();

        store.set_read("bob", id, true).await.unwrap();
        store.set_read("bob", id, false).await.unwrap();
        assert!(store.read("bob", false).await.unwrap()[0].read);
    }

    #[tokio::test]
    async fn test_table_store_set_read_is_idempotent() {
        let store = MemoryTableStore::new();
        store.send(&message(&["bob"], "hi")).await;
        let id = store.read("bob", false).await.unwrap()[0].id.unwrap();

        store.set_read("bob", id, true).await.unwrap();
        store.set_read("bob", id, true).await.unwrap();

        let messages = store.read("bob", false).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].read);
        assert_eq!(store.count_unread("bob").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_table_store_ids_are_scoped_by_receiver() {
        let store = MemoryTableStore::new();
        store.send(&message(&["bob"], "hi")).await;
        let id = store.read("bob", false).await.unwrap()[0].id.unwrap();

        assert!(matches!(
            store.set_read("carol", id, true).await,
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            store.delete("carol", id).await,
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            store.delete("bob", id + 100).await,
            Err(StoreError::NotFound { .. })
        ));
        assert_eq!(store.count_unread("bob").await.unwrap(), 1);
    }
}
