// ============================================================================
// Message Store
// ============================================================================
//
// One trait, two storage models:
//
// - set-store   (RedisSetStore, MemorySetStore)
//   Opaque blobs grouped per receiver. Reading returns everything and removes
//   it in the same atomic step. No ids, no read flags.
//
// - table-store (PgTableStore, MemoryTableStore)
//   One row per (receiver, message) with an id, a read flag and a timestamp.
//   Reading is non-destructive; rows are marked read or deleted explicitly.
//
// The backend is chosen once at startup from STORE_BACKEND.
//
// ============================================================================

pub mod memory;
pub mod postgres;
pub mod redis;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{StoreBackend, StoreConfig};
use crate::message::{Message, StoredMessage};

pub use self::memory::{MemorySetStore, MemoryTableStore};
pub use self::postgres::PgTableStore;
pub use self::redis::RedisSetStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{0}")]
    Backend(String),

    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("No message {id} for receiver {receiver}")]
    NotFound { receiver: String, id: i64 },

    #[error("{operation} is not supported by the {backend} store")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// What a backend can do beyond the common operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreCapabilities {
    /// Messages carry ids and support set-read and delete
    pub addressable: bool,
    /// Read removes the returned messages
    pub destructive_read: bool,
}

impl StoreCapabilities {
    pub const SET: Self = Self {
        addressable: false,
        destructive_read: true,
    };

    pub const TABLE: Self = Self {
        addressable: true,
        destructive_read: false,
    };
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub receiver: String,
    /// `None` when the copy was stored
    pub error: Option<String>,
}

/// Per-receiver result of a fan-out send
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub outcomes: Vec<DeliveryOutcome>,
}

impl DeliveryReport {
    pub fn record(&mut self, receiver: &str, result: StoreResult<()>) {
        self.outcomes.push(DeliveryOutcome {
            receiver: receiver.to_string(),
            error: result.err().map(|e| e.to_string()),
        });
    }

    pub fn delivered_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.error.is_none()).count()
    }

    pub fn delivered(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter(|o| o.error.is_none())
            .map(|o| o.receiver.clone())
            .collect()
    }

    pub fn failed(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter(|o| o.error.is_some())
            .map(|o| o.receiver.clone())
            .collect()
    }
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    fn backend(&self) -> &'static str;

    fn capabilities(&self) -> StoreCapabilities;

    /// Stores one receiver's copy of `message`
    async fn deliver(
        &self,
        receiver: &str,
        message: &Message,
        created_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Fans `message` out to every receiver
    ///
    /// A failed receiver is recorded and the remaining receivers are still
    /// attempted.
    async fn send(&self, message: &Message) -> DeliveryReport {
        let created_at = Utc::now();
        let mut report = DeliveryReport::default();
        for receiver in &message.receivers {
            let result = self.deliver(receiver, message, created_at).await;
            if let Err(e) = &result {
                tracing::warn!(
                    backend = self.backend(),
                    error = %e,
                    "Failed to store message copy"
                );
            }
            report.record(receiver, result);
        }
        report
    }

    async fn read(&self, receiver: &str, only_unread: bool) -> StoreResult<Vec<StoredMessage>>;

    async fn set_read(&self, _receiver: &str, _id: i64, _read: bool) -> StoreResult<()> {
        Err(StoreError::Unsupported {
            backend: self.backend(),
            operation: "set-read",
        })
    }

    async fn count_unread(&self, receiver: &str) -> StoreResult<u64>;

    async fn delete(&self, _receiver: &str, _id: i64) -> StoreResult<()> {
        Err(StoreError::Unsupported {
            backend: self.backend(),
            operation: "delete",
        })
    }

    async fn ping(&self) -> StoreResult<()>;

    /// Releases backend connections; the store must not be used afterwards
    async fn close(&self) {}
}

/// Builds the configured backend
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn MessageStore>> {
    let store: Arc<dyn MessageStore> = match config.backend {
        StoreBackend::Redis => Arc::new(RedisSetStore::connect(config).await?),
        StoreBackend::Postgres => Arc::new(PgTableStore::connect(config).await?),
        StoreBackend::MemorySet => {
            tracing::warn!("Using in-memory set-store; messages are lost on restart");
            Arc::new(MemorySetStore::new())
        }
        StoreBackend::MemoryTable => {
            tracing::warn!("Using in-memory table-store; messages are lost on restart");
            Arc::new(MemoryTableStore::new())
        }
    };

    tracing::info!(
        backend = store.backend(),
        capabilities = ?store.capabilities(),
        "Message store ready"
    );
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_report() {
        let mut report = DeliveryReport::default();
        report.record("bob", Ok(()));
        report.record("carol", Err(StoreError::Backend("down".to_string())));
        report.record("dave", Ok(()));

        assert_eq!(report.delivered_count(), 2);
        assert_eq!(report.delivered(), vec!["bob", "dave"]);
        assert_eq!(report.failed(), vec!["carol"]);
        assert_eq!(report.outcomes[1].error.as_deref(), Some("down"));
    }
}
