// ============================================================================
// Redis Set-Store
// ============================================================================
//
// Layout: one Redis set per receiver at `{prefix}{receiver}`. Each member is
// a JSON envelope `{sender, content, created_at}`.
//
// Message lifecycle:
// 1. send  -> SADD to every receiver's set (+ EXPIRE when a TTL is set)
// 2. read  -> MULTI; SMEMBERS; DEL; EXEC, so every returned member is removed
//             and nothing added concurrently is lost
// 3. count -> SCARD
//
// Members written by older deployments hold the raw send body; those are
// still returned, with the body as content.
//
// ============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{MessageStore, StoreCapabilities, StoreResult};
use crate::config::{SECONDS_PER_DAY, StoreConfig};
use crate::message::{Message, StoredMessage};

#[derive(Serialize, Deserialize)]
struct SetEntry {
    #[serde(default)]
    sender: String,
    /// Required: an object without it is a raw body, not an envelope
    content: Value,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

pub struct RedisSetStore {
    conn: redis::aio::ConnectionManager,
    key_prefix: String,
    /// 0 disables expiry
    message_ttl_seconds: i64,
}

impl RedisSetStore {
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        if config.redis_url.starts_with("rediss://") {
            tracing::info!("Redis TLS enabled (rediss://)");
        }

        let client = Client::open(config.redis_url.clone()).context("Failed to parse Redis URL")?;
        let conn = client
            .get_connection_manager()
            .await
            .context("Failed to connect to Redis")?;

        let message_ttl_seconds = ttl_seconds(config.message_ttl_days)?;
        if message_ttl_seconds > 0 {
            tracing::info!(
                "Inbox TTL: {} days ({} seconds)",
                config.message_ttl_days,
                message_ttl_seconds
            );
        }

        Ok(Self::with_connection(
            conn,
            config.redis_key_prefix.clone(),
            message_ttl_seconds,
        ))
    }

    pub fn with_connection(
        conn: redis::aio::ConnectionManager,
        key_prefix: String,
        message_ttl_seconds: i64,
    ) -> Self {
        Self {
            conn,
            key_prefix,
            message_ttl_seconds,
        }
    }

    fn key(&self, receiver: &str) -> String {
        format!("{}{}", self.key_prefix, receiver)
    }
}

fn ttl_seconds(message_ttl_days: i64) -> Result<i64> {
    message_ttl_days
        .checked_mul(SECONDS_PER_DAY)
        .with_context(|| format!("MESSAGE_TTL_DAYS={} is too large", message_ttl_days))
}

/// Decodes one set member; every member yields a message, whatever its bytes
fn decode_member(receiver: &str, member: &[u8]) -> StoredMessage {
    let (sender, content, created_at) = match serde_json::from_slice::<SetEntry>(member) {
        Ok(entry) => (entry.sender, entry.content, entry.created_at),
        Err(_) => match serde_json::from_slice::<Value>(member) {
            Ok(value) => (String::new(), value, None),
            Err(_) => (
                String::new(),
                Value::String(String::from_utf8_lossy(member).into_owned()),
                None,
            ),
        },
    };

    StoredMessage {
        id: None,
        receiver: receiver.to_string(),
        sender,
        content,
        read: false,
        created_at: created_at.unwrap_or_else(Utc::now),
    }
}

#[async_trait]
impl MessageStore for RedisSetStore {
    fn backend(&self) -> &'static str {
        "redis"
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
        let key = self.key(receiver);
        let member = serde_json::to_string(&SetEntry {
            sender: message.sender.clone(),
            content: message.content.clone(),
            created_at: Some(created_at),
        })?;

        let mut conn = self.conn.clone();
        if self.message_ttl_seconds > 0 {
            let _: () = redis::pipe()
                .atomic()
                .sadd(&key, &member)
                .ignore()
                .expire(&key, self.message_ttl_seconds)
                .ignore()
                .query_async(&mut conn)
                .await?;
        } else {
            let _: () = conn.sadd(&key, &member).await?;
        }
        Ok(())
    }

    async fn read(&self, receiver: &str, _only_unread: bool) -> StoreResult<Vec<StoredMessage>> {
        let key = self.key(receiver);
        let mut conn = self.conn.clone();

        // Raw bytes: a member that fails to decode must still be returned,
        // the DEL has already run
        let (members, _removed): (Vec<Vec<u8>>, i64) = redis::pipe()
            .atomic()
            .smembers(&key)
            .del(&key)
            .query_async(&mut conn)
            .await?;

        let mut messages: Vec<StoredMessage> = members
            .iter()
            .map(|member| decode_member(receiver, member))
            .collect();
        messages.sort_by_key(|m| m.created_at);

        tracing::debug!(count = messages.len(), "Drained set-store inbox");
        Ok(messages)
    }

    async fn count_unread(&self, receiver: &str) -> StoreResult<u64> {
        let mut conn = self.conn.clone();
        let count: u64 = conn.scard(self.key(receiver)).await?;
        Ok(count)
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn close(&self) {
        tracing::info!("Closing Redis set-store");
    }
}
