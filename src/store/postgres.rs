// ============================================================================
// Postgres Table-Store
// ============================================================================
//
// One `inbox_messages` row per (receiver, message). Ids come from a BIGSERIAL,
// so they are unique per receiver and never reused. Every statement is scoped
// by receiver: an id that belongs to someone else is reported as not found.
//
// ============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::PgPool;
use std::time::Duration;

use super::{MessageStore, StoreCapabilities, StoreError, StoreResult};
use crate::config::StoreConfig;
use crate::message::{Message, StoredMessage};

#[derive(sqlx::FromRow)]
struct InboxRow {
    id: i64,
    receiver: String,
    sender: String,
    content: Json<Value>,
    read: bool,
    created_at: DateTime<Utc>,
}

impl From<InboxRow> for StoredMessage {
    fn from(row: InboxRow) -> Self {
        StoredMessage {
            id: Some(row.id),
            receiver: row.receiver,
            sender: row.sender,
            content: row.content.0,
            read: row.read,
            created_at: row.created_at,
        }
    }
}

pub struct PgTableStore {
    pool: PgPool,
}

impl PgTableStore {
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let database_url = config
            .database_url
            .as_deref()
            .context("DATABASE_URL is required for the postgres store")?;

        let pool = PgPoolOptions::new()
            .max_connections(config.db.max_connections)
            .acquire_timeout(Duration::from_secs(config.db.acquire_timeout_secs))
            .test_before_acquire(true)
            .connect(database_url)
            .await
            .context("Failed to connect to Postgres")?;

        sqlx::migrate!()
            .run(&pool)
            .await
            .context("Failed to run database migrations")?;
        tracing::info!("Database migrations applied");

        Ok(Self::new(pool))
    }

    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for PgTableStore {
    fn backend(&self) -> &'static str {
        "postgres"
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
        sqlx::query(
            r#"
            INSERT INTO inbox_messages (receiver, sender, content, read, created_at)
            VALUES ($1, $2, $3, FALSE, $4)
            "#,
        )
        .bind(receiver)
        .bind(&message.sender)
        .bind(Json(&message.content))
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn read(&self, receiver: &str, only_unread: bool) -> StoreResult<Vec<StoredMessage>> {
        let rows = sqlx::query_as::<_, InboxRow>(
            r#"
            SELECT id, receiver, sender, content, read, created_at
            FROM inbox_messages
            WHERE receiver = $1 AND ($2 = FALSE OR read = FALSE)
            ORDER BY id
            "#,
        )
        .bind(receiver)
        .bind(only_unread)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(StoredMessage::from).collect())
    }

    async fn set_read(&self, receiver: &str, id: i64, read: bool) -> StoreResult<()> {
        // OR keeps the flag monotonic: a row that is already read stays read
        let result = sqlx::query(
            r#"
            UPDATE inbox_messages
            SET read = read OR $3
            WHERE receiver = $1 AND id = $2
            "#,
        )
        .bind(receiver)
        .bind(id)
        .bind(read)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                receiver: receiver.to_string(),
                id,
            });
        }
        Ok(())
    }

    async fn count_unread(&self, receiver: &str) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM inbox_messages
            WHERE receiver = $1 AND read = FALSE
            "#,
        )
        .bind(receiver)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }

    async fn delete(&self, receiver: &str, id: i64) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM inbox_messages WHERE receiver = $1 AND id = $2")
            .bind(receiver)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                receiver: receiver.to_string(),
                id,
            });
        }
        Ok(())
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) {
        tracing::info!("Closing Postgres connection pool");
        self.pool.close().await;
    }
}
