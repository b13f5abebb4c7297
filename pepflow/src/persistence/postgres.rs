use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use crate::config::PersistenceConfig;
use crate::lease::{Delivery, LeaseId, MessageId};
use crate::queue::{MessageQueue, QueueName};

/// PostgreSQL-backed message queue.
///
/// A fetch stamps the row with a fresh lease and pushes `visible_at` out by
/// the message's time-to-run; an ack deletes the row only while that lease
/// is still the current one.
#[derive(Clone, Debug)]
pub struct PostgresMessageQueue {
    pool: PgPool,
}

impl PostgresMessageQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a pool sized from `config`.
    pub async fn connect(config: &PersistenceConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .connect(&config.connection_string)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates the message table and its fetch index if they are missing.
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pepflow_messages (
                id UUID PRIMARY KEY,
                queue TEXT NOT NULL,
                body TEXT NOT NULL,
                priority BIGINT NOT NULL,
                ttr_ms BIGINT NOT NULL,
                visible_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                lease_id UUID,
                deliveries INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS pepflow_messages_fetch_idx
                ON pepflow_messages (queue, priority, visible_at, created_at)
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl MessageQueue for PostgresMessageQueue {
    async fn put(
        &self,
        queue: QueueName,
        body: String,
        priority: u32,
        ttr: Duration,
    ) -> anyhow::Result<MessageId> {
        let id = MessageId::new();
        let ttr_ms = i64::try_from(ttr.as_millis()).unwrap_or(i64::MAX);

        sqlx::query(
            r#"
            INSERT INTO pepflow_messages (id, queue, body, priority, ttr_ms, visible_at, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW(), NOW())
            "#,
        )
        .bind(id.0)
        .bind(queue.as_str())
        .bind(&body)
        .bind(i64::from(priority))
        .bind(ttr_ms)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn get(&self, queue: QueueName) -> anyhow::Result<Option<Delivery>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT id, body, priority, ttr_ms, deliveries
            FROM pepflow_messages
            WHERE queue = $1
              AND visible_at <= NOW()
            ORDER BY priority ASC, visible_at ASC, created_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(queue.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            drop(tx);
            return Ok(None);
        };

        let id: Uuid = row.try_get("id")?;
        let body: String = row.try_get("body")?;
        let priority: i64 = row.try_get("priority")?;
        let ttr_ms: i64 = row.try_get("ttr_ms")?;
        let deliveries: i32 = row.try_get("deliveries")?;

        let lease_id = LeaseId::new();
        let expires_at: DateTime<Utc> = sqlx::query(
            r#"
            UPDATE pepflow_messages
            SET lease_id = $1,
                deliveries = deliveries + 1,
                visible_at = NOW() + ($2::bigint) * INTERVAL '1 millisecond'
            WHERE id = $3
            RETURNING visible_at
            "#,
        )
        .bind(lease_id.0)
        .bind(ttr_ms)
        .bind(id)
        .fetch_one(&mut *tx)
        .await?
        .try_get("visible_at")?;

        tx.commit().await?;

        Ok(Some(Delivery {
            message_id: MessageId(id),
            lease_id,
            queue,
            body,
            priority: u32::try_from(priority).unwrap_or(u32::MAX),
            expires_at,
            deliveries: u32::try_from(deliveries.saturating_add(1)).unwrap_or(u32::MAX),
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> anyhow::Result<()> {
        let res = sqlx::query(
            r#"
            DELETE FROM pepflow_messages
            WHERE id = $1
              AND lease_id = $2
            "#,
        )
        .bind(delivery.message_id.0)
        .bind(delivery.lease_id.0)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            debug!(
                message_id = %delivery.message_id,
                "ack found no row; message was already removed or re-leased"
            );
        }
        Ok(())
    }
}
