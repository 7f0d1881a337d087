//! # PostgreSQL Message Bus
//!
//! Queue table with visibility timeouts, read the pgmq way: a receive claims
//! the oldest visible row with `FOR UPDATE SKIP LOCKED` and pushes its
//! `visible_at` forward by the visibility timeout, so concurrent consumers
//! never claim the same row. Acknowledging deletes the row.

use super::bus::{Delivery, MessageBus};
use super::errors::{MessagingError, MessagingResult};
use super::message::Envelope;
use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, FromRow)]
struct ClaimedRow {
    id: i64,
    payload: Json<Envelope>,
    read_count: i32,
}

pub struct PostgresMessageBus {
    pool: PgPool,
    queue_name: String,
    visibility_timeout: Duration,
    poll_interval: Duration,
}

impl PostgresMessageBus {
    pub fn new(
        pool: PgPool,
        queue_name: impl Into<String>,
        visibility_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            pool,
            queue_name: queue_name.into(),
            visibility_timeout,
            poll_interval,
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    async fn claim(&self) -> MessagingResult<Option<Delivery>> {
        let row = sqlx::query_as::<_, ClaimedRow>(
            r#"
            UPDATE message_queue
               SET visible_at = now() + ($2::bigint * interval '1 millisecond'),
                   read_count = read_count + 1
             WHERE id = (
                   SELECT id FROM message_queue
                    WHERE queue_name = $1 AND visible_at <= now()
                    ORDER BY visible_at, id
                    LIMIT 1
                    FOR UPDATE SKIP LOCKED)
            RETURNING id, payload, read_count
            "#,
        )
        .bind(&self.queue_name)
        .bind(millis(self.visibility_timeout))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Delivery {
            receipt: row.id.to_string(),
            envelope: row.payload.0,
            read_count: u32::try_from(row.read_count).unwrap_or(u32::MAX),
        }))
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

#[async_trait]
impl MessageBus for PostgresMessageBus {
    async fn publish(&self, envelope: Envelope, delay: Duration) -> MessagingResult<()> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO message_queue (queue_name, payload, visible_at)
            VALUES ($1, $2, now() + ($3::bigint * interval '1 millisecond'))
            RETURNING id
            "#,
        )
        .bind(&self.queue_name)
        .bind(Json(&envelope))
        .bind(millis(delay))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| MessagingError::queue_operation(&self.queue_name, "publish", e.to_string()))?;

        debug!(
            queue = %self.queue_name,
            msg_id = id,
            envelope_id = %envelope.id,
            delay_ms = millis(delay),
            "Published message"
        );
        Ok(())
    }

    async fn receive(&self, wait: Duration) -> MessagingResult<Option<Delivery>> {
        let give_up_at = Instant::now() + wait;

        loop {
            if let Some(delivery) = self.claim().await? {
                return Ok(Some(delivery));
            }

            let now = Instant::now();
            if now >= give_up_at {
                return Ok(None);
            }
            tokio::time::sleep_until((now + self.poll_interval).min(give_up_at)).await;
        }
    }

    async fn acknowledge(&self, receipt: &str) -> MessagingResult<()> {
        let id: i64 = receipt
            .parse()
            .map_err(|_| MessagingError::unknown_receipt(receipt))?;

        let deleted = sqlx::query("DELETE FROM message_queue WHERE id = $1 AND queue_name = $2")
            .bind(id)
            .bind(&self.queue_name)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if deleted == 0 {
            return Err(MessagingError::unknown_receipt(receipt));
        }
        Ok(())
    }

    async fn pending_count(&self) -> MessagingResult<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM message_queue WHERE queue_name = $1")
                .bind(&self.queue_name)
                .fetch_one(&self.pool)
                .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}
