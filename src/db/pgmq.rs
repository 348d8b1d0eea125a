//! pgmq-backed event queue.
//!
//! Calls pgmq's SQL functions directly: pgmq.create, pgmq.send, pgmq.read,
//! pgmq.archive, pgmq.set_vt. A message read but never settled reappears
//! after its visibility timeout, which is what makes delivery at-least-once.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use tracing::warn;

use super::Db;
use crate::error::Result;
use crate::model::Event;
use crate::repo::{EventQueue, QueuedEvent};
use crate::telemetry::metrics;

/// A message read from a pgmq queue.
#[derive(Debug, Clone)]
pub struct PgmqMessage {
    pub msg_id: i64,
    pub read_ct: i32,
    pub enqueued_at: DateTime<Utc>,
    pub message: serde_json::Value,
}

fn count(queue_name: &str, operation: &'static str) {
    metrics::queue_operations().add(
        1,
        &[
            KeyValue::new("queue", queue_name.to_string()),
            KeyValue::new("operation", operation),
        ],
    );
}

impl Db {
    /// Create a pgmq queue (idempotent).
    pub async fn create_queue(&self, queue_name: &str) -> Result<()> {
        sqlx::query("SELECT pgmq.create($1)")
            .bind(queue_name)
            .execute(self.pool())
            .await?;
        count(queue_name, "create");
        Ok(())
    }

    /// Send a message. Returns the message ID.
    pub async fn send_to_queue(
        &self,
        queue_name: &str,
        payload: &serde_json::Value,
        delay_seconds: i32,
    ) -> Result<i64> {
        let (msg_id,): (i64,) = sqlx::query_as("SELECT pgmq.send($1, $2, $3)")
            .bind(queue_name)
            .bind(payload)
            .bind(delay_seconds)
            .fetch_one(self.pool())
            .await?;
        count(queue_name, "send");
        Ok(msg_id)
    }

    /// Read the next visible message, hiding it for `vt_seconds`.
    pub async fn read_from_queue(
        &self,
        queue_name: &str,
        vt_seconds: i32,
    ) -> Result<Option<PgmqMessage>> {
        let row = sqlx::query_as::<_, (i64, i32, DateTime<Utc>, serde_json::Value)>(
            "SELECT msg_id, read_ct, enqueued_at, message FROM pgmq.read($1, $2, 1)",
        )
        .bind(queue_name)
        .bind(vt_seconds)
        .fetch_optional(self.pool())
        .await?;

        count(queue_name, if row.is_some() { "read" } else { "read_empty" });
        Ok(row.map(|(msg_id, read_ct, enqueued_at, message)| PgmqMessage {
            msg_id,
            read_ct,
            enqueued_at,
            message,
        }))
    }

    /// Archive a settled message (kept in the archive table for audit).
    pub async fn archive_message(&self, queue_name: &str, msg_id: i64) -> Result<()> {
        sqlx::query("SELECT pgmq.archive($1, $2)")
            .bind(queue_name)
            .bind(msg_id)
            .execute(self.pool())
            .await?;
        count(queue_name, "archive");
        Ok(())
    }

    /// Change a message's visibility timeout. `0` makes it visible now.
    pub async fn set_visibility(&self, queue_name: &str, msg_id: i64, vt_seconds: i32) -> Result<()> {
        sqlx::query("SELECT pgmq.set_vt($1, $2, $3)")
            .bind(queue_name)
            .bind(msg_id)
            .bind(vt_seconds)
            .execute(self.pool())
            .await?;
        count(queue_name, "set_vt");
        Ok(())
    }
}

/// [`EventQueue`] over one pgmq queue.
pub struct PgmqQueue {
    db: Arc<Db>,
    queue_name: String,
    visibility_timeout: i32,
}

impl PgmqQueue {
    pub fn new(db: Arc<Db>, queue_name: impl Into<String>, visibility_timeout: i32) -> Self {
        Self {
            db,
            queue_name: queue_name.into(),
            visibility_timeout,
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }
}

#[async_trait]
impl EventQueue for PgmqQueue {
    async fn publish(&self, event: &Event) -> Result<()> {
        let payload = serde_json::to_value(event)?;
        self.db.send_to_queue(&self.queue_name, &payload, 0).await?;
        Ok(())
    }

    async fn receive(&self) -> Result<Option<QueuedEvent>> {
        loop {
            let Some(msg) = self
                .db
                .read_from_queue(&self.queue_name, self.visibility_timeout)
                .await?
            else {
                return Ok(None);
            };

            match serde_json::from_value::<Event>(msg.message) {
                Ok(event) => {
                    return Ok(Some(QueuedEvent {
                        receipt: msg.msg_id,
                        event,
                    }));
                }
                Err(e) => {
                    // Unparseable payloads would otherwise cycle forever.
                    warn!(msg_id = msg.msg_id, read_ct = msg.read_ct, error = %e, "archiving malformed event");
                    self.db.archive_message(&self.queue_name, msg.msg_id).await?;
                }
            }
        }
    }

    async fn ack(&self, receipt: i64) -> Result<()> {
        self.db.archive_message(&self.queue_name, receipt).await
    }

    async fn retry_later(&self, receipt: i64) -> Result<()> {
        self.db.set_visibility(&self.queue_name, receipt, 0).await
    }
}
