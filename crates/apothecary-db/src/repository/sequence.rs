//! # Sequence Repository
//!
//! Day-scoped counters behind transaction numbers.
//!
//! ## Atomic Increment
//! ```text
//! INSERT INTO sequence_counters (key, value) VALUES ('txn-20260314', 1)
//! ON CONFLICT(key) DO UPDATE SET value = value + 1
//! RETURNING value
//! ```
//! One statement, so two requests racing on the same day each get their own
//! value without any in-process lock. Values are never handed out twice.

use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;

/// Repository for sequence counters.
#[derive(Debug, Clone)]
pub struct SequenceRepository {
    pool: SqlitePool,
}

impl SequenceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SequenceRepository { pool }
    }

    /// Issues the next value for `key`, starting at 1.
    pub async fn next_value(&self, key: &str) -> DbResult<i64> {
        let value: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO sequence_counters (key, value) VALUES (?1, 1)
            ON CONFLICT(key) DO UPDATE SET value = value + 1
            RETURNING value
            "#,
        )
        .bind(key)
        .fetch_one(&self.pool)
        .await?;

        debug!(key = %key, value = value, "Sequence value issued");
        Ok(value)
    }

    /// Last issued value for `key`, 0 if none.
    pub async fn current_value(&self, key: &str) -> DbResult<i64> {
        let value: Option<i64> =
            sqlx::query_scalar("SELECT value FROM sequence_counters WHERE key = ?1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(value.unwrap_or(0))
    }
}
