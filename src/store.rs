//! Durable message log backed by SQLite.
//!
//! The log owns ordering: `id` and `created_at` are assigned at append time,
//! and reads within a room are ordered by `(created_at, id)` so same-second
//! appends still come back in insert order.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::error::AppResult;

pub const DEFAULT_ROOM: &str = "general";
pub const HISTORY_LIMIT: i64 = 50;

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct StoredMessage {
    pub id: i64,
    pub username: String,
    pub content: String,
    pub room: String,
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct MessageLog {
    pool: SqlitePool,
}

impl MessageLog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> AppResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS messages (
                 id         INTEGER PRIMARY KEY AUTOINCREMENT,
                 username   TEXT NOT NULL,
                 content    TEXT NOT NULL,
                 room       TEXT NOT NULL DEFAULT 'general',
                 created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
             )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_room_created_at
                 ON messages (room, created_at)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn append(&self, username: &str, content: &str, room: &str) -> AppResult<StoredMessage> {
        let message: StoredMessage = sqlx::query_as(
            "INSERT INTO messages (username, content, room) VALUES (?, ?, ?)
             RETURNING id, username, content, room, created_at",
        )
        .bind(username)
        .bind(content)
        .bind(room)
        .fetch_one(&self.pool)
        .await?;
        Ok(message)
    }

    pub async fn fetch_ascending(&self, room: &str) -> AppResult<Vec<StoredMessage>> {
        let messages = sqlx::query_as(
            "SELECT id, username, content, room, created_at FROM messages
             WHERE room = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(room)
        .fetch_all(&self.pool)
        .await?;
        Ok(messages)
    }

    /// Last `limit` messages of a room, returned oldest first. Fetching the
    /// descending suffix and reversing bounds the scan to the tail.
    pub async fn fetch_recent(&self, room: &str, limit: i64) -> AppResult<Vec<StoredMessage>> {
        let mut messages: Vec<StoredMessage> = sqlx::query_as(
            "SELECT id, username, content, room, created_at FROM messages
             WHERE room = ? ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(room)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        messages.reverse();
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_log() -> MessageLog {
        // one connection, or each pool checkout would see its own :memory: db
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let log = MessageLog::new(pool);
        log.migrate().await.unwrap();
        log
    }

    #[tokio::test]
    async fn append_preserves_send_order() {
        let log = test_log().await;
        for content in ["m1", "m2", "m3"] {
            log.append("alice", content, DEFAULT_ROOM).await.unwrap();
        }

        let messages = log.fetch_ascending(DEFAULT_ROOM).await.unwrap();
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["m1", "m2", "m3"]);
        assert!(messages.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[tokio::test]
    async fn fetch_ascending_partitions_by_room() {
        let log = test_log().await;
        log.append("alice", "general talk", DEFAULT_ROOM).await.unwrap();
        log.append("alice", "dm talk", "dm:alice:bob").await.unwrap();

        let general = log.fetch_ascending(DEFAULT_ROOM).await.unwrap();
        assert_eq!(general.len(), 1);
        assert_eq!(general[0].content, "general talk");
    }

    #[tokio::test]
    async fn fetch_recent_bounds_to_the_newest_ascending() {
        let log = test_log().await;
        for i in 1..=120 {
            log.append("alice", &format!("msg {i}"), DEFAULT_ROOM).await.unwrap();
        }

        let recent = log.fetch_recent(DEFAULT_ROOM, HISTORY_LIMIT).await.unwrap();
        assert_eq!(recent.len(), 50);
        assert_eq!(recent.first().unwrap().content, "msg 71");
        assert_eq!(recent.last().unwrap().content, "msg 120");
        assert!(recent.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[tokio::test]
    async fn fetch_recent_returns_everything_when_short() {
        let log = test_log().await;
        log.append("alice", "only one", DEFAULT_ROOM).await.unwrap();
        let recent = log.fetch_recent(DEFAULT_ROOM, HISTORY_LIMIT).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert!(log.fetch_recent("empty-room", HISTORY_LIMIT).await.unwrap().is_empty());
    }
}
