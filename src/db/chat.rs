//! Chat repository: append-only 1:1 messages with read marks.

use super::DbError;
use glimpse_proto::ChatMessageWire;
use sqlx::SqlitePool;
use std::collections::HashMap;

/// Repository for chat messages.
pub struct ChatRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ChatRepository<'a> {
    /// Create a new chat repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a message, returning it with its server-assigned id.
    pub async fn append(
        &self,
        from: &str,
        to: &str,
        body: &str,
        now: i64,
    ) -> Result<ChatMessageWire, DbError> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO chat_messages (from_handle, to_handle, body, created_at)
            VALUES (?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(from)
        .bind(to)
        .bind(body)
        .bind(now)
        .fetch_one(self.pool)
        .await?;

        Ok(ChatMessageWire {
            id,
            from: from.to_string(),
            to: to.to_string(),
            body: body.to_string(),
            created_at: now,
            read_at: None,
        })
    }

    /// The most recent `limit` messages between two handles, chronological.
    pub async fn history(
        &self,
        a: &str,
        b: &str,
        limit: u32,
    ) -> Result<Vec<ChatMessageWire>, DbError> {
        let rows = sqlx::query_as::<_, (i64, String, String, String, i64, Option<i64>)>(
            r#"
            SELECT id, from_handle, to_handle, body, created_at, read_at
            FROM chat_messages
            WHERE (from_handle = ? AND to_handle = ?) OR (from_handle = ? AND to_handle = ?)
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(a)
        .bind(b)
        .bind(b)
        .bind(a)
        .bind(limit)
        .fetch_all(self.pool)
        .await?;

        let mut messages: Vec<ChatMessageWire> = rows
            .into_iter()
            .map(|(id, from, to, body, created_at, read_at)| ChatMessageWire {
                id,
                from,
                to,
                body,
                created_at,
                read_at,
            })
            .collect();
        messages.reverse();
        Ok(messages)
    }

    /// Stamp `read_at` on every unread message from `peer` to `reader`.
    /// Returns how many were stamped.
    pub async fn mark_read(&self, reader: &str, peer: &str, now: i64) -> Result<u64, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE chat_messages SET read_at = ?
            WHERE from_handle = ? AND to_handle = ? AND read_at IS NULL
            "#,
        )
        .bind(now)
        .bind(peer)
        .bind(reader)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Unread message counts for `reader`, keyed by sending peer.
    pub async fn unread_counts(&self, reader: &str) -> Result<HashMap<String, i64>, DbError> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT from_handle, COUNT(*) FROM chat_messages
            WHERE to_handle = ? AND read_at IS NULL
            GROUP BY from_handle
            "#,
        )
        .bind(reader)
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }
}
