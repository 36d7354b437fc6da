//! Database module for persistent storage.
//!
//! Provides async SQLite database access using SQLx for:
//! - Users, relationship edges, close friends, and visibility preferences
//! - Invite codes and manual connections
//! - Guest-to-identity aliases
//! - Chat messages with read marks

mod chat;
mod social;
mod users;

pub use chat::ChatRepository;
pub use social::{InviteRecord, InviteRedeem, RejectReason, SocialRepository};
pub use users::{UserRepository, UserRow};

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("user not found: {0}")]
    UserNotFound(String),
}

/// Database handle with connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connection acquire timeout - prevents connection storms from blocking indefinitely.
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Maximum time a connection can remain idle before being closed.
    const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Create a new database connection, running migrations if needed.
    pub async fn new(path: &str) -> Result<Self, DbError> {
        let pool = if path == ":memory:" {
            // In-memory database with shared cache for pool compatibility.
            let options = SqliteConnectOptions::new()
                .filename("file::memory:")
                .shared_cache(true)
                .create_if_missing(true);

            SqlitePoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .test_before_acquire(true)
                .connect_with(options)
                .await?
        } else {
            if let Some(parent) = Path::new(path).parent()
                && !parent.as_os_str().is_empty()
                && let Err(e) = std::fs::create_dir_all(parent)
            {
                tracing::warn!(path = %parent.display(), error = %e, "Failed to create database directory");
            }

            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true);

            SqlitePoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .test_before_acquire(true)
                .connect_with(options)
                .await?
        };

        info!(path = %path, "Database connected");

        Self::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Get reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Users, edges, close friends, preferences, and aliases.
    pub fn users(&self) -> UserRepository<'_> {
        UserRepository::new(&self.pool)
    }

    /// Invite codes and manual connections.
    pub fn social(&self) -> SocialRepository<'_> {
        SocialRepository::new(&self.pool)
    }

    /// Chat messages and read marks.
    pub fn chat(&self) -> ChatRepository<'_> {
        ChatRepository::new(&self.pool)
    }

    /// Run embedded migrations. Every statement is idempotent.
    async fn run_migrations(pool: &SqlitePool) -> Result<(), DbError> {
        const MIGRATIONS: &[&str] = &[
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY,
                handle TEXT NOT NULL UNIQUE,
                identity_id INTEGER,
                avatar TEXT,
                created_at INTEGER NOT NULL,
                last_seen INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS relationship_edges (
                user_id INTEGER NOT NULL,
                related_id INTEGER NOT NULL,
                kind TEXT NOT NULL CHECK (kind IN ('follower', 'following')),
                PRIMARY KEY (user_id, related_id, kind)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_edges_user_kind ON relationship_edges (user_id, kind)",
            r#"
            CREATE TABLE IF NOT EXISTS close_friends (
                user_id INTEGER NOT NULL,
                friend_id INTEGER NOT NULL,
                added_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, friend_id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS manual_connections (
                user1 TEXT NOT NULL,
                user2 TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (user1, user2)
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_connections_user1 ON manual_connections (user1)",
            r#"
            CREATE TABLE IF NOT EXISTS invite_codes (
                code TEXT PRIMARY KEY,
                creator TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                used_by TEXT,
                used_at INTEGER
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_invites_creator ON invite_codes (creator)",
            r#"
            CREATE TABLE IF NOT EXISTS aliases (
                provider_login TEXT PRIMARY KEY,
                guest_handle TEXT NOT NULL,
                identity_id INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_aliases_guest ON aliases (guest_handle)",
            r#"
            CREATE TABLE IF NOT EXISTS preferences (
                user_handle TEXT PRIMARY KEY,
                visibility TEXT NOT NULL DEFAULT 'everyone',
                share_project INTEGER NOT NULL DEFAULT 1,
                share_language INTEGER NOT NULL DEFAULT 1,
                share_activity INTEGER NOT NULL DEFAULT 1
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS chat_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                from_handle TEXT NOT NULL,
                to_handle TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                read_at INTEGER
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_chat_unread ON chat_messages (to_handle, read_at)",
            "CREATE INDEX IF NOT EXISTS idx_chat_pair ON chat_messages (from_handle, to_handle, created_at)",
        ];

        for statement in MIGRATIONS {
            sqlx::query(statement).execute(pool).await?;
        }

        Ok(())
    }
}
