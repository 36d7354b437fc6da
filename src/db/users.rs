//! User repository: users, relationship edges, close friends, preferences,
//! and guest-to-identity aliases.

use super::DbError;
use glimpse_proto::{Preferences, PreferencesPatch, Visibility};
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};

/// A stored user row.
#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub handle: String,
    pub identity_id: Option<i64>,
    pub avatar: Option<String>,
    pub created_at: i64,
    pub last_seen: i64,
}

type UserTuple = (i64, String, Option<i64>, Option<String>, i64, i64);

impl From<UserTuple> for UserRow {
    fn from((id, handle, identity_id, avatar, created_at, last_seen): UserTuple) -> Self {
        Self {
            id,
            handle,
            identity_id,
            avatar,
            created_at,
            last_seen,
        }
    }
}

/// Repository for user state.
pub struct UserRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> UserRepository<'a> {
    /// Create a new user repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Upsert a user on admission. `last_seen` never moves backwards.
    ///
    /// Returns the user's row id.
    pub async fn upsert(
        &self,
        handle: &str,
        identity_id: Option<i64>,
        avatar: Option<&str>,
        now: i64,
    ) -> Result<i64, DbError> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO users (handle, identity_id, avatar, created_at, last_seen)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(handle) DO UPDATE SET
                identity_id = COALESCE(excluded.identity_id, users.identity_id),
                avatar = COALESCE(excluded.avatar, users.avatar),
                last_seen = MAX(users.last_seen, excluded.last_seen)
            RETURNING id
            "#,
        )
        .bind(handle)
        .bind(identity_id)
        .bind(avatar)
        .bind(now)
        .bind(now)
        .fetch_one(self.pool)
        .await?;
        Ok(id)
    }

    /// Look up a user by handle.
    pub async fn by_handle(&self, handle: &str) -> Result<Option<UserRow>, DbError> {
        let row = sqlx::query_as::<_, UserTuple>(
            "SELECT id, handle, identity_id, avatar, created_at, last_seen FROM users WHERE handle = ?",
        )
        .bind(handle)
        .fetch_optional(self.pool)
        .await?;
        Ok(row.map(UserRow::from))
    }

    /// Advance `last_seen` for a handle. Monotonically non-decreasing; a
    /// handle without a row gets one (guests that never hit the upsert path).
    pub async fn touch_last_seen(&self, handle: &str, now: i64) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO users (handle, created_at, last_seen)
            VALUES (?, ?, ?)
            ON CONFLICT(handle) DO UPDATE SET
                last_seen = MAX(users.last_seen, excluded.last_seen)
            "#,
        )
        .bind(handle)
        .bind(now)
        .bind(now)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Flush a batch of coalesced last-seen updates in one transaction.
    pub async fn flush_last_seen(&self, batch: &HashMap<String, i64>) -> Result<(), DbError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for (handle, ts) in batch {
            sqlx::query(
                r#"
                INSERT INTO users (handle, created_at, last_seen)
                VALUES (?, ?, ?)
                ON CONFLICT(handle) DO UPDATE SET
                    last_seen = MAX(users.last_seen, excluded.last_seen)
                "#,
            )
            .bind(handle)
            .bind(ts)
            .bind(ts)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Replace a user's entire follower/following edge set in one transaction.
    pub async fn replace_edges(
        &self,
        user_id: i64,
        followers: &[i64],
        following: &[i64],
    ) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM relationship_edges WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        for related in followers {
            sqlx::query(
                "INSERT OR IGNORE INTO relationship_edges (user_id, related_id, kind) VALUES (?, ?, 'follower')",
            )
            .bind(user_id)
            .bind(related)
            .execute(&mut *tx)
            .await?;
        }
        for related in following {
            sqlx::query(
                "INSERT OR IGNORE INTO relationship_edges (user_id, related_id, kind) VALUES (?, ?, 'following')",
            )
            .bind(user_id)
            .bind(related)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Load one side of a user's edge set.
    pub async fn edges(&self, user_id: i64, kind: &str) -> Result<Vec<i64>, DbError> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT related_id FROM relationship_edges WHERE user_id = ? AND kind = ?",
        )
        .bind(user_id)
        .bind(kind)
        .fetch_all(self.pool)
        .await?;
        Ok(ids)
    }

    /// Add a close friend. Idempotent.
    pub async fn add_close_friend(
        &self,
        user_id: i64,
        friend_id: i64,
        now: i64,
    ) -> Result<(), DbError> {
        sqlx::query(
            "INSERT OR IGNORE INTO close_friends (user_id, friend_id, added_at) VALUES (?, ?, ?)",
        )
        .bind(user_id)
        .bind(friend_id)
        .bind(now)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Remove a close friend. Idempotent.
    pub async fn remove_close_friend(&self, user_id: i64, friend_id: i64) -> Result<(), DbError> {
        sqlx::query("DELETE FROM close_friends WHERE user_id = ? AND friend_id = ?")
            .bind(user_id)
            .bind(friend_id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// The close-friend identity ids a user has pinned.
    pub async fn close_friend_ids(&self, user_id: i64) -> Result<Vec<i64>, DbError> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT friend_id FROM close_friends WHERE user_id = ? ORDER BY friend_id",
        )
        .bind(user_id)
        .fetch_all(self.pool)
        .await?;
        Ok(ids)
    }

    /// The close-friend set of the user owning `handle`, for visibility checks.
    pub async fn close_friend_ids_of_handle(
        &self,
        handle: &str,
    ) -> Result<HashSet<i64>, DbError> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT cf.friend_id FROM close_friends cf
            JOIN users u ON u.id = cf.user_id
            WHERE u.handle = ?
            "#,
        )
        .bind(handle)
        .fetch_all(self.pool)
        .await?;
        Ok(ids.into_iter().collect())
    }

    /// Load preferences for a handle, falling back to permissive defaults.
    pub async fn preferences(&self, handle: &str) -> Result<Preferences, DbError> {
        let row = sqlx::query_as::<_, (String, bool, bool, bool)>(
            r#"
            SELECT visibility, share_project, share_language, share_activity
            FROM preferences WHERE user_handle = ?
            "#,
        )
        .bind(handle)
        .fetch_optional(self.pool)
        .await?;

        Ok(match row {
            Some((visibility, share_project, share_language, share_activity)) => Preferences {
                visibility: visibility.parse().unwrap_or(Visibility::Everyone),
                share_project,
                share_language,
                share_activity,
            },
            None => Preferences::default(),
        })
    }

    /// Persist a preference patch, returning the resulting full record.
    /// Idempotent under identical payloads.
    pub async fn upsert_preferences(
        &self,
        handle: &str,
        patch: &PreferencesPatch,
    ) -> Result<Preferences, DbError> {
        let mut prefs = self.preferences(handle).await?;
        prefs.apply(patch);

        sqlx::query(
            r#"
            INSERT INTO preferences (user_handle, visibility, share_project, share_language, share_activity)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(user_handle) DO UPDATE SET
                visibility = excluded.visibility,
                share_project = excluded.share_project,
                share_language = excluded.share_language,
                share_activity = excluded.share_activity
            "#,
        )
        .bind(handle)
        .bind(prefs.visibility.as_str())
        .bind(prefs.share_project)
        .bind(prefs.share_language)
        .bind(prefs.share_activity)
        .execute(self.pool)
        .await?;

        Ok(prefs)
    }

    /// Record a guest-to-identity alias. Written once; later writes for the
    /// same login are ignored.
    pub async fn create_alias(
        &self,
        provider_login: &str,
        guest_handle: &str,
        identity_id: i64,
        now: i64,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO aliases (provider_login, guest_handle, identity_id, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(provider_login)
        .bind(guest_handle)
        .bind(identity_id)
        .bind(now)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Resolve a handle to its canonical form: a guest handle with an alias
    /// resolves to the provider login; anything else is already canonical.
    /// Idempotent: resolving a resolved handle returns it unchanged.
    pub async fn resolve_handle(&self, handle: &str) -> Result<String, DbError> {
        let login = sqlx::query_scalar::<_, String>(
            "SELECT provider_login FROM aliases WHERE guest_handle = ?",
        )
        .bind(handle)
        .fetch_optional(self.pool)
        .await?;
        Ok(login.unwrap_or_else(|| handle.to_string()))
    }

    /// Alias rows matching any of the given handles on either side. Used to
    /// expand a manual-connection peer list with both handle forms.
    pub async fn alias_forms(
        &self,
        handles: &[String],
    ) -> Result<Vec<(String, String)>, DbError> {
        if handles.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; handles.len()].join(", ");
        let sql = format!(
            "SELECT provider_login, guest_handle FROM aliases \
             WHERE provider_login IN ({placeholders}) OR guest_handle IN ({placeholders})"
        );
        let mut query = sqlx::query_as::<_, (String, String)>(&sql);
        for handle in handles {
            query = query.bind(handle);
        }
        for handle in handles {
            query = query.bind(handle);
        }
        let rows = query.fetch_all(self.pool).await?;
        Ok(rows)
    }

    /// Users whose identity id is in `ids`. Used to map edge sets to handles.
    pub async fn users_by_identity_ids(&self, ids: &[i64]) -> Result<Vec<UserRow>, DbError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT id, handle, identity_id, avatar, created_at, last_seen \
             FROM users WHERE identity_id IN ({placeholders})"
        );
        let mut query = sqlx::query_as::<_, UserTuple>(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(self.pool).await?;
        Ok(rows.into_iter().map(UserRow::from).collect())
    }

    /// Users for an explicit handle list. Handles without rows are skipped.
    pub async fn users_by_handles(&self, handles: &[String]) -> Result<Vec<UserRow>, DbError> {
        if handles.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; handles.len()].join(", ");
        let sql = format!(
            "SELECT id, handle, identity_id, avatar, created_at, last_seen \
             FROM users WHERE handle IN ({placeholders})"
        );
        let mut query = sqlx::query_as::<_, UserTuple>(&sql);
        for handle in handles {
            query = query.bind(handle);
        }
        let rows = query.fetch_all(self.pool).await?;
        Ok(rows.into_iter().map(UserRow::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::db::Database;
    use glimpse_proto::{PreferencesPatch, Visibility};
    use std::collections::HashMap;

    async fn db() -> Database {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.into_temp_path().keep().unwrap();
        Database::new(path.to_str().unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn upsert_preserves_identity_and_advances_last_seen() {
        let db = db().await;
        let id = db
            .users()
            .upsert("alice", Some(42), Some("http://a/alice.png"), 100)
            .await
            .unwrap();

        // Guest-style re-upsert must not erase identity or move last_seen back.
        let id2 = db.users().upsert("alice", None, None, 50).await.unwrap();
        assert_eq!(id, id2);

        let row = db.users().by_handle("alice").await.unwrap().unwrap();
        assert_eq!(row.identity_id, Some(42));
        assert_eq!(row.avatar.as_deref(), Some("http://a/alice.png"));
        assert_eq!(row.last_seen, 100);
    }

    #[tokio::test]
    async fn last_seen_is_monotonic() {
        let db = db().await;
        db.users().touch_last_seen("bob", 200).await.unwrap();
        db.users().touch_last_seen("bob", 150).await.unwrap();
        let row = db.users().by_handle("bob").await.unwrap().unwrap();
        assert_eq!(row.last_seen, 200);

        let mut batch = HashMap::new();
        batch.insert("bob".to_string(), 120);
        db.users().flush_last_seen(&batch).await.unwrap();
        let row = db.users().by_handle("bob").await.unwrap().unwrap();
        assert_eq!(row.last_seen, 200);
    }

    #[tokio::test]
    async fn edge_replacement_is_total() {
        let db = db().await;
        let id = db.users().upsert("alice", Some(1), None, 0).await.unwrap();

        db.users().replace_edges(id, &[10, 11], &[20]).await.unwrap();
        assert_eq!(db.users().edges(id, "follower").await.unwrap().len(), 2);
        assert_eq!(db.users().edges(id, "following").await.unwrap(), vec![20]);

        // A later admission replaces the whole set.
        db.users().replace_edges(id, &[12], &[]).await.unwrap();
        assert_eq!(db.users().edges(id, "follower").await.unwrap(), vec![12]);
        assert!(db.users().edges(id, "following").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn preferences_default_then_patch() {
        let db = db().await;
        let prefs = db.users().preferences("alice").await.unwrap();
        assert_eq!(prefs.visibility, Visibility::Everyone);

        let patch = PreferencesPatch {
            visibility: Some(Visibility::CloseFriends),
            share_project: Some(false),
            ..Default::default()
        };
        let updated = db.users().upsert_preferences("alice", &patch).await.unwrap();
        assert_eq!(updated.visibility, Visibility::CloseFriends);
        assert!(!updated.share_project);
        assert!(updated.share_language);

        // Idempotent under the identical payload.
        let again = db.users().upsert_preferences("alice", &patch).await.unwrap();
        assert_eq!(again, updated);
    }

    #[tokio::test]
    async fn alias_resolution_is_idempotent() {
        let db = db().await;
        db.users().create_alias("alice", "al-guest", 42, 0).await.unwrap();

        assert_eq!(db.users().resolve_handle("al-guest").await.unwrap(), "alice");
        assert_eq!(db.users().resolve_handle("alice").await.unwrap(), "alice");
        assert_eq!(db.users().resolve_handle("stranger").await.unwrap(), "stranger");
    }

    #[tokio::test]
    async fn close_friend_set_round_trip() {
        let db = db().await;
        let id = db.users().upsert("alice", Some(1), None, 0).await.unwrap();
        db.users().add_close_friend(id, 7, 0).await.unwrap();
        db.users().add_close_friend(id, 7, 1).await.unwrap();
        db.users().add_close_friend(id, 9, 2).await.unwrap();
        assert_eq!(db.users().close_friend_ids(id).await.unwrap(), vec![7, 9]);

        db.users().remove_close_friend(id, 7).await.unwrap();
        let set = db.users().close_friend_ids_of_handle("alice").await.unwrap();
        assert!(set.contains(&9) && !set.contains(&7));
    }
}
