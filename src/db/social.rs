//! Social repository: invite codes and manual connections.
//!
//! Manual connection rows are stored as a symmetric pair; every insert and
//! delete touches both directions inside one transaction so the symmetry
//! invariant holds at all times.

use super::DbError;
use sqlx::SqlitePool;

/// A stored invite code.
#[derive(Debug, Clone)]
pub struct InviteRecord {
    pub code: String,
    pub creator: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub used_by: Option<String>,
    pub used_at: Option<i64>,
}

type InviteTuple = (String, String, i64, i64, Option<String>, Option<i64>);

impl From<InviteTuple> for InviteRecord {
    fn from((code, creator, created_at, expires_at, used_by, used_at): InviteTuple) -> Self {
        Self {
            code,
            creator,
            created_at,
            expires_at,
            used_by,
            used_at,
        }
    }
}

/// Why a redemption was refused. The wire reply collapses all of these into
/// one message; the distinction is for logs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Unknown,
    Expired,
    AlreadyUsed,
    SelfInvite,
}

/// Outcome of an invite redemption attempt.
#[derive(Debug, Clone)]
pub enum InviteRedeem {
    /// Code consumed; the symmetric connection now exists.
    Accepted {
        /// Handle of the invite's creator.
        creator: String,
    },
    /// Nothing changed.
    Rejected(RejectReason),
}

/// Repository for invites and manual connections.
pub struct SocialRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SocialRepository<'a> {
    /// Create a new social repository.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Store a freshly minted invite code.
    pub async fn create_invite(
        &self,
        code: &str,
        creator: &str,
        now: i64,
        expires_at: i64,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO invite_codes (code, creator, created_at, expires_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(code)
        .bind(creator)
        .bind(now)
        .bind(expires_at)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Look up an invite by code.
    pub async fn invite(&self, code: &str) -> Result<Option<InviteRecord>, DbError> {
        let row = sqlx::query_as::<_, InviteTuple>(
            "SELECT code, creator, created_at, expires_at, used_by, used_at FROM invite_codes WHERE code = ?",
        )
        .bind(code)
        .fetch_optional(self.pool)
        .await?;
        Ok(row.map(InviteRecord::from))
    }

    /// Atomically redeem an invite: mark it used and insert the symmetric
    /// connection pair. A code transitions `fresh -> redeemed` exactly once;
    /// concurrent redeemers race on the guarded UPDATE and only one wins.
    pub async fn redeem_invite(
        &self,
        code: &str,
        redeemer: &str,
        now: i64,
    ) -> Result<InviteRedeem, DbError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, InviteTuple>(
            "SELECT code, creator, created_at, expires_at, used_by, used_at FROM invite_codes WHERE code = ?",
        )
        .bind(code)
        .fetch_optional(&mut *tx)
        .await?
        .map(InviteRecord::from);

        let Some(invite) = row else {
            return Ok(InviteRedeem::Rejected(RejectReason::Unknown));
        };
        if invite.used_by.is_some() {
            return Ok(InviteRedeem::Rejected(RejectReason::AlreadyUsed));
        }
        if invite.expires_at <= now {
            return Ok(InviteRedeem::Rejected(RejectReason::Expired));
        }
        if invite.creator == redeemer {
            return Ok(InviteRedeem::Rejected(RejectReason::SelfInvite));
        }

        let updated = sqlx::query(
            "UPDATE invite_codes SET used_by = ?, used_at = ? WHERE code = ? AND used_by IS NULL",
        )
        .bind(redeemer)
        .bind(now)
        .bind(code)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() != 1 {
            return Ok(InviteRedeem::Rejected(RejectReason::AlreadyUsed));
        }

        Self::insert_pair(&mut tx, &invite.creator, redeemer, now).await?;
        tx.commit().await?;

        Ok(InviteRedeem::Accepted {
            creator: invite.creator,
        })
    }

    /// Revoke a fresh invite. No-op on redeemed or unknown codes.
    pub async fn revoke_invite(&self, code: &str, creator: &str) -> Result<bool, DbError> {
        let result = sqlx::query(
            "DELETE FROM invite_codes WHERE code = ? AND creator = ? AND used_by IS NULL",
        )
        .bind(code)
        .bind(creator)
        .execute(self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_pair(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        a: &str,
        b: &str,
        now: i64,
    ) -> Result<(), DbError> {
        sqlx::query(
            "INSERT OR IGNORE INTO manual_connections (user1, user2, created_at) VALUES (?, ?, ?)",
        )
        .bind(a)
        .bind(b)
        .bind(now)
        .execute(&mut **tx)
        .await?;
        sqlx::query(
            "INSERT OR IGNORE INTO manual_connections (user1, user2, created_at) VALUES (?, ?, ?)",
        )
        .bind(b)
        .bind(a)
        .bind(now)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Remove a manual connection; both rows go in one transaction.
    /// Returns whether a connection existed.
    pub async fn remove_connection(&self, a: &str, b: &str) -> Result<bool, DbError> {
        let mut tx = self.pool.begin().await?;
        let first = sqlx::query("DELETE FROM manual_connections WHERE user1 = ? AND user2 = ?")
            .bind(a)
            .bind(b)
            .execute(&mut *tx)
            .await?;
        let second = sqlx::query("DELETE FROM manual_connections WHERE user1 = ? AND user2 = ?")
            .bind(b)
            .bind(a)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(first.rows_affected() + second.rows_affected() > 0)
    }

    /// Whether a manual connection exists between two handles, in either
    /// direction. Rows are symmetric so one direction suffices, but both are
    /// checked to stay correct mid-transition.
    pub async fn is_connected(&self, a: &str, b: &str) -> Result<bool, DbError> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM manual_connections
            WHERE (user1 = ? AND user2 = ?) OR (user1 = ? AND user2 = ?)
            "#,
        )
        .bind(a)
        .bind(b)
        .bind(b)
        .bind(a)
        .fetch_one(self.pool)
        .await?;
        Ok(count > 0)
    }

    /// Every peer manually connected to any of the given handles (a user's
    /// raw and resolved handles during the alias transition window).
    pub async fn peers_of(&self, handles: &[&str]) -> Result<Vec<String>, DbError> {
        if handles.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; handles.len()].join(", ");
        let sql = format!(
            "SELECT DISTINCT user2 FROM manual_connections WHERE user1 IN ({placeholders})"
        );
        let mut query = sqlx::query_scalar::<_, String>(&sql);
        for handle in handles {
            query = query.bind(handle);
        }
        let peers = query.fetch_all(self.pool).await?;
        Ok(peers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn db() -> Database {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.into_temp_path().keep().unwrap();
        Database::new(path.to_str().unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn redeem_establishes_symmetric_pair_once() {
        let db = db().await;
        db.social().create_invite("XYZ123", "alice", 100, 1000).await.unwrap();

        let outcome = db.social().redeem_invite("XYZ123", "bob", 200).await.unwrap();
        assert!(matches!(outcome, InviteRedeem::Accepted { ref creator } if creator == "alice"));
        assert!(db.social().is_connected("alice", "bob").await.unwrap());
        assert!(db.social().is_connected("bob", "alice").await.unwrap());

        let invite = db.social().invite("XYZ123").await.unwrap().unwrap();
        assert_eq!(invite.used_by.as_deref(), Some("bob"));
        assert!(invite.used_at.unwrap() >= invite.created_at);

        // Second attempt is a no-op failure.
        let again = db.social().redeem_invite("XYZ123", "carol", 300).await.unwrap();
        assert!(matches!(
            again,
            InviteRedeem::Rejected(RejectReason::AlreadyUsed)
        ));
        assert!(!db.social().is_connected("alice", "carol").await.unwrap());
    }

    #[tokio::test]
    async fn expired_and_self_invites_are_rejected() {
        let db = db().await;
        db.social().create_invite("DEAD00", "alice", 100, 150).await.unwrap();
        let outcome = db.social().redeem_invite("DEAD00", "bob", 150).await.unwrap();
        assert!(matches!(
            outcome,
            InviteRedeem::Rejected(RejectReason::Expired)
        ));

        db.social().create_invite("SELF00", "alice", 100, 9000).await.unwrap();
        let outcome = db.social().redeem_invite("SELF00", "alice", 200).await.unwrap();
        assert!(matches!(
            outcome,
            InviteRedeem::Rejected(RejectReason::SelfInvite)
        ));

        let outcome = db.social().redeem_invite("NOPE99", "bob", 200).await.unwrap();
        assert!(matches!(
            outcome,
            InviteRedeem::Rejected(RejectReason::Unknown)
        ));
    }

    #[tokio::test]
    async fn remove_deletes_both_rows() {
        let db = db().await;
        db.social().create_invite("PAIR01", "alice", 0, 9000).await.unwrap();
        db.social().redeem_invite("PAIR01", "bob", 1).await.unwrap();

        assert!(db.social().remove_connection("bob", "alice").await.unwrap());
        assert!(!db.social().is_connected("alice", "bob").await.unwrap());
        assert!(!db.social().is_connected("bob", "alice").await.unwrap());

        // Removing again reports nothing to remove.
        assert!(!db.social().remove_connection("bob", "alice").await.unwrap());
    }

    #[tokio::test]
    async fn reinvite_after_removal_restores_the_same_state() {
        let db = db().await;
        db.social().create_invite("AAA111", "alice", 0, 9000).await.unwrap();
        db.social().redeem_invite("AAA111", "bob", 1).await.unwrap();
        db.social().remove_connection("alice", "bob").await.unwrap();

        db.social().create_invite("BBB222", "alice", 2, 9000).await.unwrap();
        db.social().redeem_invite("BBB222", "bob", 3).await.unwrap();
        assert!(db.social().is_connected("alice", "bob").await.unwrap());
        assert!(db.social().is_connected("bob", "alice").await.unwrap());
    }

    #[tokio::test]
    async fn peers_of_covers_raw_and_resolved_handles() {
        let db = db().await;
        db.social().create_invite("GUEST1", "al-guest", 0, 9000).await.unwrap();
        db.social().redeem_invite("GUEST1", "bob", 1).await.unwrap();

        let peers = db.social().peers_of(&["alice", "al-guest"]).await.unwrap();
        assert_eq!(peers, vec!["bob".to_string()]);
    }
}
