//! The directed block graph.
//!
//! Storage is directional (`blocked_by -> blocked_user`) but the predicate
//! used on the delivery hot path is symmetric: a message is suppressed when
//! either endpoint has blocked the other.  Both queries are point lookups on
//! the primary key or its reverse index.

use chrono::Utc;
use rusqlite::params;
use std::collections::HashSet;
use uuid::Uuid;

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Record a block edge.  Blocking twice is a no-op.
    pub fn block_user(&self, blocked_by: Uuid, blocked_user: Uuid) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO blocked_users (blocked_by, blocked_user, created_at)
             VALUES (?1, ?2, ?3)",
            params![
                blocked_by.to_string(),
                blocked_user.to_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Remove a block edge.  Returns `true` if a row was deleted.
    pub fn unblock_user(&self, blocked_by: Uuid, blocked_user: Uuid) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM blocked_users WHERE blocked_by = ?1 AND blocked_user = ?2",
            params![blocked_by.to_string(), blocked_user.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// The symmetric visibility predicate: true when either user has blocked
    /// the other.
    pub fn is_blocked_mutual(&self, a: Uuid, b: Uuid) -> Result<bool> {
        let exists: i64 = self.conn().query_row(
            "SELECT EXISTS(
                 SELECT 1 FROM blocked_users
                 WHERE (blocked_by = ?1 AND blocked_user = ?2)
                    OR (blocked_by = ?2 AND blocked_user = ?1)
             )",
            params![a.to_string(), b.to_string()],
            |row| row.get(0),
        )?;
        Ok(exists != 0)
    }

    /// Every user the given user is mutually blocked with, in either
    /// direction.  Used to filter history reads in one pass.
    pub fn blocked_partners(&self, user_id: Uuid) -> Result<HashSet<Uuid>> {
        let mut stmt = self.conn().prepare(
            "SELECT blocked_user FROM blocked_users WHERE blocked_by = ?1
             UNION
             SELECT blocked_by FROM blocked_users WHERE blocked_user = ?1",
        )?;

        let rows = stmt.query_map(params![user_id.to_string()], |row| {
            let id_str: String = row.get(0)?;
            crate::users::parse_uuid(&id_str, 0)
        })?;

        let mut partners = HashSet::new();
        for row in rows {
            partners.insert(row?);
        }
        Ok(partners)
    }
}
