//! CRUD and session-counter operations for [`User`] records.
//!
//! The online-session counter is only ever mutated through the atomic
//! `begin_session` / `end_session` helpers below; handler code must never
//! read-modify-write it, or concurrent connects would lose updates.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::User;

impl Database {
    /// Insert a new user.
    pub fn insert_user(&self, user: &User) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO users (id, name, created_at, last_active_at, online_sessions)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    user.id.to_string(),
                    user.name,
                    user.created_at.to_rfc3339(),
                    user.last_active_at.to_rfc3339(),
                    user.online_sessions,
                ],
            )
            .map_err(StoreError::from_sqlite)?;
        Ok(())
    }

    /// Fetch a single user by UUID.
    pub fn get_user(&self, id: Uuid) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, name, created_at, last_active_at, online_sessions
                 FROM users WHERE id = ?1",
                params![id.to_string()],
                row_to_user,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Atomically increment the user's session counter and refresh
    /// `last_active_at`.  Returns the new counter value.
    pub fn begin_session(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<i64> {
        self.conn()
            .query_row(
                "UPDATE users
                 SET online_sessions = online_sessions + 1, last_active_at = ?2
                 WHERE id = ?1
                 RETURNING online_sessions",
                params![user_id.to_string(), now.to_rfc3339()],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Atomically decrement the user's session counter, clamping at zero,
    /// and refresh `last_active_at`.  Returns the new counter value.
    pub fn end_session(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<i64> {
        self.conn()
            .query_row(
                "UPDATE users
                 SET online_sessions = MAX(online_sessions - 1, 0), last_active_at = ?2
                 WHERE id = ?1
                 RETURNING online_sessions",
                params![user_id.to_string(), now.to_rfc3339()],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Refresh `last_active_at` without touching the session counter.
    /// Used by the idle-liveness ping.
    pub fn touch_last_active(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "UPDATE users SET last_active_at = ?2 WHERE id = ?1",
            params![user_id.to_string(), now.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Authoritative presence read for stateless (HTTP) callers: a user is
    /// online iff their persisted session counter is positive.
    pub fn is_user_online(&self, user_id: Uuid) -> Result<bool> {
        let sessions: i64 = self
            .conn()
            .query_row(
                "SELECT online_sessions FROM users WHERE id = ?1",
                params![user_id.to_string()],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })?;
        Ok(sessions > 0)
    }

    /// Zero every session counter.  Called once at server start: a fresh
    /// process has no live sockets, so any non-zero counter is residue from
    /// an unclean shutdown.
    pub fn reset_all_sessions(&self) -> Result<usize> {
        let affected = self
            .conn()
            .execute("UPDATE users SET online_sessions = 0 WHERE online_sessions != 0", [])?;
        Ok(affected)
    }
}

/// Map a `rusqlite::Row` to a [`User`].
fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id_str: String = row.get(0)?;
    let name: String = row.get(1)?;
    let created_str: String = row.get(2)?;
    let active_str: String = row.get(3)?;
    let online_sessions: i64 = row.get(4)?;

    Ok(User {
        id: parse_uuid(&id_str, 0)?,
        name,
        created_at: parse_ts(&created_str, 2)?,
        last_active_at: parse_ts(&active_str, 3)?,
        online_sessions,
    })
}

pub(crate) fn parse_uuid(s: &str, col: usize) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn parse_ts(s: &str, col: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_user(name: &str) -> User {
        User {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: Utc::now(),
            last_active_at: Utc::now(),
            online_sessions: 0,
        }
    }

    #[test]
    fn insert_and_fetch() {
        let db = Database::open_in_memory().unwrap();
        let user = test_user("alice");
        db.insert_user(&user).unwrap();

        let fetched = db.get_user(user.id).unwrap();
        assert_eq!(fetched.name, "alice");
        assert_eq!(fetched.online_sessions, 0);
        assert!(!fetched.is_online());
    }

    #[test]
    fn session_counter_is_monotonic_and_clamped() {
        let db = Database::open_in_memory().unwrap();
        let user = test_user("bob");
        db.insert_user(&user).unwrap();

        assert_eq!(db.begin_session(user.id, Utc::now()).unwrap(), 1);
        assert_eq!(db.begin_session(user.id, Utc::now()).unwrap(), 2);
        assert!(db.is_user_online(user.id).unwrap());

        assert_eq!(db.end_session(user.id, Utc::now()).unwrap(), 1);
        assert_eq!(db.end_session(user.id, Utc::now()).unwrap(), 0);
        // Extra decrement must clamp, never go negative.
        assert_eq!(db.end_session(user.id, Utc::now()).unwrap(), 0);
        assert!(!db.is_user_online(user.id).unwrap());
    }

    #[test]
    fn missing_user_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.begin_session(Uuid::new_v4(), Utc::now()),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn reset_zeroes_stale_counters() {
        let db = Database::open_in_memory().unwrap();
        let user = test_user("carol");
        db.insert_user(&user).unwrap();
        db.begin_session(user.id, Utc::now()).unwrap();

        assert_eq!(db.reset_all_sessions().unwrap(), 1);
        assert!(!db.is_user_online(user.id).unwrap());
    }

    #[test]
    fn touch_updates_last_active_only() {
        let db = Database::open_in_memory().unwrap();
        let user = test_user("dave");
        db.insert_user(&user).unwrap();

        let later = Utc::now() + chrono::Duration::seconds(30);
        db.touch_last_active(user.id, later).unwrap();

        let fetched = db.get_user(user.id).unwrap();
        assert_eq!(fetched.online_sessions, 0);
        assert!(fetched.last_active_at > user.last_active_at);
    }
}
