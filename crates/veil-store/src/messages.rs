//! CRUD and expiration operations for [`Message`] records.
//!
//! Two deletion paths coexist on purpose: the expiration sweep only flags
//! rows (`auto_delete_is_deleted`), preserving a permanent audit trail,
//! while a sender-initiated delete physically removes the row.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{AutoDelete, Message};
use crate::users::{parse_ts, parse_uuid};

/// History reads cap at the most recent rows.
const HISTORY_LIMIT: u32 = 100;

impl Database {
    /// Persist a new message.
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO messages (
                     id, group_id, sender_id, sender_name, content, edited,
                     is_file, file_name, file_content, file_size,
                     auto_delete_enabled, auto_delete_after_secs,
                     auto_delete_expires_at, auto_delete_is_deleted,
                     auto_delete_deleted_at, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    message.id.to_string(),
                    message.group_id.to_string(),
                    message.sender_id.to_string(),
                    message.sender_name,
                    message.content,
                    message.edited,
                    message.is_file,
                    message.file_name,
                    message.file_content,
                    message.file_size,
                    message.auto_delete.enabled,
                    message.auto_delete.delete_after_secs,
                    message.auto_delete.expires_at.map(|t| t.to_rfc3339()),
                    message.auto_delete.is_deleted,
                    message.auto_delete.deleted_at.map(|t| t.to_rfc3339()),
                    message.created_at.to_rfc3339(),
                ],
            )
            .map_err(StoreError::from_sqlite)?;
        Ok(())
    }

    /// Fetch a single message by UUID, tombstoned or not.
    pub fn get_message(&self, id: Uuid) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// A group's visible history in chronological order: soft-deleted rows
    /// are excluded, and only the newest [`HISTORY_LIMIT`] rows are returned.
    pub fn messages_for_group(&self, group_id: Uuid) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM (
                 SELECT * FROM messages
                 WHERE group_id = ?1 AND auto_delete_is_deleted = 0
                 ORDER BY created_at DESC
                 LIMIT ?2
             ) ORDER BY created_at ASC"
        ))?;

        let rows = stmt.query_map(params![group_id.to_string(), HISTORY_LIMIT], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Replace a message's content and flag it as edited.
    pub fn edit_message_content(&self, id: Uuid, content: &str) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE messages SET content = ?2, edited = 1 WHERE id = ?1",
            params![id.to_string(), content],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Physically remove a message (sender-initiated delete).  Returns `true`
    /// if a row was deleted.
    pub fn delete_message(&self, id: Uuid) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM messages WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Expiration sweep
    // ------------------------------------------------------------------

    /// Auto-delete messages whose expiry has passed but which have not been
    /// tombstoned yet.  Returns `(message_id, group_id)` pairs.
    pub fn find_expired_messages(&self, now: DateTime<Utc>) -> Result<Vec<(Uuid, Uuid)>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, group_id FROM messages
             WHERE auto_delete_enabled = 1
               AND auto_delete_is_deleted = 0
               AND auto_delete_expires_at <= ?1",
        )?;

        let rows = stmt.query_map(params![now.to_rfc3339()], |row| {
            let id_str: String = row.get(0)?;
            let group_str: String = row.get(1)?;
            Ok((parse_uuid(&id_str, 0)?, parse_uuid(&group_str, 1)?))
        })?;

        let mut expired = Vec::new();
        for row in rows {
            expired.push(row?);
        }
        Ok(expired)
    }

    /// Tombstone the given messages in a single batch update.  Rows already
    /// tombstoned are left untouched, which keeps the sweep idempotent.
    pub fn mark_messages_deleted(&self, ids: &[Uuid], now: DateTime<Utc>) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let placeholders: Vec<String> = (0..ids.len()).map(|i| format!("?{}", i + 2)).collect();
        let sql = format!(
            "UPDATE messages
             SET auto_delete_is_deleted = 1, auto_delete_deleted_at = ?1
             WHERE auto_delete_is_deleted = 0 AND id IN ({})",
            placeholders.join(", ")
        );

        let mut values: Vec<String> = Vec::with_capacity(ids.len() + 1);
        values.push(now.to_rfc3339());
        values.extend(ids.iter().map(|id| id.to_string()));

        let affected = self
            .conn()
            .execute(&sql, rusqlite::params_from_iter(values.iter()))?;
        Ok(affected)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const MESSAGE_COLUMNS: &str = "id, group_id, sender_id, sender_name, content, edited, \
     is_file, file_name, file_content, file_size, \
     auto_delete_enabled, auto_delete_after_secs, auto_delete_expires_at, \
     auto_delete_is_deleted, auto_delete_deleted_at, created_at";

/// Map a `rusqlite::Row` to a [`Message`].
fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let group_str: String = row.get(1)?;
    let sender_str: String = row.get(2)?;
    let expires_str: Option<String> = row.get(12)?;
    let deleted_str: Option<String> = row.get(14)?;
    let created_str: String = row.get(15)?;

    let expires_at = expires_str.as_deref().map(|s| parse_ts(s, 12)).transpose()?;
    let deleted_at = deleted_str.as_deref().map(|s| parse_ts(s, 14)).transpose()?;

    Ok(Message {
        id: parse_uuid(&id_str, 0)?,
        group_id: parse_uuid(&group_str, 1)?,
        sender_id: parse_uuid(&sender_str, 2)?,
        sender_name: row.get(3)?,
        content: row.get(4)?,
        edited: row.get(5)?,
        is_file: row.get(6)?,
        file_name: row.get(7)?,
        file_content: row.get(8)?,
        file_size: row.get(9)?,
        auto_delete: AutoDelete {
            enabled: row.get(10)?,
            delete_after_secs: row.get(11)?,
            expires_at,
            is_deleted: row.get(13)?,
            deleted_at,
        },
        created_at: parse_ts(&created_str, 15)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Group, User};
    use chrono::Duration;
    use veil_shared::Theme;

    fn seed(db: &Database) -> (Uuid, Uuid) {
        let user = User {
            id: Uuid::new_v4(),
            name: "alice".into(),
            created_at: Utc::now(),
            last_active_at: Utc::now(),
            online_sessions: 0,
        };
        db.insert_user(&user).unwrap();
        let group = Group {
            id: Uuid::new_v4(),
            name: "night owls".into(),
            code: "AB12CD".into(),
            description: String::new(),
            created_by: user.id,
            theme: Theme::Default,
            created_at: Utc::now(),
        };
        db.insert_group(&group).unwrap();
        (group.id, user.id)
    }

    fn test_message(group_id: Uuid, sender_id: Uuid, content: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            group_id,
            sender_id,
            sender_name: "Silent Raven 7".into(),
            content: content.into(),
            edited: false,
            is_file: false,
            file_name: None,
            file_content: None,
            file_size: None,
            auto_delete: AutoDelete::default(),
            created_at: Utc::now(),
        }
    }

    fn expiring_message(group_id: Uuid, sender_id: Uuid, expires_at: DateTime<Utc>) -> Message {
        let mut msg = test_message(group_id, sender_id, "going soon");
        msg.auto_delete = AutoDelete {
            enabled: true,
            delete_after_secs: Some(1),
            expires_at: Some(expires_at),
            is_deleted: false,
            deleted_at: None,
        };
        msg
    }

    #[test]
    fn insert_and_fetch_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let (group_id, sender_id) = seed(&db);

        let msg = test_message(group_id, sender_id, "hello");
        db.insert_message(&msg).unwrap();

        let fetched = db.get_message(msg.id).unwrap();
        assert_eq!(fetched, msg);
    }

    #[test]
    fn history_excludes_tombstoned_rows() {
        let db = Database::open_in_memory().unwrap();
        let (group_id, sender_id) = seed(&db);
        let now = Utc::now();

        let keep = test_message(group_id, sender_id, "stays");
        let gone = expiring_message(group_id, sender_id, now - Duration::seconds(5));
        db.insert_message(&keep).unwrap();
        db.insert_message(&gone).unwrap();

        db.mark_messages_deleted(&[gone.id], now).unwrap();

        let history = db.messages_for_group(group_id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, keep.id);

        // The tombstoned row is still retrievable directly.
        let tombstoned = db.get_message(gone.id).unwrap();
        assert!(tombstoned.auto_delete.is_deleted);
        assert!(tombstoned.auto_delete.deleted_at.is_some());
    }

    #[test]
    fn expired_selection_and_batch_mark_are_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let (group_id, sender_id) = seed(&db);
        let now = Utc::now();

        let expired = expiring_message(group_id, sender_id, now - Duration::seconds(30));
        let pending = expiring_message(group_id, sender_id, now + Duration::seconds(3600));
        let plain = test_message(group_id, sender_id, "no expiry");
        db.insert_message(&expired).unwrap();
        db.insert_message(&pending).unwrap();
        db.insert_message(&plain).unwrap();

        let found = db.find_expired_messages(now).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, expired.id);

        assert_eq!(db.mark_messages_deleted(&[expired.id], now).unwrap(), 1);

        // Second pass selects nothing and marks nothing.
        assert!(db.find_expired_messages(now).unwrap().is_empty());
        assert_eq!(db.mark_messages_deleted(&[expired.id], now).unwrap(), 0);
    }

    #[test]
    fn edit_flags_and_replaces_content() {
        let db = Database::open_in_memory().unwrap();
        let (group_id, sender_id) = seed(&db);
        let msg = test_message(group_id, sender_id, "tpyo");
        db.insert_message(&msg).unwrap();

        db.edit_message_content(msg.id, "typo").unwrap();

        let fetched = db.get_message(msg.id).unwrap();
        assert_eq!(fetched.content, "typo");
        assert!(fetched.edited);
    }

    #[test]
    fn physical_delete_removes_the_row() {
        let db = Database::open_in_memory().unwrap();
        let (group_id, sender_id) = seed(&db);
        let msg = test_message(group_id, sender_id, "bye");
        db.insert_message(&msg).unwrap();

        assert!(db.delete_message(msg.id).unwrap());
        assert!(matches!(db.get_message(msg.id), Err(StoreError::NotFound)));
        assert!(!db.delete_message(msg.id).unwrap());
    }
}
