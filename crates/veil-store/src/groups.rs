//! CRUD operations for [`Group`] records, memberships, and removal records.

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use veil_shared::Theme;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Group, Member, MemberProfile, RemovedUser};
use crate::users::{parse_ts, parse_uuid};

impl Database {
    // ------------------------------------------------------------------
    // Groups
    // ------------------------------------------------------------------

    /// Insert a new group.  Fails with [`StoreError::Conflict`] if the join
    /// code is already taken.
    pub fn insert_group(&self, group: &Group) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO groups (id, name, code, description, created_by, theme, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    group.id.to_string(),
                    group.name,
                    group.code,
                    group.description,
                    group.created_by.to_string(),
                    group.theme.as_str(),
                    group.created_at.to_rfc3339(),
                ],
            )
            .map_err(StoreError::from_sqlite)?;
        Ok(())
    }

    /// Fetch a single group by UUID.
    pub fn get_group(&self, id: Uuid) -> Result<Group> {
        self.conn()
            .query_row(
                "SELECT id, name, code, description, created_by, theme, created_at
                 FROM groups WHERE id = ?1",
                params![id.to_string()],
                row_to_group,
            )
            .map_err(not_found)
    }

    /// Fetch a group by its join code (case-normalized by the caller).
    pub fn get_group_by_code(&self, code: &str) -> Result<Group> {
        self.conn()
            .query_row(
                "SELECT id, name, code, description, created_by, theme, created_at
                 FROM groups WHERE code = ?1",
                params![code],
                row_to_group,
            )
            .map_err(not_found)
    }

    /// Whether a join code is already in use.
    pub fn code_exists(&self, code: &str) -> Result<bool> {
        let exists: i64 = self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM groups WHERE code = ?1)",
            params![code],
            |row| row.get(0),
        )?;
        Ok(exists != 0)
    }

    /// Groups the given user is currently a member of, newest first.
    pub fn groups_for_user(&self, user_id: Uuid) -> Result<Vec<Group>> {
        let mut stmt = self.conn().prepare(
            "SELECT g.id, g.name, g.code, g.description, g.created_by, g.theme, g.created_at
             FROM groups g
             JOIN group_members m ON m.group_id = g.id
             WHERE m.user_id = ?1
             ORDER BY g.created_at DESC",
        )?;

        let rows = stmt.query_map(params![user_id.to_string()], row_to_group)?;

        let mut groups = Vec::new();
        for row in rows {
            groups.push(row?);
        }
        Ok(groups)
    }

    /// Update a group's theme.
    pub fn set_group_theme(&self, group_id: Uuid, theme: Theme) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE groups SET theme = ?2 WHERE id = ?1",
            params![group_id.to_string(), theme.as_str()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Members
    // ------------------------------------------------------------------

    /// List a group's members in join order.
    pub fn group_members(&self, group_id: Uuid) -> Result<Vec<Member>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_id, anonymous_name, joined_at
             FROM group_members
             WHERE group_id = ?1
             ORDER BY joined_at ASC",
        )?;

        let rows = stmt.query_map(params![group_id.to_string()], row_to_member)?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }

    /// List a group's members joined with each user's name and presence
    /// columns, in join order.
    pub fn group_member_profiles(&self, group_id: Uuid) -> Result<Vec<MemberProfile>> {
        let mut stmt = self.conn().prepare(
            "SELECT m.user_id, u.name, m.anonymous_name, m.joined_at,
                    u.last_active_at, u.online_sessions
             FROM group_members m
             JOIN users u ON u.id = m.user_id
             WHERE m.group_id = ?1
             ORDER BY m.joined_at ASC",
        )?;

        let rows = stmt.query_map(params![group_id.to_string()], |row| {
            let user_id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let anonymous_name: String = row.get(2)?;
            let joined_str: String = row.get(3)?;
            let active_str: String = row.get(4)?;
            let online_sessions: i64 = row.get(5)?;
            Ok(MemberProfile {
                user_id: parse_uuid(&user_id, 0)?,
                name,
                anonymous_name,
                joined_at: parse_ts(&joined_str, 3)?,
                last_active_at: parse_ts(&active_str, 4)?,
                online_sessions,
            })
        })?;

        let mut members = Vec::new();
        for row in rows {
            members.push(row?);
        }
        Ok(members)
    }

    /// Fetch a single membership, if present.
    pub fn group_member(&self, group_id: Uuid, user_id: Uuid) -> Result<Option<Member>> {
        let result = self.conn().query_row(
            "SELECT user_id, anonymous_name, joined_at
             FROM group_members
             WHERE group_id = ?1 AND user_id = ?2",
            params![group_id.to_string(), user_id.to_string()],
            row_to_member,
        );
        match result {
            Ok(member) => Ok(Some(member)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    /// Current member count.
    pub fn member_count(&self, group_id: Uuid) -> Result<usize> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM group_members WHERE group_id = ?1",
            params![group_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Append a member.  Fails with [`StoreError::Conflict`] when the user is
    /// already a member or the anonymous name is taken in this group; the
    /// UNIQUE indexes are the final arbiter against concurrent joiners.
    pub fn add_member(&self, group_id: Uuid, member: &Member) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO group_members (group_id, user_id, anonymous_name, joined_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    group_id.to_string(),
                    member.user_id.to_string(),
                    member.anonymous_name,
                    member.joined_at.to_rfc3339(),
                ],
            )
            .map_err(StoreError::from_sqlite)?;
        Ok(())
    }

    /// Remove a membership.  Returns `true` if a row was deleted.
    pub fn remove_member(&self, group_id: Uuid, user_id: Uuid) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
            params![group_id.to_string(), user_id.to_string()],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Removed users
    // ------------------------------------------------------------------

    /// Whether the user has been administratively removed from the group.
    pub fn is_removed_from_group(&self, group_id: Uuid, user_id: Uuid) -> Result<bool> {
        let exists: i64 = self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM group_removed_users
                           WHERE group_id = ?1 AND user_id = ?2)",
            params![group_id.to_string(), user_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(exists != 0)
    }

    /// Record an administrative removal.  Membership and removal are mutually
    /// exclusive, so callers delete the membership row in the same breath.
    pub fn add_removed_user(&self, group_id: Uuid, removed: &RemovedUser) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO group_removed_users (group_id, user_id, removed_at, removed_by)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    group_id.to_string(),
                    removed.user_id.to_string(),
                    removed.removed_at.to_rfc3339(),
                    removed.removed_by.to_string(),
                ],
            )
            .map_err(StoreError::from_sqlite)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn not_found(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        other => StoreError::Sqlite(other),
    }
}

/// Map a `rusqlite::Row` to a [`Group`].
fn row_to_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<Group> {
    let id_str: String = row.get(0)?;
    let name: String = row.get(1)?;
    let code: String = row.get(2)?;
    let description: String = row.get(3)?;
    let created_by_str: String = row.get(4)?;
    let theme_str: String = row.get(5)?;
    let created_str: String = row.get(6)?;

    let theme: Theme = theme_str.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Group {
        id: parse_uuid(&id_str, 0)?,
        name,
        code,
        description,
        created_by: parse_uuid(&created_by_str, 4)?,
        theme,
        created_at: parse_ts(&created_str, 6)?,
    })
}

/// Map a `rusqlite::Row` to a [`Member`].
fn row_to_member(row: &rusqlite::Row<'_>) -> rusqlite::Result<Member> {
    let user_id_str: String = row.get(0)?;
    let anonymous_name: String = row.get(1)?;
    let joined_str: String = row.get(2)?;

    Ok(Member {
        user_id: parse_uuid(&user_id_str, 0)?,
        anonymous_name,
        joined_at: parse_ts(&joined_str, 2)?,
    })
}
