//! Domain model structs persisted in the SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to the HTTP layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use veil_shared::Theme;

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered user identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    /// Real display name, never shown inside a group.
    pub name: String,
    pub created_at: DateTime<Utc>,
    /// Refreshed on connect, ping, and disconnect.
    pub last_active_at: DateTime<Utc>,
    /// Persisted count of concurrently open sessions.  Zero means offline.
    /// Mutated only via atomic SQL increments/decrements.
    pub online_sessions: i64,
}

impl User {
    pub fn is_online(&self) -> bool {
        self.online_sessions > 0
    }
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

/// A chat group.  Members are stored in `group_members`, removal records in
/// `group_removed_users`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    /// 6-character uppercase alphanumeric join token, unique across groups.
    pub code: String,
    pub description: String,
    pub created_by: Uuid,
    pub theme: Theme,
    pub created_at: DateTime<Utc>,
}

/// A group membership with its per-group anonymous identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Member {
    pub user_id: Uuid,
    pub anonymous_name: String,
    pub joined_at: DateTime<Utc>,
}

/// A membership row joined with the owning user's presence columns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberProfile {
    pub user_id: Uuid,
    /// The user's real name (visible to the members endpoint, per the
    /// upstream contract).
    pub name: String,
    pub anonymous_name: String,
    pub joined_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub online_sessions: i64,
}

impl MemberProfile {
    pub fn is_online(&self) -> bool {
        self.online_sessions > 0
    }
}

/// An administrative removal record.  Its presence bars the user from
/// re-joining the group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemovedUser {
    pub user_id: Uuid,
    pub removed_at: DateTime<Utc>,
    pub removed_by: Uuid,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Auto-delete lifecycle of a message.  Expired messages are flagged, never
/// physically removed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AutoDelete {
    pub enabled: bool,
    pub delete_after_secs: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A single group chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub group_id: Uuid,
    pub sender_id: Uuid,
    /// Sender's display name at send time (denormalized for history reads).
    pub sender_name: String,
    pub content: String,
    pub edited: bool,
    pub is_file: bool,
    pub file_name: Option<String>,
    pub file_content: Option<String>,
    pub file_size: Option<i64>,
    pub auto_delete: AutoDelete,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Block graph
// ---------------------------------------------------------------------------

/// A directed block edge.  Delivery filtering treats the relation as
/// symmetric: either direction suppresses messages both ways.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockRelation {
    pub blocked_by: Uuid,
    pub blocked_user: Uuid,
    pub created_at: DateTime<Utc>,
}
