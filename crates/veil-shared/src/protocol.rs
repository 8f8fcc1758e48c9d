//! Real-time wire protocol.
//!
//! Every frame on the WebSocket is a JSON object `{"event": ..., "data": ...}`.
//! Event names and payload field casing are part of the protocol contract
//! with existing clients, hence the explicit renames below.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::theme::Theme;

/// Events a client may send to the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Join (or switch to) a group room. The payload is the group id.
    #[serde(rename = "join-group")]
    JoinGroup(Uuid),

    #[serde(rename = "send-message")]
    SendMessage(SendMessage),

    #[serde(rename = "typing")]
    Typing(TypingRequest),

    #[serde(rename = "stop-typing")]
    StopTyping(TypingRequest),

    /// Liveness heartbeat; refreshes `lastActive` without touching the
    /// session count.
    #[serde(rename = "presence:ping")]
    PresencePing,
}

/// Events the server emits to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "joined-group")]
    JoinedGroup(JoinedGroup),

    #[serde(rename = "user-joined")]
    UserJoined(UserJoined),

    #[serde(rename = "new-message")]
    NewMessage(MessagePayload),

    /// Confirmation sent to the sender's own socket; same projection as
    /// `new-message`.
    #[serde(rename = "message-sent")]
    MessageSent(MessagePayload),

    #[serde(rename = "typing")]
    Typing(TypingBroadcast),

    #[serde(rename = "stop-typing")]
    StopTyping(TypingBroadcast),

    #[serde(rename = "message:edited")]
    MessageEdited(MessageEdited),

    #[serde(rename = "message:deleted")]
    MessageDeleted(MessageDeleted),

    /// Batch notification from the expiration sweeper, one per affected room.
    #[serde(rename = "messages-deleted")]
    MessagesDeleted(MessagesDeleted),

    #[serde(rename = "member-count-updated")]
    MemberCountUpdated(MemberCountUpdated),

    #[serde(rename = "presence:update")]
    PresenceUpdate(PresenceUpdate),

    #[serde(rename = "user-removed-from-group")]
    UserRemovedFromGroup(UserRemovedFromGroup),

    /// Sent to the removed user's own sockets.
    #[serde(rename = "removed-from-group")]
    RemovedFromGroup(RemovedFromGroup),

    #[serde(rename = "theme-updated")]
    ThemeUpdated(ThemeUpdated),

    #[serde(rename = "error")]
    Error(ErrorPayload),
}

// ---------------------------------------------------------------------------
// Client payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    pub group_id: Uuid,
    pub content: String,
    #[serde(default)]
    pub is_file: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_delete: Option<AutoDeleteRequest>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AutoDeleteRequest {
    pub enabled: bool,
    /// Seconds until expiry, counted from send time.
    #[serde(default)]
    pub delete_after: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TypingRequest {
    pub group_id: Uuid,
}

// ---------------------------------------------------------------------------
// Server payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinedGroup {
    pub group_id: Uuid,
    pub user_name: String,
    pub anonymous_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserJoined {
    pub user_name: String,
    pub member_count: usize,
}

/// Full message projection delivered over the socket and returned from the
/// history endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub group_id: Uuid,
    pub sender_id: Uuid,
    pub sender_name: String,
    pub content: String,
    pub edited: bool,
    pub is_file: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<i64>,
    pub auto_delete: AutoDeleteState,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AutoDeleteState {
    pub enabled: bool,
    pub delete_after: Option<i64>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TypingBroadcast {
    pub user_id: Uuid,
    pub user_name: String,
    pub group_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageEdited {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub text: String,
    pub content: String,
    pub sender_id: Uuid,
    pub sender_name: String,
    pub group_id: Uuid,
    pub edited: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeleted {
    pub id: Uuid,
    pub group_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessagesDeleted {
    pub message_ids: Vec<Uuid>,
    pub group_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemberSummary {
    pub user_id: Uuid,
    pub name: String,
    pub anonymous_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemberCountUpdated {
    pub member_count: usize,
    pub members: Vec<MemberSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdate {
    pub user_id: Uuid,
    pub is_online: bool,
    pub last_active: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserRemovedFromGroup {
    pub user_id: Uuid,
    pub group_id: Uuid,
    pub member_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemovedFromGroup {
    pub group_id: Uuid,
    pub group_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ThemeUpdated {
    pub group_id: Uuid,
    pub theme: Theme,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorPayload {
    pub message: String,
}

impl ServerEvent {
    /// Shorthand for the `error {message}` event.
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorPayload {
            message: message.into(),
        })
    }
}
