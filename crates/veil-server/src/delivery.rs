//! Message persistence and real-time fan-out.
//!
//! A message is persisted before any delivery is attempted.  Fan-out walks
//! the sockets focused on the group's room and suppresses delivery to any
//! recipient with a block relation to the sender, in either direction.  A
//! block verdict that cannot be evaluated suppresses delivery rather than
//! leaking a message through.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use tracing::warn;
use uuid::Uuid;

use veil_shared::protocol::{
    MessageDeleted, MessageEdited, MessagePayload, SendMessage, ServerEvent,
};
use veil_store::{AutoDelete, Message, StoreError};

use crate::error::ServerError;
use crate::rooms::SocketId;
use crate::state::AppState;

/// Project a stored message into its wire form.
pub fn message_payload(message: &Message) -> MessagePayload {
    MessagePayload {
        id: message.id,
        group_id: message.group_id,
        sender_id: message.sender_id,
        sender_name: message.sender_name.clone(),
        content: message.content.clone(),
        edited: message.edited,
        is_file: message.is_file,
        file_name: message.file_name.clone(),
        file_content: message.file_content.clone(),
        file_size: message.file_size,
        auto_delete: veil_shared::protocol::AutoDeleteState {
            enabled: message.auto_delete.enabled,
            delete_after: message.auto_delete.delete_after_secs,
            expires_at: message.auto_delete.expires_at,
            is_deleted: message.auto_delete.is_deleted,
            deleted_at: message.auto_delete.deleted_at,
        },
        created_at: message.created_at,
    }
}

/// Persist an inbound message and fan it out to the group room.
///
/// The sending socket gets a `message-sent` confirmation; every other socket
/// in the room (including the sender's own other sockets) gets `new-message`
/// unless a block relation suppresses it.
pub async fn send_message(
    state: &AppState,
    sender_socket: SocketId,
    sender_id: Uuid,
    req: SendMessage,
) -> Result<(), ServerError> {
    let message = {
        let db = state.db.lock().await;
        db.get_group(req.group_id).map_err(|e| match e {
            StoreError::NotFound => ServerError::NotFound("Group not found".into()),
            other => other.into(),
        })?;
        if db.is_removed_from_group(req.group_id, sender_id)? {
            return Err(ServerError::RemovedFromGroup);
        }
        if db.group_member(req.group_id, sender_id)?.is_none() {
            return Err(ServerError::NotAMember);
        }
        if !req.is_file && req.content.trim().is_empty() {
            return Err(ServerError::BadRequest(
                "Message content cannot be empty".into(),
            ));
        }

        let now = Utc::now();
        let auto_delete = match req.auto_delete {
            Some(ad) if ad.enabled => {
                let secs = ad.delete_after.ok_or_else(|| {
                    ServerError::BadRequest(
                        "deleteAfter is required when auto-delete is enabled".into(),
                    )
                })?;
                if secs <= 0 {
                    return Err(ServerError::BadRequest(
                        "deleteAfter must be positive".into(),
                    ));
                }
                // Client-supplied, so it can be absurd; reject anything the
                // timestamp arithmetic cannot represent.
                let expires_at = Duration::try_seconds(secs)
                    .and_then(|d| now.checked_add_signed(d))
                    .ok_or_else(|| {
                        ServerError::BadRequest("deleteAfter is out of range".into())
                    })?;
                AutoDelete {
                    enabled: true,
                    delete_after_secs: Some(secs),
                    expires_at: Some(expires_at),
                    is_deleted: false,
                    deleted_at: None,
                }
            }
            _ => AutoDelete::default(),
        };

        let sender = db.get_user(sender_id)?;
        let message = Message {
            id: Uuid::new_v4(),
            group_id: req.group_id,
            sender_id,
            sender_name: sender.name,
            content: req.content,
            edited: false,
            is_file: req.is_file,
            file_name: req.file_name,
            file_content: req.file_content,
            file_size: req.file_size,
            auto_delete,
            created_at: now,
        };
        db.insert_message(&message)?;
        message
    };

    let payload = message_payload(&message);
    let recipients = state.connections.room_recipients(req.group_id).await;

    // One verdict per distinct recipient user, not per socket.
    let mut verdicts: HashMap<Uuid, bool> = HashMap::new();
    verdicts.insert(sender_id, false);
    {
        let db = state.db.lock().await;
        for (_, user_id, _) in &recipients {
            verdicts.entry(*user_id).or_insert_with(|| {
                db.is_blocked_mutual(sender_id, *user_id).unwrap_or_else(|e| {
                    warn!(sender = %sender_id, recipient = %user_id, error = %e,
                        "block check failed, suppressing delivery");
                    true
                })
            });
        }
    }

    for (socket_id, user_id, tx) in recipients {
        if socket_id == sender_socket {
            continue;
        }
        if verdicts.get(&user_id).copied().unwrap_or(true) {
            continue;
        }
        if let Err(e) = tx.try_send(ServerEvent::NewMessage(payload.clone())) {
            warn!(%socket_id, error = %e, "dropping message for slow or closed socket");
        }
    }
    state
        .connections
        .send_to_socket(sender_socket, ServerEvent::MessageSent(payload))
        .await;
    Ok(())
}

/// Sender-only edit.  The room is notified unfiltered; block relations only
/// gate initial delivery.
pub async fn edit_message(
    state: &AppState,
    actor: Uuid,
    message_id: Uuid,
    content: &str,
) -> Result<MessagePayload, ServerError> {
    if content.trim().is_empty() {
        return Err(ServerError::BadRequest(
            "Message content cannot be empty".into(),
        ));
    }
    let message = {
        let db = state.db.lock().await;
        let message = db.get_message(message_id).map_err(|e| match e {
            StoreError::NotFound => ServerError::NotFound("Message not found".into()),
            other => other.into(),
        })?;
        if message.sender_id != actor {
            return Err(ServerError::Forbidden(
                "You can only edit your own messages".into(),
            ));
        }
        db.edit_message_content(message_id, content)?;
        db.get_message(message_id)?
    };

    state
        .connections
        .broadcast_room(
            message.group_id,
            ServerEvent::MessageEdited(MessageEdited {
                id: message.id,
                text: message.content.clone(),
                content: message.content.clone(),
                sender_id: message.sender_id,
                sender_name: message.sender_name.clone(),
                group_id: message.group_id,
                edited: true,
            }),
            None,
        )
        .await;
    Ok(message_payload(&message))
}

/// Sender-only delete.  Unlike expiration, this removes the row outright.
pub async fn delete_message(
    state: &AppState,
    actor: Uuid,
    message_id: Uuid,
) -> Result<(), ServerError> {
    let group_id = {
        let db = state.db.lock().await;
        let message = db.get_message(message_id).map_err(|e| match e {
            StoreError::NotFound => ServerError::NotFound("Message not found".into()),
            other => other.into(),
        })?;
        if message.sender_id != actor {
            return Err(ServerError::Forbidden(
                "You can only delete your own messages".into(),
            ));
        }
        db.delete_message(message_id)?;
        message.group_id
    };

    state
        .connections
        .broadcast_room(
            group_id,
            ServerEvent::MessageDeleted(MessageDeleted {
                id: message_id,
                group_id,
            }),
            None,
        )
        .await;
    Ok(())
}
