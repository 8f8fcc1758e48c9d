//! Background expiration sweeper for auto-delete messages.
//!
//! Runs on a fixed interval, flags every message whose expiry has passed,
//! and pushes one `messages-deleted` batch per affected room. Expired
//! messages are tombstoned, never physically removed, so history reads can
//! keep excluding them idempotently.

use std::collections::HashMap;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};
use uuid::Uuid;

use veil_shared::protocol::{MessagesDeleted, ServerEvent};

use crate::error::ServerError;
use crate::state::AppState;

/// Spawn the sweep loop. Errors are logged and the loop keeps running.
pub fn spawn(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(state.config.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match sweep_once(&state).await {
                Ok(0) => {}
                Ok(n) => debug!(expired = n, "swept expired messages"),
                Err(e) => warn!(error = %e, "expiration sweep failed"),
            }
        }
    })
}

/// One sweep pass: tombstone everything past its expiry and notify rooms.
/// Returns the number of messages flagged.
pub async fn sweep_once(state: &AppState) -> Result<usize, ServerError> {
    let now = Utc::now();
    let expired = {
        let db = state.db.lock().await;
        let expired = db.find_expired_messages(now)?;
        if !expired.is_empty() {
            let ids: Vec<Uuid> = expired.iter().map(|(id, _)| *id).collect();
            db.mark_messages_deleted(&ids, now)?;
        }
        expired
    };
    if expired.is_empty() {
        return Ok(0);
    }

    let mut by_group: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for (message_id, group_id) in &expired {
        by_group.entry(*group_id).or_default().push(*message_id);
    }
    for (group_id, message_ids) in by_group {
        state
            .connections
            .broadcast_room(
                group_id,
                ServerEvent::MessagesDeleted(MessagesDeleted {
                    message_ids,
                    group_id,
                }),
                None,
            )
            .await;
    }
    Ok(expired.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use veil_store::{AutoDelete, Group, Member, Message, User};

    async fn seed_expired_message(state: &AppState, expired: bool) -> (Uuid, Uuid) {
        let db = state.db.lock().await;
        let now = Utc::now();
        let user = Uuid::new_v4();
        db.insert_user(&User {
            id: user,
            name: "Alice".into(),
            created_at: now,
            last_active_at: now,
            online_sessions: 0,
        })
        .unwrap();
        let group = Uuid::new_v4();
        db.insert_group(&Group {
            id: group,
            name: "Night Owls".into(),
            code: "ABC123".into(),
            description: String::new(),
            created_by: user,
            theme: veil_shared::Theme::Default,
            created_at: now,
        })
        .unwrap();
        db.add_member(
            group,
            &Member {
                user_id: user,
                anonymous_name: "Silent Raven 7".into(),
                joined_at: now,
            },
        )
        .unwrap();
        let offset = if expired {
            -Duration::seconds(60)
        } else {
            Duration::seconds(600)
        };
        let message_id = Uuid::new_v4();
        db.insert_message(&Message {
            id: message_id,
            group_id: group,
            sender_id: user,
            sender_name: "Alice".into(),
            content: "ephemeral".into(),
            edited: false,
            is_file: false,
            file_name: None,
            file_content: None,
            file_size: None,
            auto_delete: AutoDelete {
                enabled: true,
                delete_after_secs: Some(60),
                expires_at: Some(now + offset),
                is_deleted: false,
                deleted_at: None,
            },
            created_at: now,
        })
        .unwrap();
        (message_id, group)
    }

    #[tokio::test]
    async fn expired_messages_are_tombstoned_not_dropped() {
        let state = AppState::for_tests();
        let (message_id, group) = seed_expired_message(&state, true).await;

        assert_eq!(sweep_once(&state).await.unwrap(), 1);

        let db = state.db.lock().await;
        let message = db.get_message(message_id).unwrap();
        assert!(message.auto_delete.is_deleted);
        assert!(message.auto_delete.deleted_at.is_some());
        // Tombstoned messages vanish from history reads.
        assert!(db.messages_for_group(group).unwrap().is_empty());
    }

    #[tokio::test]
    async fn sweep_is_idempotent() {
        let state = AppState::for_tests();
        seed_expired_message(&state, true).await;

        assert_eq!(sweep_once(&state).await.unwrap(), 1);
        assert_eq!(sweep_once(&state).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unexpired_messages_survive_the_sweep() {
        let state = AppState::for_tests();
        let (message_id, _) = seed_expired_message(&state, false).await;

        assert_eq!(sweep_once(&state).await.unwrap(), 0);
        let db = state.db.lock().await;
        assert!(!db.get_message(message_id).unwrap().auto_delete.is_deleted);
    }

    #[tokio::test]
    async fn sweep_notifies_the_affected_room() {
        let state = AppState::for_tests();
        let (message_id, group) = seed_expired_message(&state, true).await;
        let socket = Uuid::new_v4();
        let mut rx = state.connections.register(socket, Uuid::new_v4()).await;
        state.connections.join_room(socket, group).await;

        sweep_once(&state).await.unwrap();

        match rx.try_recv().unwrap() {
            ServerEvent::MessagesDeleted(batch) => {
                assert_eq!(batch.group_id, group);
                assert_eq!(batch.message_ids, vec![message_id]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
