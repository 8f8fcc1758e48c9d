//! WebSocket connection gateway.
//!
//! Authentication happens before the upgrade: a bad token refuses the
//! handshake and the socket never enters the registry. Once upgraded, a
//! single task per connection pumps inbound frames into the dispatcher and
//! drains the outbound channel into the sink.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use veil_shared::protocol::{
    ClientEvent, JoinedGroup, ServerEvent, TypingBroadcast, TypingRequest, UserJoined,
};
use veil_store::StoreError;

use crate::error::ServerError;
use crate::membership::member_count_update;
use crate::rooms::SocketId;
use crate::state::AppState;
use crate::{auth, delivery};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: String,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Result<Response, ServerError> {
    let user_id = auth::verify_token(&query.token, &state.config.jwt_secret)?;
    {
        let db = state.db.lock().await;
        db.get_user(user_id)
            .map_err(|_| ServerError::AuthenticationFailed)?;
    }
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, user_id)))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: Uuid) {
    let socket_id: SocketId = Uuid::new_v4();
    let mut outbound = state.connections.register(socket_id, user_id).await;
    state.presence.on_connect(user_id, socket_id).await;
    info!(%user_id, %socket_id, "websocket connected");

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&state, socket_id, user_id, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(%socket_id, error = %e, "websocket read error");
                        break;
                    }
                }
            }
            event = outbound.recv() => {
                let Some(event) = event else { break };
                let json = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(%socket_id, error = %e, "failed to encode event");
                        continue;
                    }
                };
                if sink.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
    }

    state.connections.deregister(socket_id).await;
    state.presence.on_disconnect(user_id, socket_id).await;
    info!(%user_id, %socket_id, "websocket disconnected");
}

async fn handle_frame(state: &AppState, socket_id: SocketId, user_id: Uuid, text: &str) {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            debug!(%socket_id, error = %e, "unparseable client frame");
            state
                .connections
                .send_to_socket(socket_id, ServerEvent::error("Invalid message format"))
                .await;
            return;
        }
    };
    if let Err(e) = dispatch(state, socket_id, user_id, event).await {
        let message = match &e {
            ServerError::Store(_) | ServerError::Internal(_) => {
                warn!(%socket_id, error = %e, "event handler failed");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };
        state
            .connections
            .send_to_socket(socket_id, ServerEvent::error(message))
            .await;
    }
}

async fn dispatch(
    state: &AppState,
    socket_id: SocketId,
    user_id: Uuid,
    event: ClientEvent,
) -> Result<(), ServerError> {
    match event {
        ClientEvent::JoinGroup(group_id) => {
            handle_join_group(state, socket_id, user_id, group_id).await
        }
        ClientEvent::SendMessage(req) => {
            delivery::send_message(state, socket_id, user_id, req).await
        }
        ClientEvent::Typing(req) => {
            broadcast_typing(state, socket_id, user_id, req, true).await
        }
        ClientEvent::StopTyping(req) => {
            broadcast_typing(state, socket_id, user_id, req, false).await
        }
        ClientEvent::PresencePing => {
            state.presence.ping(user_id).await;
            Ok(())
        }
    }
}

/// `join-group` subscribes an already-member socket to the room.  Membership
/// itself is established over HTTP; this event never creates it.
async fn handle_join_group(
    state: &AppState,
    socket_id: SocketId,
    user_id: Uuid,
    group_id: Uuid,
) -> Result<(), ServerError> {
    let (member, user_name, profiles) = {
        let db = state.db.lock().await;
        db.get_group(group_id).map_err(|e| match e {
            StoreError::NotFound => ServerError::NotFound("Group not found".into()),
            other => other.into(),
        })?;
        if db.is_removed_from_group(group_id, user_id)? {
            return Err(ServerError::RemovedFromGroup);
        }
        let member = db
            .group_member(group_id, user_id)?
            .ok_or(ServerError::NotAMember)?;
        let user = db.get_user(user_id)?;
        (member, user.name, db.group_member_profiles(group_id)?)
    };

    state.connections.join_room(socket_id, group_id).await;
    state
        .connections
        .send_to_socket(
            socket_id,
            ServerEvent::JoinedGroup(JoinedGroup {
                group_id,
                user_name,
                anonymous_name: member.anonymous_name.clone(),
            }),
        )
        .await;
    state
        .connections
        .broadcast_room(
            group_id,
            ServerEvent::UserJoined(UserJoined {
                user_name: member.anonymous_name,
                member_count: profiles.len(),
            }),
            Some(socket_id),
        )
        .await;
    state
        .connections
        .broadcast_room(group_id, member_count_update(&profiles), None)
        .await;
    Ok(())
}

async fn broadcast_typing(
    state: &AppState,
    socket_id: SocketId,
    user_id: Uuid,
    req: TypingRequest,
    typing: bool,
) -> Result<(), ServerError> {
    let member = {
        let db = state.db.lock().await;
        db.group_member(req.group_id, user_id)?
            .ok_or(ServerError::NotAMember)?
    };
    let payload = TypingBroadcast {
        user_id,
        user_name: member.anonymous_name,
        group_id: req.group_id,
    };
    let event = if typing {
        ServerEvent::Typing(payload)
    } else {
        ServerEvent::StopTyping(payload)
    };
    state
        .connections
        .broadcast_room(req.group_id, event, Some(socket_id))
        .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use veil_store::{Group, Member, RemovedUser, User};

    async fn seed_group(state: &AppState) -> (Uuid, Uuid) {
        let db = state.db.lock().await;
        let now = Utc::now();
        let creator = Uuid::new_v4();
        db.insert_user(&User {
            id: creator,
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
            created_by: creator,
            theme: veil_shared::Theme::Default,
            created_at: now,
        })
        .unwrap();
        db.add_member(
            group,
            &Member {
                user_id: creator,
                anonymous_name: "Silent Raven".into(),
                joined_at: now,
            },
        )
        .unwrap();
        (creator, group)
    }

    async fn seed_user(state: &AppState, name: &str) -> Uuid {
        let db = state.db.lock().await;
        let now = Utc::now();
        let id = Uuid::new_v4();
        db.insert_user(&User {
            id,
            name: name.into(),
            created_at: now,
            last_active_at: now,
            online_sessions: 0,
        })
        .unwrap();
        id
    }

    #[tokio::test]
    async fn member_socket_joins_room_and_gets_identity() {
        let state = AppState::for_tests();
        let (alice, group) = seed_group(&state).await;
        let socket = Uuid::new_v4();
        let mut rx = state.connections.register(socket, alice).await;

        handle_join_group(&state, socket, alice, group).await.unwrap();

        match rx.try_recv().unwrap() {
            ServerEvent::JoinedGroup(joined) => {
                assert_eq!(joined.group_id, group);
                assert_eq!(joined.user_name, "Alice");
                assert_eq!(joined.anonymous_name, "Silent Raven");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        // The joining socket is now part of the room.
        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerEvent::MemberCountUpdated(_)
        ));
    }

    #[tokio::test]
    async fn non_member_socket_cannot_subscribe() {
        let state = AppState::for_tests();
        let (_, group) = seed_group(&state).await;
        let mallory = seed_user(&state, "Mallory").await;
        let socket = Uuid::new_v4();
        let mut rx = state.connections.register(socket, mallory).await;

        let err = handle_join_group(&state, socket, mallory, group)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::NotAMember));
        // Never subscribed, so room traffic must not reach this socket.
        state
            .connections
            .broadcast_room(group, ServerEvent::error("noise"), None)
            .await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn removed_user_socket_is_barred() {
        let state = AppState::for_tests();
        let (alice, group) = seed_group(&state).await;
        let bob = seed_user(&state, "Bob").await;
        {
            let db = state.db.lock().await;
            db.add_removed_user(
                group,
                &RemovedUser {
                    user_id: bob,
                    removed_at: Utc::now(),
                    removed_by: alice,
                },
            )
            .unwrap();
        }
        let socket = Uuid::new_v4();
        state.connections.register(socket, bob).await;

        let err = handle_join_group(&state, socket, bob, group)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::RemovedFromGroup));
    }

    #[tokio::test]
    async fn unknown_group_is_not_found() {
        let state = AppState::for_tests();
        let alice = seed_user(&state, "Alice").await;
        let socket = Uuid::new_v4();
        state.connections.register(socket, alice).await;

        let err = handle_join_group(&state, socket, alice, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));
    }

    #[tokio::test]
    async fn unparseable_frame_yields_an_error_event() {
        let state = AppState::for_tests();
        let alice = seed_user(&state, "Alice").await;
        let socket = Uuid::new_v4();
        let mut rx = state.connections.register(socket, alice).await;

        handle_frame(&state, socket, alice, "not json").await;

        match rx.try_recv().unwrap() {
            ServerEvent::Error(payload) => assert_eq!(payload.message, "Invalid message format"),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
