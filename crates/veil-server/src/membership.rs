//! Group membership: joining, leaving, administrative removal, and the
//! per-group anonymous identity assignment.

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use veil_shared::names::{anonymous_candidate, disambiguate, MAX_NAME_ATTEMPTS};
use veil_shared::protocol::{
    MemberCountUpdated, MemberSummary, RemovedFromGroup, ServerEvent, UserRemovedFromGroup,
};
use veil_store::{Group, Member, MemberProfile, RemovedUser, StoreError};

use crate::error::ServerError;
use crate::state::AppState;

/// How a joiner referenced the group.
pub enum JoinTarget {
    /// Join by the 6-character invite code.
    Code(String),
    /// Re-join or switch to a group by id.
    Id(Uuid),
}

/// Outcome of a join: the resolved group, the caller's membership row, and
/// whether the membership was created by this call.
#[derive(Debug)]
pub struct JoinOutcome {
    pub group: Group,
    pub member: Member,
    pub newly_joined: bool,
}

/// Resolve the group, enforce the removal bar, and ensure the caller holds a
/// membership with a unique anonymous name.
///
/// Name uniqueness rides on the storage-side `(group_id, anonymous_name)`
/// unique index: a collision between two simultaneous joiners surfaces as a
/// conflict here and is resolved by re-rolling, bounded by
/// [`MAX_NAME_ATTEMPTS`].
pub async fn join_group(
    state: &AppState,
    user_id: Uuid,
    target: JoinTarget,
) -> Result<JoinOutcome, ServerError> {
    let db = state.db.lock().await;

    let group = match &target {
        JoinTarget::Code(code) => db
            .get_group_by_code(&code.trim().to_uppercase())
            .map_err(|e| match e {
                StoreError::NotFound => ServerError::NotFound("Invalid group code".into()),
                other => other.into(),
            })?,
        JoinTarget::Id(id) => db.get_group(*id).map_err(|e| match e {
            StoreError::NotFound => ServerError::NotFound("Group not found".into()),
            other => other.into(),
        })?,
    };

    if db.is_removed_from_group(group.id, user_id)? {
        return Err(ServerError::RemovedFromGroup);
    }

    if let Some(member) = db.group_member(group.id, user_id)? {
        return Ok(JoinOutcome {
            group,
            member,
            newly_joined: false,
        });
    }

    let user = db.get_user(user_id)?;
    let mut rng = rand::thread_rng();
    for attempt in 0..MAX_NAME_ATTEMPTS {
        // Code joins lead with the user's own name; everything after the
        // first collision (and all id joins) draws from the anonymous pool.
        let candidate = match (&target, attempt) {
            (JoinTarget::Code(_), 0) => user.name.clone(),
            (JoinTarget::Code(_), 1) => disambiguate(&user.name, user_id),
            _ => anonymous_candidate(&mut rng),
        };
        let member = Member {
            user_id,
            anonymous_name: candidate,
            joined_at: Utc::now(),
        };
        match db.add_member(group.id, &member) {
            Ok(()) => {
                info!(%user_id, group_id = %group.id, anonymous_name = %member.anonymous_name, "user joined group");
                return Ok(JoinOutcome {
                    group,
                    member,
                    newly_joined: true,
                });
            }
            Err(StoreError::Conflict) => {
                // Either the name lost a race or a concurrent join on this
                // user already landed.  Re-check before re-rolling.
                if let Some(member) = db.group_member(group.id, user_id)? {
                    return Ok(JoinOutcome {
                        group,
                        member,
                        newly_joined: false,
                    });
                }
            }
            Err(other) => return Err(other.into()),
        }
    }
    Err(ServerError::NameAssignmentExhausted)
}

/// Creator-only removal of a member.  Records the removal bar, then notifies
/// the room and the removed user's own sockets.
pub async fn remove_user(
    state: &AppState,
    group_id: Uuid,
    actor: Uuid,
    target: Uuid,
) -> Result<(), ServerError> {
    let (group, profiles) = {
        let db = state.db.lock().await;
        let group = db.get_group(group_id)?;
        if group.created_by != actor {
            return Err(ServerError::Forbidden(
                "Only the group creator can remove members.".into(),
            ));
        }
        if db.group_member(group_id, target)?.is_none() {
            return Err(ServerError::NotFound("User is not a member of this group".into()));
        }
        db.remove_member(group_id, target)?;
        db.add_removed_user(
            group_id,
            &RemovedUser {
                user_id: target,
                removed_at: Utc::now(),
                removed_by: actor,
            },
        )?;
        (group, db.group_member_profiles(group_id)?)
    };
    info!(group_id = %group_id, user_id = %target, removed_by = %actor, "user removed from group");

    let member_count = profiles.len();
    state
        .connections
        .broadcast_room(
            group_id,
            ServerEvent::UserRemovedFromGroup(UserRemovedFromGroup {
                user_id: target,
                group_id,
                member_count,
            }),
            None,
        )
        .await;
    state
        .connections
        .send_to_user(
            target,
            ServerEvent::RemovedFromGroup(RemovedFromGroup {
                group_id,
                group_name: group.name,
            }),
        )
        .await;
    state
        .connections
        .broadcast_room(group_id, member_count_update(&profiles), None)
        .await;
    Ok(())
}

/// Voluntary leave.  No removal bar is recorded, so the user may re-join.
pub async fn leave_group(
    state: &AppState,
    group_id: Uuid,
    user_id: Uuid,
) -> Result<(), ServerError> {
    let profiles = {
        let db = state.db.lock().await;
        db.get_group(group_id)?;
        if !db.remove_member(group_id, user_id)? {
            return Err(ServerError::NotAMember);
        }
        db.group_member_profiles(group_id)?
    };
    info!(group_id = %group_id, user_id = %user_id, "user left group");
    state
        .connections
        .broadcast_room(group_id, member_count_update(&profiles), None)
        .await;
    Ok(())
}

/// Build a `member-count-updated` event from the current member roster.
pub fn member_count_update(profiles: &[MemberProfile]) -> ServerEvent {
    ServerEvent::MemberCountUpdated(MemberCountUpdated {
        member_count: profiles.len(),
        members: profiles
            .iter()
            .map(|p| MemberSummary {
                user_id: p.user_id,
                name: p.name.clone(),
                anonymous_name: p.anonymous_name.clone(),
            })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use veil_store::{Database, User};

    fn seed_user(db: &Database, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        let now = Utc::now();
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

    fn seed_group(db: &Database, created_by: Uuid, code: &str) -> Uuid {
        let id = Uuid::new_v4();
        db.insert_group(&Group {
            id,
            name: "Night Owls".into(),
            code: code.into(),
            description: String::new(),
            created_by,
            theme: veil_shared::Theme::Default,
            created_at: Utc::now(),
        })
        .unwrap();
        id
    }

    #[tokio::test]
    async fn code_join_uses_the_users_own_name() {
        let state = AppState::for_tests();
        let (user, group) = {
            let db = state.db.lock().await;
            let creator = seed_user(&db, "Creator");
            let user = seed_user(&db, "Alice");
            (user, seed_group(&db, creator, "ABC123"))
        };

        let outcome = join_group(&state, user, JoinTarget::Code("abc123".into()))
            .await
            .unwrap();
        assert!(outcome.newly_joined);
        assert_eq!(outcome.group.id, group);
        assert_eq!(outcome.member.anonymous_name, "Alice");
    }

    #[tokio::test]
    async fn colliding_code_join_gets_a_disambiguated_name() {
        let state = AppState::for_tests();
        let (first, second) = {
            let db = state.db.lock().await;
            let creator = seed_user(&db, "Creator");
            seed_group(&db, creator, "ABC123");
            (seed_user(&db, "Alice"), seed_user(&db, "Alice"))
        };

        let a = join_group(&state, first, JoinTarget::Code("ABC123".into()))
            .await
            .unwrap();
        let b = join_group(&state, second, JoinTarget::Code("ABC123".into()))
            .await
            .unwrap();
        assert_eq!(a.member.anonymous_name, "Alice");
        assert_ne!(b.member.anonymous_name, "Alice");
        assert!(b.member.anonymous_name.starts_with("Alice ("));
    }

    #[tokio::test]
    async fn repeat_join_is_idempotent() {
        let state = AppState::for_tests();
        let (user, group) = {
            let db = state.db.lock().await;
            let creator = seed_user(&db, "Creator");
            let user = seed_user(&db, "Alice");
            (user, seed_group(&db, creator, "ABC123"))
        };

        let first = join_group(&state, user, JoinTarget::Id(group)).await.unwrap();
        let second = join_group(&state, user, JoinTarget::Id(group)).await.unwrap();
        assert!(first.newly_joined);
        assert!(!second.newly_joined);
        assert_eq!(first.member.anonymous_name, second.member.anonymous_name);
    }

    #[tokio::test]
    async fn ten_joiners_get_ten_distinct_names() {
        let state = AppState::for_tests();
        let (users, group) = {
            let db = state.db.lock().await;
            let creator = seed_user(&db, "Creator");
            let users: Vec<Uuid> = (0..10).map(|_| seed_user(&db, "Guest")).collect();
            (users, seed_group(&db, creator, "ABC123"))
        };

        let mut names = std::collections::HashSet::new();
        for user in users {
            let outcome = join_group(&state, user, JoinTarget::Id(group))
                .await
                .unwrap();
            assert!(names.insert(outcome.member.anonymous_name));
        }
        assert_eq!(names.len(), 10);
    }

    #[tokio::test]
    async fn removed_user_cannot_rejoin() {
        let state = AppState::for_tests();
        let (creator, user, group) = {
            let db = state.db.lock().await;
            let creator = seed_user(&db, "Creator");
            let user = seed_user(&db, "Alice");
            (creator, user, seed_group(&db, creator, "ABC123"))
        };
        join_group(&state, user, JoinTarget::Id(group)).await.unwrap();
        remove_user(&state, group, creator, user).await.unwrap();

        let err = join_group(&state, user, JoinTarget::Id(group))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::RemovedFromGroup));
        let db = state.db.lock().await;
        assert!(db.group_member(group, user).unwrap().is_none());
    }

    #[tokio::test]
    async fn only_the_creator_can_remove() {
        let state = AppState::for_tests();
        let (user, other, group) = {
            let db = state.db.lock().await;
            let creator = seed_user(&db, "Creator");
            let user = seed_user(&db, "Alice");
            let other = seed_user(&db, "Bob");
            (user, other, seed_group(&db, creator, "ABC123"))
        };
        join_group(&state, user, JoinTarget::Id(group)).await.unwrap();
        join_group(&state, other, JoinTarget::Id(group)).await.unwrap();

        let err = remove_user(&state, group, other, user).await.unwrap_err();
        assert!(matches!(err, ServerError::Forbidden(_)));
    }

    #[tokio::test]
    async fn leaving_allows_rejoining() {
        let state = AppState::for_tests();
        let (user, group) = {
            let db = state.db.lock().await;
            let creator = seed_user(&db, "Creator");
            let user = seed_user(&db, "Alice");
            (user, seed_group(&db, creator, "ABC123"))
        };
        join_group(&state, user, JoinTarget::Id(group)).await.unwrap();
        leave_group(&state, group, user).await.unwrap();
        let outcome = join_group(&state, user, JoinTarget::Id(group)).await.unwrap();
        assert!(outcome.newly_joined);
    }
}
