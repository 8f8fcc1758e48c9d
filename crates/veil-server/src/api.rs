use axum::{
    extract::{Path, State},
    http::{HeaderMap, Method},
    routing::{delete, get, patch, post, put},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use veil_shared::names::group_code;
use veil_shared::protocol::{MessagePayload, ServerEvent, ThemeUpdated};
use veil_shared::Theme;
use veil_store::{Group, MemberProfile, StoreError, User};

use crate::auth;
use crate::delivery::{self, message_payload};
use crate::error::ServerError;
use crate::gateway;
use crate::membership::{self, JoinTarget};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(gateway::ws_handler))
        .route("/api/auth/register", post(auth_register))
        .route("/api/auth/login", post(auth_login))
        .route("/api/groups/create", post(group_create))
        .route("/api/groups/join", post(group_join))
        .route("/api/groups", get(group_list))
        .route("/api/groups/:id", get(group_get))
        .route("/api/groups/:id/members", get(group_members))
        .route("/api/groups/:id/remove-user", post(group_remove_user))
        .route("/api/groups/:id/leave", delete(group_leave))
        .route("/api/groups/:id/theme", put(group_set_theme))
        .route("/api/messages/group/:group_id", get(message_history))
        .route(
            "/api/messages/:id",
            patch(message_edit).delete(message_delete),
        )
        .route("/api/block", post(block_create))
        .route("/api/block/:user_id", delete(block_remove))
        .route("/api/users/:id/status", get(user_status))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP API listening");
    axum::serve(listener, router).await?;
    Ok(())
}

fn bearer(headers: &HeaderMap, state: &AppState) -> Result<Uuid, ServerError> {
    auth::bearer_user(headers, &state.config.jwt_secret)
}

// ---------------------------------------------------------------------------
// Request/response shapes
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Deserialize)]
struct RegisterRequest {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest {
    user_id: Uuid,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthResponse {
    token: String,
    user: UserView,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UserView {
    id: Uuid,
    name: String,
    is_online: bool,
    last_active: chrono::DateTime<Utc>,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            is_online: user.is_online(),
            last_active: user.last_active_at,
        }
    }
}

#[derive(Deserialize)]
struct CreateGroupRequest {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    theme: Option<Theme>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinGroupRequest {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    group_id: Option<Uuid>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GroupView {
    id: Uuid,
    name: String,
    code: String,
    description: String,
    created_by: Uuid,
    theme: Theme,
    member_count: usize,
    created_at: chrono::DateTime<Utc>,
}

impl GroupView {
    fn new(group: &Group, member_count: usize) -> Self {
        Self {
            id: group.id,
            name: group.name.clone(),
            code: group.code.clone(),
            description: group.description.clone(),
            created_by: group.created_by,
            theme: group.theme,
            member_count,
            created_at: group.created_at,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JoinGroupResponse {
    group: GroupView,
    anonymous_name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MemberView {
    user_id: Uuid,
    name: String,
    anonymous_name: String,
    joined_at: chrono::DateTime<Utc>,
    is_online: bool,
    last_active: chrono::DateTime<Utc>,
}

impl From<&MemberProfile> for MemberView {
    fn from(p: &MemberProfile) -> Self {
        Self {
            user_id: p.user_id,
            name: p.name.clone(),
            anonymous_name: p.anonymous_name.clone(),
            joined_at: p.joined_at,
            is_online: p.is_online(),
            last_active: p.last_active_at,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoveUserRequest {
    user_id: Uuid,
}

#[derive(Deserialize)]
struct ThemeRequest {
    theme: Theme,
}

#[derive(Deserialize)]
struct EditMessageRequest {
    #[serde(alias = "content")]
    text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockRequest {
    user_id: Uuid,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    user_id: Uuid,
    name: String,
    is_online: bool,
    last_active: chrono::DateTime<Utc>,
}

#[derive(Serialize)]
struct OkResponse {
    ok: bool,
}

const OK: OkResponse = OkResponse { ok: true };

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn auth_register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<AuthResponse>, ServerError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ServerError::BadRequest("Name cannot be empty".into()));
    }
    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4(),
        name: name.to_string(),
        created_at: now,
        last_active_at: now,
        online_sessions: 0,
    };
    {
        let db = state.db.lock().await;
        db.insert_user(&user)?;
    }
    info!(user_id = %user.id, "user registered");
    let token = auth::issue_token(user.id, &state.config.jwt_secret)?;
    Ok(Json(AuthResponse {
        token,
        user: UserView::from(&user),
    }))
}

async fn auth_login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ServerError> {
    let user = {
        let db = state.db.lock().await;
        db.get_user(req.user_id)
            .map_err(|_| ServerError::AuthenticationFailed)?
    };
    let token = auth::issue_token(user.id, &state.config.jwt_secret)?;
    Ok(Json(AuthResponse {
        token,
        user: UserView::from(&user),
    }))
}

/// Creating a group does not add the creator as a member; they join with the
/// returned code like anyone else.
async fn group_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateGroupRequest>,
) -> Result<Json<GroupView>, ServerError> {
    let user_id = bearer(&headers, &state)?;
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ServerError::BadRequest("Group name cannot be empty".into()));
    }

    let group = {
        let db = state.db.lock().await;
        db.get_user(user_id)?;

        let mut rng = rand::thread_rng();
        let mut code = group_code(&mut rng);
        let mut attempts = 0;
        while db.code_exists(&code)? {
            attempts += 1;
            if attempts > 100 {
                return Err(ServerError::Internal(
                    "could not generate a unique group code".into(),
                ));
            }
            code = group_code(&mut rng);
        }

        let group = Group {
            id: Uuid::new_v4(),
            name: name.to_string(),
            code,
            description: req.description.trim().to_string(),
            created_by: user_id,
            theme: req.theme.unwrap_or_default(),
            created_at: Utc::now(),
        };
        db.insert_group(&group)?;
        group
    };
    info!(group_id = %group.id, created_by = %user_id, "group created");

    Ok(Json(GroupView::new(&group, 0)))
}

async fn group_join(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<JoinGroupRequest>,
) -> Result<Json<JoinGroupResponse>, ServerError> {
    let user_id = bearer(&headers, &state)?;
    let target = match (req.code, req.group_id) {
        (Some(code), _) => JoinTarget::Code(code),
        (None, Some(id)) => JoinTarget::Id(id),
        (None, None) => {
            return Err(ServerError::BadRequest(
                "Either code or groupId is required".into(),
            ))
        }
    };
    let outcome = membership::join_group(&state, user_id, target).await?;

    let profiles = {
        let db = state.db.lock().await;
        db.group_member_profiles(outcome.group.id)?
    };
    if outcome.newly_joined {
        state
            .connections
            .broadcast_room(
                outcome.group.id,
                membership::member_count_update(&profiles),
                None,
            )
            .await;
    }
    Ok(Json(JoinGroupResponse {
        group: GroupView::new(&outcome.group, profiles.len()),
        anonymous_name: outcome.member.anonymous_name,
    }))
}

async fn group_list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<GroupView>>, ServerError> {
    let user_id = bearer(&headers, &state)?;
    let db = state.db.lock().await;
    let groups = db.groups_for_user(user_id)?;
    let mut views = Vec::with_capacity(groups.len());
    for group in &groups {
        views.push(GroupView::new(group, db.member_count(group.id)?));
    }
    Ok(Json(views))
}

async fn group_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(group_id): Path<Uuid>,
) -> Result<Json<GroupView>, ServerError> {
    let user_id = bearer(&headers, &state)?;
    let db = state.db.lock().await;
    let group = db.get_group(group_id).map_err(not_found_group)?;
    if db.group_member(group_id, user_id)?.is_none() {
        return Err(ServerError::NotAMember);
    }
    let count = db.member_count(group_id)?;
    Ok(Json(GroupView::new(&group, count)))
}

async fn group_members(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(group_id): Path<Uuid>,
) -> Result<Json<Vec<MemberView>>, ServerError> {
    let user_id = bearer(&headers, &state)?;
    let db = state.db.lock().await;
    db.get_group(group_id).map_err(not_found_group)?;
    if db.group_member(group_id, user_id)?.is_none() {
        return Err(ServerError::NotAMember);
    }
    let profiles = db.group_member_profiles(group_id)?;
    Ok(Json(profiles.iter().map(MemberView::from).collect()))
}

async fn group_remove_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(group_id): Path<Uuid>,
    Json(req): Json<RemoveUserRequest>,
) -> Result<Json<OkResponse>, ServerError> {
    let actor = bearer(&headers, &state)?;
    membership::remove_user(&state, group_id, actor, req.user_id).await?;
    Ok(Json(OK))
}

async fn group_leave(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(group_id): Path<Uuid>,
) -> Result<Json<OkResponse>, ServerError> {
    let user_id = bearer(&headers, &state)?;
    membership::leave_group(&state, group_id, user_id).await?;
    Ok(Json(OK))
}

async fn group_set_theme(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(group_id): Path<Uuid>,
    Json(req): Json<ThemeRequest>,
) -> Result<Json<OkResponse>, ServerError> {
    let user_id = bearer(&headers, &state)?;
    {
        let db = state.db.lock().await;
        db.get_group(group_id).map_err(not_found_group)?;
        if db.group_member(group_id, user_id)?.is_none() {
            return Err(ServerError::NotAMember);
        }
        db.set_group_theme(group_id, req.theme)?;
    }
    state
        .connections
        .broadcast_room(
            group_id,
            ServerEvent::ThemeUpdated(ThemeUpdated {
                group_id,
                theme: req.theme,
            }),
            None,
        )
        .await;
    Ok(Json(OK))
}

/// History excludes tombstoned messages (the store does that) and anything
/// from a blocked partner, in either direction.
async fn message_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(group_id): Path<Uuid>,
) -> Result<Json<Vec<MessagePayload>>, ServerError> {
    let user_id = bearer(&headers, &state)?;
    let db = state.db.lock().await;
    db.get_group(group_id).map_err(not_found_group)?;
    if db.is_removed_from_group(group_id, user_id)? {
        return Err(ServerError::RemovedFromGroup);
    }
    if db.group_member(group_id, user_id)?.is_none() {
        return Err(ServerError::NotAMember);
    }
    let blocked = db.blocked_partners(user_id)?;
    let messages = db.messages_for_group(group_id)?;
    Ok(Json(
        messages
            .iter()
            .filter(|m| !blocked.contains(&m.sender_id))
            .map(message_payload)
            .collect(),
    ))
}

async fn message_edit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(message_id): Path<Uuid>,
    Json(req): Json<EditMessageRequest>,
) -> Result<Json<MessagePayload>, ServerError> {
    let user_id = bearer(&headers, &state)?;
    let payload = delivery::edit_message(&state, user_id, message_id, &req.text).await?;
    Ok(Json(payload))
}

async fn message_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(message_id): Path<Uuid>,
) -> Result<Json<OkResponse>, ServerError> {
    let user_id = bearer(&headers, &state)?;
    delivery::delete_message(&state, user_id, message_id).await?;
    Ok(Json(OK))
}

async fn block_create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<BlockRequest>,
) -> Result<Json<OkResponse>, ServerError> {
    let user_id = bearer(&headers, &state)?;
    if req.user_id == user_id {
        return Err(ServerError::BadRequest("You cannot block yourself".into()));
    }
    let db = state.db.lock().await;
    db.get_user(req.user_id)
        .map_err(|_| ServerError::NotFound("User not found".into()))?;
    db.block_user(user_id, req.user_id)?;
    Ok(Json(OK))
}

async fn block_remove(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(blocked_user): Path<Uuid>,
) -> Result<Json<OkResponse>, ServerError> {
    let user_id = bearer(&headers, &state)?;
    let db = state.db.lock().await;
    if !db.unblock_user(user_id, blocked_user)? {
        return Err(ServerError::NotFound("Block relation not found".into()));
    }
    Ok(Json(OK))
}

async fn user_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(target): Path<Uuid>,
) -> Result<Json<StatusResponse>, ServerError> {
    bearer(&headers, &state)?;
    let db = state.db.lock().await;
    let user = db.get_user(target).map_err(|e| match e {
        StoreError::NotFound => ServerError::NotFound("User not found".into()),
        other => other.into(),
    })?;
    let is_online = user.is_online();
    Ok(Json(StatusResponse {
        user_id: user.id,
        name: user.name,
        is_online,
        last_active: user.last_active_at,
    }))
}

fn not_found_group(e: StoreError) -> ServerError {
    match e {
        StoreError::NotFound => ServerError::NotFound("Group not found".into()),
        other => other.into(),
    }
}
