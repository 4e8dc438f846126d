//! Group endpoint handlers.
//!
//! Thin wrappers over [`GroupLifecycle`]: validate input, delegate, and
//! broadcast the refreshed group view into the group's room so connected
//! clients see roster changes without polling.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use domain::models::channel::ServerEvent;
use domain::models::group::{
    CloseGroupRequest, CreateGroupRequest, DeleteGroupRequest, GroupView, InviteActionRequest,
    InviteUserRequest, JoinActionRequest, JoinRequestRequest, LeaveGroupRequest,
    MemberStatusRequest, PendingInviteView, RemoveMemberRequest,
};
use domain::models::message::MessagesResponse;
use persistence::repositories::MessageRepository;

use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::UserAuth;

const DEFAULT_HISTORY_LIMIT: i64 = 50;
const MAX_HISTORY_LIMIT: i64 = 200;

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct MyGroupsResponse {
    pub groups: Vec<GroupView>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct MyInvitesResponse {
    pub invites: Vec<PendingInviteView>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub limit: Option<i64>,
}

/// POST /api/v1/groups
pub async fn create_group(
    State(state): State<AppState>,
    auth: UserAuth,
    Json(req): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<GroupView>), ApiError> {
    req.validate()?;
    let view = state.lifecycle.create_group(auth.user_id, req).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// DELETE /api/v1/groups
pub async fn delete_group(
    State(state): State<AppState>,
    auth: UserAuth,
    Json(req): Json<DeleteGroupRequest>,
) -> Result<StatusCode, ApiError> {
    state.lifecycle.delete_group(auth.user_id, req.group_id).await?;
    state.coordinator.clear(req.group_id).await;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/groups/close
pub async fn close_group(
    State(state): State<AppState>,
    auth: UserAuth,
    Json(req): Json<CloseGroupRequest>,
) -> Result<Json<GroupView>, ApiError> {
    let view = state.lifecycle.close_group(auth.user_id, req.group_id).await?;
    broadcast_update(&state, &view).await;
    Ok(Json(view))
}

/// POST /api/v1/groups/invite
pub async fn invite_user(
    State(state): State<AppState>,
    auth: UserAuth,
    Json(req): Json<InviteUserRequest>,
) -> Result<Json<GroupView>, ApiError> {
    let view = state
        .lifecycle
        .invite_user(auth.user_id, req.group_id, req.user, req.ride)
        .await?;
    broadcast_update(&state, &view).await;
    Ok(Json(view))
}

/// POST /api/v1/groups/accept-invite
pub async fn accept_invite(
    State(state): State<AppState>,
    auth: UserAuth,
    Json(req): Json<InviteActionRequest>,
) -> Result<Json<GroupView>, ApiError> {
    let view = state
        .lifecycle
        .accept_invite(auth.user_id, req.group_id)
        .await?;
    broadcast_update(&state, &view).await;
    Ok(Json(view))
}

/// POST /api/v1/groups/reject-invite
pub async fn reject_invite(
    State(state): State<AppState>,
    auth: UserAuth,
    Json(req): Json<InviteActionRequest>,
) -> Result<Json<GroupView>, ApiError> {
    let view = state
        .lifecycle
        .reject_invite(auth.user_id, req.group_id)
        .await?;
    broadcast_update(&state, &view).await;
    Ok(Json(view))
}

/// POST /api/v1/groups/join-request
pub async fn request_join(
    State(state): State<AppState>,
    auth: UserAuth,
    Json(req): Json<JoinRequestRequest>,
) -> Result<Json<GroupView>, ApiError> {
    let view = state
        .lifecycle
        .request_join(auth.user_id, req.group_id, req.ride)
        .await?;
    broadcast_update(&state, &view).await;
    Ok(Json(view))
}

/// POST /api/v1/groups/accept-join-request
pub async fn accept_join_request(
    State(state): State<AppState>,
    auth: UserAuth,
    Json(req): Json<JoinActionRequest>,
) -> Result<Json<GroupView>, ApiError> {
    let view = state
        .lifecycle
        .accept_join_request(auth.user_id, req.group_id, req.user)
        .await?;
    broadcast_update(&state, &view).await;
    Ok(Json(view))
}

/// POST /api/v1/groups/reject-join-request
pub async fn reject_join_request(
    State(state): State<AppState>,
    auth: UserAuth,
    Json(req): Json<JoinActionRequest>,
) -> Result<Json<GroupView>, ApiError> {
    let view = state
        .lifecycle
        .reject_join_request(auth.user_id, req.group_id, req.user)
        .await?;
    broadcast_update(&state, &view).await;
    Ok(Json(view))
}

/// POST /api/v1/groups/remove
pub async fn remove_member(
    State(state): State<AppState>,
    auth: UserAuth,
    Json(req): Json<RemoveMemberRequest>,
) -> Result<Json<GroupView>, ApiError> {
    let view = state
        .lifecycle
        .remove_member(auth.user_id, req.group_id, req.user)
        .await?;
    // The removed member may have been mid-readiness; the coordinator
    // broadcasts the roster update and any countdown cancellation.
    state.coordinator.leave(req.group_id, req.user).await;
    broadcast_update(&state, &view).await;
    Ok(Json(view))
}

/// POST /api/v1/groups/leave
pub async fn leave_group(
    State(state): State<AppState>,
    auth: UserAuth,
    Json(req): Json<LeaveGroupRequest>,
) -> Result<Json<GroupView>, ApiError> {
    let view = state
        .lifecycle
        .leave_group(auth.user_id, req.group_id)
        .await?;
    state.coordinator.leave(req.group_id, auth.user_id).await;
    broadcast_update(&state, &view).await;
    Ok(Json(view))
}

/// PATCH /api/v1/groups/member-status
pub async fn set_member_status(
    State(state): State<AppState>,
    auth: UserAuth,
    Json(req): Json<MemberStatusRequest>,
) -> Result<Json<GroupView>, ApiError> {
    let view = state
        .lifecycle
        .set_member_status(auth.user_id, req.group_id, req.user, req.status)
        .await?;
    broadcast_update(&state, &view).await;
    Ok(Json(view))
}

/// GET /api/v1/groups/mine
pub async fn my_groups(
    State(state): State<AppState>,
    auth: UserAuth,
) -> Result<Json<MyGroupsResponse>, ApiError> {
    let groups = state.lifecycle.groups_for_member(auth.user_id).await?;
    let mut views = Vec::with_capacity(groups.len());
    for group in &groups {
        views.push(state.lifecycle.group_view(group).await?);
    }
    Ok(Json(MyGroupsResponse { groups: views }))
}

/// GET /api/v1/groups/my-invites
pub async fn my_invites(
    State(state): State<AppState>,
    auth: UserAuth,
) -> Result<Json<MyInvitesResponse>, ApiError> {
    let invites = state.lifecycle.pending_invites(auth.user_id).await?;
    Ok(Json(MyInvitesResponse { invites }))
}

/// GET /api/v1/groups/:group_id
pub async fn get_group(
    State(state): State<AppState>,
    auth: UserAuth,
    Path(group_id): Path<Uuid>,
) -> Result<Json<GroupView>, ApiError> {
    // Any roster presence (invite, request, member) may view the group.
    let view = state.lifecycle.get_group(group_id).await?;
    let on_roster = view.members.iter().any(|m| m.user.id == auth.user_id)
        || view.invites.iter().any(|e| e.user.id == auth.user_id)
        || view.requests.iter().any(|e| e.user.id == auth.user_id);
    if !on_roster {
        return Err(ApiError::Forbidden("Not on this group's roster".into()));
    }
    Ok(Json(view))
}

/// GET /api/v1/groups/:group_id/messages
///
/// Recent chat history in chronological order. Members only.
pub async fn group_messages(
    State(state): State<AppState>,
    auth: UserAuth,
    Path(group_id): Path<Uuid>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<MessagesResponse>, ApiError> {
    state.lifecycle.require_member(group_id, auth.user_id).await?;

    let limit = params
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    let messages = MessageRepository::new(state.pool.clone())
        .list_recent(group_id, limit)
        .await?;

    Ok(Json(MessagesResponse {
        messages: messages.into_iter().map(Into::into).collect(),
    }))
}

async fn broadcast_update(state: &AppState, view: &GroupView) {
    state
        .rooms
        .send(view.id, ServerEvent::GroupUpdate(Box::new(view.clone())))
        .await;
}
