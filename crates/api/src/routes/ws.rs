//! Real-time channel endpoint.
//!
//! One socket per user, joined to at most one group room at a time. The
//! socket authenticates through a token query parameter at upgrade time,
//! then speaks tagged JSON events. Joining a group subscribes the socket
//! to that group's broadcast room; a forward task pumps room events into
//! the socket's sink and is torn down on leave or disconnect.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures_util::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;
use validator::Validate;

use domain::models::channel::{ClientEvent, ServerEvent};
use domain::models::message::MessageContent;
use persistence::repositories::{MessageRepository, UserRepository};

use crate::app::AppState;
use crate::error::ApiError;
use crate::services::coordinator::ReadinessError;
use crate::services::lifecycle::LifecycleError;

type Sink = Arc<Mutex<SplitSink<WebSocket, Message>>>;

/// The room this socket currently occupies, with its forward task.
struct JoinedRoom {
    group_id: Uuid,
    forward_task: JoinHandle<()>,
}

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: String,
}

/// GET /ws?token=...
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let claims = state
        .jwt
        .validate_access_token(&params.token)
        .map_err(|_| ApiError::Unauthorized("Invalid or expired token".into()))?;
    let user_id = claims
        .user_id()
        .map_err(|_| ApiError::Unauthorized("Invalid user ID in token".into()))?;

    let profile = UserRepository::new(state.pool.clone())
        .find_profile(user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Unknown user".into()))?;

    Ok(ws.on_upgrade(move |socket| handle_socket(state, socket, user_id, profile.display_name)))
}

async fn handle_socket(state: AppState, socket: WebSocket, user_id: Uuid, display_name: String) {
    let (sink, mut stream) = socket.split();
    let sink: Sink = Arc::new(Mutex::new(sink));

    debug!(user_id = %user_id, "Channel connected");

    let mut joined: Option<JoinedRoom> = None;

    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        let event = match serde_json::from_str::<ClientEvent>(&text) {
            Ok(event) => event,
            Err(_) => {
                send_event(
                    &sink,
                    &ServerEvent::Error {
                        kind: "validation_error".into(),
                        message: "Unrecognized or malformed event".into(),
                    },
                )
                .await;
                continue;
            }
        };

        match event {
            ClientEvent::JoinGroup { group_id } => {
                handle_join(&state, &sink, &mut joined, group_id, user_id, &display_name).await;
            }
            ClientEvent::LeaveGroup { group_id } => {
                if joined.as_ref().is_some_and(|j| j.group_id == group_id) {
                    leave_room(&state, &mut joined, user_id).await;
                }
            }
            ClientEvent::SendMessage { group_id, content } => {
                handle_send_message(&state, &sink, &joined, group_id, user_id, content).await;
            }
            ClientEvent::ToggleReadyStatus { group_id } => {
                handle_toggle_ready(&state, &sink, &joined, group_id, user_id).await;
            }
            ClientEvent::StartRide { group_id } => {
                handle_start_ride(&state, &sink, group_id, user_id).await;
            }
        }
    }

    // Disconnect implies leaving the current room.
    leave_room(&state, &mut joined, user_id).await;

    debug!(user_id = %user_id, "Channel disconnected");
}

async fn handle_join(
    state: &AppState,
    sink: &Sink,
    joined: &mut Option<JoinedRoom>,
    group_id: Uuid,
    user_id: Uuid,
    display_name: &str,
) {
    let group = match state.lifecycle.require_member(group_id, user_id).await {
        Ok(group) => group,
        Err(e) => {
            send_event(sink, &error_event(e)).await;
            return;
        }
    };

    // One room at a time; joining another (or rejoining the same) leaves
    // the current one first, which also resets readiness.
    leave_room(state, joined, user_id).await;

    let mut rx = state.rooms.subscribe(group_id).await;
    let forward_sink = Arc::clone(sink);
    let forward_task = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&event) else {
                continue;
            };
            if forward_sink
                .lock()
                .await
                .send(Message::Text(text))
                .await
                .is_err()
            {
                break;
            }
        }
    });
    *joined = Some(JoinedRoom {
        group_id,
        forward_task,
    });

    // During the readiness phase a joining member enters the session as
    // not-ready; the coordinator broadcasts the refreshed roster.
    if group.status.in_readiness_phase() {
        state.coordinator.join(group_id, user_id, display_name).await;
    }
}

async fn leave_room(state: &AppState, joined: &mut Option<JoinedRoom>, user_id: Uuid) {
    let Some(room) = joined.take() else {
        return;
    };
    room.forward_task.abort();

    // The coordinator broadcasts the roster update and any countdown
    // cancellation before releasing its session lock.
    state.coordinator.leave(room.group_id, user_id).await;

    state.rooms.prune(room.group_id).await;
}

async fn handle_send_message(
    state: &AppState,
    sink: &Sink,
    joined: &Option<JoinedRoom>,
    group_id: Uuid,
    user_id: Uuid,
    content: String,
) {
    if !joined.as_ref().is_some_and(|j| j.group_id == group_id) {
        send_event(sink, &not_joined_event()).await;
        return;
    }
    // Membership can be revoked while the socket stays open.
    if let Err(e) = state.lifecycle.require_member(group_id, user_id).await {
        send_event(sink, &error_event(e)).await;
        return;
    }

    let payload = MessageContent { content };
    if payload.validate().is_err() {
        send_event(
            sink,
            &ServerEvent::Error {
                kind: "validation_error".into(),
                message: "Message must be non-blank and at most 2000 characters".into(),
            },
        )
        .await;
        return;
    }

    let stored = MessageRepository::new(state.pool.clone())
        .insert_message(group_id, user_id, &payload.content)
        .await;
    match stored {
        Ok(message) => {
            state
                .rooms
                .send(group_id, ServerEvent::ReceiveMessage(message.into()))
                .await;
        }
        Err(e) => {
            warn!(group_id = %group_id, error = %e, "Failed to store chat message");
            send_event(
                sink,
                &ServerEvent::Error {
                    kind: "internal_error".into(),
                    message: "Failed to store message".into(),
                },
            )
            .await;
        }
    }
}

async fn handle_toggle_ready(
    state: &AppState,
    sink: &Sink,
    joined: &Option<JoinedRoom>,
    group_id: Uuid,
    user_id: Uuid,
) {
    if !joined.as_ref().is_some_and(|j| j.group_id == group_id) {
        send_event(sink, &not_joined_event()).await;
        return;
    }
    let group = match state.lifecycle.require_member(group_id, user_id).await {
        Ok(group) => group,
        Err(e) => {
            send_event(sink, &error_event(e)).await;
            return;
        }
    };
    if !group.status.in_readiness_phase() {
        send_event(
            sink,
            &ServerEvent::Error {
                kind: "state_error".into(),
                message: format!(
                    "Readiness is only available while the group is closed, not {}",
                    group.status
                ),
            },
        )
        .await;
        return;
    }

    let member_ids = match state.lifecycle.member_ids(group_id).await {
        Ok(ids) => ids,
        Err(e) => {
            send_event(sink, &error_event(e)).await;
            return;
        }
    };

    // The coordinator broadcasts the post-toggle roster and countdown
    // transitions itself, in session order.
    match state
        .coordinator
        .toggle_ready(group_id, user_id, &member_ids)
        .await
    {
        Ok(_) => {}
        Err(ReadinessError::NotJoined) => {
            send_event(sink, &not_joined_event()).await;
        }
    }
}

async fn handle_start_ride(state: &AppState, sink: &Sink, group_id: Uuid, user_id: Uuid) {
    match state.lifecycle.start_ride(user_id, group_id).await {
        Ok(()) => {
            state.coordinator.clear(group_id).await;
            state.rooms.send(group_id, ServerEvent::RideStarted).await;
        }
        Err(e) => {
            send_event(sink, &error_event(e)).await;
        }
    }
}

async fn send_event(sink: &Sink, event: &ServerEvent) {
    let Ok(text) = serde_json::to_string(event) else {
        return;
    };
    let _ = sink.lock().await.send(Message::Text(text)).await;
}

fn not_joined_event() -> ServerEvent {
    ServerEvent::Error {
        kind: "state_error".into(),
        message: "Join the group channel first".into(),
    }
}

/// Maps a lifecycle failure onto a channel error event with the same
/// stable code the HTTP surface would use.
fn error_event(err: LifecycleError) -> ServerEvent {
    let api = ApiError::from(err);
    let message = match &api {
        ApiError::Internal(_) => "An internal error occurred".to_string(),
        ApiError::Unauthorized(m)
        | ApiError::Forbidden(m)
        | ApiError::NotFound(m)
        | ApiError::Conflict(m)
        | ApiError::Validation(m)
        | ApiError::State(m)
        | ApiError::ServiceUnavailable(m) => m.clone(),
    };
    ServerEvent::Error {
        kind: api.code().to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_event_carries_stable_code() {
        let event = error_event(LifecycleError::Forbidden("admin only".into()));
        match event {
            ServerEvent::Error { kind, message } => {
                assert_eq!(kind, "forbidden");
                assert_eq!(message, "admin only");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_database_errors_are_not_leaked() {
        let event = error_event(LifecycleError::Database(sqlx::Error::PoolClosed));
        match event {
            ServerEvent::Error { kind, message } => {
                assert_eq!(kind, "internal_error");
                assert!(!message.contains("Pool"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
