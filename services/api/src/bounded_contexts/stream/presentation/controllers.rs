use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::IntoResponse,
    Json,
};
use futures_util::{SinkExt, StreamExt};
use uuid::Uuid;

use crate::shared::domain::errors::AppError;
use crate::shared::infrastructure::app_state::AppState;
use crate::shared::infrastructure::auth::AuthUser;

use crate::bounded_contexts::stream::application::dto::{
    AnalyticsResponse, JoinRequest, JoinResponse, LeaveResponse, ParticipantsResponse,
};

pub async fn join_stream(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    request: Option<Json<JoinRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let request = request.map(|Json(r)| r).unwrap_or_default();

    let (participant, is_reconnection, active_count) = state
        .stream_service
        .record_join(id, &user.did, request.geohash)
        .await?;
    let (token, room_name) = state.stream_service.issue_join_token(id, &user.did).await?;

    Ok(Json(JoinResponse::new(
        &participant,
        is_reconnection,
        active_count,
        token,
        room_name,
    )))
}

pub async fn leave_stream(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let active_count = state.stream_service.record_leave(id, &user.did).await?;
    Ok(Json(LeaveResponse {
        stream_session_id: id,
        active_count,
    }))
}

/// Public: active count only, never identities.
pub async fn get_participants(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let (session, active_count) = state.stream_service.participants_view(id).await?;
    Ok(Json(ParticipantsResponse {
        stream_session_id: session.id,
        active_count,
        locked: session.locked,
    }))
}

pub async fn get_analytics(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let analytics = state.stream_service.analytics_for_host(id, &user.did).await?;
    Ok(Json(AnalyticsResponse::from(analytics)))
}

/// WebSocket subscription to a session's participant events.
pub async fn subscribe_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, AppError> {
    // Reject before upgrading so unknown sessions get a proper 404.
    state.stream_service.participants_view(id).await?;
    Ok(ws.on_upgrade(move |socket| forward_events(state, id, socket)))
}

async fn forward_events(state: AppState, session_id: Uuid, socket: WebSocket) {
    let mut events = state.stream_service.subscribe(session_id);
    let (mut sink, mut source) = socket.split();

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(payload) = event else { break };
                if sink.send(Message::Text(payload)).await.is_err() {
                    break;
                }
            }
            incoming = source.next() => {
                match incoming {
                    // Subscribers only listen; any close or error unsubscribes.
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }
    // Dropping the receiver unsubscribes on the broadcaster's next write.
}
