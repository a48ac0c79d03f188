use crate::api::AppState;
use crate::auth::AuthenticatedUser;
use crate::chat::{MessageView, PageInfo};
use crate::error::{AppError, Result};
use crate::models::{ConversationKind, PublicProfile};
use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>> {
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        active_connections: state.chat.active_connections(),
    }))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub active_connections: usize,
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.to_string())
}

fn bearer_user(state: &AppState, headers: &HeaderMap) -> Result<AuthenticatedUser> {
    state
        .chat
        .authenticator
        .authenticate_private(bearer_token(headers).as_deref())
}

/// Open (or return the existing) private conversation with another member.
///
/// Requires a bearer token; the target must be a known user. Answers 201
/// when this call created the conversation and 200 when it already existed.
pub async fn open_private_conversation(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<OpenConversationRequest>,
) -> Result<(StatusCode, Json<ConversationResponse>)> {
    let caller = bearer_user(&state, &headers)?;

    if request.target_user_id.is_nil() {
        return Err(AppError::Validation("target_user_id is required".to_string()));
    }
    if request.target_user_id == caller.user_id {
        return Err(AppError::Validation(
            "Cannot open a conversation with yourself".to_string(),
        ));
    }

    let target = state
        .chat
        .store
        .get_user(&request.target_user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {} not found", request.target_user_id)))?;

    let (conversation, created) = state
        .chat
        .store
        .get_or_create_private_conversation(caller.user_id, request.target_user_id)
        .await?;

    let caller_profile = state.chat.author_profile(caller.user_id).await;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((
        status,
        Json(ConversationResponse {
            id: conversation.id,
            kind: conversation.kind,
            created_at: conversation.created_at,
            last_activity_at: conversation.last_activity_at,
            created,
            participants: vec![caller_profile, target.public_profile()],
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct OpenConversationRequest {
    pub target_user_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub id: Uuid,
    pub kind: ConversationKind,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub created: bool,
    pub participants: Vec<PublicProfile>,
}

/// Paginated room history over plain HTTP.
///
/// Community rooms are world-readable, same as the community websocket.
/// Conversation rooms demand a bearer token from one of the participants.
pub async fn chat_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>> {
    let room_id = params
        .room_id
        .unwrap_or_else(|| state.chat.config.default_room.clone());
    let page = params.page.unwrap_or(1).max(1);
    let limit = match params.limit {
        None | Some(0) => state.chat.config.default_page_size,
        Some(limit) => limit.min(state.chat.config.max_page_size),
    };

    if let Ok(conversation_id) = Uuid::parse_str(&room_id) {
        if let Some(conversation) = state.chat.store.get_conversation(&conversation_id).await? {
            let caller = bearer_user(&state, &headers)?;
            if !state
                .chat
                .store
                .is_participant(&conversation.id, caller.user_id)
                .await?
            {
                return Err(AppError::Authorization(
                    "Not a participant of this conversation".to_string(),
                ));
            }
        }
    }

    let history = state
        .chat
        .store
        .list_room_messages(&room_id, page, limit)
        .await?;
    let pagination = PageInfo::from(&history);

    let mut messages = Vec::with_capacity(history.messages.len());
    for message in history.messages {
        let author = state.chat.author_profile(message.author_id).await;
        messages.push(MessageView::hydrate(message, author));
    }

    Ok(Json(HistoryResponse {
        room_id,
        messages,
        pagination,
    }))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub room_id: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub room_id: String,
    pub messages: Vec<MessageView>,
    pub pagination: PageInfo,
}

/// Who is online right now. Backs the member-list sidebar.
pub async fn online_users(State(state): State<AppState>) -> Json<OnlineUsersResponse> {
    let user_ids = state.chat.presence.online_user_ids();
    Json(OnlineUsersResponse {
        count: user_ids.len(),
        user_ids,
    })
}

#[derive(Debug, Serialize)]
pub struct OnlineUsersResponse {
    pub count: usize,
    pub user_ids: Vec<Uuid>,
}

/// Prometheus metrics endpoint
///
/// Returns metrics in Prometheus text exposition format
pub async fn metrics() -> (StatusCode, String) {
    let metrics = crate::metrics::gather_metrics();
    (StatusCode::OK, metrics)
}
