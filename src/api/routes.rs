use crate::api::{handlers, AppState};
use crate::chat::{community_chat_handler, private_chat_handler};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

/// Build the main API router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health and observability
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics))
        // WebSocket surfaces
        .route("/ws/chat", get(community_chat_handler))
        .route("/ws/private", get(private_chat_handler))
        // Conversations and history
        .route(
            "/v1/conversations/private",
            post(handlers::open_private_conversation),
        )
        .route("/v1/chat/history", get(handlers::chat_history))
        // Presence roster
        .route("/v1/presence/online", get(handlers::online_users))
        // Add state
        .with_state(state)
        // Add middleware
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
}
