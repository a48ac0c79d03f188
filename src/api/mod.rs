pub mod handlers;
pub mod routes;

pub use routes::*;

use crate::chat::ChatState;
use axum::extract::FromRef;
use std::sync::Arc;
use std::time::Instant;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub chat: Arc<ChatState>,
    pub started_at: Instant,
}

/// Lets the websocket handlers extract `State<Arc<ChatState>>` from the
/// shared router state.
impl FromRef<AppState> for Arc<ChatState> {
    fn from_ref(state: &AppState) -> Self {
        state.chat.clone()
    }
}

impl AppState {
    pub fn new(chat: Arc<ChatState>) -> Self {
        Self {
            chat,
            started_at: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
