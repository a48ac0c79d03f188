//! Reef Chat: presence-aware realtime chat for the Reefkeepers community.
//!
//! The service runs two websocket surfaces over one protocol. The
//! community surface (`/ws/chat`) admits everyone; guests can read,
//! follow typing indicators, and page through history, while identified
//! members can post. The private surface (`/ws/private`) requires a
//! verified token and carries one-to-one conversations plus online
//! status broadcasts. A small REST boundary covers conversation setup,
//! history reads, and the presence roster.
//!
//! Module map:
//!
//! - [`auth`]: token verification and per-surface connection identity
//! - [`presence`]: multi-connection online/offline tracking
//! - [`chat`]: wire protocol, rooms, event handlers, socket lifecycle
//! - [`state`]: message/user/conversation storage behind [`state::ChatStore`]
//! - [`api`]: axum router and REST handlers
//! - [`client`]: typed websocket client with reconnect support

pub mod api;
pub mod auth;
pub mod chat;
pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod presence;
pub mod state;

pub use config::Config;
pub use error::{AppError, Result};
