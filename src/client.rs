//! Typed chat client.
//!
//! A thin wrapper over a websocket connection that speaks the chat wire
//! protocol with real types instead of raw JSON. It carries the three
//! pieces of client-side state the protocol expects callers to keep:
//!
//! - which rooms this session joined, so a reconnect can restore them,
//! - the online roster, folded from `user_status_changed` broadcasts,
//! - outstanding `ack_id`s, so replies can be matched to requests.
//!
//! The caller drives the read side by polling [`ChatClient::next_event`];
//! folding into the roster and ack tracker happens on the way through, so
//! the returned event can still be handled (or ignored) freely.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chat::{ClientFrame, ClientMessage, ServerMessage};
use crate::error::{AppError, Result};

type WsConnection = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Exponential backoff schedule for [`ChatClient::reconnect`].
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: u32,
    /// `None` retries until the connection comes back.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            multiplier: 2,
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts.map(|max| attempt > max).unwrap_or(false)
    }
}

/// Who is online, folded from presence broadcasts.
#[derive(Debug, Default)]
pub struct OnlineRoster {
    online: HashSet<Uuid>,
}

impl OnlineRoster {
    /// Replace the view with a roster fetched out of band, typically from
    /// `GET /v1/presence/online` right after connecting.
    pub fn seed(&mut self, user_ids: impl IntoIterator<Item = Uuid>) {
        self.online = user_ids.into_iter().collect();
    }

    /// Apply one status transition. Returns true if the view changed.
    pub fn apply(&mut self, user_id: Uuid, is_online: bool) -> bool {
        if is_online {
            self.online.insert(user_id)
        } else {
            self.online.remove(&user_id)
        }
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.online.contains(&user_id)
    }

    pub fn len(&self) -> usize {
        self.online.len()
    }

    pub fn is_empty(&self) -> bool {
        self.online.is_empty()
    }
}

/// Outstanding acknowledgements, keyed by the `ack_id` we sent.
#[derive(Debug, Default)]
pub struct AckTracker {
    next_id: u64,
    pending: HashMap<String, &'static str>,
}

impl AckTracker {
    /// Mint a fresh ack id for `operation` and remember it as pending.
    pub fn issue(&mut self, operation: &'static str) -> String {
        self.next_id += 1;
        let ack_id = self.next_id.to_string();
        self.pending.insert(ack_id.clone(), operation);
        ack_id
    }

    /// Match an incoming ack to its request. Unknown or absent ids come
    /// back as `None`; acks arrive exactly once, so the entry is dropped.
    pub fn resolve(&mut self, ack_id: Option<&str>) -> Option<&'static str> {
        ack_id.and_then(|id| self.pending.remove(id))
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

fn compose_url(base_url: &str, token: Option<&str>) -> String {
    match token {
        Some(token) if base_url.contains('?') => format!("{}&token={}", base_url, token),
        Some(token) => format!("{}?token={}", base_url, token),
        None => base_url.to_string(),
    }
}

/// Chat client for one websocket surface.
pub struct ChatClient {
    url: String,
    policy: ReconnectPolicy,
    ws: WsConnection,
    acks: AckTracker,
    roster: OnlineRoster,
    rooms: HashSet<String>,
    declared_user: Option<Uuid>,
    connection_id: Option<String>,
}

impl ChatClient {
    /// Connect and wait for the server's welcome frame.
    pub async fn connect(base_url: &str, token: Option<&str>) -> Result<Self> {
        Self::connect_with(base_url, token, ReconnectPolicy::default()).await
    }

    pub async fn connect_with(
        base_url: &str,
        token: Option<&str>,
        policy: ReconnectPolicy,
    ) -> Result<Self> {
        let url = compose_url(base_url, token);
        let (ws, _) = connect_async(&url).await?;

        let mut client = Self {
            url,
            policy,
            ws,
            acks: AckTracker::default(),
            roster: OnlineRoster::default(),
            rooms: HashSet::new(),
            declared_user: None,
            connection_id: None,
        };
        client.await_welcome().await?;
        Ok(client)
    }

    async fn await_welcome(&mut self) -> Result<()> {
        match self.next_event().await? {
            Some(ServerMessage::Welcome { authenticated, .. }) => {
                info!(
                    connection_id = self.connection_id.as_deref().unwrap_or(""),
                    authenticated, "Connected to chat"
                );
                Ok(())
            }
            _ => Err(AppError::Internal(
                "Server did not open with a welcome frame".to_string(),
            )),
        }
    }

    /// The connection id assigned by the server at welcome time.
    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    pub fn roster(&self) -> &OnlineRoster {
        &self.roster
    }

    pub fn roster_mut(&mut self) -> &mut OnlineRoster {
        &mut self.roster
    }

    pub fn pending_acks(&self) -> usize {
        self.acks.pending_count()
    }

    /// Pull the next server event, folding presence and ack bookkeeping
    /// along the way. `None` means the stream ended.
    pub async fn next_event(&mut self) -> Result<Option<ServerMessage>> {
        while let Some(frame) = self.ws.next().await {
            match frame? {
                Message::Text(text) => {
                    let message: ServerMessage = serde_json::from_str(&text)?;
                    self.fold(&message);
                    return Ok(Some(message));
                }
                Message::Binary(_) => warn!("Ignoring binary frame"),
                Message::Close(_) => return Ok(None),
                // Transport ping/pong is answered by the websocket layer.
                _ => {}
            }
        }
        Ok(None)
    }

    fn fold(&mut self, message: &ServerMessage) {
        match message {
            ServerMessage::Welcome { connection_id, .. } => {
                self.connection_id = Some(connection_id.clone());
            }
            ServerMessage::UserStatusChanged { user_id, is_online } => {
                self.roster.apply(*user_id, *is_online);
            }
            ServerMessage::Ack {
                ack_id,
                success,
                error,
                ..
            } => {
                if let Some(operation) = self.acks.resolve(ack_id.as_deref()) {
                    if *success {
                        debug!(operation, "Acknowledged");
                    } else {
                        warn!(operation, error = ?error, "Server refused event");
                    }
                }
            }
            _ => {}
        }
    }

    async fn send_frame(&mut self, frame: &ClientFrame) -> Result<()> {
        let json = serde_json::to_string(frame)?;
        self.ws.send(Message::Text(json)).await?;
        Ok(())
    }

    async fn send_with_ack(
        &mut self,
        operation: &'static str,
        message: ClientMessage,
    ) -> Result<String> {
        let ack_id = self.acks.issue(operation);
        self.send_frame(&ClientFrame {
            ack_id: Some(ack_id.clone()),
            message,
        })
        .await?;
        Ok(ack_id)
    }

    /// Join a room and remember it for reconnects. Returns the ack id.
    pub async fn join_room(&mut self, room_id: &str) -> Result<String> {
        self.rooms.insert(room_id.to_string());
        self.send_with_ack(
            "join_room",
            ClientMessage::JoinRoom {
                room_id: room_id.to_string(),
            },
        )
        .await
    }

    pub async fn send_message(&mut self, room_id: &str, body: &str) -> Result<String> {
        self.send_with_ack(
            "send_message",
            ClientMessage::SendMessage {
                room_id: room_id.to_string(),
                body: body.to_string(),
            },
        )
        .await
    }

    pub async fn edit_message(&mut self, message_id: Uuid, body: &str) -> Result<String> {
        self.send_with_ack(
            "edit_message",
            ClientMessage::EditMessage {
                message_id,
                body: body.to_string(),
            },
        )
        .await
    }

    pub async fn delete_message(&mut self, message_id: Uuid) -> Result<String> {
        self.send_with_ack("delete_message", ClientMessage::DeleteMessage { message_id })
            .await
    }

    /// Declare who this connection belongs to (community surface only).
    /// The declaration is replayed automatically after a reconnect.
    pub async fn authenticate(&mut self, user_id: Uuid) -> Result<String> {
        self.declared_user = Some(user_id);
        self.send_with_ack("authenticate_user", ClientMessage::AuthenticateUser { user_id })
            .await
    }

    pub async fn send_private_message(
        &mut self,
        conversation_id: Uuid,
        body: &str,
    ) -> Result<String> {
        self.send_with_ack(
            "send_private_message",
            ClientMessage::SendPrivateMessage {
                conversation_id,
                body: body.to_string(),
            },
        )
        .await
    }

    /// Fire-and-forget typing indicator; the server never acks these.
    pub async fn typing(&mut self, room_id: &str, is_typing: bool) -> Result<()> {
        self.send_frame(&ClientFrame {
            ack_id: None,
            message: ClientMessage::Typing {
                room_id: room_id.to_string(),
                is_typing,
            },
        })
        .await
    }

    pub async fn load_messages(
        &mut self,
        room_id: Option<&str>,
        page: u32,
        limit: u32,
    ) -> Result<String> {
        self.send_with_ack(
            "load_messages",
            ClientMessage::LoadMessages {
                room_id: room_id.map(|room| room.to_string()),
                page,
                limit,
            },
        )
        .await
    }

    /// Reconnect with exponential backoff, then restore session state:
    /// the identity declaration first, then every room joined before the
    /// drop. Pending acks from the old connection are discarded; their
    /// replies died with the socket.
    pub async fn reconnect(&mut self) -> Result<()> {
        let mut attempt: u32 = 1;
        loop {
            if self.policy.exhausted(attempt) {
                return Err(AppError::Internal(format!(
                    "Gave up reconnecting after {} attempts",
                    attempt - 1
                )));
            }

            let backoff = self.policy.backoff(attempt);
            debug!(attempt, backoff_ms = backoff.as_millis() as u64, "Reconnecting");
            tokio::time::sleep(backoff).await;

            match connect_async(&self.url).await {
                Ok((ws, _)) => {
                    self.ws = ws;
                    self.acks = AckTracker::default();
                    self.connection_id = None;
                    self.await_welcome().await?;

                    if let Some(user_id) = self.declared_user {
                        self.send_with_ack(
                            "authenticate_user",
                            ClientMessage::AuthenticateUser { user_id },
                        )
                        .await?;
                    }
                    let rooms: Vec<String> = self.rooms.iter().cloned().collect();
                    for room_id in rooms {
                        self.send_with_ack("join_room", ClientMessage::JoinRoom { room_id })
                            .await?;
                    }

                    info!(attempt, "Reconnected to chat");
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Reconnect attempt failed");
                    attempt += 1;
                }
            }
        }
    }
}
