//! Chat integration tests
//!
//! Drives the service the way the router wires it together: sessions
//! registered on a surface, frames dispatched through the handler, fan-out
//! observed on other connections' outbound queues. No sockets are bound;
//! everything runs against in-process state.

use reef_chat::{
    api::{
        handlers::{open_private_conversation, OpenConversationRequest},
        AppState,
    },
    auth::{ConnectionAuthenticator, Identity, TokenVerifier},
    chat::{
        disconnect_cleanup, handle_frame, AckData, ChatState, ClientFrame, ClientMessage,
        Connection, ServerMessage, Session, Surface,
    },
    config::ChatConfig,
    models::User,
    state::create_in_memory_store,
};
use axum::{extract::State, http::HeaderMap, Json};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

fn chat_state() -> Arc<ChatState> {
    let verifier = TokenVerifier::new("flow-test-secret", 3600);
    Arc::new(ChatState::new(
        ChatConfig::default(),
        create_in_memory_store(),
        ConnectionAuthenticator::new(verifier),
    ))
}

async fn seed_user(state: &Arc<ChatState>, handle: &str) -> User {
    let user = User::new(
        handle.to_string(),
        handle.to_string(),
        format!("{}@example.com", handle),
    );
    state.store.upsert_user(&user).await.unwrap();
    user
}

fn connect(
    state: &Arc<ChatState>,
    surface: Surface,
    identity: Identity,
) -> (Arc<Connection>, UnboundedReceiver<ServerMessage>) {
    state
        .connections
        .register(Session::new(surface, identity), None)
}

async fn send(
    state: &Arc<ChatState>,
    connection: &Arc<Connection>,
    ack_id: &str,
    message: ClientMessage,
) {
    handle_frame(
        state,
        connection,
        ClientFrame {
            ack_id: Some(ack_id.to_string()),
            message,
        },
    )
    .await;
}

async fn next(rx: &mut UnboundedReceiver<ServerMessage>) -> ServerMessage {
    rx.recv().await.expect("connection queue closed")
}

fn into_ack(message: ServerMessage) -> (bool, Option<AckData>, Option<String>) {
    match message {
        ServerMessage::Ack {
            success,
            data,
            error,
            ..
        } => (success, data, error),
        other => panic!("expected ack, got {:?}", other),
    }
}

fn message_view(data: Option<AckData>) -> reef_chat::chat::MessageView {
    match data {
        Some(AckData::Message(view)) => view,
        other => panic!("expected message payload, got {:?}", other),
    }
}

/// Join a room and swallow the ack.
async fn join(
    state: &Arc<ChatState>,
    connection: &Arc<Connection>,
    rx: &mut UnboundedReceiver<ServerMessage>,
    room: &str,
) {
    send(
        state,
        connection,
        "join",
        ClientMessage::JoinRoom {
            room_id: room.to_string(),
        },
    )
    .await;
    let (success, _, error) = into_ack(next(rx).await);
    assert!(success, "join failed: {:?}", error);
}

#[cfg(test)]
mod community_rooms {
    use super::*;

    /// One full evening in a room: three people join, two converse, one
    /// corrects a message, one retracts one, and the lurker reads it all
    /// back. Every connection sees the same fan-out as it happens.
    #[tokio::test]
    async fn test_room_conversation_end_to_end() {
        let state = chat_state();
        let pearl = seed_user(&state, "pearl").await;
        let otto = seed_user(&state, "otto").await;

        let (pearl_conn, mut pearl_rx) = connect(
            &state,
            Surface::Community,
            Identity::Declared { user_id: pearl.id },
        );
        let (otto_conn, mut otto_rx) = connect(
            &state,
            Surface::Community,
            Identity::Declared { user_id: otto.id },
        );
        let (lurker_conn, mut lurker_rx) = connect(&state, Surface::Community, Identity::Guest);

        join(&state, &pearl_conn, &mut pearl_rx, "main-chat").await;
        join(&state, &otto_conn, &mut otto_rx, "main-chat").await;
        match next(&mut pearl_rx).await {
            ServerMessage::UserJoined { room_id, user } => {
                assert_eq!(room_id, "main-chat");
                assert_eq!(user.unwrap().handle, "otto");
            }
            other => panic!("expected user_joined, got {:?}", other),
        }
        join(&state, &lurker_conn, &mut lurker_rx, "main-chat").await;
        // The guest join announces no profile.
        match next(&mut pearl_rx).await {
            ServerMessage::UserJoined { user, .. } => assert!(user.is_none()),
            other => panic!("expected user_joined, got {:?}", other),
        }
        match next(&mut otto_rx).await {
            ServerMessage::UserJoined { user, .. } => assert!(user.is_none()),
            other => panic!("expected user_joined, got {:?}", other),
        }

        // Pearl posts; everyone in the room gets the broadcast, and the
        // ack carries the same hydrated view.
        send(
            &state,
            &pearl_conn,
            "m1",
            ClientMessage::SendMessage {
                room_id: "main-chat".to_string(),
                body: "spotted aiptasia on the frag rack again".to_string(),
            },
        )
        .await;
        let broadcast_to_pearl = match next(&mut pearl_rx).await {
            ServerMessage::MessageReceived { message } => message,
            other => panic!("expected message_received, got {:?}", other),
        };
        let (success, data, _) = into_ack(next(&mut pearl_rx).await);
        assert!(success);
        let pearl_message = message_view(data);
        assert_eq!(pearl_message, broadcast_to_pearl);
        assert_eq!(pearl_message.author.handle, "pearl");

        match next(&mut otto_rx).await {
            ServerMessage::MessageReceived { message } => {
                assert_eq!(message, pearl_message);
            }
            other => panic!("expected message_received, got {:?}", other),
        }
        match next(&mut lurker_rx).await {
            ServerMessage::MessageReceived { message } => {
                assert_eq!(message, pearl_message);
            }
            other => panic!("expected message_received, got {:?}", other),
        }

        // Otto replies.
        send(
            &state,
            &otto_conn,
            "m2",
            ClientMessage::SendMessage {
                room_id: "main-chat".to_string(),
                body: "peppermint shrimp cleared mine in a week".to_string(),
            },
        )
        .await;
        assert!(matches!(
            next(&mut pearl_rx).await,
            ServerMessage::MessageReceived { .. }
        ));
        assert!(matches!(
            next(&mut otto_rx).await,
            ServerMessage::MessageReceived { .. }
        ));
        let (success, data, _) = into_ack(next(&mut otto_rx).await);
        assert!(success);
        let otto_message = message_view(data);
        assert!(matches!(
            next(&mut lurker_rx).await,
            ServerMessage::MessageReceived { .. }
        ));

        // Pearl fixes a typo in her post.
        send(
            &state,
            &pearl_conn,
            "e1",
            ClientMessage::EditMessage {
                message_id: pearl_message.id,
                body: "spotted aiptasia on the frag rack again, third time".to_string(),
            },
        )
        .await;
        match next(&mut pearl_rx).await {
            ServerMessage::MessageEdited { message } => {
                assert!(message.edited_at.is_some());
            }
            other => panic!("expected message_edited, got {:?}", other),
        }
        let (success, _, _) = into_ack(next(&mut pearl_rx).await);
        assert!(success);
        assert!(matches!(
            next(&mut otto_rx).await,
            ServerMessage::MessageEdited { .. }
        ));
        assert!(matches!(
            next(&mut lurker_rx).await,
            ServerMessage::MessageEdited { .. }
        ));

        // Otto thinks better of his reply.
        send(
            &state,
            &otto_conn,
            "d1",
            ClientMessage::DeleteMessage {
                message_id: otto_message.id,
            },
        )
        .await;
        match next(&mut otto_rx).await {
            ServerMessage::MessageDeleted {
                message_id,
                deleted,
                ..
            } => {
                assert_eq!(message_id, otto_message.id);
                assert!(deleted);
            }
            other => panic!("expected message_deleted, got {:?}", other),
        }
        let (success, _, _) = into_ack(next(&mut otto_rx).await);
        assert!(success);
        assert!(matches!(
            next(&mut pearl_rx).await,
            ServerMessage::MessageDeleted { .. }
        ));
        assert!(matches!(
            next(&mut lurker_rx).await,
            ServerMessage::MessageDeleted { .. }
        ));

        // The lurker pages the history back: only the edited survivor.
        send(
            &state,
            &lurker_conn,
            "h1",
            ClientMessage::LoadMessages {
                room_id: None,
                page: 1,
                limit: 0,
            },
        )
        .await;
        let (success, data, _) = into_ack(next(&mut lurker_rx).await);
        assert!(success);
        match data {
            Some(AckData::Messages(views)) => {
                assert_eq!(views.len(), 1);
                assert!(views[0].body.ends_with("third time"));
                assert_eq!(views[0].author.handle, "pearl");
            }
            other => panic!("expected history payload, got {:?}", other),
        }

        // Nothing else is left queued anywhere.
        assert!(pearl_rx.try_recv().is_err());
        assert!(otto_rx.try_recv().is_err());
        assert!(lurker_rx.try_recv().is_err());
    }

    /// Guests see exactly what members see; they just cannot write.
    #[tokio::test]
    async fn test_guest_read_parity() {
        let state = chat_state();
        let author = seed_user(&state, "urchin").await;

        let (author_conn, mut author_rx) = connect(
            &state,
            Surface::Community,
            Identity::Declared { user_id: author.id },
        );
        let (guest_conn, mut guest_rx) = connect(&state, Surface::Community, Identity::Guest);
        join(&state, &author_conn, &mut author_rx, "main-chat").await;
        join(&state, &guest_conn, &mut guest_rx, "main-chat").await;
        next(&mut author_rx).await; // guest's user_joined

        send(
            &state,
            &author_conn,
            "m",
            ClientMessage::SendMessage {
                room_id: "main-chat".to_string(),
                body: "urchin knocked over a frag plug again".to_string(),
            },
        )
        .await;
        let member_view = match next(&mut author_rx).await {
            ServerMessage::MessageReceived { message } => message,
            other => panic!("expected message_received, got {:?}", other),
        };
        let (success, _, _) = into_ack(next(&mut author_rx).await);
        assert!(success);
        let guest_view = match next(&mut guest_rx).await {
            ServerMessage::MessageReceived { message } => message,
            other => panic!("expected message_received, got {:?}", other),
        };
        assert_eq!(guest_view, member_view);

        // The guest's write is refused and leaves no trace.
        send(
            &state,
            &guest_conn,
            "w",
            ClientMessage::SendMessage {
                room_id: "main-chat".to_string(),
                body: "first!".to_string(),
            },
        )
        .await;
        let (success, _, error) = into_ack(next(&mut guest_rx).await);
        assert!(!success);
        assert!(error.unwrap().contains("Not authenticated"));
        let history = state
            .store
            .list_room_messages("main-chat", 1, 10)
            .await
            .unwrap();
        assert_eq!(history.total, 1);

        // Typing passes through for guests; members see no profile.
        handle_frame(
            &state,
            &guest_conn,
            ClientFrame {
                ack_id: None,
                message: ClientMessage::Typing {
                    room_id: "main-chat".to_string(),
                    is_typing: true,
                },
            },
        )
        .await;
        match next(&mut author_rx).await {
            ServerMessage::UserTyping { user, is_typing, .. } => {
                assert!(is_typing);
                assert!(user.is_none());
            }
            other => panic!("expected user_typing, got {:?}", other),
        }
        assert!(guest_rx.try_recv().is_err());
    }
}

#[cfg(test)]
mod presence_broadcasts {
    use super::*;

    /// The private surface hears exactly the 0-to-1 and 1-to-0 presence
    /// edges; the community surface hears none of it.
    #[tokio::test]
    async fn test_private_surface_observes_transitions() {
        let state = chat_state();
        let carol = seed_user(&state, "carol").await;
        let dave = seed_user(&state, "dave").await;

        let (_watcher, mut watcher_rx) = connect(
            &state,
            Surface::Private,
            Identity::Verified {
                user_id: carol.id,
                handle: "carol".to_string(),
            },
        );

        // Dave opens two community tabs and identifies in both.
        let (tab_one, mut tab_one_rx) = connect(&state, Surface::Community, Identity::Guest);
        send(
            &state,
            &tab_one,
            "a1",
            ClientMessage::AuthenticateUser { user_id: dave.id },
        )
        .await;
        let (success, _, _) = into_ack(next(&mut tab_one_rx).await);
        assert!(success);

        match next(&mut watcher_rx).await {
            ServerMessage::UserStatusChanged { user_id, is_online } => {
                assert_eq!(user_id, dave.id);
                assert!(is_online);
            }
            other => panic!("expected user_status_changed, got {:?}", other),
        }

        let (tab_two, mut tab_two_rx) = connect(&state, Surface::Community, Identity::Guest);
        send(
            &state,
            &tab_two,
            "a2",
            ClientMessage::AuthenticateUser { user_id: dave.id },
        )
        .await;
        let (success, _, _) = into_ack(next(&mut tab_two_rx).await);
        assert!(success);
        // Second tab is not a transition.
        assert!(watcher_rx.try_recv().is_err());

        // First tab closing leaves Dave online.
        disconnect_cleanup(&state, &tab_one).await;
        assert!(state.presence.is_online(dave.id));
        assert!(watcher_rx.try_recv().is_err());

        // Last tab closing is the offline edge.
        disconnect_cleanup(&state, &tab_two).await;
        match next(&mut watcher_rx).await {
            ServerMessage::UserStatusChanged { user_id, is_online } => {
                assert_eq!(user_id, dave.id);
                assert!(!is_online);
            }
            other => panic!("expected user_status_changed, got {:?}", other),
        }
        assert!(!state.presence.is_online(dave.id));

        // Community tabs never received a status frame.
        assert!(tab_one_rx.try_recv().is_err());
        assert!(tab_two_rx.try_recv().is_err());
    }
}

#[cfg(test)]
mod session_teardown {
    use super::*;

    /// An idle session shows up in the expiry sweep, and reaping it runs
    /// the full departure path: rooms emptied, members notified, presence
    /// dropped, registry cleared.
    #[tokio::test]
    async fn test_expired_session_reaped_with_departure() {
        let state = chat_state();
        let idle = seed_user(&state, "idle-hermit").await;

        let (idle_conn, mut idle_rx) = connect(&state, Surface::Community, Identity::Guest);
        send(
            &state,
            &idle_conn,
            "a",
            ClientMessage::AuthenticateUser { user_id: idle.id },
        )
        .await;
        let (success, _, _) = into_ack(next(&mut idle_rx).await);
        assert!(success);
        join(&state, &idle_conn, &mut idle_rx, "tank-builds").await;

        let (other_conn, mut other_rx) = connect(&state, Surface::Community, Identity::Guest);
        join(&state, &other_conn, &mut other_rx, "tank-builds").await;
        next(&mut idle_rx).await; // other's user_joined

        // Nothing is expired yet.
        assert!(state.connections.expired_connection_ids(300).is_empty());

        // Back-date the idle session past the timeout.
        idle_conn.session.write().last_active =
            chrono::Utc::now() - chrono::Duration::seconds(600);
        let expired = state.connections.expired_connection_ids(300);
        assert_eq!(expired, vec![idle_conn.id()]);

        disconnect_cleanup(&state, &idle_conn).await;

        match next(&mut other_rx).await {
            ServerMessage::UserLeft { room_id, user } => {
                assert_eq!(room_id, "tank-builds");
                assert_eq!(user.unwrap().handle, "idle-hermit");
            }
            other => panic!("expected user_left, got {:?}", other),
        }
        assert!(state.connections.get(&idle_conn.id()).is_none());
        assert!(!state.rooms.is_member("tank-builds", &idle_conn.id()));
        assert!(!state.presence.is_online(idle.id));

        // The socket closing later finds nothing left to do.
        disconnect_cleanup(&state, &idle_conn).await;
        assert!(other_rx.try_recv().is_err());
    }
}

#[cfg(test)]
mod private_conversations {
    use super::*;

    fn bearer_headers(app: &AppState, user: &User) -> HeaderMap {
        let token = app.chat.authenticator.verifier().issue(user).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            format!("Bearer {}", token).parse().unwrap(),
        );
        headers
    }

    /// The REST endpoint opens the conversation, the websocket carries it:
    /// both participants join the conversation room and exchange messages,
    /// and an outsider cannot get in.
    #[tokio::test]
    async fn test_open_then_chat_privately() {
        let state = chat_state();
        let app = AppState::new(state.clone());
        let alice = seed_user(&state, "alice").await;
        let bob = seed_user(&state, "bob").await;
        let mallory = seed_user(&state, "mallory").await;

        let (status, Json(conversation)) = open_private_conversation(
            State(app.clone()),
            bearer_headers(&app, &alice),
            Json(OpenConversationRequest {
                target_user_id: bob.id,
            }),
        )
        .await
        .unwrap();
        assert_eq!(status, axum::http::StatusCode::CREATED);
        let room = conversation.id.to_string();

        let (alice_conn, mut alice_rx) = connect(
            &state,
            Surface::Private,
            Identity::Verified {
                user_id: alice.id,
                handle: "alice".to_string(),
            },
        );
        let (bob_conn, mut bob_rx) = connect(
            &state,
            Surface::Private,
            Identity::Verified {
                user_id: bob.id,
                handle: "bob".to_string(),
            },
        );
        join(&state, &alice_conn, &mut alice_rx, &room).await;
        join(&state, &bob_conn, &mut bob_rx, &room).await;
        next(&mut alice_rx).await; // bob's user_joined

        send(
            &state,
            &alice_conn,
            "p1",
            ClientMessage::SendPrivateMessage {
                conversation_id: conversation.id,
                body: "trade you a zoa frag for a ricordea?".to_string(),
            },
        )
        .await;
        match next(&mut bob_rx).await {
            ServerMessage::PrivateMessageReceived {
                conversation_id,
                message,
            } => {
                assert_eq!(conversation_id, conversation.id);
                assert_eq!(message.room_id, room);
                assert_eq!(message.author.handle, "alice");
            }
            other => panic!("expected private_message_received, got {:?}", other),
        }
        assert!(matches!(
            next(&mut alice_rx).await,
            ServerMessage::PrivateMessageReceived { .. }
        ));
        let (success, _, _) = into_ack(next(&mut alice_rx).await);
        assert!(success);

        // An outsider cannot join the conversation room, even verified.
        let (mallory_conn, mut mallory_rx) = connect(
            &state,
            Surface::Private,
            Identity::Verified {
                user_id: mallory.id,
                handle: "mallory".to_string(),
            },
        );
        send(
            &state,
            &mallory_conn,
            "j",
            ClientMessage::JoinRoom {
                room_id: room.clone(),
            },
        )
        .await;
        let (success, _, error) = into_ack(next(&mut mallory_rx).await);
        assert!(!success);
        assert!(error.unwrap().contains("participant"));

        // The conversation never leaked onto other queues.
        assert!(bob_rx.try_recv().is_err());
        assert!(mallory_rx.try_recv().is_err());
    }

    /// Replies keep flowing in both directions and bump the conversation's
    /// activity timestamp each time.
    #[tokio::test]
    async fn test_replies_both_ways() {
        let state = chat_state();
        let finn = seed_user(&state, "finn").await;
        let gill = seed_user(&state, "gill").await;
        let (conversation, _) = state
            .store
            .get_or_create_private_conversation(finn.id, gill.id)
            .await
            .unwrap();
        let room = conversation.id.to_string();

        let (finn_conn, mut finn_rx) = connect(
            &state,
            Surface::Private,
            Identity::Verified {
                user_id: finn.id,
                handle: "finn".to_string(),
            },
        );
        let (gill_conn, mut gill_rx) = connect(
            &state,
            Surface::Private,
            Identity::Verified {
                user_id: gill.id,
                handle: "gill".to_string(),
            },
        );
        join(&state, &finn_conn, &mut finn_rx, &room).await;
        join(&state, &gill_conn, &mut gill_rx, &room).await;
        next(&mut finn_rx).await; // gill's user_joined

        let before = state
            .store
            .get_conversation(&conversation.id)
            .await
            .unwrap()
            .unwrap()
            .last_activity_at;

        send(
            &state,
            &finn_conn,
            "r0",
            ClientMessage::SendPrivateMessage {
                conversation_id: conversation.id,
                body: "reply 0".to_string(),
            },
        )
        .await;
        assert!(matches!(
            next(&mut finn_rx).await,
            ServerMessage::PrivateMessageReceived { .. }
        ));
        let (success, _, _) = into_ack(next(&mut finn_rx).await);
        assert!(success);
        match next(&mut gill_rx).await {
            ServerMessage::PrivateMessageReceived { message, .. } => {
                assert_eq!(message.body, "reply 0");
            }
            other => panic!("expected private_message_received, got {:?}", other),
        }

        send(
            &state,
            &gill_conn,
            "r1",
            ClientMessage::SendPrivateMessage {
                conversation_id: conversation.id,
                body: "reply 1".to_string(),
            },
        )
        .await;
        assert!(matches!(
            next(&mut gill_rx).await,
            ServerMessage::PrivateMessageReceived { .. }
        ));
        let (success, _, _) = into_ack(next(&mut gill_rx).await);
        assert!(success);
        match next(&mut finn_rx).await {
            ServerMessage::PrivateMessageReceived { message, .. } => {
                assert_eq!(message.body, "reply 1");
            }
            other => panic!("expected private_message_received, got {:?}", other),
        }

        let after = state
            .store
            .get_conversation(&conversation.id)
            .await
            .unwrap()
            .unwrap()
            .last_activity_at;
        assert!(after >= before);

        // Both sides of the thread are in one room history.
        let history = state.store.list_room_messages(&room, 1, 10).await.unwrap();
        assert_eq!(history.total, 2);
    }
}

#[cfg(test)]
mod frame_decoding {
    use super::*;

    /// A malformed frame never kills the session; the handler path only
    /// ever sees frames serde accepted.
    #[test]
    fn test_unknown_event_types_fail_decoding() {
        let malformed = [
            r#"{"type":"launch_missiles"}"#,
            r#"{"type":"send_message","room_id":"main-chat"}"#,
            r#"{"ack_id":"1"}"#,
            r#"not json at all"#,
        ];
        for raw in malformed {
            assert!(
                serde_json::from_str::<ClientFrame>(raw).is_err(),
                "{} should not decode",
                raw
            );
        }
    }

    #[test]
    fn test_wire_shapes_round_trip() {
        let frame: ClientFrame = serde_json::from_str(
            r#"{"ack_id":"9","type":"send_private_message","conversation_id":"0191c6a2-1111-7000-8000-000000000000","body":"psst"}"#,
        )
        .unwrap();
        assert_eq!(frame.ack_id.as_deref(), Some("9"));
        match frame.message {
            ClientMessage::SendPrivateMessage {
                conversation_id,
                body,
            } => {
                assert_eq!(
                    conversation_id,
                    Uuid::parse_str("0191c6a2-1111-7000-8000-000000000000").unwrap()
                );
                assert_eq!(body, "psst");
            }
            other => panic!("expected send_private_message, got {:?}", other),
        }

        let status = ServerMessage::UserStatusChanged {
            user_id: Uuid::nil(),
            is_online: true,
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains(r#""type":"user_status_changed""#));
        assert!(json.contains(r#""is_online":true"#));
    }
}
