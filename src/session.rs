//! Per-connection protocol handler.
//!
//! A connection is unauthenticated until its login lands in the presence
//! registry, then active until disconnect. Dispatch is keyed on that state:
//! events invalid for the current state are rejected up front instead of
//! failing somewhere inside.

use crate::{
    events::{ClientEvent, ServerEvent},
    presence::{ConnId, Registry, Session, UserInfo},
    rooms::RoomRouter,
    store::{MessageLog, DEFAULT_ROOM, HISTORY_LIMIT},
};

/// Canonical DM room for a pair of users, the same whichever side opens it.
pub fn dm_room_id(a: &str, b: &str) -> String {
    let (lesser, greater) = if a <= b { (a, b) } else { (b, a) };
    format!("dm:{lesser}:{greater}")
}

pub struct SessionHandler {
    conn_id: ConnId,
    registry: Registry,
    rooms: RoomRouter,
    log: MessageLog,
}

impl SessionHandler {
    pub fn new(conn_id: ConnId, registry: Registry, rooms: RoomRouter, log: MessageLog) -> Self {
        Self { conn_id, registry, rooms, log }
    }

    pub async fn handle(&self, event: ClientEvent) {
        match (self.registry.lookup_connection(self.conn_id).await, event) {
            (_, ClientEvent::Login { username }) => self.login(&username).await,
            (Some(session), event) => self.handle_active(&session, event).await,
            (None, event) => self.reject_unauthenticated(event).await,
        }
    }

    async fn handle_active(&self, session: &Session, event: ClientEvent) {
        match event {
            ClientEvent::Login { .. } => unreachable!("routed before state dispatch"),
            ClientEvent::SendMessage { content, room } => {
                self.send_message(session, &content, room).await
            }
            ClientEvent::TypingStart { room } => self.set_typing(session, room, true).await,
            ClientEvent::TypingStop { room } => self.set_typing(session, room, false).await,
            ClientEvent::JoinRoom { room } => self.join_room(session, &room).await,
            ClientEvent::OpenDm { target_username } => self.open_dm(session, &target_username).await,
        }
    }

    async fn reject_unauthenticated(&self, event: ClientEvent) {
        match event {
            // typing from an unknown session is noise, not an error
            ClientEvent::TypingStart { .. } | ClientEvent::TypingStop { .. } => {}
            _ => self.error("User not authenticated").await,
        }
    }

    /* ---------------- transitions ---------------- */

    async fn login(&self, username: &str) {
        let username = username.trim();
        if username.is_empty() {
            return self.login_error("Username is required").await;
        }
        let session = match self.registry.register(self.conn_id, username).await {
            Ok(session) => session,
            Err(reason) => return self.login_error(&reason.to_string()).await,
        };

        self.rooms.join(DEFAULT_ROOM, self.conn_id).await;
        self.send(ServerEvent::LoginSuccess {
            username: session.username.clone(),
            connection_id: self.conn_id,
        })
        .await;
        // history must land before any live event that follows it
        self.send_history(DEFAULT_ROOM).await;
        let users = self.snapshot(DEFAULT_ROOM).await;
        self.send(ServerEvent::OnlineUsers { users: users.clone() }).await;
        self.rooms
            .broadcast(
                DEFAULT_ROOM,
                ServerEvent::UserJoined { username: session.username, users },
                Some(self.conn_id),
            )
            .await;
        tracing::info!("user {username} joined the chat");
    }

    async fn send_message(&self, session: &Session, content: &str, room: Option<String>) {
        let content = content.trim();
        if content.is_empty() {
            return self.error("Message content is required").await;
        }
        let room = room.unwrap_or_else(|| DEFAULT_ROOM.to_owned());

        let message = match self.log.append(&session.username, content, &room).await {
            Ok(message) => message,
            Err(err) => {
                tracing::error!("failed to save message: {err}");
                return self.error("Failed to save message").await;
            }
        };

        let event = ServerEvent::NewMessage(message);
        self.rooms.broadcast(&room, event.clone(), None).await;
        // the sender always sees its own persisted message, subscribed or not
        if !self.rooms.is_member(&room, self.conn_id).await {
            self.send(event).await;
        }
        tracing::debug!("message from {} in {room}", session.username);
    }

    async fn set_typing(&self, session: &Session, room: Option<String>, is_typing: bool) {
        let room = room.unwrap_or_else(|| DEFAULT_ROOM.to_owned());
        if self.registry.set_typing(self.conn_id, is_typing).await.is_none() {
            return;
        }
        self.rooms
            .broadcast(
                &room,
                ServerEvent::UserTyping { username: session.username.clone(), is_typing },
                Some(self.conn_id),
            )
            .await;
    }

    async fn join_room(&self, session: &Session, room: &str) {
        let room = room.trim();
        if room.is_empty() {
            return self.error("Room name is required").await;
        }

        self.rooms.leave(&session.room, self.conn_id).await;
        self.registry.set_room(self.conn_id, room).await;
        self.rooms.join(room, self.conn_id).await;

        self.send_history(room).await;
        let users = self.snapshot(room).await;
        self.send(ServerEvent::OnlineUsers { users: users.clone() }).await;
        self.rooms
            .broadcast(
                room,
                ServerEvent::UserJoined { username: session.username.clone(), users },
                Some(self.conn_id),
            )
            .await;
        tracing::info!("user {} joined room {room}", session.username);
    }

    async fn open_dm(&self, session: &Session, target: &str) {
        let target = target.trim();
        if target.is_empty() {
            return self.error("targetUsername is required").await;
        }
        let room = dm_room_id(&session.username, target);

        // additive subscription, the caller's primary room is untouched
        self.rooms.join(&room, self.conn_id).await;
        if let Some(peer) = self.registry.lookup_username(target).await {
            self.rooms.join(&room, peer.conn_id).await;
            self.rooms
                .send_to(
                    peer.conn_id,
                    ServerEvent::DmOpened { room: room.clone(), with: session.username.clone() },
                )
                .await;
        }

        match self.log.fetch_recent(&room, HISTORY_LIMIT).await {
            Ok(messages) => {
                self.send(ServerEvent::DmHistory {
                    room: room.clone(),
                    with: target.to_owned(),
                    messages,
                })
                .await
            }
            Err(err) => {
                tracing::error!("failed to load dm history: {err}");
                self.error("Failed to load messages").await;
            }
        }
        self.send(ServerEvent::DmOpened { room, with: target.to_owned() }).await;
    }

    /// Valid from any state and idempotent; the registry removal is the
    /// authoritative "gone" signal, so a second call finds nothing to do.
    pub async fn disconnect(&self) {
        let departed = self.registry.unregister(self.conn_id).await;
        self.rooms.drop_connection(self.conn_id).await;
        if let Some(session) = departed {
            let users = self.snapshot(&session.room).await;
            self.rooms
                .broadcast(
                    &session.room,
                    ServerEvent::UserLeft { username: session.username.clone(), users },
                    None,
                )
                .await;
            tracing::info!("user {} disconnected", session.username);
        }
    }

    /* ---------------- emission helpers ---------------- */

    async fn send_history(&self, room: &str) {
        match self.log.fetch_recent(room, HISTORY_LIMIT).await {
            Ok(messages) => self.send(ServerEvent::MessageHistory { messages }).await,
            Err(err) => {
                tracing::error!("failed to load history for {room}: {err}");
                self.error("Failed to load messages").await;
            }
        }
    }

    async fn snapshot(&self, room: &str) -> Vec<UserInfo> {
        self.registry.list_in_room(room).await.iter().map(UserInfo::from).collect()
    }

    async fn send(&self, event: ServerEvent) {
        self.rooms.send_to(self.conn_id, event).await;
    }

    async fn error(&self, message: &str) {
        self.send(ServerEvent::Error { message: message.into() }).await;
    }

    async fn login_error(&self, message: &str) {
        self.send(ServerEvent::LoginError { message: message.into() }).await;
    }
}
