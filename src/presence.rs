//! In-memory presence: who is online, on which connection, in which room.
//!
//! Both indexes (by connection, by username) live behind one lock so no
//! operation can observe a half-updated session.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::store::DEFAULT_ROOM;

pub type ConnId = Uuid;

/// One live user session, bound to exactly one connection.
#[derive(Debug, Clone)]
pub struct Session {
    pub conn_id: ConnId,
    pub username: String,
    /// Primary room; DM subscriptions are tracked by the router only.
    pub room: String,
    pub is_typing: bool,
    pub joined_at: DateTime<Utc>,
    seq: u64,
}

/// Wire shape of a presence entry in `online_users` / `user_joined` / `user_left`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserInfo {
    pub username: String,
    #[serde(rename = "joinedAt")]
    pub joined_at: DateTime<Utc>,
    #[serde(rename = "isTyping")]
    pub is_typing: bool,
}

impl From<&Session> for UserInfo {
    fn from(s: &Session) -> Self {
        Self {
            username: s.username.clone(),
            joined_at: s.joined_at,
            is_typing: s.is_typing,
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum RegisterError {
    #[error("Username is already taken")]
    UsernameTaken,
    #[error("Already logged in")]
    AlreadyRegistered,
}

#[derive(Default)]
struct Inner {
    by_conn: HashMap<ConnId, Session>,
    by_name: HashMap<String, ConnId>,
    next_seq: u64,
}

#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RwLock<Inner>>,
}

impl Registry {
    /// Bind a connection to a username. Exactly one of two racing logins
    /// with the same name can win; the check and both inserts happen under
    /// a single write lock.
    pub async fn register(&self, conn_id: ConnId, username: &str) -> Result<Session, RegisterError> {
        let mut g = self.inner.write().await;
        if g.by_conn.contains_key(&conn_id) {
            return Err(RegisterError::AlreadyRegistered);
        }
        if g.by_name.contains_key(username) {
            return Err(RegisterError::UsernameTaken);
        }
        let seq = g.next_seq;
        g.next_seq += 1;
        let session = Session {
            conn_id,
            username: username.to_owned(),
            room: DEFAULT_ROOM.to_owned(),
            is_typing: false,
            joined_at: Utc::now(),
            seq,
        };
        g.by_name.insert(username.to_owned(), conn_id);
        g.by_conn.insert(conn_id, session.clone());
        Ok(session)
    }

    /// Remove and return the session, if any. Disconnect before login is
    /// not an error, so an absent connection is a quiet `None`.
    pub async fn unregister(&self, conn_id: ConnId) -> Option<Session> {
        let mut g = self.inner.write().await;
        let session = g.by_conn.remove(&conn_id)?;
        g.by_name.remove(&session.username);
        Some(session)
    }

    pub async fn lookup_connection(&self, conn_id: ConnId) -> Option<Session> {
        self.inner.read().await.by_conn.get(&conn_id).cloned()
    }

    pub async fn lookup_username(&self, username: &str) -> Option<Session> {
        let g = self.inner.read().await;
        let conn_id = g.by_name.get(username)?;
        g.by_conn.get(conn_id).cloned()
    }

    /// Sessions whose primary room is `room`, ordered by join time.
    pub async fn list_in_room(&self, room: &str) -> Vec<Session> {
        let g = self.inner.read().await;
        let mut sessions: Vec<Session> = g
            .by_conn
            .values()
            .filter(|s| s.room == room)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.seq);
        sessions
    }

    pub async fn all_sessions(&self) -> Vec<Session> {
        let g = self.inner.read().await;
        let mut sessions: Vec<Session> = g.by_conn.values().cloned().collect();
        sessions.sort_by_key(|s| s.seq);
        sessions
    }

    pub async fn set_typing(&self, conn_id: ConnId, is_typing: bool) -> Option<Session> {
        let mut g = self.inner.write().await;
        let session = g.by_conn.get_mut(&conn_id)?;
        session.is_typing = is_typing;
        Some(session.clone())
    }

    pub async fn set_room(&self, conn_id: ConnId, room: &str) -> Option<Session> {
        let mut g = self.inner.write().await;
        let session = g.by_conn.get_mut(&conn_id)?;
        session.room = room.to_owned();
        Some(session.clone())
    }
}
