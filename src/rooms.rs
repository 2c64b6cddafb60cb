//! Room membership and event fan-out.
//!
//! A room is just a name mapped to the set of subscribed connections. Each
//! connection registers an unbounded sender feeding its write task, so events
//! queued for one subscriber always reach it in issue order, and a dead
//! subscriber never stalls the rest.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use tokio::sync::{mpsc, RwLock};

use crate::{events::ServerEvent, presence::ConnId};

pub type EventTx = mpsc::UnboundedSender<ServerEvent>;

#[derive(Default)]
struct Inner {
    members: HashMap<String, HashSet<ConnId>>,
    senders: HashMap<ConnId, EventTx>,
}

#[derive(Clone, Default)]
pub struct RoomRouter {
    inner: Arc<RwLock<Inner>>,
}

impl RoomRouter {
    pub async fn connect(&self, conn_id: ConnId, tx: EventTx) {
        self.inner.write().await.senders.insert(conn_id, tx);
    }

    /// Drop the outbound channel and every membership, DM rooms included.
    pub async fn drop_connection(&self, conn_id: ConnId) {
        let mut g = self.inner.write().await;
        g.senders.remove(&conn_id);
        g.members.retain(|_, set| {
            set.remove(&conn_id);
            !set.is_empty()
        });
    }

    pub async fn join(&self, room: &str, conn_id: ConnId) {
        let mut g = self.inner.write().await;
        g.members.entry(room.to_owned()).or_default().insert(conn_id);
    }

    pub async fn leave(&self, room: &str, conn_id: ConnId) {
        let mut g = self.inner.write().await;
        if let Some(set) = g.members.get_mut(room) {
            set.remove(&conn_id);
            if set.is_empty() {
                g.members.remove(room);
            }
        }
    }

    pub async fn is_member(&self, room: &str, conn_id: ConnId) -> bool {
        self.inner
            .read()
            .await
            .members
            .get(room)
            .is_some_and(|set| set.contains(&conn_id))
    }

    /// Fire-and-forget delivery to every subscriber of `room`, except the
    /// optionally excluded connection. A closed receiver only means that
    /// client is gone; its cleanup happens on its own disconnect path.
    pub async fn broadcast(&self, room: &str, event: ServerEvent, exclude: Option<ConnId>) {
        let targets: Vec<EventTx> = {
            let g = self.inner.read().await;
            match g.members.get(room) {
                Some(set) => set
                    .iter()
                    .filter(|id| Some(**id) != exclude)
                    .filter_map(|id| g.senders.get(id).cloned())
                    .collect(),
                None => return,
            }
        };
        for tx in targets {
            let _ = tx.send(event.clone());
        }
    }

    /// Unicast; no-op when the connection is no longer live.
    pub async fn send_to(&self, conn_id: ConnId, event: ServerEvent) {
        let tx = self.inner.read().await.senders.get(&conn_id).cloned();
        if let Some(tx) = tx {
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;
    use uuid::Uuid;

    fn err(message: &str) -> ServerEvent {
        ServerEvent::Error { message: message.into() }
    }

    async fn client(router: &RoomRouter) -> (ConnId, UnboundedReceiver<ServerEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        router.connect(conn_id, tx).await;
        (conn_id, rx)
    }

    #[tokio::test]
    async fn join_is_idempotent() {
        let router = RoomRouter::default();
        let (a, mut rx) = client(&router).await;
        router.join("general", a).await;
        router.join("general", a).await;

        router.broadcast("general", err("once"), None).await;
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_excludes_one_connection() {
        let router = RoomRouter::default();
        let (a, mut arx) = client(&router).await;
        let (b, mut brx) = client(&router).await;
        router.join("general", a).await;
        router.join("general", b).await;

        router.broadcast("general", err("hi"), Some(a)).await;
        assert!(arx.try_recv().is_err());
        assert_eq!(brx.try_recv().unwrap(), err("hi"));
    }

    #[tokio::test]
    async fn leave_of_non_member_is_noop() {
        let router = RoomRouter::default();
        let (a, mut arx) = client(&router).await;
        let (b, _brx) = client(&router).await;
        router.join("general", a).await;
        router.leave("general", b).await;
        router.leave("nowhere", b).await;

        router.broadcast("general", err("still here"), None).await;
        assert!(arx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn drop_connection_removes_every_membership() {
        let router = RoomRouter::default();
        let (a, mut arx) = client(&router).await;
        router.join("general", a).await;
        router.join("dm:alice:bob", a).await;

        router.drop_connection(a).await;
        assert!(!router.is_member("general", a).await);
        assert!(!router.is_member("dm:alice:bob", a).await);

        router.broadcast("general", err("gone"), None).await;
        router.send_to(a, err("gone")).await;
        assert!(arx.try_recv().is_err());
    }

    #[tokio::test]
    async fn events_for_one_subscriber_arrive_in_issue_order() {
        let router = RoomRouter::default();
        let (a, mut rx) = client(&router).await;
        router.join("general", a).await;

        router.broadcast("general", err("first"), None).await;
        router.send_to(a, err("second")).await;
        assert_eq!(rx.try_recv().unwrap(), err("first"));
        assert_eq!(rx.try_recv().unwrap(), err("second"));
    }
}
