//! Live connection registry.
//!
//! Every open websocket gets a [`SocketId`] and a bounded outbound channel.
//! A connection may be focused on at most one group room at a time; room
//! broadcasts walk the registry and `try_send` to each matching socket.
//! Delivery is best effort: a slow or closed peer drops the event and the
//! drop is logged, it never blocks the sender.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::warn;
use uuid::Uuid;

use veil_shared::protocol::ServerEvent;

pub type SocketId = Uuid;

/// Outbound queue depth per socket.
pub const OUTBOUND_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct Connection {
    user_id: Uuid,
    tx: mpsc::Sender<ServerEvent>,
    room: Option<Uuid>,
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<Mutex<HashMap<SocketId, Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh socket and hand back its outbound receiver.
    pub async fn register(
        &self,
        socket_id: SocketId,
        user_id: Uuid,
    ) -> mpsc::Receiver<ServerEvent> {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let mut inner = self.inner.lock().await;
        inner.insert(
            socket_id,
            Connection {
                user_id,
                tx,
                room: None,
            },
        );
        rx
    }

    pub async fn deregister(&self, socket_id: SocketId) {
        self.inner.lock().await.remove(&socket_id);
    }

    /// Focus the socket on a group room; leaving any previous room.
    pub async fn join_room(&self, socket_id: SocketId, group_id: Uuid) {
        if let Some(conn) = self.inner.lock().await.get_mut(&socket_id) {
            conn.room = Some(group_id);
        }
    }

    /// Sockets currently focused on a room, with their owning user ids.
    pub async fn room_recipients(
        &self,
        group_id: Uuid,
    ) -> Vec<(SocketId, Uuid, mpsc::Sender<ServerEvent>)> {
        self.inner
            .lock()
            .await
            .iter()
            .filter(|(_, c)| c.room == Some(group_id))
            .map(|(id, c)| (*id, c.user_id, c.tx.clone()))
            .collect()
    }

    pub async fn send_to_socket(&self, socket_id: SocketId, event: ServerEvent) {
        let tx = {
            let inner = self.inner.lock().await;
            inner.get(&socket_id).map(|c| c.tx.clone())
        };
        if let Some(tx) = tx {
            deliver(&tx, socket_id, event);
        }
    }

    /// Broadcast to every socket focused on the room, optionally skipping one.
    pub async fn broadcast_room(
        &self,
        group_id: Uuid,
        event: ServerEvent,
        except: Option<SocketId>,
    ) {
        let targets = self.room_recipients(group_id).await;
        for (socket_id, _, tx) in targets {
            if Some(socket_id) == except {
                continue;
            }
            deliver(&tx, socket_id, event.clone());
        }
    }

    /// Send to every connected socket.
    pub async fn broadcast_all(&self, event: ServerEvent) {
        let targets: Vec<(SocketId, mpsc::Sender<ServerEvent>)> = self
            .inner
            .lock()
            .await
            .iter()
            .map(|(id, c)| (*id, c.tx.clone()))
            .collect();
        for (socket_id, tx) in targets {
            deliver(&tx, socket_id, event.clone());
        }
    }

    /// Send to every socket owned by a user, regardless of room focus.
    pub async fn send_to_user(&self, user_id: Uuid, event: ServerEvent) {
        let targets: Vec<(SocketId, mpsc::Sender<ServerEvent>)> = self
            .inner
            .lock()
            .await
            .iter()
            .filter(|(_, c)| c.user_id == user_id)
            .map(|(id, c)| (*id, c.tx.clone()))
            .collect();
        for (socket_id, tx) in targets {
            deliver(&tx, socket_id, event.clone());
        }
    }
}

fn deliver(tx: &mpsc::Sender<ServerEvent>, socket_id: SocketId, event: ServerEvent) {
    if let Err(e) = tx.try_send(event) {
        warn!(%socket_id, error = %e, "dropping event for slow or closed socket");
    }
}
