//! Presence tracking with an offline grace period.
//!
//! Each websocket counts as one session against the user's per-row session
//! counter in the store. A closing socket does not mark the user offline
//! immediately: a per-socket grace timer fires after the configured grace
//! window and only then releases that session. A client that reconnects
//! within the window opens a new session before the old one is released, so
//! the user is never observed offline across a quick refresh.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use veil_shared::protocol::{PresenceUpdate, ServerEvent};
use veil_store::Database;

use crate::rooms::{ConnectionRegistry, SocketId};

type LiveSessions = Arc<Mutex<HashMap<Uuid, HashSet<SocketId>>>>;

pub struct PresenceRegistry {
    db: Arc<Mutex<Database>>,
    connections: ConnectionRegistry,
    grace: Duration,
    live: LiveSessions,
}

impl PresenceRegistry {
    pub fn new(
        db: Arc<Mutex<Database>>,
        connections: ConnectionRegistry,
        grace: Duration,
    ) -> Self {
        Self {
            db,
            connections,
            grace,
            live: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// A socket opened: count the session and announce the user online.
    pub async fn on_connect(&self, user_id: Uuid, socket_id: SocketId) {
        {
            let mut live = self.live.lock().await;
            live.entry(user_id).or_default().insert(socket_id);
        }
        let now = Utc::now();
        let started = {
            let db = self.db.lock().await;
            db.begin_session(user_id, now)
        };
        let sessions = match started {
            Ok(n) => n,
            Err(e) => {
                warn!(%user_id, error = %e, "failed to record session start");
                // The session was never counted, so its grace timer must not
                // release anything later.
                let mut live = self.live.lock().await;
                if let Some(sockets) = live.get_mut(&user_id) {
                    sockets.remove(&socket_id);
                    if sockets.is_empty() {
                        live.remove(&user_id);
                    }
                }
                return;
            }
        };
        debug!(%user_id, sessions, "session opened");
        self.connections
            .broadcast_all(ServerEvent::PresenceUpdate(PresenceUpdate {
                user_id,
                is_online: true,
                last_active: now,
            }))
            .await;
    }

    /// A socket closed: start the grace timer for its session.
    ///
    /// The session counter is not touched until the timer fires, so a
    /// reconnect within the window keeps the user continuously online.
    pub async fn on_disconnect(&self, user_id: Uuid, socket_id: SocketId) {
        let db = Arc::clone(&self.db);
        let connections = self.connections.clone();
        let live = Arc::clone(&self.live);
        // The deadline must be fixed here, not at the task's first poll, or
        // the grace window starts late when the runtime is busy.
        let timer = tokio::time::sleep(self.grace);
        tokio::spawn(async move {
            timer.await;
            release_session(db, connections, live, user_id, socket_id).await;
        });
    }

    /// Client heartbeat: refresh the user's last-active timestamp.
    pub async fn ping(&self, user_id: Uuid) {
        let db = self.db.lock().await;
        if let Err(e) = db.touch_last_active(user_id, Utc::now()) {
            warn!(%user_id, error = %e, "failed to refresh last-active");
        }
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        let db = self.db.lock().await;
        db.is_user_online(user_id).unwrap_or(false)
    }
}

/// Grace expired for a socket: release its session and announce the user's
/// resulting state. A no-op if the socket was already released.
async fn release_session(
    db: Arc<Mutex<Database>>,
    connections: ConnectionRegistry,
    live: LiveSessions,
    user_id: Uuid,
    socket_id: SocketId,
) {
    {
        let mut live = live.lock().await;
        let Some(sockets) = live.get_mut(&user_id) else {
            return;
        };
        if !sockets.remove(&socket_id) {
            return;
        }
        if sockets.is_empty() {
            live.remove(&user_id);
        }
    }
    let now = Utc::now();
    let sessions = {
        let db = db.lock().await;
        match db.end_session(user_id, now) {
            Ok(n) => n,
            Err(e) => {
                warn!(%user_id, error = %e, "failed to record session end");
                return;
            }
        }
    };
    debug!(%user_id, sessions, "session released");
    connections
        .broadcast_all(ServerEvent::PresenceUpdate(PresenceUpdate {
            user_id,
            is_online: sessions > 0,
            last_active: now,
        }))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use veil_store::User;

    async fn registry_with_user() -> (PresenceRegistry, Arc<Mutex<Database>>, Uuid) {
        let db = Database::open_in_memory().unwrap();
        let user_id = Uuid::new_v4();
        let now = Utc::now();
        db.insert_user(&User {
            id: user_id,
            name: "Test User".into(),
            created_at: now,
            last_active_at: now,
            online_sessions: 0,
        })
        .unwrap();
        let db = Arc::new(Mutex::new(db));
        let registry = PresenceRegistry::new(
            Arc::clone(&db),
            ConnectionRegistry::new(),
            Duration::from_secs(8),
        );
        (registry, db, user_id)
    }

    async fn session_count(db: &Arc<Mutex<Database>>, user_id: Uuid) -> i64 {
        let db = db.lock().await;
        let user = db.get_user(user_id).unwrap();
        user.online_sessions
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_within_grace_stays_online() {
        let (registry, db, user_id) = registry_with_user().await;
        let first = Uuid::new_v4();
        registry.on_connect(user_id, first).await;
        registry.on_disconnect(user_id, first).await;

        // Reconnect before the grace window closes.
        tokio::time::advance(Duration::from_secs(3)).await;
        let second = Uuid::new_v4();
        registry.on_connect(user_id, second).await;

        // Old session's grace expires; the new one keeps the user online.
        tokio::time::advance(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;
        assert_eq!(session_count(&db, user_id).await, 1);
        assert!(registry.is_online(user_id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn all_sessions_closed_in_any_order_reach_zero() {
        let (registry, db, user_id) = registry_with_user().await;
        let sockets: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for &s in &sockets {
            registry.on_connect(user_id, s).await;
        }
        assert_eq!(session_count(&db, user_id).await, 3);

        registry.on_disconnect(user_id, sockets[1]).await;
        tokio::time::advance(Duration::from_secs(2)).await;
        registry.on_disconnect(user_id, sockets[2]).await;
        tokio::time::advance(Duration::from_secs(2)).await;
        registry.on_disconnect(user_id, sockets[0]).await;

        tokio::time::advance(Duration::from_secs(9)).await;
        tokio::task::yield_now().await;
        assert_eq!(session_count(&db, user_id).await, 0);
        assert!(!registry.is_online(user_id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_within_grace_broadcasts_no_offline() {
        let (registry, _db, user_id) = registry_with_user().await;
        let observer = Uuid::new_v4();
        let mut observer_rx = registry
            .connections
            .register(observer, Uuid::new_v4())
            .await;

        let first = Uuid::new_v4();
        registry.on_connect(user_id, first).await;
        registry.on_disconnect(user_id, first).await;
        tokio::time::advance(Duration::from_secs(3)).await;
        registry.on_connect(user_id, Uuid::new_v4()).await;
        tokio::time::advance(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;

        while let Ok(event) = observer_rx.try_recv() {
            if let ServerEvent::PresenceUpdate(update) = event {
                assert!(
                    update.is_online,
                    "observed a spurious offline broadcast: {update:?}"
                );
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_disconnect_releases_once() {
        let (registry, db, user_id) = registry_with_user().await;
        let socket = Uuid::new_v4();
        registry.on_connect(user_id, socket).await;
        registry.on_disconnect(user_id, socket).await;
        registry.on_disconnect(user_id, socket).await;

        tokio::time::advance(Duration::from_secs(9)).await;
        tokio::task::yield_now().await;
        assert_eq!(session_count(&db, user_id).await, 0);
    }

    #[tokio::test]
    async fn failed_session_start_leaves_no_live_entry() {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let registry = PresenceRegistry::new(
            Arc::clone(&db),
            ConnectionRegistry::new(),
            Duration::from_secs(8),
        );

        // begin_session fails for a user that was never stored; the socket
        // must not stay in the live set where a later grace timer would
        // release a session that was never counted.
        let unknown = Uuid::new_v4();
        registry.on_connect(unknown, Uuid::new_v4()).await;
        assert!(registry.live.lock().await.get(&unknown).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn user_stays_online_during_grace() {
        let (registry, _db, user_id) = registry_with_user().await;
        let socket = Uuid::new_v4();
        registry.on_connect(user_id, socket).await;
        registry.on_disconnect(user_id, socket).await;

        tokio::time::advance(Duration::from_secs(4)).await;
        tokio::task::yield_now().await;
        assert!(registry.is_online(user_id).await);

        tokio::time::advance(Duration::from_secs(5)).await;
        tokio::task::yield_now().await;
        assert!(!registry.is_online(user_id).await);
    }
}
