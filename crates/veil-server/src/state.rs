//! Shared application state threaded through HTTP and websocket handlers.

use std::sync::Arc;

use tokio::sync::Mutex;

use veil_store::Database;

use crate::config::ServerConfig;
use crate::presence::PresenceRegistry;
use crate::rooms::ConnectionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub db: Arc<Mutex<Database>>,
    pub connections: ConnectionRegistry,
    pub presence: Arc<PresenceRegistry>,
}

impl AppState {
    pub fn new(config: ServerConfig, db: Database) -> Self {
        let config = Arc::new(config);
        let db = Arc::new(Mutex::new(db));
        let connections = ConnectionRegistry::new();
        let presence = Arc::new(PresenceRegistry::new(
            Arc::clone(&db),
            connections.clone(),
            config.offline_grace,
        ));
        Self {
            config,
            db,
            connections,
            presence,
        }
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        let db = Database::open_in_memory().expect("in-memory database");
        Self::new(ServerConfig::default(), db)
    }
}
