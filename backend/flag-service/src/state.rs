use std::sync::Arc;

use redis::aio::ConnectionManager;
use sqlx::PgPool;

use crate::cache::FlagCache;
use crate::config::Config;
use crate::services::FlagService;
use crate::websocket::ConnectionRegistry;

/// Shared application state, constructed once in `main` and cloned into
/// handlers. All collaborators are explicit; there is no global registry.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: PgPool,
    pub redis: ConnectionManager,
    pub cache: FlagCache,
    pub flags: FlagService,
    pub registry: ConnectionRegistry,
}
