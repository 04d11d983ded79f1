use crate::config::ServerConfig;
use jsonsync_core::SyncCoordinator;
use std::sync::Arc;

/// Application state shared across all routes
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<SyncCoordinator>,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(coordinator: Arc<SyncCoordinator>, config: ServerConfig) -> Self {
        Self {
            coordinator,
            config,
        }
    }
}
