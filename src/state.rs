//! Application state module
//!
//! Contains the shared state used across all server connections.

use std::sync::Arc;

use tracing::info;

use crate::config::ServerConfig;
use crate::error::Result;
use crate::game::persistence::{self, JsonWorldStore, WorldStore};
use crate::game::world::{World, DEFAULT_AREA};
use crate::net::session::SessionManager;
use crate::protocol::Dispatcher;

/// Application state shared across all connections
pub struct AppState {
    /// Server configuration
    pub config: ServerConfig,
    /// Game world state
    pub world: Arc<World>,
    /// Session manager for tracking connected clients
    pub sessions: Arc<SessionManager>,
    /// Client packet dispatcher
    pub dispatcher: Dispatcher,
    /// World object store
    pub store: Arc<dyn WorldStore>,
}

impl AppState {
    /// Create the application state with the JSON store under `data_path`
    pub fn new(config: ServerConfig) -> Result<Self> {
        let store: Arc<dyn WorldStore> = Arc::new(JsonWorldStore::new(&config.data_path));
        Self::with_store(config, store)
    }

    /// Create the application state around an existing store, loading saved objects
    pub fn with_store(config: ServerConfig, store: Arc<dyn WorldStore>) -> Result<Self> {
        let settings = config.world_settings();
        info!(
            autosave_interval_secs = config.autosave_interval_secs,
            autosave_ticks = settings.autosave_interval,
            editor_enabled = settings.editor_enabled,
            "Configuring world"
        );
        let world = Arc::new(World::with_settings(settings));

        let objects = store.load_objects(&config.world.area_name)?;
        let loaded = world.lock().load_objects(DEFAULT_AREA, objects)?;
        info!(area = %config.world.area_name, objects = loaded, "World objects restored");

        let sessions = Arc::new(SessionManager::new(
            config.max_connections,
            config.world.view_radius,
        ));
        let dispatcher = Dispatcher::new(world.clone(), sessions.clone());

        Ok(Self {
            config,
            world,
            sessions,
            dispatcher,
            store,
        })
    }

    /// Save every area, returning the names that failed to write
    pub fn save_all(&self) -> Vec<String> {
        let pending = persistence::collect_all(&self.world.lock());
        persistence::write_pending(self.store.as_ref(), pending)
    }
}
