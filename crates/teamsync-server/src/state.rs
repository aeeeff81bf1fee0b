use std::path::Path;

use teamsync_core::config::Config;
use teamsync_core::{EntityStore, TeamService};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: TeamService,
}

impl AppState {
    pub fn new(service: TeamService) -> Self {
        Self { service }
    }

    /// Load `teamsync.yaml` from `root` and open the store it names.
    pub fn open(root: &Path) -> teamsync_core::Result<Self> {
        let config = Config::load(root)?;
        for warning in config.validate() {
            tracing::warn!(level = ?warning.level, "{}", warning.message);
        }
        let store = EntityStore::from_config(root, &config)?;
        Ok(Self::new(TeamService::new(store, config)))
    }

    /// State backed by an in-memory store.
    pub fn in_memory(config: Config) -> Self {
        Self::new(TeamService::new(EntityStore::in_memory(), config))
    }

    pub fn store(&self) -> &EntityStore {
        self.service.store()
    }
}
