pub mod answer;
pub mod data;
pub mod member;
pub mod serve;
pub mod team;
pub mod user;
pub mod watch;

use anyhow::Context;
use std::path::Path;
use teamsync_core::config::Config;
use teamsync_core::{EntityStore, TeamService};

/// Open the store configured for `root`.
pub fn open_service(root: &Path) -> anyhow::Result<TeamService> {
    let config = Config::load(root).context("failed to load teamsync.yaml")?;
    let store = EntityStore::from_config(root, &config).context("failed to open data file")?;
    Ok(TeamService::new(store, config))
}
