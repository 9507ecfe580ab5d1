//! Application state shared across handlers.

use std::path::PathBuf;

use crate::auth::SessionStore;
use crate::configuration::{ConfigurationRepository, ConfigurationService};
use crate::db::Database;
use crate::instance::{Archiver, InstanceManager, InstanceRegistry, LogStore};
use crate::settings::SettingsService;
use crate::user::{UserRepository, UserService};

/// Shared state for the API layer. Cheap to clone, every field is a handle.
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionStore,
    pub users: UserService,
    pub configurations: ConfigurationService,
    pub settings: SettingsService,
    pub manager: InstanceManager,
    pub archiver: Archiver,
    pub log_store: LogStore,
    pub allowed_origins: Vec<String>,
}

/// Filesystem locations the instance subsystem works in.
#[derive(Debug, Clone)]
pub struct DataPaths {
    /// Managed log directory.
    pub logs: PathBuf,
    /// Parent of per-instance working directories.
    pub instances: PathBuf,
}

impl AppState {
    /// Wire up all services over one database.
    pub fn new(database: &Database, paths: DataPaths, allowed_origins: Vec<String>) -> Self {
        let pool = database.pool().clone();

        let sessions = SessionStore::new(pool.clone());
        let users = UserService::new(UserRepository::new(pool.clone()));
        let configurations =
            ConfigurationService::new(ConfigurationRepository::new(pool.clone()));
        let settings = SettingsService::new(pool);

        let registry = InstanceRegistry::new();
        let log_store = LogStore::new(paths.logs);
        let manager = InstanceManager::new(
            registry.clone(),
            configurations.clone(),
            settings.clone(),
            log_store.clone(),
            paths.instances,
        );
        let archiver = Archiver::new(registry, log_store.clone());

        Self {
            sessions,
            users,
            configurations,
            settings,
            manager,
            archiver,
            log_store,
            allowed_origins,
        }
    }
}
