//! Configuration business logic and file materialization.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result, bail};
use tokio::fs;
use tracing::{info, instrument};

use super::models::{AddEditConfigurationRequest, Configuration};
use super::repository::ConfigurationRepository;

/// File name of the rendered server parameters.
pub const SERVER_CFG_FILE: &str = "server_cfg.ini";
/// File name of the rendered car entry list.
pub const ENTRY_LIST_FILE: &str = "entry_list.ini";

#[derive(Debug, Clone)]
pub struct ConfigurationService {
    repo: ConfigurationRepository,
}

impl ConfigurationService {
    pub fn new(repo: ConfigurationRepository) -> Self {
        Self { repo }
    }

    /// Create or edit a configuration with validation.
    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn add_edit_configuration(
        &self,
        request: AddEditConfigurationRequest,
    ) -> Result<Configuration> {
        if request.name.trim().is_empty() {
            bail!("Invalid configuration: name must not be empty.");
        }
        if request.track.trim().is_empty() {
            bail!("Invalid configuration: track must not be empty.");
        }
        if request.cars.is_empty() {
            bail!("Invalid configuration: at least one car must be selected.");
        }
        if request.max_clients < 1 {
            bail!("Invalid configuration: max_clients must be at least 1.");
        }
        if request.port == 0 {
            bail!("Invalid configuration: port must be set.");
        }

        let extra_json =
            serde_json::to_string(&request.extra).context("Failed to encode extra parameters")?;

        if request.id == 0 {
            let config = self
                .repo
                .create(
                    &request.name,
                    &request.track,
                    &request.cars,
                    request.max_clients,
                    request.port,
                    &extra_json,
                )
                .await?;
            info!(configuration_id = config.id, "Created configuration");
            Ok(config)
        } else {
            if self.repo.get(request.id).await?.is_none() {
                bail!("Configuration not found: {}", request.id);
            }

            let config = self
                .repo
                .update(
                    request.id,
                    &request.name,
                    &request.track,
                    &request.cars,
                    request.max_clients,
                    request.port,
                    &extra_json,
                )
                .await?;
            info!(configuration_id = config.id, "Updated configuration");
            Ok(config)
        }
    }

    /// Fetch a single configuration. Callers that need a launch snapshot use
    /// this; the returned value is an owned copy, later edits do not touch it.
    pub async fn get_configuration(&self, id: i64) -> Result<Option<Configuration>> {
        self.repo.get(id).await
    }

    pub async fn get_all_configurations(&self) -> Result<Vec<Configuration>> {
        self.repo.list().await
    }

    #[instrument(skip(self))]
    pub async fn remove_configuration(&self, id: i64) -> Result<()> {
        if !self.repo.delete(id).await? {
            bail!("Configuration not found: {}", id);
        }

        info!(configuration_id = id, "Deleted configuration");
        Ok(())
    }

    /// Write the configuration's definition files into `dir`.
    ///
    /// `dir` is created if absent. The rendered files are what the launched
    /// server reads from its working directory.
    #[instrument(skip(self, config), fields(configuration_id = config.id))]
    pub async fn materialize(&self, config: &Configuration, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;

        for (name, content) in definition_files(config) {
            fs::write(dir.join(name), content)
                .await
                .with_context(|| format!("Failed to write {name}"))?;
        }

        Ok(())
    }

    /// Track folders available under the content root.
    pub async fn get_available_tracks(&self, content_root: &Path) -> Result<Vec<String>> {
        list_subdirectories(&content_root.join("content").join("tracks")).await
    }

    /// Car folders available under the content root.
    pub async fn get_available_cars(&self, content_root: &Path) -> Result<Vec<String>> {
        list_subdirectories(&content_root.join("content").join("cars")).await
    }
}

/// Rendered definition files for a configuration, name and content pairs.
pub fn definition_files(config: &Configuration) -> Vec<(&'static str, String)> {
    vec![
        (SERVER_CFG_FILE, render_server_cfg(config)),
        (ENTRY_LIST_FILE, render_entry_list(config)),
    ]
}

/// Render the main server parameter file.
fn render_server_cfg(config: &Configuration) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "[SERVER]");
    let _ = writeln!(out, "NAME={}", config.name);
    let _ = writeln!(out, "TRACK={}", config.track);
    let _ = writeln!(out, "CARS={}", config.cars.join(";"));
    let _ = writeln!(out, "MAX_CLIENTS={}", config.max_clients);
    let _ = writeln!(out, "UDP_PORT={}", config.port);
    let _ = writeln!(out, "TCP_PORT={}", config.port);
    // extra is a BTreeMap so rendering order is stable
    for (key, value) in &config.extra {
        let _ = writeln!(out, "{key}={value}");
    }
    out
}

/// Render one entry block per selected car.
fn render_entry_list(config: &Configuration) -> String {
    let mut out = String::new();
    for (i, car) in config.cars.iter().enumerate() {
        let _ = writeln!(out, "[CAR_{i}]");
        let _ = writeln!(out, "MODEL={car}");
        let _ = writeln!(out, "SKIN=");
        let _ = writeln!(out);
    }
    out
}

/// Names of immediate subdirectories, sorted. Missing parent yields an empty
/// list rather than an error, a fresh install has no content yet.
async fn list_subdirectories(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();

    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(names),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("Failed to read directory {}", dir.display()));
        }
    };

    while let Some(entry) = entries
        .next_entry()
        .await
        .context("Failed to read directory entry")?
    {
        if entry
            .file_type()
            .await
            .context("Failed to stat directory entry")?
            .is_dir()
        {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }

    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn test_service() -> ConfigurationService {
        let db = Database::in_memory().await.unwrap();
        ConfigurationService::new(ConfigurationRepository::new(db.pool().clone()))
    }

    fn sample_request(name: &str) -> AddEditConfigurationRequest {
        AddEditConfigurationRequest {
            id: 0,
            name: name.to_string(),
            track: "monza".to_string(),
            cars: vec!["bmw_m3_e30".to_string(), "ferrari_312t".to_string()],
            max_clients: 16,
            port: 9600,
            extra: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_add_and_get() {
        let service = test_service().await;

        let config = service
            .add_edit_configuration(sample_request("practice"))
            .await
            .unwrap();
        assert!(config.id > 0);

        let fetched = service.get_configuration(config.id).await.unwrap().unwrap();
        assert_eq!(fetched.track, "monza");
        assert_eq!(fetched.cars.len(), 2);
    }

    #[tokio::test]
    async fn test_validation_rejects_empty_cars() {
        let service = test_service().await;

        let mut request = sample_request("broken");
        request.cars.clear();

        let err = service.add_edit_configuration(request).await.unwrap_err();
        assert!(err.to_string().contains("at least one car"));
    }

    #[tokio::test]
    async fn test_edit_does_not_affect_snapshot() {
        let service = test_service().await;

        let config = service
            .add_edit_configuration(sample_request("race"))
            .await
            .unwrap();
        let snapshot = service.get_configuration(config.id).await.unwrap().unwrap();

        let mut edit = sample_request("race");
        edit.id = config.id;
        edit.track = "spa".to_string();
        service.add_edit_configuration(edit).await.unwrap();

        // The previously taken snapshot is unchanged
        assert_eq!(snapshot.track, "monza");
        let fresh = service.get_configuration(config.id).await.unwrap().unwrap();
        assert_eq!(fresh.track, "spa");
    }

    #[tokio::test]
    async fn test_remove_configuration() {
        let service = test_service().await;

        let config = service
            .add_edit_configuration(sample_request("gone"))
            .await
            .unwrap();
        service.remove_configuration(config.id).await.unwrap();

        assert!(service.get_configuration(config.id).await.unwrap().is_none());
        let err = service.remove_configuration(config.id).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_materialize_writes_definition_files() {
        let service = test_service().await;
        let config = service
            .add_edit_configuration(sample_request("files"))
            .await
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        service.materialize(&config, dir.path()).await.unwrap();

        let server_cfg = std::fs::read_to_string(dir.path().join(SERVER_CFG_FILE)).unwrap();
        assert!(server_cfg.contains("TRACK=monza"));
        assert!(server_cfg.contains("CARS=bmw_m3_e30;ferrari_312t"));

        let entry_list = std::fs::read_to_string(dir.path().join(ENTRY_LIST_FILE)).unwrap();
        assert!(entry_list.contains("[CAR_0]"));
        assert!(entry_list.contains("MODEL=ferrari_312t"));
    }

    #[tokio::test]
    async fn test_available_tracks_scans_content() {
        let service = test_service().await;

        let root = tempfile::tempdir().unwrap();
        let tracks = root.path().join("content").join("tracks");
        std::fs::create_dir_all(tracks.join("monza")).unwrap();
        std::fs::create_dir_all(tracks.join("spa")).unwrap();
        std::fs::write(tracks.join("readme.txt"), "not a track").unwrap();

        let found = service.get_available_tracks(root.path()).await.unwrap();
        assert_eq!(found, vec!["monza".to_string(), "spa".to_string()]);

        // Missing cars directory is an empty list, not an error
        let cars = service.get_available_cars(root.path()).await.unwrap();
        assert!(cars.is_empty());
    }
}
