//! Spawning, stopping, and reaping of dedicated-server processes.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{error, info, instrument, warn};

use crate::configuration::ConfigurationService;
use crate::settings::SettingsService;

use super::logs::LogStore;
use super::models::{Instance, InstanceState};
use super::registry::InstanceRegistry;

/// Request payload for launching an instance.
#[derive(Debug, Clone, Deserialize)]
pub struct StartInstanceRequest {
    #[serde(default)]
    pub name: String,
    #[serde(alias = "config")]
    pub configuration_id: i64,
    #[serde(default)]
    pub script_before: String,
    #[serde(default)]
    pub script_after: String,
}

/// Orchestrates the instance state machine.
///
/// `start_instance` returns as soon as the OS process exists; a watcher task
/// per instance waits for the exit and reports it back to the registry. The
/// manager never blocks a request on a running server.
#[derive(Debug, Clone)]
pub struct InstanceManager {
    registry: InstanceRegistry,
    configurations: ConfigurationService,
    settings: SettingsService,
    log_store: LogStore,
    /// Parent directory of the per-instance working directories.
    instances_root: PathBuf,
}

impl InstanceManager {
    pub fn new(
        registry: InstanceRegistry,
        configurations: ConfigurationService,
        settings: SettingsService,
        log_store: LogStore,
        instances_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            configurations,
            settings,
            log_store,
            instances_root: instances_root.into(),
        }
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    /// Launch a new instance.
    ///
    /// Fails before anything is registered: a missing configuration, a
    /// failing pre-launch script, or a spawn error all leave the registry
    /// untouched. Once the process exists the start has succeeded; later
    /// crashes are only visible through the instance state and its log.
    #[instrument(skip(self, request), fields(configuration_id = request.configuration_id))]
    pub async fn start_instance(&self, request: StartInstanceRequest) -> Result<Instance> {
        let Some(config) = self
            .configurations
            .get_configuration(request.configuration_id)
            .await?
        else {
            bail!("Configuration not found: {}", request.configuration_id);
        };

        let settings = self.settings.get_settings().await?;
        if settings.executable.trim().is_empty() {
            bail!("Invalid settings: server executable is not configured.");
        }

        let name = if request.name.trim().is_empty() {
            config.name.clone()
        } else {
            request.name.clone()
        };

        let work_dir = self
            .instances_root
            .join(format!("{}-{}", config.id, nanoid::nanoid!(8)));
        self.configurations.materialize(&config, &work_dir).await?;
        write_manifest(&work_dir, &name, config.id).await?;

        if !request.script_before.is_empty() {
            run_script(&request.script_before, &work_dir)
                .await
                .context("Pre-launch script failed")?;
        }

        let generation = self.registry.next_generation();
        let log_file = self.log_store.next_file_name(&name);
        let stdout = self.log_store.create(&log_file)?;
        let stderr = stdout
            .try_clone()
            .context("Failed to clone log file handle")?;

        let mut child = Command::new(settings.executable_path())
            .args(settings.arg_list())
            .current_dir(&work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()
            .with_context(|| {
                format!(
                    "Failed to spawn server executable {}",
                    settings.executable_path().display()
                )
            })?;

        let pid = child.id().context("Spawned process has no pid")?;

        let mut instance = Instance {
            pid,
            generation,
            name,
            configuration_id: config.id,
            started_at: Utc::now(),
            state: InstanceState::Starting,
            log_file,
            work_dir: work_dir.clone(),
        };
        self.registry.register(instance.clone());
        self.registry.set_running(pid);
        instance.state = InstanceState::Running;

        info!(pid, configuration_id = config.id, "Started instance");

        let registry = self.registry.clone();
        let script_after = request.script_after.clone();
        tokio::spawn(async move {
            let exit_code = match child.wait().await {
                Ok(status) => status.code().unwrap_or(-1),
                Err(err) => {
                    error!(pid, error = %err, "Failed to wait for instance");
                    -1
                }
            };

            // Best effort, a failing post-exit script is logged, not surfaced
            if !script_after.is_empty()
                && let Err(err) = run_script(&script_after, &work_dir).await
            {
                warn!(pid, error = %err, "Post-exit script failed");
            }

            registry.mark_exited(pid, generation, exit_code);
            info!(pid, exit_code, "Instance reaped");
        });

        Ok(instance)
    }

    /// Request termination of a running instance.
    ///
    /// Sends the signal and returns; the watcher from `start_instance`
    /// records the eventual exit. Stopping an instance that is already
    /// stopping is a no-op success.
    #[instrument(skip(self))]
    pub async fn stop_instance(&self, pid: u32) -> Result<()> {
        let Some(instance) = self.registry.get(pid) else {
            bail!("Instance not found: {pid}");
        };

        match instance.state {
            InstanceState::Exited { .. } => bail!("Instance not found: {pid}"),
            InstanceState::Stopping => Ok(()),
            InstanceState::Starting | InstanceState::Running => {
                self.registry.set_stopping(pid);
                if !signal_terminate(pid).await {
                    // Process may have exited in the meantime; the watcher
                    // will record the final state either way
                    warn!(pid, "Termination signal was not delivered");
                }
                info!(pid, "Stopping instance");
                Ok(())
            }
        }
    }

    pub fn get_all_instances(&self) -> Vec<Instance> {
        self.registry.all()
    }
}

/// Record launch metadata next to the materialized configuration so the
/// runtime directory is self-describing.
async fn write_manifest(work_dir: &Path, name: &str, configuration_id: i64) -> Result<()> {
    let manifest = serde_json::json!({
        "name": name,
        "configuration_id": configuration_id,
        "created_at": Utc::now().to_rfc3339(),
    });
    let body =
        serde_json::to_vec_pretty(&manifest).context("Failed to encode instance manifest")?;
    tokio::fs::write(work_dir.join("instance.json"), body)
        .await
        .context("Failed to write instance manifest")
}

/// Run a setup/teardown script to completion in the instance directory.
async fn run_script(script: &str, work_dir: &Path) -> Result<()> {
    let status = Command::new(script)
        .current_dir(work_dir)
        .status()
        .await
        .with_context(|| format!("Failed to launch script {script}"))?;

    if !status.success() {
        bail!("Script {script} exited with {status}");
    }
    Ok(())
}

/// Send SIGTERM to a process by pid.
async fn signal_terminate(pid: u32) -> bool {
    Command::new("kill")
        .arg(pid.to_string())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::{AddEditConfigurationRequest, ConfigurationRepository};
    use crate::db::Database;
    use crate::settings::SaveSettingsRequest;
    use std::time::Duration;

    struct TestHarness {
        _root: tempfile::TempDir,
        manager: InstanceManager,
        configuration_id: i64,
    }

    async fn harness(executable: &str, args: &str) -> TestHarness {
        let db = Database::in_memory().await.unwrap();
        let root = tempfile::tempdir().unwrap();

        let configurations =
            ConfigurationService::new(ConfigurationRepository::new(db.pool().clone()));
        let config = configurations
            .add_edit_configuration(AddEditConfigurationRequest {
                id: 0,
                name: "test".to_string(),
                track: "monza".to_string(),
                cars: vec!["bmw_m3_e30".to_string()],
                max_clients: 8,
                port: 9600,
                extra: Default::default(),
            })
            .await
            .unwrap();

        let settings = SettingsService::new(db.pool().clone());
        settings
            .save_settings(SaveSettingsRequest {
                folder: "/".to_string(),
                executable: executable.to_string(),
                args: args.to_string(),
            })
            .await
            .unwrap();

        let manager = InstanceManager::new(
            InstanceRegistry::new(),
            configurations,
            settings.clone(),
            LogStore::new(root.path().join("logs")),
            root.path().join("instances"),
        );

        TestHarness {
            _root: root,
            manager,
            configuration_id: config.id,
        }
    }

    fn start_request(configuration_id: i64) -> StartInstanceRequest {
        StartInstanceRequest {
            name: "test run".to_string(),
            configuration_id,
            script_before: String::new(),
            script_after: String::new(),
        }
    }

    async fn wait_for_exit(registry: &InstanceRegistry, pid: u32) -> InstanceState {
        for _ in 0..200 {
            if let Some(instance) = registry.get(pid)
                && !instance.state.is_live()
            {
                return instance.state;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("instance {pid} did not exit in time");
    }

    #[tokio::test]
    async fn test_missing_configuration_registers_nothing() {
        let h = harness("/bin/echo", "").await;

        let err = h.manager.start_instance(start_request(999)).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
        assert!(h.manager.get_all_instances().is_empty());
    }

    #[tokio::test]
    async fn test_failing_pre_script_registers_nothing() {
        let h = harness("/bin/echo", "").await;

        let mut request = start_request(h.configuration_id);
        request.script_before = "/bin/false".to_string();

        let err = h.manager.start_instance(request).await.unwrap_err();
        assert!(err.to_string().contains("Pre-launch script failed"));
        assert!(h.manager.get_all_instances().is_empty());
    }

    #[tokio::test]
    async fn test_spawn_failure_registers_nothing() {
        let h = harness("/nonexistent/acServer", "").await;

        let err = h
            .manager
            .start_instance(start_request(h.configuration_id))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to spawn"));
        assert!(h.manager.get_all_instances().is_empty());
    }

    #[tokio::test]
    async fn test_start_captures_output_and_reaps() {
        let h = harness("/bin/echo", "server ready").await;

        let instance = h
            .manager
            .start_instance(start_request(h.configuration_id))
            .await
            .unwrap();
        assert_eq!(instance.state, InstanceState::Running);

        let state = wait_for_exit(h.manager.registry(), instance.pid).await;
        assert_eq!(state, InstanceState::Exited { exit_code: 0 });

        // Stdout went to the instance log file
        let log_path = h._root.path().join("logs").join(&instance.log_file);
        let log = std::fs::read_to_string(log_path).unwrap();
        assert!(log.contains("server ready"));

        // Working directory holds the materialized configuration
        assert!(instance.work_dir.join("server_cfg.ini").is_file());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_reaps() {
        let h = harness("/bin/sleep", "30").await;

        let instance = h
            .manager
            .start_instance(start_request(h.configuration_id))
            .await
            .unwrap();

        h.manager.stop_instance(instance.pid).await.unwrap();
        // Second stop while stopping is a quiet no-op
        h.manager.stop_instance(instance.pid).await.unwrap();

        let state = wait_for_exit(h.manager.registry(), instance.pid).await;
        assert!(matches!(state, InstanceState::Exited { .. }));

        // Stopping an exited instance reports not found
        let err = h.manager.stop_instance(instance.pid).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_unconfigured_executable_rejected() {
        // Fresh install: the seeded settings row has an empty executable
        let db = Database::in_memory().await.unwrap();
        let configurations =
            ConfigurationService::new(ConfigurationRepository::new(db.pool().clone()));
        let config = configurations
            .add_edit_configuration(AddEditConfigurationRequest {
                id: 0,
                name: "test".to_string(),
                track: "monza".to_string(),
                cars: vec!["bmw_m3_e30".to_string()],
                max_clients: 8,
                port: 9600,
                extra: Default::default(),
            })
            .await
            .unwrap();

        let root = tempfile::tempdir().unwrap();
        let manager = InstanceManager::new(
            InstanceRegistry::new(),
            configurations,
            SettingsService::new(db.pool().clone()),
            LogStore::new(root.path().join("logs")),
            root.path().join("instances"),
        );

        let err = manager
            .start_instance(start_request(config.id))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Invalid settings"));
    }

    #[tokio::test]
    async fn test_stop_unknown_pid() {
        let h = harness("/bin/echo", "").await;
        let err = h.manager.stop_instance(123_456).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
