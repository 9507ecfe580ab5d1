//! Zip archives of configurations, instance working directories, and logs.

use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};
use tempfile::tempfile;
use tracing::instrument;
use walkdir::WalkDir;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::configuration::{Configuration, definition_files};

use super::logs::LogStore;
use super::registry::InstanceRegistry;

/// A finished archive, rewound and ready to stream.
///
/// The backing file is an anonymous temp file; it disappears when the
/// handle is dropped, so an aborted download leaves nothing on disk.
#[derive(Debug)]
pub struct Archive {
    pub file: tokio::fs::File,
    pub size: u64,
    pub file_name: String,
}

/// Builds archives from registry and filesystem state. Read-only, no shared
/// mutable state of its own.
#[derive(Debug, Clone)]
pub struct Archiver {
    registry: InstanceRegistry,
    log_store: LogStore,
}

impl Archiver {
    pub fn new(registry: InstanceRegistry, log_store: LogStore) -> Self {
        Self {
            registry,
            log_store,
        }
    }

    /// Package a configuration's definition files.
    #[instrument(skip(self, config), fields(configuration_id = config.id))]
    pub async fn zip_configuration(&self, config: &Configuration) -> Result<Archive> {
        let entries = definition_files(config);
        let file_name = format!("{}-config.zip", slug(&config.name));

        let (file, size) = tokio::task::spawn_blocking(move || zip_entries(&entries))
            .await
            .context("Archive task failed")??;

        Ok(Archive {
            file: tokio::fs::File::from_std(file),
            size,
            file_name,
        })
    }

    /// Package the runtime working directory of the configuration's most
    /// recent instance.
    #[instrument(skip(self, config), fields(configuration_id = config.id))]
    pub async fn zip_instance_files(&self, config: &Configuration) -> Result<Archive> {
        let Some(instance) = self.registry.most_recent_for_configuration(config.id) else {
            bail!("Instance not found for configuration {}", config.id);
        };

        let work_dir = instance.work_dir.clone();
        if !work_dir.is_dir() {
            bail!("Instance files not found for configuration {}", config.id);
        }

        let file_name = format!("{}-instance.zip", slug(&config.name));
        let (file, size) = tokio::task::spawn_blocking(move || zip_directory(&work_dir))
            .await
            .context("Archive task failed")??;

        Ok(Archive {
            file: tokio::fs::File::from_std(file),
            size,
            file_name,
        })
    }

    /// Package exactly one named log file.
    #[instrument(skip(self))]
    pub async fn zip_log_file(&self, name: &str) -> Result<Archive> {
        let path = self.log_store.resolve(name)?;
        if !path.is_file() {
            bail!("Log file not found: {name}");
        }

        let entry_name = name.to_string();
        let file_name = format!("{name}.zip");

        let (file, size) =
            tokio::task::spawn_blocking(move || zip_single_file(&path, &entry_name))
                .await
                .context("Archive task failed")??;

        Ok(Archive {
            file: tokio::fs::File::from_std(file),
            size,
            file_name,
        })
    }
}

fn slug(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn zip_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o644)
}

/// Zip in-memory name/content pairs.
fn zip_entries(entries: &[(&'static str, String)]) -> Result<(std::fs::File, u64)> {
    let mut zip = ZipWriter::new(tempfile().context("Failed to create temp file")?);

    for (name, content) in entries {
        zip.start_file(*name, zip_options())
            .with_context(|| format!("Failed to start archive entry {name}"))?;
        zip.write_all(content.as_bytes())
            .with_context(|| format!("Failed to write archive entry {name}"))?;
    }

    finish(zip)
}

/// Zip a directory tree, entry names relative to the directory root.
fn zip_directory(dir: &Path) -> Result<(std::fs::File, u64)> {
    let mut zip = ZipWriter::new(tempfile().context("Failed to create temp file")?);

    for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");

        zip.start_file(relative.as_str(), zip_options())
            .with_context(|| format!("Failed to start archive entry {relative}"))?;
        let mut input = std::fs::File::open(entry.path())
            .with_context(|| format!("Failed to open {}", entry.path().display()))?;
        std::io::copy(&mut input, &mut zip)
            .with_context(|| format!("Failed to archive {relative}"))?;
    }

    finish(zip)
}

fn zip_single_file(path: &Path, entry_name: &str) -> Result<(std::fs::File, u64)> {
    let mut zip = ZipWriter::new(tempfile().context("Failed to create temp file")?);

    zip.start_file(entry_name, zip_options())
        .with_context(|| format!("Failed to start archive entry {entry_name}"))?;
    let mut input = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    std::io::copy(&mut input, &mut zip)
        .with_context(|| format!("Failed to archive {entry_name}"))?;

    finish(zip)
}

/// Finalize the archive, flush, and rewind for streaming.
fn finish(zip: ZipWriter<std::fs::File>) -> Result<(std::fs::File, u64)> {
    let mut file = zip.finish().context("Failed to finalize archive")?;
    file.flush().context("Failed to flush archive")?;

    let size = file
        .seek(SeekFrom::End(0))
        .context("Failed to measure archive")?;
    file.seek(SeekFrom::Start(0))
        .context("Failed to rewind archive")?;

    Ok((file, size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::models::{Instance, InstanceState};
    use chrono::Utc;
    use tokio::io::AsyncReadExt;

    fn sample_config() -> Configuration {
        Configuration {
            id: 1,
            name: "race night".to_string(),
            track: "monza".to_string(),
            cars: vec!["bmw_m3_e30".to_string()],
            max_clients: 12,
            port: 9600,
            extra: Default::default(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    async fn read_all(archive: Archive) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut file = archive.file;
        file.read_to_end(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_zip_configuration() {
        let logs = tempfile::tempdir().unwrap();
        let archiver = Archiver::new(InstanceRegistry::new(), LogStore::new(logs.path()));

        let archive = archiver.zip_configuration(&sample_config()).await.unwrap();
        assert_eq!(archive.file_name, "race_night-config.zip");
        assert!(archive.size > 0);

        let bytes = read_all(archive).await;
        assert_eq!(&bytes[..2], b"PK");
    }

    #[tokio::test]
    async fn test_config_and_instance_archives_differ() {
        let logs = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        std::fs::write(work.path().join("server_cfg.ini"), "[SERVER]\nNAME=live\n").unwrap();
        std::fs::write(work.path().join("results.json"), "{\"laps\": 3}").unwrap();

        let registry = InstanceRegistry::new();
        registry.register(Instance {
            pid: 4242,
            generation: registry.next_generation(),
            name: "race".to_string(),
            configuration_id: 1,
            started_at: Utc::now(),
            state: InstanceState::Exited { exit_code: 0 },
            log_file: "race.log".to_string(),
            work_dir: work.path().to_path_buf(),
        });

        let archiver = Archiver::new(registry, LogStore::new(logs.path()));
        let config = sample_config();

        let definition = read_all(archiver.zip_configuration(&config).await.unwrap()).await;
        let runtime = read_all(archiver.zip_instance_files(&config).await.unwrap()).await;
        assert_ne!(definition, runtime);
    }

    #[tokio::test]
    async fn test_zip_instance_files_without_instance() {
        let logs = tempfile::tempdir().unwrap();
        let archiver = Archiver::new(InstanceRegistry::new(), LogStore::new(logs.path()));

        let err = archiver
            .zip_instance_files(&sample_config())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_zip_log_file_rejects_traversal() {
        let logs = tempfile::tempdir().unwrap();
        std::fs::write(logs.path().join("run.log"), "line\n").unwrap();
        let archiver = Archiver::new(InstanceRegistry::new(), LogStore::new(logs.path()));

        let archive = archiver.zip_log_file("run.log").await.unwrap();
        assert_eq!(archive.file_name, "run.log.zip");

        assert!(archiver.zip_log_file("../run.log").await.is_err());
        assert!(archiver.zip_log_file("missing.log").await.is_err());
    }
}
