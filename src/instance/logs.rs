//! Per-instance log files under a managed directory.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument};

/// Metadata for one log file.
#[derive(Debug, Clone, Serialize)]
pub struct LogFileInfo {
    pub name: String,
    pub size: u64,
    pub modified_at: String,
}

/// Owns the managed log directory. All access goes through name validation,
/// a caller-supplied name can never resolve outside the directory.
#[derive(Debug, Clone)]
pub struct LogStore {
    dir: PathBuf,
}

impl LogStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Build the log file name for a new instance invocation.
    pub fn next_file_name(&self, instance_name: &str) -> String {
        let stamp = Utc::now().format("%Y%m%d-%H%M%S");
        let slug: String = instance_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("{slug}-{stamp}-{}.log", nanoid::nanoid!(6))
    }

    /// Create (or truncate) a log file and return the open handle.
    ///
    /// Returned as a blocking [`File`] on purpose: the handle is handed to
    /// the child process as its stdout/stderr, not written by this process.
    pub fn create(&self, name: &str) -> Result<File> {
        let path = self.resolve(name)?;
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create log directory {}", self.dir.display()))?;
        File::create(&path).with_context(|| format!("Failed to create log file {name}"))
    }

    /// Validate a caller-supplied name and resolve it inside the directory.
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty()
            || name.contains('/')
            || name.contains('\\')
            || name.contains("..")
            || name.starts_with('.')
        {
            bail!("Log file not found: {name}");
        }
        Ok(self.dir.join(name))
    }

    pub async fn list(&self) -> Result<Vec<LogFileInfo>> {
        let mut files = Vec::new();

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("Failed to read log directory {}", self.dir.display())
                });
            }
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .context("Failed to read log directory entry")?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(".log") {
                continue;
            }

            let metadata = entry
                .metadata()
                .await
                .with_context(|| format!("Failed to stat log file {name}"))?;
            let modified_at = metadata
                .modified()
                .map(|time| chrono::DateTime::<Utc>::from(time).to_rfc3339())
                .unwrap_or_default();

            files.push(LogFileInfo {
                name,
                size: metadata.len(),
                modified_at,
            });
        }

        files.sort_by(|a, b| b.modified_at.cmp(&a.modified_at));
        Ok(files)
    }

    /// Read a whole log file as text.
    pub async fn read(&self, name: &str) -> Result<String> {
        let path = self.resolve(name)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(content),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                bail!("Log file not found: {name}")
            }
            Err(err) => Err(err).with_context(|| format!("Failed to read log file {name}")),
        }
    }

    /// Delete one log file.
    ///
    /// A running instance keeps writing to its already open descriptor after
    /// the unlink; the file just stops being listed. That is the intended
    /// delete semantics.
    #[instrument(skip(self))]
    pub async fn delete(&self, name: &str) -> Result<()> {
        let path = self.resolve(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!(name, "Deleted log file");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                bail!("Log file not found: {name}")
            }
            Err(err) => Err(err).with_context(|| format!("Failed to delete log file {name}")),
        }
    }

    /// Delete every log file in the managed directory.
    #[instrument(skip(self))]
    pub async fn delete_all(&self) -> Result<usize> {
        let files = self.list().await?;
        let mut removed = 0;

        for file in files {
            if tokio::fs::remove_file(self.dir.join(&file.name)).await.is_ok() {
                removed += 1;
            }
        }

        info!(removed, "Deleted all log files");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (tempfile::TempDir, LogStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LogStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let (_dir, store) = test_store();

        assert!(store.resolve("server.log").is_ok());
        assert!(store.resolve("../etc/passwd").is_err());
        assert!(store.resolve("sub/dir.log").is_err());
        assert!(store.resolve(".hidden").is_err());
        assert!(store.resolve("").is_err());
    }

    #[tokio::test]
    async fn test_list_and_read() {
        let (_dir, store) = test_store();

        store.create("a.log").unwrap();
        std::fs::write(store.dir().join("b.log"), "hello\n").unwrap();
        std::fs::write(store.dir().join("notes.txt"), "ignored").unwrap();

        let files = store.list().await.unwrap();
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| f.name.ends_with(".log")));

        assert_eq!(store.read("b.log").await.unwrap(), "hello\n");
        let err = store.read("missing.log").await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_delete_keeps_open_handle_writable() {
        let (_dir, store) = test_store();

        let mut handle = store.create("live.log").unwrap();
        store.delete("live.log").await.unwrap();

        // Writes through the open descriptor still succeed after unlink
        use std::io::Write;
        writeln!(handle, "still alive").unwrap();

        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_all() {
        let (_dir, store) = test_store();
        store.create("one.log").unwrap();
        store.create("two.log").unwrap();

        assert_eq!(store.delete_all().await.unwrap(), 2);
        assert!(store.list().await.unwrap().is_empty());
    }

    #[test]
    fn test_next_file_name_is_sanitized() {
        let (_dir, store) = test_store();
        let name = store.next_file_name("race night #3");
        assert!(name.ends_with(".log"));
        assert!(!name.contains(' '));
        assert!(!name.contains('#'));
        assert!(store.resolve(&name).is_ok());
    }
}
