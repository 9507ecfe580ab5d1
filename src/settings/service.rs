use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{info, instrument};

/// Where the server lives and how to launch it.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Settings {
    /// Installation root, also the content root for track/car scans.
    pub folder: String,
    /// Server executable path, relative to `folder` or absolute.
    pub executable: String,
    /// Extra launch arguments, whitespace separated.
    pub args: String,
}

impl Settings {
    /// Resolved executable path.
    pub fn executable_path(&self) -> std::path::PathBuf {
        let exe = std::path::Path::new(&self.executable);
        if exe.is_absolute() {
            exe.to_path_buf()
        } else {
            std::path::Path::new(&self.folder).join(exe)
        }
    }

    /// Launch arguments split on whitespace.
    pub fn arg_list(&self) -> Vec<String> {
        self.args.split_whitespace().map(str::to_string).collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SaveSettingsRequest {
    pub folder: String,
    pub executable: String,
    #[serde(default)]
    pub args: String,
}

/// Reads and writes the single settings row.
#[derive(Debug, Clone)]
pub struct SettingsService {
    pool: SqlitePool,
}

impl SettingsService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_settings(&self) -> Result<Settings> {
        sqlx::query_as::<_, Settings>("SELECT folder, executable, args FROM settings WHERE id = 1")
            .fetch_one(&self.pool)
            .await
            .context("Failed to fetch settings")
    }

    #[instrument(skip(self, request))]
    pub async fn save_settings(&self, request: SaveSettingsRequest) -> Result<Settings> {
        if request.folder.trim().is_empty() {
            bail!("Invalid settings: folder must not be empty.");
        }
        if request.executable.trim().is_empty() {
            bail!("Invalid settings: executable must not be empty.");
        }

        sqlx::query("UPDATE settings SET folder = ?, executable = ?, args = ? WHERE id = 1")
            .bind(&request.folder)
            .bind(&request.executable)
            .bind(&request.args)
            .execute(&self.pool)
            .await
            .context("Failed to save settings")?;

        info!("Saved server settings");
        self.get_settings().await
    }
}
