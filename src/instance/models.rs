use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lifecycle phase of an instance.
///
/// `Starting` covers the window between spawn and the registry flipping the
/// entry to `Running`; `Exited` entries stay in the registry so their logs
/// remain discoverable after the process is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum InstanceState {
    Starting,
    Running,
    Stopping,
    Exited { exit_code: i32 },
}

impl InstanceState {
    /// Whether a live OS process still backs this entry.
    pub fn is_live(&self) -> bool {
        !matches!(self, Self::Exited { .. })
    }

    pub fn is_stopping(&self) -> bool {
        matches!(self, Self::Stopping)
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Exited { exit_code } => write!(f, "exited({exit_code})"),
        }
    }
}

/// One running (or exited) dedicated-server process plus its metadata.
#[derive(Debug, Clone, Serialize)]
pub struct Instance {
    /// OS process id. Unique only while the process is alive; the
    /// `generation` marker disambiguates pid reuse.
    pub pid: u32,
    #[serde(skip)]
    pub generation: u64,
    pub name: String,
    pub configuration_id: i64,
    pub started_at: DateTime<Utc>,
    #[serde(flatten)]
    pub state: InstanceState,
    pub log_file: String,
    #[serde(skip)]
    pub work_dir: PathBuf,
}
