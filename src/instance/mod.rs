//! Instance lifecycle: spawning, tracking, stopping, and reaping
//! dedicated-server child processes, plus their logs and archives.

mod archive;
mod logs;
mod manager;
mod models;
mod registry;

pub use archive::{Archive, Archiver};
pub use logs::{LogFileInfo, LogStore};
pub use manager::{InstanceManager, StartInstanceRequest};
pub use models::{Instance, InstanceState};
pub use registry::InstanceRegistry;
