//! Paddock is an administrative control plane for dedicated game servers:
//! it launches and supervises one child process per instance, gates every
//! mutating operation behind role-scoped sessions, and packages
//! configurations, runtime files, and logs for download.

pub mod api;
pub mod auth;
pub mod configuration;
pub mod db;
pub mod instance;
pub mod settings;
pub mod user;
