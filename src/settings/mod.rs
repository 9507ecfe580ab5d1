//! Global server settings, a single persisted row.

mod service;

pub use service::{SaveSettingsRequest, Settings, SettingsService};
