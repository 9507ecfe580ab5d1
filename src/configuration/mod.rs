//! Server configuration catalog and file rendering.

mod models;
mod repository;
mod service;

pub use models::{AddEditConfigurationRequest, Configuration};
pub use repository::ConfigurationRepository;
pub use service::{ConfigurationService, definition_files};
