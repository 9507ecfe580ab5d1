use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// A named bundle of server parameters, track, and car selection.
///
/// Rows store `cars` and `extra` as JSON text; the typed form is what the
/// rest of the crate works with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    pub id: i64,
    pub name: String,
    pub track: String,
    pub cars: Vec<String>,
    pub max_clients: i64,
    pub port: u16,
    /// Free-form server parameters rendered verbatim into the config file.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Raw database row before the JSON columns are decoded.
#[derive(Debug, sqlx::FromRow)]
pub struct ConfigurationRow {
    pub id: i64,
    pub name: String,
    pub track: String,
    pub cars: String,
    pub max_clients: i64,
    pub port: i64,
    pub extra: String,
    pub created_at: String,
    pub updated_at: String,
}

impl ConfigurationRow {
    pub fn decode(self) -> Result<Configuration> {
        let cars: Vec<String> =
            serde_json::from_str(&self.cars).context("Failed to decode car list")?;
        let extra: BTreeMap<String, String> =
            serde_json::from_str(&self.extra).context("Failed to decode extra parameters")?;
        let port = u16::try_from(self.port).context("Stored port out of range")?;

        Ok(Configuration {
            id: self.id,
            name: self.name,
            track: self.track,
            cars,
            max_clients: self.max_clients,
            port,
            extra,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Request payload for creating or editing a configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AddEditConfigurationRequest {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    pub track: String,
    pub cars: Vec<String>,
    pub max_clients: i64,
    pub port: u16,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}
