//! SQLite persistence for configurations.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use super::models::{Configuration, ConfigurationRow};

#[derive(Debug, Clone)]
pub struct ConfigurationRepository {
    pool: SqlitePool,
}

impl ConfigurationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        name: &str,
        track: &str,
        cars: &[String],
        max_clients: i64,
        port: u16,
        extra_json: &str,
    ) -> Result<Configuration> {
        let cars_json = serde_json::to_string(cars).context("Failed to encode car list")?;

        let result = sqlx::query(
            r"
            INSERT INTO configurations (name, track, cars, max_clients, port, extra)
            VALUES (?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(name)
        .bind(track)
        .bind(&cars_json)
        .bind(max_clients)
        .bind(i64::from(port))
        .bind(extra_json)
        .execute(&self.pool)
        .await
        .context("Failed to insert configuration")?;

        let id = result.last_insert_rowid();
        self.get(id)
            .await?
            .context("Configuration vanished after insert")
    }

    pub async fn update(
        &self,
        id: i64,
        name: &str,
        track: &str,
        cars: &[String],
        max_clients: i64,
        port: u16,
        extra_json: &str,
    ) -> Result<Configuration> {
        let cars_json = serde_json::to_string(cars).context("Failed to encode car list")?;

        sqlx::query(
            r"
            UPDATE configurations
            SET name = ?, track = ?, cars = ?, max_clients = ?, port = ?, extra = ?,
                updated_at = datetime('now')
            WHERE id = ?
            ",
        )
        .bind(name)
        .bind(track)
        .bind(&cars_json)
        .bind(max_clients)
        .bind(i64::from(port))
        .bind(extra_json)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to update configuration")?;

        self.get(id)
            .await?
            .context("Configuration vanished after update")
    }

    pub async fn get(&self, id: i64) -> Result<Option<Configuration>> {
        let row = sqlx::query_as::<_, ConfigurationRow>(
            "SELECT * FROM configurations WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch configuration")?;

        row.map(ConfigurationRow::decode).transpose()
    }

    pub async fn list(&self) -> Result<Vec<Configuration>> {
        let rows = sqlx::query_as::<_, ConfigurationRow>(
            "SELECT * FROM configurations ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list configurations")?;

        rows.into_iter().map(ConfigurationRow::decode).collect()
    }

    pub async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM configurations WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete configuration")?;

        Ok(result.rows_affected() > 0)
    }
}
