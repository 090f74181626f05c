//! Database module - SQLite durable entity store

#[cfg(test)]
pub mod test_utils;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

/// Database handle wrapping SQLite connection pool
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    /// If path is None, uses in-memory database (for testing)
    pub async fn new(path: Option<&str>) -> Result<Self> {
        let pool = match path {
            Some(p) => {
                let options = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", p))?
                    .create_if_missing(true)
                    .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);
                SqlitePoolOptions::new()
                    .max_connections(10)
                    .connect_with(options)
                    .await?
            }
            None => {
                // Every in-memory connection is its own database, so pin exactly one
                let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .min_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect_with(options)
                    .await?
            }
        };

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations...");

        // High-water mark for object ids (single row, slot 0)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS highest_id (
                slot INTEGER PRIMARY KEY CHECK (slot = 0),
                id INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("INSERT OR IGNORE INTO highest_id (slot, id) VALUES (0, 0)")
            .execute(&self.pool)
            .await?;

        // Persisted creatures (player characters) with their owned subtree
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS creatures (
                id INTEGER PRIMARY KEY,
                custom_name TEXT,
                planet_id INTEGER,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Persisted buildings with their cells and contents
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS buildings (
                id INTEGER PRIMARY KEY,
                planet_id INTEGER,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_buildings_planet ON buildings(planet_id)")
            .execute(&self.pool)
            .await?;

        info!("Database migrations complete");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Check if database is healthy
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_db_creation() {
        let db = Database::new(None).await.unwrap();
        db.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn test_migrations_seed_high_water_mark() {
        let db = Database::new(None).await.unwrap();

        let result: (i64,) = sqlx::query_as("SELECT id FROM highest_id WHERE slot = 0")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(result.0, 0);

        let result: (i32,) = sqlx::query_as("SELECT COUNT(*) FROM creatures")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(result.0, 0);
    }

    #[tokio::test]
    async fn test_file_database_reopens() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("world.db");
        let path = path.to_str().unwrap();

        {
            let db = Database::new(Some(path)).await.unwrap();
            sqlx::query("UPDATE highest_id SET id = 42 WHERE slot = 0")
                .execute(db.pool())
                .await
                .unwrap();
            db.pool().close().await;
        }

        let db = Database::new(Some(path)).await.unwrap();
        let result: (i64,) = sqlx::query_as("SELECT id FROM highest_id WHERE slot = 0")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(result.0, 42);
    }
}
