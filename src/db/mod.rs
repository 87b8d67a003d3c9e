//! Database module providing connection management and typed queries.

pub mod devices;
pub mod jobs;

use sea_orm::{Database, DatabaseConnection};

use crate::config::Config;
use crate::error::{AppError, AppResult};

/// Database connection wrapper shared across workers and handlers.
#[derive(Clone)]
pub struct DbPool {
    conn: DatabaseConnection,
}

impl DbPool {
    /// Create a new database pool from configuration.
    pub async fn new(config: &Config) -> AppResult<Self> {
        Self::connect(&config.database_url).await
    }

    /// Connect to the given database URL.
    pub async fn connect(database_url: &str) -> AppResult<Self> {
        let conn = Database::connect(database_url)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to database: {}", e)))?;

        Ok(DbPool { conn })
    }

    /// Wrap an existing connection (used by the test suites).
    pub fn from_connection(conn: DatabaseConnection) -> Self {
        DbPool { conn }
    }

    /// Get access to the connection for executing queries.
    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }
}
