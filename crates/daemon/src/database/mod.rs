mod objects;
mod permissions;
mod revisions;
mod sqlite;

use std::ops::Deref;
use std::path::Path;

use sqlx::SqlitePool;

pub use objects::{ListKind, ObjectQueries};
pub use permissions::PermissionQueries;
pub use revisions::RevisionQueries;

/// Schema version this build writes and expects.
pub const SCHEMA_VERSION: &str = "20260301";

#[derive(Clone, Debug)]
pub struct Database(SqlitePool);

pub type DatabaseConnection = sqlx::SqliteConnection;

impl Database {
    /// Open (creating if needed) the SQLite file at `path` and migrate it.
    pub async fn connect(path: &Path) -> Result<Self, DatabaseSetupError> {
        let db = sqlite::connect_sqlite(path).await?;
        sqlite::migrate_sqlite(&db).await?;
        Ok(Database::new(db))
    }

    pub async fn in_memory() -> Result<Self, DatabaseSetupError> {
        let db = sqlite::connect_memory().await?;
        sqlite::migrate_sqlite(&db).await?;
        Ok(Database::new(db))
    }

    pub fn new(pool: SqlitePool) -> Self {
        Self(pool)
    }

    /// Record `configured` as the schema version if none is stored yet, and
    /// return whatever is stored afterwards.
    pub async fn schema_version(&self, configured: &str) -> Result<String, sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO db_state (id, schema_version, created_at)
            VALUES (1, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(configured)
        .bind(chrono::Utc::now())
        .execute(&self.0)
        .await?;

        sqlx::query_scalar("SELECT schema_version FROM db_state WHERE id = 1")
            .fetch_one(&self.0)
            .await
    }

    /// The stored schema version, without recording one.
    pub async fn stored_schema_version(&self) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar("SELECT schema_version FROM db_state WHERE id = 1")
            .fetch_optional(&self.0)
            .await
    }

    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.0).await?;
        Ok(())
    }
}

impl Deref for Database {
    type Target = SqlitePool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DatabaseSetupError {
    #[error("error occurred while attempting database migration: {0}")]
    MigrationFailed(#[from] sqlx::migrate::MigrateError),

    #[error("unable to perform initial connection and check of the database: {0}")]
    Unavailable(#[from] sqlx::Error),

    #[error("unable to prepare the database directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Map a column parse failure into a sqlx decode error.
pub(crate) fn decode<T, E>(column: &str, value: Result<T, E>) -> Result<T, sqlx::Error>
where
    E: std::error::Error + Send + Sync + 'static,
{
    value.map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}
