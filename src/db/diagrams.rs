use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Error as SqlxError, Row};
use tracing::{error, info};
use uuid::Uuid;

use crate::error::PersistError;
use crate::server::persist::{DocumentRepository, LoadFuture, SaveFuture, StoredDocument};

/// Postgres-backed document repository.
pub struct DbDiagrams {
    pool: PgPool,
}

impl DbDiagrams {
    /// Create a new database connection pool
    ///
    /// # Arguments
    /// * `database_url` - PostgreSQL connection string
    pub async fn new(database_url: &str) -> Result<Self, SqlxError> {
        info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(20)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(database_url)
            .await?;

        info!("Database connection pool created successfully");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn load(&self, document_id: Uuid) -> Result<Option<StoredDocument>, PersistError> {
        let row = sqlx::query(
            "SELECT snapshot, content FROM diagram_documents WHERE id = $1",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            info!("Document not found: {}", document_id);
            return Ok(None);
        };

        let snapshot: Option<Vec<u8>> = row
            .try_get("snapshot")
            .map_err(|e| PersistError::Corrupt(e.to_string()))?;
        let content: Option<String> = row
            .try_get("content")
            .map_err(|e| PersistError::Corrupt(e.to_string()))?;
        info!(
            "Loaded document {} ({} snapshot bytes)",
            document_id,
            snapshot.as_ref().map(|s| s.len()).unwrap_or(0)
        );
        Ok(Some(StoredDocument { snapshot, content }))
    }

    async fn save(
        &self,
        document_id: Uuid,
        snapshot: Vec<u8>,
        content: Option<String>,
        last_modified_by: Option<String>,
    ) -> Result<(), PersistError> {
        let result = sqlx::query(
            "INSERT INTO diagram_documents (id, snapshot, content, last_modified_by, updated_at) \
             VALUES ($1, $2, $3, $4, now()) \
             ON CONFLICT (id) DO UPDATE SET \
                 snapshot = EXCLUDED.snapshot, \
                 content = EXCLUDED.content, \
                 last_modified_by = EXCLUDED.last_modified_by, \
                 updated_at = now()",
        )
        .bind(document_id)
        .bind(&snapshot)
        .bind(&content)
        .bind(&last_modified_by)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                info!("Document saved successfully {}", document_id);
                Ok(())
            }
            Err(e) => {
                error!("Failed to save document '{}': {}", document_id, e);
                Err(e.into())
            }
        }
    }
}

impl DocumentRepository for DbDiagrams {
    fn load_document(&self, document_id: Uuid) -> LoadFuture<'_> {
        Box::pin(self.load(document_id))
    }

    fn save_document(
        &self,
        document_id: Uuid,
        snapshot: Vec<u8>,
        content: Option<String>,
        last_modified_by: Option<String>,
    ) -> SaveFuture<'_> {
        Box::pin(self.save(document_id, snapshot, content, last_modified_by))
    }
}
