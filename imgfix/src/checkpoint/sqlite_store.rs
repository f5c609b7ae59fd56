//! SQLite checkpoint backend
//!
//! Schema:
//! - `partitions(partition_id INTEGER PRIMARY KEY, fixed INTEGER, updated_at TEXT)`
//! - `corrupt_images(partition_id, position, full_path, filename)`, keyed by
//!   `(partition_id, position)` so scan order survives a round trip
//!
//! Every save rewrites both tables inside one transaction.

use super::{CheckpointError, CheckpointStore};
use async_trait::async_trait;
use chrono::Utc;
use imgfix_common::models::{CorruptImageEntry, CorruptionIndex, PartitionId, PartitionRepairState};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Connection};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Checkpoint stored in an embedded SQLite database
#[derive(Debug, Clone)]
pub struct SqliteCheckpointStore {
    path: PathBuf,
}

impl SqliteCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn connect(&self, create: bool) -> Result<SqliteConnection, sqlx::Error> {
        SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(create)
            .connect()
            .await
    }

    async fn create_tables(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS partitions (
                partition_id INTEGER PRIMARY KEY,
                fixed INTEGER NOT NULL DEFAULT 0 CHECK (fixed IN (0, 1)),
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS corrupt_images (
                partition_id INTEGER NOT NULL REFERENCES partitions(partition_id),
                position INTEGER NOT NULL,
                full_path TEXT NOT NULL,
                filename TEXT NOT NULL,
                PRIMARY KEY (partition_id, position)
            )
            "#,
        )
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    async fn write_index(
        conn: &mut SqliteConnection,
        index: &CorruptionIndex,
    ) -> Result<(), sqlx::Error> {
        let updated_at = Utc::now().to_rfc3339();
        let mut tx = conn.begin().await?;

        sqlx::query("DELETE FROM corrupt_images").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM partitions").execute(&mut *tx).await?;

        for (partition_id, state) in index.iter() {
            sqlx::query("INSERT INTO partitions (partition_id, fixed, updated_at) VALUES (?, ?, ?)")
                .bind(i64::from(partition_id.get()))
                .bind(state.fixed)
                .bind(&updated_at)
                .execute(&mut *tx)
                .await?;

            for (position, entry) in state.images.iter().enumerate() {
                sqlx::query(
                    "INSERT INTO corrupt_images (partition_id, position, full_path, filename) VALUES (?, ?, ?, ?)",
                )
                .bind(i64::from(partition_id.get()))
                .bind(position as i64)
                .bind(entry.full_path.to_string_lossy().into_owned())
                .bind(&entry.filename)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await
    }

    async fn read_index(&self, conn: &mut SqliteConnection) -> Result<CorruptionIndex, CheckpointError> {
        let partitions: Vec<(i64, bool)> =
            sqlx::query_as("SELECT partition_id, fixed FROM partitions ORDER BY partition_id")
                .fetch_all(&mut *conn)
                .await
                .map_err(|e| CheckpointError::load(&self.path, e))?;

        let images: Vec<(i64, String, String)> = sqlx::query_as(
            "SELECT partition_id, full_path, filename FROM corrupt_images ORDER BY partition_id, position",
        )
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| CheckpointError::load(&self.path, e))?;

        let mut index = CorruptionIndex::new();
        for (raw_id, fixed) in partitions {
            let id = self.partition_id(raw_id)?;
            index.insert_state(
                id,
                PartitionRepairState {
                    images: Vec::new(),
                    fixed,
                },
            );
        }

        for (raw_id, full_path, filename) in images {
            let id = self.partition_id(raw_id)?;
            if index.get(id).is_none() {
                return Err(CheckpointError::load(
                    &self.path,
                    format!("image row references unknown partition {}", raw_id),
                ));
            }
            index.record(
                id,
                CorruptImageEntry {
                    full_path: PathBuf::from(full_path),
                    filename,
                },
            );
        }

        Ok(index)
    }

    fn partition_id(&self, raw: i64) -> Result<PartitionId, CheckpointError> {
        u32::try_from(raw)
            .map(PartitionId::new)
            .map_err(|_| CheckpointError::load(&self.path, format!("invalid partition id {}", raw)))
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn load(&self) -> Result<Option<CorruptionIndex>, CheckpointError> {
        if !tokio::fs::try_exists(&self.path)
            .await
            .map_err(|e| CheckpointError::load(&self.path, e))?
        {
            return Ok(None);
        }

        let mut conn = self
            .connect(false)
            .await
            .map_err(|e| CheckpointError::load(&self.path, e))?;
        let index = self.read_index(&mut conn).await;
        let _ = conn.close().await;
        let index = index?;

        debug!(
            checkpoint = %self.path.display(),
            partitions = index.len(),
            "Loaded SQLite checkpoint"
        );
        Ok(Some(index))
    }

    async fn save(&self, index: &CorruptionIndex) -> Result<(), CheckpointError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| CheckpointError::save(&self.path, e))?;
            }
        }

        let mut conn = self
            .connect(true)
            .await
            .map_err(|e| CheckpointError::save(&self.path, e))?;

        let result = async {
            Self::create_tables(&mut conn).await?;
            Self::write_index(&mut conn, index).await
        }
        .await;
        let _ = conn.close().await;
        result.map_err(|e| CheckpointError::save(&self.path, e))?;

        debug!(checkpoint = %self.path.display(), "Checkpoint saved");
        Ok(())
    }

    fn location(&self) -> &Path {
        &self.path
    }
}
