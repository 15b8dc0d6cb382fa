//! Download record CRUD operations.

use crate::error::DatabaseError;
use crate::types::{DownloadId, DownloadTask, NewDownload, Status, TaskPatch, UNKNOWN_SIZE};
use crate::{Error, Result};
use sqlx::{QueryBuilder, Sqlite};

use super::{Database, DownloadRow, TaskQuery};

const SELECT_COLUMNS: &str = r#"
    SELECT
        id, source_uri, destination, destination_kind, status,
        current_bytes, total_bytes, owner, title, description, visibility,
        last_modified, created_at, started_at, retry_count, backoff_ms,
        pause_reason, error_message, bypass_recommended_limit, allow_metered,
        acknowledged
    FROM downloads
"#;

const ORDER_BY_CREATION: &str = " ORDER BY created_at ASC, id ASC";

/// Append `SET` assignments for every column the patch touches
fn push_patch(builder: &mut QueryBuilder<'_, Sqlite>, patch: &TaskPatch, now: i64) {
    builder.push("UPDATE downloads SET last_modified = MAX(");
    builder.push_bind(now);
    builder.push(", last_modified + 1)");

    if let Some(status) = patch.status {
        builder.push(", status = ").push_bind(status.to_i32());
    }
    if let Some(current) = patch.current_bytes {
        builder.push(", current_bytes = ").push_bind(current);
    }
    if let Some(total) = patch.total_bytes {
        builder.push(", total_bytes = ").push_bind(total);
    }
    if let Some(retry_count) = patch.retry_count {
        builder
            .push(", retry_count = ")
            .push_bind(i64::from(retry_count));
    }
    if let Some(backoff_ms) = patch.backoff_ms {
        builder.push(", backoff_ms = ").push_bind(backoff_ms);
    }
    if let Some(reason) = patch.pause_reason {
        builder
            .push(", pause_reason = ")
            .push_bind(reason.map(|r| r.as_str()));
    }
    if let Some(message) = &patch.error_message {
        builder.push(", error_message = ").push_bind(message.clone());
    }
    if let Some(started_at) = patch.started_at {
        builder.push(", started_at = ").push_bind(started_at);
    }
    if let Some(bypass) = patch.bypass_recommended_limit {
        builder
            .push(", bypass_recommended_limit = ")
            .push_bind(bypass);
    }
    if let Some(allow) = patch.allow_metered {
        builder.push(", allow_metered = ").push_bind(allow);
    }
    if let Some(acknowledged) = patch.acknowledged {
        builder.push(", acknowledged = ").push_bind(acknowledged);
    }

    // An edit that leaves status and backoff alone must not move a pending
    // retry's deadline (last_modified + backoff_ms)
    if patch.status.is_none() && patch.backoff_ms.is_none() {
        builder
            .push(", backoff_ms = CASE WHEN status = ")
            .push_bind(Status::PausedRetry.to_i32())
            .push(" THEN MAX(0, backoff_ms - (MAX(")
            .push_bind(now)
            .push(", last_modified + 1) - last_modified)) ELSE backoff_ms END");
    }
}

impl Database {
    /// Insert a new download record in `Pending`
    pub async fn insert_download(&self, download: &NewDownload, now: i64) -> Result<DownloadId> {
        let total_bytes = download
            .total_bytes
            .map_or(UNKNOWN_SIZE, |size| i64::try_from(size).unwrap_or(i64::MAX));

        let result = sqlx::query(
            r#"
            INSERT INTO downloads (
                source_uri, destination, destination_kind, status,
                current_bytes, total_bytes, owner, title, description,
                visibility, last_modified, created_at,
                bypass_recommended_limit, allow_metered
            ) VALUES (?, ?, ?, ?, 0, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&download.source_uri)
        .bind(&download.destination)
        .bind(download.destination_kind.to_i32())
        .bind(Status::Pending.to_i32())
        .bind(total_bytes)
        .bind(&download.owner)
        .bind(&download.title)
        .bind(&download.description)
        .bind(download.visibility.to_i32())
        .bind(now)
        .bind(now)
        .bind(download.bypass_recommended_limit)
        .bind(download.allow_metered)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert download: {}",
                e
            )))
        })?;

        Ok(DownloadId(result.last_insert_rowid()))
    }

    /// Get a download by ID
    pub async fn get_download(&self, id: DownloadId) -> Result<Option<DownloadTask>> {
        let row = sqlx::query_as::<_, DownloadRow>(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to get download: {}",
                    e
                )))
            })?;

        Ok(row.map(DownloadTask::from))
    }

    /// List all downloads in creation order
    pub async fn list_downloads(&self) -> Result<Vec<DownloadTask>> {
        self.query(&TaskQuery::default()).await
    }

    /// List downloads matching `predicate`, in creation order
    pub async fn query(&self, predicate: &TaskQuery) -> Result<Vec<DownloadTask>> {
        let mut builder = QueryBuilder::<Sqlite>::new(SELECT_COLUMNS);
        builder.push(" WHERE 1 = 1");

        if !predicate.statuses.is_empty() {
            builder.push(" AND status IN (");
            let mut separated = builder.separated(", ");
            for status in &predicate.statuses {
                separated.push_bind(status.to_i32());
            }
            separated.push_unseparated(")");
        }
        if let Some(owner) = &predicate.owner {
            builder.push(" AND owner = ").push_bind(owner.clone());
        }
        if !predicate.ids.is_empty() {
            builder.push(" AND id IN (");
            let mut separated = builder.separated(", ");
            for id in &predicate.ids {
                separated.push_bind(id.0);
            }
            separated.push_unseparated(")");
        }
        builder.push(ORDER_BY_CREATION);

        let rows = builder
            .build_query_as::<DownloadRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to query downloads: {}",
                    e
                )))
            })?;

        Ok(rows.into_iter().map(DownloadTask::from).collect())
    }

    /// Apply `patch` unconditionally
    ///
    /// Returns false if the record does not exist.
    pub async fn update_download(
        &self,
        id: DownloadId,
        patch: &TaskPatch,
        now: i64,
    ) -> Result<bool> {
        let mut builder = QueryBuilder::<Sqlite>::new("");
        push_patch(&mut builder, patch, now);
        builder.push(" WHERE id = ").push_bind(id.0);

        let result = builder.build().execute(&self.pool).await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update download: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Apply `patch` only if the record is still in `expected`
    ///
    /// Returns false when the record moved on (or vanished) since it was
    /// read, in which case nothing is written.
    pub async fn transition_download(
        &self,
        id: DownloadId,
        expected: Status,
        patch: &TaskPatch,
        now: i64,
    ) -> Result<bool> {
        let mut builder = QueryBuilder::<Sqlite>::new("");
        push_patch(&mut builder, patch, now);
        builder.push(" WHERE id = ").push_bind(id.0);
        builder.push(" AND status = ").push_bind(expected.to_i32());

        let result = builder.build().execute(&self.pool).await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to transition download: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Record transfer progress
    ///
    /// Accepted only while the record is `Running`, the byte count does not
    /// go backwards and it stays within the size when the size is known.
    /// `total_bytes` replaces the stored size when given. Returns whether
    /// the write was accepted.
    pub async fn update_progress(
        &self,
        id: DownloadId,
        current_bytes: i64,
        total_bytes: Option<i64>,
        now: i64,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE downloads
            SET current_bytes = ?1,
                total_bytes = COALESCE(?2, total_bytes),
                last_modified = MAX(?3, last_modified + 1)
            WHERE id = ?4
              AND status = ?5
              AND current_bytes <= ?1
              AND (COALESCE(?2, total_bytes) < 0 OR ?1 <= COALESCE(?2, total_bytes))
            "#,
        )
        .bind(current_bytes)
        .bind(total_bytes)
        .bind(now)
        .bind(id)
        .bind(Status::Running.to_i32())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update progress: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a download record
    ///
    /// Returns false if it did not exist.
    pub async fn delete_download(&self, id: DownloadId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM downloads WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete download: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }
}
