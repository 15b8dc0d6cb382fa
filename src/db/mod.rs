//! Database layer for the download engine
//!
//! Handles SQLite persistence of download records.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`]: Database lifecycle, schema migrations
//! - [`downloads`]: Record CRUD, guarded status transitions and progress writes
//!
//! Every mutation sets `last_modified = MAX(now, last_modified + 1)` in the
//! same statement, so the column strictly increases per record even when the
//! clock stalls or goes backwards.

use crate::types::{
    DestinationKind, DownloadId, DownloadTask, PauseReason, Status, Visibility,
};
use sqlx::{FromRow, sqlite::SqlitePool};

mod downloads;
mod migrations;

/// Download record as stored in SQLite
#[derive(Debug, Clone, FromRow)]
pub struct DownloadRow {
    /// Unique database ID
    pub id: i64,
    /// Opaque resource identifier
    pub source_uri: String,
    /// Target storage location
    pub destination: String,
    /// Destination kind code
    pub destination_kind: i32,
    /// Status code (see [`Status::to_i32`])
    pub status: i32,
    /// Bytes transferred so far
    pub current_bytes: i64,
    /// Total size, -1 when unknown
    pub total_bytes: i64,
    /// Requesting caller
    pub owner: String,
    /// Display title
    pub title: String,
    /// Display description
    pub description: String,
    /// Visibility code
    pub visibility: i32,
    /// Milliseconds timestamp of the last mutation
    pub last_modified: i64,
    /// Milliseconds timestamp of creation
    pub created_at: i64,
    /// Milliseconds timestamp of the last admission
    pub started_at: Option<i64>,
    /// Transient failures so far
    pub retry_count: i64,
    /// Retry backoff in milliseconds
    pub backoff_ms: i64,
    /// Pause reason code
    pub pause_reason: Option<String>,
    /// Failure description
    pub error_message: Option<String>,
    /// Ignore the recommended mobile ceiling
    pub bypass_recommended_limit: bool,
    /// Allow roaming/metered use
    pub allow_metered: bool,
    /// Terminal notice dismissed
    pub acknowledged: bool,
}

impl From<DownloadRow> for DownloadTask {
    fn from(row: DownloadRow) -> Self {
        DownloadTask {
            id: DownloadId(row.id),
            source_uri: row.source_uri,
            destination: row.destination,
            destination_kind: DestinationKind::from_i32(row.destination_kind),
            status: Status::from_i32(row.status),
            current_bytes: row.current_bytes,
            total_bytes: row.total_bytes,
            owner: row.owner,
            title: row.title,
            description: row.description,
            visibility: Visibility::from_i32(row.visibility),
            last_modified: row.last_modified,
            created_at: row.created_at,
            started_at: row.started_at,
            retry_count: u32::try_from(row.retry_count).unwrap_or(0),
            backoff_ms: row.backoff_ms,
            pause_reason: row.pause_reason.as_deref().and_then(PauseReason::parse),
            error_message: row.error_message,
            bypass_recommended_limit: row.bypass_recommended_limit,
            allow_metered: row.allow_metered,
            acknowledged: row.acknowledged,
        }
    }
}

/// Predicate for [`Database::query`]
///
/// Empty filters match everything; set filters are combined with AND.
#[derive(Debug, Clone, Default)]
pub struct TaskQuery {
    /// Match any of these statuses
    pub statuses: Vec<Status>,
    /// Match this owner
    pub owner: Option<String>,
    /// Match any of these ids
    pub ids: Vec<DownloadId>,
}

impl TaskQuery {
    /// Tasks in any of `statuses`
    pub fn with_status(statuses: &[Status]) -> Self {
        Self {
            statuses: statuses.to_vec(),
            ..Default::default()
        }
    }

    /// Tasks requested by `owner`
    pub fn with_owner(owner: impl Into<String>) -> Self {
        Self {
            owner: Some(owner.into()),
            ..Default::default()
        }
    }
}

/// Database handle for the download engine
pub struct Database {
    pool: SqlitePool,
}
