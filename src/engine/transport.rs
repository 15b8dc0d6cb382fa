//! Transport worker contract.
//!
//! Moving bytes (HTTP, range requests, disk I/O) happens outside this crate.
//! The engine runs one [`Transport::transfer`] call per `Running` task and
//! learns the outcome from its return value; progress flows back through the
//! [`TransferHandle`].

use crate::db::Database;
use crate::error::{Result, TransferError};
use crate::facade::SystemFacade;
use crate::types::{DownloadId, DownloadTask};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Performs the byte transfer for one download
///
/// `transfer` should check `cancel` between chunks and return promptly once
/// it fires; whatever it returns after cancellation is discarded. On success
/// it returns the final size in bytes.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transfer `task` to its destination
    async fn transfer(
        &self,
        task: DownloadTask,
        handle: TransferHandle,
        cancel: CancellationToken,
    ) -> std::result::Result<u64, TransferError>;
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Progress channel from a worker back into the store
#[derive(Clone)]
pub struct TransferHandle {
    id: DownloadId,
    db: Arc<Database>,
    facade: Arc<dyn SystemFacade>,
    wake: Arc<Notify>,
    cancel: CancellationToken,
}

impl TransferHandle {
    pub(crate) fn new(
        id: DownloadId,
        db: Arc<Database>,
        facade: Arc<dyn SystemFacade>,
        wake: Arc<Notify>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            db,
            facade,
            wake,
            cancel,
        }
    }

    /// Download this handle reports for
    pub fn id(&self) -> DownloadId {
        self.id
    }

    /// Record the byte count (and the size, once known)
    ///
    /// Returns false when the write was rejected: the worker holding this
    /// handle was stopped, the task is no longer `Running` (cancelled,
    /// paused, demoted), the count went backwards, or it exceeds the known
    /// size. A stopped worker stays rejected even after the task is admitted
    /// again under a new worker.
    pub async fn report_progress(
        &self,
        current_bytes: u64,
        total_bytes: Option<u64>,
    ) -> Result<bool> {
        if self.cancel.is_cancelled() {
            tracing::debug!(
                download_id = self.id.0,
                current_bytes,
                "Progress from stopped worker ignored"
            );
            return Ok(false);
        }

        let now = self.facade.current_time_millis();
        let accepted = self
            .db
            .update_progress(
                self.id,
                saturating_i64(current_bytes),
                total_bytes.map(saturating_i64),
                now,
            )
            .await?;

        if accepted {
            self.wake.notify_one();
        } else {
            tracing::debug!(
                download_id = self.id.0,
                current_bytes,
                "Progress write rejected"
            );
        }

        Ok(accepted)
    }
}
