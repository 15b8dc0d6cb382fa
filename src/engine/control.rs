//! Caller operations: enqueue, cancel, delete, network flags and notification actions.

use crate::db::TaskQuery;
use crate::error::{DownloadError, Error, Result};
use crate::notifications::{NotificationAction, NotificationId};
use crate::state::TaskEvent;
use crate::types::{BroadcastKind, DownloadId, DownloadTask, NewDownload, TaskPatch};
use std::sync::atomic::Ordering;

use super::DownloadEngine;

impl DownloadEngine {
    /// Submit a new download
    ///
    /// The record is stored as `Pending` and a pass is requested; whether and
    /// when it runs is up to the scheduler.
    ///
    /// # Errors
    ///
    /// - [`Error::ShuttingDown`] once [`shutdown`](Self::shutdown) has begun
    /// - [`Error::Other`] for an empty source or destination
    pub async fn enqueue(&self, request: NewDownload) -> Result<DownloadId> {
        if !self.workers.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        if request.source_uri.trim().is_empty() {
            return Err(Error::Other("source_uri must not be empty".to_string()));
        }
        if request.destination.trim().is_empty() {
            return Err(Error::Other("destination must not be empty".to_string()));
        }

        let now = self.facade.current_time_millis();
        let id = self.db.insert_download(&request, now).await?;

        tracing::info!(
            download_id = id.0,
            owner = %request.owner,
            total_bytes = ?request.total_bytes,
            "Download enqueued"
        );

        self.request_pass();
        Ok(id)
    }

    /// Cancel a download
    ///
    /// The store reflects `Cancelled` when this returns; the transport worker
    /// is signaled and any progress it reports afterwards is rejected.
    ///
    /// # Errors
    ///
    /// Cancelling a finished download is an illegal transition and returns
    /// [`DownloadError::InvalidTransition`].
    pub async fn cancel(&self, id: DownloadId) -> Result<()> {
        self.apply_event(id, TaskEvent::Cancel).await?;
        self.stop_worker(id).await;
        self.request_pass();
        Ok(())
    }

    /// Remove a download record entirely
    ///
    /// Stops its worker and withdraws its completion notice; the owner's
    /// progress notification is refreshed on the next pass.
    pub async fn delete(&self, id: DownloadId) -> Result<()> {
        self.stop_worker(id).await;

        if !self.db.delete_download(id).await? {
            return Err(DownloadError::NotFound { id }.into());
        }

        self.notifier
            .lock()
            .await
            .cancel(&NotificationId::Completed { id }, self.facade.as_ref());

        tracing::info!(download_id = id.0, "Download deleted");
        self.request_pass();
        Ok(())
    }

    /// Change the per-download network permissions
    ///
    /// `bypass_recommended_limit` ignores the recommended mobile ceiling (the
    /// hard ceiling still applies); `allow_metered` permits roaming.
    pub async fn set_network_flags(
        &self,
        id: DownloadId,
        bypass_recommended_limit: bool,
        allow_metered: bool,
    ) -> Result<()> {
        let patch = TaskPatch {
            bypass_recommended_limit: Some(bypass_recommended_limit),
            allow_metered: Some(allow_metered),
            ..Default::default()
        };
        let now = self.facade.current_time_millis();
        if !self.db.update_download(id, &patch, now).await? {
            return Err(DownloadError::NotFound { id }.into());
        }

        tracing::debug!(
            download_id = id.0,
            bypass_recommended_limit,
            allow_metered,
            "Network flags updated"
        );
        self.request_pass();
        Ok(())
    }

    /// Mark a finished download's notice as seen and remove it
    pub async fn acknowledge(&self, id: DownloadId) -> Result<()> {
        let patch = TaskPatch {
            acknowledged: Some(true),
            ..Default::default()
        };
        let now = self.facade.current_time_millis();
        if !self.db.update_download(id, &patch, now).await? {
            return Err(DownloadError::NotFound { id }.into());
        }

        self.notifier
            .lock()
            .await
            .cancel(&NotificationId::Completed { id }, self.facade.as_ref());
        Ok(())
    }

    /// React to the user interacting with a notification
    ///
    /// `open-result` and `show-list` are forwarded to the owning caller as
    /// broadcasts; `dismiss` acknowledges the download.
    pub async fn handle_action(&self, action: NotificationAction) -> Result<()> {
        tracing::debug!(download_id = action.id.0, kind = ?action.kind, "Notification action");

        match action.kind {
            BroadcastKind::OpenResult | BroadcastKind::ShowList => {
                self.facade.emit_broadcast(action.kind, action.id);
                Ok(())
            }
            BroadcastKind::Dismiss => self.acknowledge(action.id).await,
            BroadcastKind::DownloadComplete => Err(Error::Other(format!(
                "{:?} is not a notification action",
                action.kind
            ))),
        }
    }

    /// Get a download by ID
    pub async fn get(&self, id: DownloadId) -> Result<DownloadTask> {
        self.db
            .get_download(id)
            .await?
            .ok_or_else(|| DownloadError::NotFound { id }.into())
    }

    /// List all downloads in creation order
    pub async fn list(&self) -> Result<Vec<DownloadTask>> {
        self.db.list_downloads().await
    }

    /// List downloads matching `predicate`
    pub async fn query(&self, predicate: &TaskQuery) -> Result<Vec<DownloadTask>> {
        self.db.query(predicate).await
    }
}
