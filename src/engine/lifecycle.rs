//! Startup recovery and shutdown coordination.

use crate::db::TaskQuery;
use crate::error::Result;
use crate::state::TaskEvent;
use crate::types::Status;
use std::sync::atomic::Ordering;
use std::time::Duration;

use super::DownloadEngine;

/// Upper bound on waiting for workers to wind down
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

impl DownloadEngine {
    /// Return downloads marked `Running` but without a worker to `Pending`
    ///
    /// Used at startup (the previous process died with transfers in flight)
    /// and at shutdown (workers were stopped). Returns how many were moved.
    pub(crate) async fn requeue_interrupted(&self) -> Result<usize> {
        let running = self
            .db
            .query(&TaskQuery::with_status(&[Status::Running]))
            .await?;

        let mut requeued = 0;
        for task in running {
            match self.apply_event(task.id, TaskEvent::Demote).await {
                Ok(_) => {
                    requeued += 1;
                    tracing::debug!(
                        download_id = task.id.0,
                        current_bytes = task.current_bytes,
                        "Requeued interrupted download"
                    );
                }
                Err(e) => {
                    tracing::warn!(download_id = task.id.0, error = %e, "Failed to requeue interrupted download");
                }
            }
        }

        if requeued > 0 {
            tracing::info!(requeued, "Requeued interrupted downloads");
        }
        Ok(requeued)
    }

    /// Gracefully shut down the engine
    ///
    /// This method performs a clean shutdown sequence:
    /// 1. Stop accepting new downloads
    /// 2. Stop the pass loop
    /// 3. Signal every transport worker and wait (bounded) for them
    /// 4. Return interrupted downloads to `Pending` so they resume on restart
    /// 5. Remove displayed notifications
    /// 6. Close the database
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        // 1. Stop accepting new downloads
        self.workers.accepting_new.store(false, Ordering::SeqCst);

        // 2. Stop the pass loop; an in-flight pass finishes first
        self.workers.shutdown.cancel();
        if let Some(handle) = self.workers.scheduler.lock().await.take()
            && let Err(e) = handle.await
        {
            tracing::warn!(error = %e, "Pass loop ended abnormally");
        }

        // 3. Stop workers
        let workers: Vec<_> = self
            .workers
            .active
            .lock()
            .await
            .drain()
            .map(|(_, worker)| worker)
            .collect();
        tracing::debug!(active_count = workers.len(), "Signaling workers to stop");
        for worker in &workers {
            worker.cancel.cancel();
        }

        let wait_all = futures::future::join_all(workers.into_iter().map(|w| w.handle));
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, wait_all).await {
            Ok(_) => tracing::info!("All workers stopped"),
            Err(_) => {
                tracing::warn!("Timeout waiting for workers to stop, proceeding with shutdown")
            }
        }

        // 4. Persist final state
        if let Err(e) = self.requeue_interrupted().await {
            tracing::error!(error = %e, "Failed to requeue interrupted downloads during shutdown");
        }

        // 5. Notifications
        self.notifier
            .lock()
            .await
            .cancel_all(self.facade.as_ref());

        // 6. Close database connections
        self.db.pool().close().await;

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    /// Whether [`shutdown`](Self::shutdown) has begun
    pub fn is_shutting_down(&self) -> bool {
        !self.workers.accepting_new.load(Ordering::SeqCst)
    }
}
