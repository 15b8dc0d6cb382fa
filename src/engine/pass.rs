//! Scheduling passes, the pass loop and transport worker supervision.

use crate::error::{Result, TransferError};
use crate::notifications::{SyncStats, aggregate};
use crate::policy::NetworkFacts;
use crate::scheduler::plan_pass;
use crate::state::TaskEvent;
use crate::types::{DownloadId, DownloadTask, Status};
use std::collections::HashSet;
use std::sync::atomic::Ordering;
use tokio_util::sync::CancellationToken;

use super::{ActiveWorker, DownloadEngine, TransferHandle};

/// Outcome of one scheduling pass
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Planned updates that were persisted
    pub applied: usize,
    /// Planned updates dropped because the record changed meanwhile
    pub skipped: usize,
    /// Downloads admitted to `Running`
    pub admitted: Vec<DownloadId>,
    /// Downloads `Running` after the pass
    pub running: usize,
    /// Notification changes
    pub notifications: SyncStats,
}

impl DownloadEngine {
    /// Ask for a scheduling pass
    ///
    /// Requests made while a pass is running collapse into a single
    /// follow-up pass.
    pub fn request_pass(&self) {
        self.workers.wake.notify_one();
    }

    /// Run one scheduling pass now
    ///
    /// Passes are serialized: a call made while another pass is in progress
    /// waits for it to finish. The pass reads every record once, persists the
    /// planned transitions, starts or stops transport workers to match, and
    /// refreshes notifications from the same snapshot.
    pub async fn run_pass(&self) -> Result<PassReport> {
        let _pass = self.workers.pass_lock.lock().await;

        let now = self.facade.current_time_millis();
        let facts = NetworkFacts::capture(self.facade.as_ref());
        let max_concurrent = self.facade.max_concurrent_downloads();

        let snapshot = self.db.list_downloads().await?;
        let plan = plan_pass(
            snapshot,
            &facts,
            max_concurrent,
            self.transition_context(now),
        );

        let mut report = PassReport::default();
        for update in &plan.updates {
            let applied = self
                .db
                .transition_download(update.id, update.expected_status, &update.patch, now)
                .await?;
            if applied {
                report.applied += 1;
                if update.event == Some(TaskEvent::Admit) {
                    report.admitted.push(update.id);
                }
            } else {
                report.skipped += 1;
                tracing::debug!(
                    download_id = update.id.0,
                    expected = %update.expected_status,
                    "Planned update skipped, download changed during pass"
                );
            }
        }

        // A skipped update means the snapshot is behind the store; catch up next pass
        if report.skipped > 0 {
            self.request_pass();
        }

        self.reconcile_workers(&plan.snapshot).await;

        let notifications = aggregate(&plan.snapshot, &self.config.notifications);
        report.notifications = self
            .notifier
            .lock()
            .await
            .sync(&notifications, self.facade.as_ref());
        report.running = plan.running_count();

        tracing::debug!(
            applied = report.applied,
            skipped = report.skipped,
            admitted = report.admitted.len(),
            running = report.running,
            max_concurrent,
            "Scheduling pass complete"
        );

        Ok(report)
    }

    /// Start the pass loop
    ///
    /// The loop runs a pass whenever one is requested and at least every
    /// `pass_interval`, until [`shutdown`](Self::shutdown). Calling this
    /// twice has no effect.
    pub async fn start(&self) {
        let mut slot = self.workers.scheduler.lock().await;
        if slot.is_some() {
            tracing::debug!("Pass loop already running");
            return;
        }

        let engine = self.clone();
        *slot = Some(tokio::spawn(async move {
            engine.pass_loop().await;
        }));
        tracing::info!(
            pass_interval_secs = self.config.engine.pass_interval.as_secs(),
            "Pass loop started"
        );
    }

    async fn pass_loop(&self) {
        let mut interval = tokio::time::interval(self.config.engine.pass_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.workers.shutdown.cancelled() => break,
                _ = self.workers.wake.notified() => {}
                _ = interval.tick() => {}
            }

            if let Err(e) = self.run_pass().await {
                tracing::error!(error = %e, "Scheduling pass failed");
            }
        }

        tracing::info!("Pass loop stopped");
    }

    /// Make the worker set match the `Running` downloads in `snapshot`
    async fn reconcile_workers(&self, snapshot: &[DownloadTask]) {
        let running: HashSet<DownloadId> = snapshot
            .iter()
            .filter(|t| t.status == Status::Running)
            .map(|t| t.id)
            .collect();

        let mut active = self.workers.active.lock().await;

        active.retain(|id, worker| {
            if running.contains(id) {
                return true;
            }
            tracing::debug!(download_id = id.0, "Stopping worker of download no longer running");
            worker.cancel.cancel();
            false
        });

        if !self.workers.accepting_new.load(Ordering::SeqCst) {
            return;
        }

        for task in snapshot.iter().filter(|t| t.status == Status::Running) {
            let needs_worker = active
                .get(&task.id)
                .is_none_or(|worker| worker.cancel.is_cancelled() || worker.handle.is_finished());
            if needs_worker {
                let worker = self.spawn_worker(task.clone());
                if let Some(previous) = active.insert(task.id, worker) {
                    previous.cancel.cancel();
                }
            }
        }
    }

    fn spawn_worker(&self, task: DownloadTask) -> ActiveWorker {
        let cancel = CancellationToken::new();
        let generation = self
            .workers
            .next_generation
            .fetch_add(1, Ordering::SeqCst);

        let engine = self.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            engine.run_worker(task, token, generation).await;
        });

        ActiveWorker {
            cancel,
            generation,
            handle,
        }
    }

    async fn run_worker(&self, task: DownloadTask, cancel: CancellationToken, generation: u64) {
        let id = task.id;

        // The snapshot that started us may be stale (completed or cancelled since)
        let task = match self.db.get_download(id).await {
            Ok(Some(current)) if current.status == Status::Running => current,
            Ok(_) => {
                tracing::debug!(download_id = id.0, "Download no longer running, worker exits");
                self.release_worker(id, generation).await;
                return;
            }
            Err(e) => {
                tracing::error!(download_id = id.0, error = %e, "Failed to load download for worker");
                self.release_worker(id, generation).await;
                return;
            }
        };

        tracing::info!(
            download_id = id.0,
            source = %task.source_uri,
            retry_count = task.retry_count,
            "Transfer started"
        );

        let handle = TransferHandle::new(
            id,
            self.db.clone(),
            self.facade.clone(),
            self.workers.wake.clone(),
            cancel.clone(),
        );
        let result = self.transport.transfer(task, handle, cancel.clone()).await;

        if cancel.is_cancelled() {
            tracing::debug!(download_id = id.0, "Worker cancelled, result discarded");
        } else {
            let event = match result {
                Ok(final_bytes) => TaskEvent::Complete {
                    final_bytes: i64::try_from(final_bytes).unwrap_or(i64::MAX),
                },
                Err(TransferError::Transient(reason)) => {
                    tracing::warn!(download_id = id.0, reason = %reason, "Transfer failed, will retry");
                    TaskEvent::TransientFailure { reason }
                }
                Err(TransferError::Fatal(reason)) => {
                    tracing::warn!(download_id = id.0, reason = %reason, "Transfer failed permanently");
                    TaskEvent::FatalFailure { reason }
                }
            };

            if let Err(e) = self.apply_event(id, event).await {
                tracing::warn!(download_id = id.0, error = %e, "Worker report not applied");
            }
        }

        self.release_worker(id, generation).await;
    }

    /// Forget a finished worker (unless it was already replaced) and wake the scheduler
    async fn release_worker(&self, id: DownloadId, generation: u64) {
        {
            let mut active = self.workers.active.lock().await;
            if active.get(&id).is_some_and(|w| w.generation == generation) {
                active.remove(&id);
            }
        }
        self.request_pass();
    }

    /// Signal a download's worker to stop, if it has one
    pub(crate) async fn stop_worker(&self, id: DownloadId) {
        if let Some(worker) = self.workers.active.lock().await.remove(&id) {
            tracing::debug!(download_id = id.0, "Signaling worker to stop");
            worker.cancel.cancel();
        }
    }

    /// Number of transport workers currently attached
    pub async fn active_worker_count(&self) -> usize {
        self.workers.active.lock().await.len()
    }
}
