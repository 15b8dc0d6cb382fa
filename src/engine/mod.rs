//! Download engine split into focused submodules.
//!
//! The `DownloadEngine` struct and its methods are organized by domain:
//! - [`transport`] - Worker contract and progress handle
//! - [`pass`] - Scheduling passes, the pass loop and worker supervision
//! - [`control`] - Caller operations (enqueue, cancel, delete, actions)
//! - [`lifecycle`] - Startup recovery and shutdown coordination

mod control;
mod lifecycle;
mod pass;
pub mod transport;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use pass::PassReport;
pub use transport::{TransferHandle, Transport};

use crate::config::Config;
use crate::db::Database;
use crate::error::{DownloadError, Error, Result};
use crate::facade::SystemFacade;
use crate::notifications::Notifier;
use crate::scheduler::next_modified;
use crate::state::{self, TaskEvent, TransitionContext};
use crate::types::{BroadcastKind, DownloadId, DownloadTask};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How often a status write is retried when a concurrent writer wins the race
const MAX_TRANSITION_ATTEMPTS: usize = 3;

/// Transport worker attached to a running download
pub(crate) struct ActiveWorker {
    /// Signals the worker to stop
    pub(crate) cancel: CancellationToken,
    /// Distinguishes a worker from its successor after a re-admission
    pub(crate) generation: u64,
    /// Worker task
    pub(crate) handle: JoinHandle<()>,
}

/// Worker bookkeeping and pass coordination
#[derive(Clone)]
pub(crate) struct WorkerState {
    /// Workers by download (only `Running` downloads have one)
    pub(crate) active: Arc<Mutex<HashMap<DownloadId, ActiveWorker>>>,
    /// Source of worker generations
    pub(crate) next_generation: Arc<AtomicU64>,
    /// Held for the duration of a pass
    pub(crate) pass_lock: Arc<Mutex<()>>,
    /// Wake signal; permits coalesce, so N requests during a pass yield one more pass
    pub(crate) wake: Arc<Notify>,
    /// Flag to indicate whether new downloads are accepted (set to false during shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Stops the pass loop
    pub(crate) shutdown: CancellationToken,
    /// Pass loop task, once started
    pub(crate) scheduler: Arc<Mutex<Option<JoinHandle<()>>>>,
}

/// Main engine instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct DownloadEngine {
    /// Database instance for persistence (wrapped in Arc for sharing across tasks)
    /// Public for integration tests to query download status
    pub db: Arc<Database>,
    /// Host services
    pub(crate) facade: Arc<dyn SystemFacade>,
    /// Byte mover
    pub(crate) transport: Arc<dyn Transport>,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Displayed notification state
    pub(crate) notifier: Arc<Mutex<Notifier>>,
    /// Worker and pass coordination
    pub(crate) workers: WorkerState,
}

impl DownloadEngine {
    /// Create a new engine
    ///
    /// This validates the configuration, opens (or creates) the database and
    /// returns downloads left `Running` by a previous process to `Pending`.
    /// Call [`start`](Self::start) to begin scheduling.
    pub async fn new(
        config: Config,
        facade: Arc<dyn SystemFacade>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate()?;

        let db = Database::new(&config.persistence.database_path).await?;

        let engine = Self {
            db: Arc::new(db),
            facade,
            transport,
            config: Arc::new(config),
            notifier: Arc::new(Mutex::new(Notifier::new())),
            workers: WorkerState {
                active: Arc::new(Mutex::new(HashMap::new())),
                next_generation: Arc::new(AtomicU64::new(0)),
                pass_lock: Arc::new(Mutex::new(())),
                wake: Arc::new(Notify::new()),
                accepting_new: Arc::new(AtomicBool::new(true)),
                shutdown: CancellationToken::new(),
                scheduler: Arc::new(Mutex::new(None)),
            },
        };

        let recovered = engine.requeue_interrupted().await?;
        tracing::info!(
            database = %engine.config.persistence.database_path.display(),
            recovered,
            "Download engine initialized"
        );

        Ok(engine)
    }

    /// Get the configuration the engine was created with
    pub fn config(&self) -> &Config {
        &self.config
    }

    fn transition_context(&self, now: i64) -> TransitionContext<'_> {
        TransitionContext {
            now,
            retry: &self.config.retry,
        }
    }

    /// Drive one download through the state machine and persist the result
    ///
    /// The write only lands if the record still has the status the event was
    /// validated against; if another writer got there first the record is
    /// re-read and the event re-validated. Entering a terminal state emits
    /// [`BroadcastKind::DownloadComplete`].
    pub(crate) async fn apply_event(
        &self,
        id: DownloadId,
        event: TaskEvent,
    ) -> Result<DownloadTask> {
        for _ in 0..MAX_TRANSITION_ATTEMPTS {
            let task = self
                .db
                .get_download(id)
                .await?
                .ok_or(DownloadError::NotFound { id })?;

            let now = self.facade.current_time_millis();
            let patch = state::transition(&task, &event, self.transition_context(now))?;

            if !self
                .db
                .transition_download(id, task.status, &patch, now)
                .await?
            {
                tracing::debug!(
                    download_id = id.0,
                    event = event.name(),
                    "Download changed during transition, retrying"
                );
                continue;
            }

            let from = task.status;
            let mut updated = task;
            patch.apply_to(&mut updated);
            updated.last_modified = next_modified(updated.last_modified, now);

            tracing::info!(
                download_id = id.0,
                event = event.name(),
                from = %from,
                to = %updated.status,
                "Download transitioned"
            );

            if updated.status.is_terminal() {
                self.facade
                    .emit_broadcast(BroadcastKind::DownloadComplete, id);
            }

            return Ok(updated);
        }

        Err(Error::Other(format!(
            "download {}: gave up applying {} after concurrent updates",
            id,
            event.name()
        )))
    }
}
