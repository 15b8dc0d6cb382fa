//! Shared test helpers for creating DownloadEngine instances in tests.

use crate::config::Config;
use crate::error::TransferError;
use crate::test_support::FakeFacade;
use crate::types::{DownloadId, DownloadTask, NewDownload, Status};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

use super::{DownloadEngine, TransferHandle, Transport};

/// What the scripted transport does for a source
#[derive(Clone, Debug)]
pub(crate) enum Script {
    /// Wait until cancelled; the test drives progress through the handle
    Hold,
    /// Report the size as progress, then succeed
    Complete(u64),
    /// Fail with this error
    Fail(TransferError),
}

/// Transport double that follows a per-source script
pub(crate) struct ScriptedTransport {
    scripts: Mutex<HashMap<String, Script>>,
    handles: Mutex<HashMap<DownloadId, TransferHandle>>,
    started: Mutex<Vec<DownloadId>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            handles: Mutex::new(HashMap::new()),
            started: Mutex::new(Vec::new()),
        }
    }

    /// Script transfers of `source_uri`; unscripted sources hold
    pub(crate) fn script(&self, source_uri: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .insert(source_uri.to_string(), script);
    }

    /// Handle given to the most recent transfer of `id`
    pub(crate) fn handle(&self, id: DownloadId) -> Option<TransferHandle> {
        self.handles.lock().unwrap().get(&id).cloned()
    }

    /// Downloads whose transfer started, in start order
    pub(crate) fn started(&self) -> Vec<DownloadId> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn transfer(
        &self,
        task: DownloadTask,
        handle: TransferHandle,
        cancel: CancellationToken,
    ) -> Result<u64, TransferError> {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&task.source_uri)
            .cloned()
            .unwrap_or(Script::Hold);
        self.handles.lock().unwrap().insert(task.id, handle.clone());
        self.started.lock().unwrap().push(task.id);

        match script {
            Script::Hold => {
                cancel.cancelled().await;
                Err(TransferError::Transient("cancelled".to_string()))
            }
            Script::Complete(size) => {
                handle
                    .report_progress(size, Some(size))
                    .await
                    .map_err(TransferError::from)?;
                Ok(size)
            }
            Script::Fail(error) => Err(error),
        }
    }
}

/// Helper to create a test DownloadEngine backed by a throwaway database.
/// Returns the engine, its doubles and the tempdir (which must be kept alive).
pub(crate) async fn create_test_engine() -> (
    DownloadEngine,
    Arc<FakeFacade>,
    Arc<ScriptedTransport>,
    tempfile::TempDir,
) {
    let mut config = Config::default();
    config.retry.jitter = false;
    create_test_engine_with(config).await
}

/// Same as [`create_test_engine`] with a caller-supplied configuration
pub(crate) async fn create_test_engine_with(
    mut config: Config,
) -> (
    DownloadEngine,
    Arc<FakeFacade>,
    Arc<ScriptedTransport>,
    tempfile::TempDir,
) {
    let temp_dir = tempdir().unwrap();
    config.persistence.database_path = temp_dir.path().join("test.db");

    let facade = Arc::new(FakeFacade::new());
    facade.set_max_concurrent(config.engine.max_concurrent_downloads);
    let transport = Arc::new(ScriptedTransport::new());

    let engine = DownloadEngine::new(config, facade.clone(), transport.clone())
        .await
        .unwrap();

    (engine, facade, transport, temp_dir)
}

/// A request for `name` owned by "app1" with a known size
pub(crate) fn request(name: &str, total_bytes: u64) -> NewDownload {
    NewDownload {
        title: name.to_string(),
        total_bytes: Some(total_bytes),
        ..NewDownload::new(
            format!("https://example.com/{name}"),
            format!("/downloads/{name}"),
            "app1",
        )
    }
}

/// Poll until `id` reaches `status`, panicking after a few seconds
pub(crate) async fn wait_for_status(engine: &DownloadEngine, id: DownloadId, status: Status) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let current = engine.get(id).await.unwrap().status;
        if current == status {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "download {id} stuck in {current}, expected {status}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until the transport has started a transfer for `id`
pub(crate) async fn wait_for_handle(
    transport: &ScriptedTransport,
    id: DownloadId,
) -> TransferHandle {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(handle) = transport.handle(id) {
            return handle;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "transfer for {id} never started"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until no worker is attached
pub(crate) async fn wait_for_idle(engine: &DownloadEngine) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while engine.active_worker_count().await > 0 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "workers did not finish"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
