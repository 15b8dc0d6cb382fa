//! Common utilities for engine integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use download_orchestrator::{
    Config, DownloadEngine, DownloadTask, FacadeEvent, LocalSystemFacade, NetworkType,
    NewDownload, TransferError, TransferHandle, Transport, Visibility,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Default wait for anything asynchronous to happen
pub const WAIT: Duration = Duration::from_secs(5);

/// Transport that completes sources under `/ok/`, fails sources under
/// `/fail/` permanently and holds everything else until cancelled
pub struct PathTransport;

#[async_trait]
impl Transport for PathTransport {
    async fn transfer(
        &self,
        task: DownloadTask,
        handle: TransferHandle,
        cancel: CancellationToken,
    ) -> Result<u64, TransferError> {
        if task.source_uri.contains("/ok/") {
            handle.report_progress(512, Some(1024)).await?;
            handle.report_progress(1024, None).await?;
            Ok(1024)
        } else if task.source_uri.contains("/fail/") {
            Err(TransferError::Fatal("404 Not Found".to_string()))
        } else {
            cancel.cancelled().await;
            Err(TransferError::Transient("cancelled".to_string()))
        }
    }
}

/// Engine backed by a temp database and a host facade reporting wifi
pub async fn create_engine() -> (DownloadEngine, Arc<LocalSystemFacade>, TempDir) {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");

    let mut config = Config::default();
    config.persistence.database_path = temp_dir.path().join("engine.db");
    config.engine.max_concurrent_downloads = 2;

    let facade = Arc::new(LocalSystemFacade::new(&config).expect("Invalid config"));
    facade.set_network(Some(NetworkType::Wifi), false);

    let engine = DownloadEngine::new(config, facade.clone(), Arc::new(PathTransport))
        .await
        .expect("Failed to create engine");

    (engine, facade, temp_dir)
}

/// A request owned by "app1" that leaves a completion notice
pub fn request(path: &str) -> NewDownload {
    NewDownload {
        title: path.rsplit('/').next().unwrap_or_default().to_string(),
        visibility: Visibility::VisibleNotifyCompleted,
        ..NewDownload::new(
            format!("https://example.com{path}"),
            format!("/downloads{path}"),
            "app1",
        )
    }
}

/// Consume events until one matches `predicate`
pub async fn next_matching<F>(
    events: &mut broadcast::Receiver<FacadeEvent>,
    predicate: F,
) -> Option<FacadeEvent>
where
    F: Fn(&FacadeEvent) -> bool,
{
    let result = tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await;

    result.ok().flatten()
}
