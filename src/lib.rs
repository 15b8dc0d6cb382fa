//! # download-orchestrator
//!
//! Orchestration core for long-running background downloads.
//!
//! The engine persists one record per download, limits how many run at
//! once, decides per network whether a download may run at all, retries
//! transient failures with backoff, and coalesces progress into one
//! notification per requesting caller.
//!
//! ## Design Philosophy
//!
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Pure core** - State machine, policy, pass planning and notification
//!   aggregation are pure functions over a snapshot; the engine only applies
//!   their decisions
//! - **Host-driven** - Time, network facts, limits and notification display
//!   come through the [`SystemFacade`] trait; bytes move through [`Transport`]
//!
//! ## Quick Start
//!
//! ```no_run
//! use download_orchestrator::{
//!     Config, DownloadEngine, DownloadTask, LocalSystemFacade, NetworkType, NewDownload,
//!     TransferError, TransferHandle, Transport,
//! };
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! struct Http;
//!
//! #[async_trait::async_trait]
//! impl Transport for Http {
//!     async fn transfer(
//!         &self,
//!         task: DownloadTask,
//!         handle: TransferHandle,
//!         cancel: CancellationToken,
//!     ) -> Result<u64, TransferError> {
//!         // fetch task.source_uri into task.destination, reporting progress
//!         handle.report_progress(0, None).await.map_err(TransferError::from)?;
//!         Ok(0)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let facade = Arc::new(LocalSystemFacade::new(&config)?);
//!     facade.set_network(Some(NetworkType::Wifi), false);
//!
//!     // Render notifications and deliver broadcasts
//!     let mut events = facade.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let engine = DownloadEngine::new(config, facade, Arc::new(Http)).await?;
//!     engine.start().await;
//!     engine
//!         .enqueue(NewDownload::new("https://example.com/a.bin", "/tmp/a.bin", "app1"))
//!         .await?;
//!
//!     download_orchestrator::run_with_shutdown(engine).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Download engine (decomposed into focused submodules)
pub mod engine;
/// Error types
pub mod error;
/// Host services boundary
pub mod facade;
/// Notification aggregation
pub mod notifications;
/// Network policy evaluation
pub mod policy;
/// Retry classification and backoff
pub mod retry;
/// Scheduling pass planner
pub mod scheduler;
/// Download state machine
pub mod state;
/// Core types
pub mod types;


// Re-export commonly used types
pub use config::Config;
pub use db::{Database, TaskQuery};
pub use engine::{DownloadEngine, PassReport, TransferHandle, Transport};
pub use error::{DatabaseError, DownloadError, Error, Result, TransferError};
pub use facade::{FacadeEvent, LocalSystemFacade, MobileLimits, SystemFacade};
pub use notifications::{NotificationAction, NotificationContent, NotificationId};
pub use policy::{NetworkFacts, Verdict};
pub use types::{
    BroadcastKind, DestinationKind, DownloadId, DownloadTask, NetworkType, NewDownload,
    PauseReason, Status, Visibility,
};

/// Helper function to run the engine with graceful signal handling.
///
/// Waits for a termination signal and then calls the engine's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use download_orchestrator::{Config, DownloadEngine, LocalSystemFacade, run_with_shutdown};
/// # use download_orchestrator::{DownloadTask, TransferError, TransferHandle, Transport};
/// # use std::sync::Arc;
/// # struct Http;
/// # #[async_trait::async_trait]
/// # impl Transport for Http {
/// #     async fn transfer(
/// #         &self,
/// #         _task: DownloadTask,
/// #         _handle: TransferHandle,
/// #         _cancel: tokio_util::sync::CancellationToken,
/// #     ) -> Result<u64, TransferError> {
/// #         Ok(0)
/// #     }
/// # }
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::default();
///     let facade = Arc::new(LocalSystemFacade::new(&config)?);
///     let engine = DownloadEngine::new(config, facade, Arc::new(Http)).await?;
///     engine.start().await;
///
///     // Run with automatic signal handling
///     run_with_shutdown(engine).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(engine: DownloadEngine) -> Result<()> {
    wait_for_signal().await;
    engine.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
