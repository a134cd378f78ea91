//! # torrent-quarantine
//!
//! Quarantine-first torrent acquisition pipeline.
//!
//! ## Design Philosophy
//!
//! torrent-quarantine is designed to be:
//! - **Quarantine-first** - Nothing reaches permanent storage before a clean scan
//! - **Resumable** - Every stage is a persisted, retryable job
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, polling is optional
//!
//! A download moves through four jobs: the source URL is checked against
//! VirusTotal, the torrent payload is fetched into a quarantine disk, the
//! payload itself is scanned, and only a clean payload is promoted to its
//! destination disk. Malicious URLs and files are blocked, deleted and
//! written to the audit log.
//!
//! ## Quick Start
//!
//! ```no_run
//! use torrent_quarantine::{AuditContext, Config, InitiateDownload, Pipeline};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.threat_intel.api_key = Some("vt-api-key".to_string());
//!
//!     let pipeline = Pipeline::new(config).await?;
//!     pipeline.start();
//!
//!     // Subscribe to events
//!     let mut events = pipeline.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let response = pipeline
//!         .initiate_download(
//!             InitiateDownload {
//!                 magnet_link: Some("magnet:?xt=urn:btih:c9e15763f722f23e98a29decdfae341b98d53056".into()),
//!                 ..Default::default()
//!             },
//!             AuditContext::for_user(1),
//!         )
//!         .await?;
//!     println!("queued download {}", response.file_id);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Audit trail for destructive actions
pub mod audit;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// Torrent payload fetching
pub mod fetcher;
/// Acquisition pipeline (decomposed into focused submodules)
pub mod pipeline;
/// Quarantine disk operations
pub mod quarantine;
/// Request rate limiting with a token bucket
pub mod rate_limiter;
/// Retry logic with linear backoff
pub mod retry;
/// Status state machine writes
pub mod status;
/// Local disk storage
pub mod storage;
/// Threat-intelligence API client
pub mod threat_intel;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use audit::{AuditContext, AuditEntry, AuditSink, TracingAuditSink};
pub use config::{Config, JobPolicy};
pub use db::{Database, DownloadRecord, ScannedUrl};
pub use error::{
    ApiErrorCode, DatabaseError, Error, PipelineError, QuarantineError, Result, ThreatIntelError,
};
pub use fetcher::{HttpTorrentFetcher, TorrentFetcher};
pub use pipeline::{Collaborators, Pipeline};
pub use quarantine::QuarantineStore;
pub use status::StatusTracker;
pub use threat_intel::{AnalysisReport, ScanReport, ThreatIntel, ThreatSummary, VirusTotalClient};
pub use types::{
    DownloadId, DownloadMetadata, DownloadStatus, Event, InitiateDownload, InitiateResponse,
    ScanStatus, StatusView, StorageLocation,
};

/// Helper function to run the pipeline with graceful signal handling.
///
/// Waits for a termination signal and then calls the pipeline's `shutdown()` method.
///
/// Listens for SIGTERM (Unix) and Ctrl+C.
///
/// # Example
///
/// ```no_run
/// use torrent_quarantine::{Config, Pipeline, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let pipeline = Pipeline::new(Config::default()).await?;
///     pipeline.start();
///
///     // Run with automatic signal handling
///     run_with_shutdown(pipeline).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(pipeline: Pipeline) -> Result<()> {
    wait_for_signal().await;
    pipeline.shutdown().await
}

/// Resolves on SIGTERM or Ctrl+C
///
/// Without a SIGTERM handler only Ctrl+C ends the wait.
#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let sigterm = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = sigterm => tracing::info!("termination requested"),
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => tracing::info!("interrupt received"),
            Err(e) => tracing::error!(error = %e, "ctrl_c listener failed"),
        },
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "ctrl_c listener failed");
    }
}
