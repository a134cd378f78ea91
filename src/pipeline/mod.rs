//! Torrent acquisition pipeline split into focused submodules.
//!
//! The [`Pipeline`] struct and its methods are organized by domain:
//! - [`jobs`] - Job types, envelopes and stage outcomes
//! - [`worker`] - Delayed job dispatch, worker pool and job retry handling
//! - [`initiate`] - Creating records and dispatching their first job
//! - [`verify_url`] - Source URL verification stage
//! - [`download`] - Payload fetch stage
//! - [`scan_file`] - Payload scan stage
//! - [`promote`] - Promotion stage
//! - [`control`] - Cancellation and record queries
//! - [`lifecycle`] - Startup, sweeper and shutdown coordination

mod control;
mod download;
mod initiate;
mod jobs;
mod lifecycle;
mod promote;
mod scan_file;
mod verify_url;
mod worker;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use jobs::{Job, JobEnvelope, StageOutcome};

use crate::audit::AuditSink;
use crate::config::Config;
use crate::db::{Database, DownloadRecord};
use crate::error::Result;
use crate::fetcher::{HttpTorrentFetcher, TorrentFetcher};
use crate::quarantine::QuarantineStore;
use crate::status::StatusTracker;
use crate::storage::Disks;
use crate::threat_intel::{ThreatIntel, VirusTotalClient};
use crate::types::{DownloadId, Event};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::{Mutex, Semaphore, broadcast, mpsc};
use tokio_util::sync::CancellationToken;

/// Buffer size of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// External services the pipeline talks to
///
/// [`Pipeline::new`] builds the production set from configuration; tests and
/// embedders can hand in their own implementations through
/// [`Pipeline::with_collaborators`].
#[derive(Clone)]
pub struct Collaborators {
    /// URL and file reputation lookups
    pub threat_intel: Arc<dyn ThreatIntel>,
    /// Places torrent payloads into quarantine
    pub fetcher: Arc<dyn TorrentFetcher>,
    /// Audit destination (the pipeline database when None)
    pub audit: Option<Arc<dyn AuditSink>>,
}

/// A job waiting to be handed to the dispatcher
#[derive(Debug)]
pub(crate) struct Scheduled {
    pub(crate) envelope: JobEnvelope,
    pub(crate) delay: std::time::Duration,
}

/// Job queue plumbing shared by every clone of the pipeline
#[derive(Clone)]
pub(crate) struct JobQueue {
    /// Sender side of the dispatcher inbox
    pub(crate) tx: mpsc::UnboundedSender<Scheduled>,
    /// Receiver side, taken by the dispatcher on start
    pub(crate) rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<Scheduled>>>>,
    /// Bounds the number of jobs running at once
    pub(crate) workers: Arc<Semaphore>,
    /// Cancelled on shutdown
    pub(crate) shutdown: CancellationToken,
    /// Cleared on shutdown so no new downloads are initiated
    pub(crate) accepting_new: Arc<AtomicBool>,
}

/// Main pipeline instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct Pipeline {
    /// Database instance for persistence
    /// Public for integration tests to query record state
    pub db: Arc<Database>,
    /// Configuration
    pub(crate) config: Arc<Config>,
    /// Scan API
    pub(crate) threat_intel: Arc<dyn ThreatIntel>,
    /// Payload fetcher
    pub(crate) fetcher: Arc<dyn TorrentFetcher>,
    /// Quarantine disk operations
    pub(crate) quarantine: Arc<QuarantineStore>,
    /// Status writes
    pub(crate) status: StatusTracker,
    /// Event broadcast channel sender
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Job dispatch state
    pub(crate) queue: JobQueue,
}

impl Pipeline {
    /// Create a pipeline talking to VirusTotal and fetching torrents over HTTP
    ///
    /// This initializes all core components:
    /// - Validates the configuration
    /// - Creates the quarantine and permanent disk roots
    /// - Opens/creates the SQLite database and runs migrations
    /// - Re-enqueues records left mid-pipeline by a previous run
    pub async fn new(config: Config) -> Result<Self> {
        let threat_intel = Arc::new(VirusTotalClient::new(&config.threat_intel)?);
        let fetcher = Arc::new(HttpTorrentFetcher::new(config.fetcher.clone())?);
        Self::with_collaborators(
            config,
            Collaborators {
                threat_intel,
                fetcher,
                audit: None,
            },
        )
        .await
    }

    /// Create a pipeline with caller-supplied collaborators
    pub async fn with_collaborators(config: Config, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        let disks = Disks::from_config(&config.storage);
        disks.ensure_roots().await?;

        let db = Arc::new(Database::new(&config.persistence.database_path).await?);
        let audit = collaborators
            .audit
            .unwrap_or_else(|| db.clone() as Arc<dyn AuditSink>);

        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (tx, rx) = mpsc::unbounded_channel();

        let queue = JobQueue {
            tx,
            rx: Arc::new(Mutex::new(Some(rx))),
            workers: Arc::new(Semaphore::new(config.pipeline.workers)),
            shutdown: CancellationToken::new(),
            accepting_new: Arc::new(AtomicBool::new(true)),
        };

        let pipeline = Self {
            quarantine: Arc::new(QuarantineStore::new(db.clone(), disks, audit)),
            status: StatusTracker::new(db.clone(), event_tx.clone()),
            db,
            config: Arc::new(config),
            threat_intel: collaborators.threat_intel,
            fetcher: collaborators.fetcher,
            event_tx,
            queue,
        };

        let resumed = pipeline.resume_incomplete().await?;
        if resumed > 0 {
            tracing::info!(resumed, "re-enqueued downloads left mid-pipeline");
        }

        Ok(pipeline)
    }

    /// Subscribe to pipeline events
    ///
    /// Multiple subscribers are supported. A subscriber that falls more than
    /// 1000 events behind receives `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// The quarantine store
    pub fn quarantine(&self) -> &QuarantineStore {
        &self.quarantine
    }

    /// Emit an event to all subscribers
    ///
    /// With no subscribers the event is dropped.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Load a record a stage may still act on
    ///
    /// Returns None (after logging) when the record is gone or already
    /// terminal, which is how cancellation and rejection reach queued jobs.
    pub(crate) async fn load_active(
        &self,
        id: DownloadId,
        stage: &'static str,
    ) -> Result<Option<DownloadRecord>> {
        match self.db.get_download(id).await? {
            None => {
                tracing::info!(download_id = id.0, stage, "record is gone, skipping job");
                Ok(None)
            }
            Some(record) if record.status.is_terminal() => {
                tracing::info!(
                    download_id = id.0,
                    stage,
                    status = %record.status,
                    "record is terminal, skipping job"
                );
                Ok(None)
            }
            Some(record) => Ok(Some(record)),
        }
    }
}
