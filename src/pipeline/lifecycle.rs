//! Startup, background sweeper and shutdown coordination.

use crate::audit::AuditContext;
use crate::error::Result;
use crate::types::Event;
use std::sync::atomic::Ordering;
use std::time::Duration;

use super::Pipeline;
use super::jobs::{Job, JobEnvelope};

/// How long shutdown waits for running jobs
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

impl Pipeline {
    /// Start the background tasks
    ///
    /// Spawns the job dispatcher and, when cleanup is enabled, the quarantine
    /// sweeper. Handles are returned so callers can await them after
    /// [`Pipeline::shutdown`].
    pub fn start(&self) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = vec![self.start_dispatcher()];
        if self.config.cleanup.enabled {
            handles.push(self.start_sweeper());
        } else {
            tracing::info!("quarantine sweeper disabled");
        }
        handles
    }

    /// Start the periodic quarantine sweeper
    ///
    /// The first sweep runs one full interval after start.
    pub fn start_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let pipeline = self.clone();
        let period = self.config.cleanup.interval;

        let handle = tokio::spawn(async move {
            let shutdown = pipeline.queue.shutdown.clone();
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = pipeline.run_cleanup().await {
                            tracing::error!(error = %e, "quarantine sweep failed");
                        }
                    }
                }
            }
            tracing::debug!("quarantine sweeper stopped");
        });

        tracing::info!(
            interval_secs = period.as_secs(),
            days_threshold = self.config.cleanup.days_threshold,
            "quarantine sweeper started"
        );
        handle
    }

    /// Sweep quarantine once, returning the number of records removed
    pub async fn run_cleanup(&self) -> Result<u64> {
        let removed = self
            .quarantine
            .cleanup_old_files(self.config.cleanup.days_threshold, &AuditContext::system())
            .await?;
        if removed > 0 {
            self.emit_event(Event::QuarantineSwept { removed });
        }
        Ok(removed)
    }

    /// Re-enqueue every live record left mid-pipeline
    ///
    /// Each record gets the job for the stage it stopped in. Stages pick up
    /// outstanding scans by their stored ids instead of submitting again.
    pub(crate) async fn resume_incomplete(&self) -> Result<usize> {
        let mut resumed = 0;
        for record in self.db.list_downloads().await? {
            let Some(job) = Job::resume(&record) else {
                continue;
            };
            tracing::debug!(
                download_id = record.id.0,
                status = %record.status,
                stage = job.stage(),
                "resuming download"
            );
            self.dispatch(JobEnvelope::new(job, AuditContext::system()), Duration::ZERO);
            resumed += 1;
        }
        Ok(resumed)
    }

    /// Gracefully shut down the pipeline
    ///
    /// New downloads are refused, the dispatcher and sweeper stop, and running
    /// jobs get up to 30 seconds to finish. Jobs still queued are picked up
    /// again on the next start.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("initiating graceful shutdown");

        self.queue.accepting_new.store(false, Ordering::SeqCst);
        self.queue.shutdown.cancel();

        let slots = u32::try_from(self.config.pipeline.workers).unwrap_or(u32::MAX);
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.queue.workers.acquire_many(slots)).await {
            Ok(Ok(_permits)) => tracing::info!("all running jobs finished"),
            Ok(Err(_)) => tracing::warn!("worker pool closed during shutdown"),
            Err(_) => tracing::warn!(
                timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
                "timeout waiting for running jobs, proceeding with shutdown"
            ),
        }

        self.emit_event(Event::Shutdown);
        tracing::info!("graceful shutdown complete");
        Ok(())
    }
}
