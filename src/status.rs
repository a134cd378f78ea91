//! Lifecycle state of download records
//!
//! Every status write goes through [`StatusTracker`], which checks the
//! transition table before issuing a compare-and-set update, so two workers
//! racing on the same record cannot both move it.

use crate::db::{Database, DownloadRecord};
use crate::error::{PipelineError, Result};
use crate::types::{DownloadId, DownloadStatus, Event};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Number of times a lost compare-and-set is re-read and retried
const MAX_CAS_ATTEMPTS: u32 = 3;

/// Records and queries the status of download records
#[derive(Clone)]
pub struct StatusTracker {
    db: Arc<Database>,
    event_tx: broadcast::Sender<Event>,
}

impl StatusTracker {
    /// Create a tracker writing to `db` and announcing changes on `event_tx`
    pub fn new(db: Arc<Database>, event_tx: broadcast::Sender<Event>) -> Self {
        Self { db, event_tx }
    }

    /// Load a live record
    pub async fn current(&self, id: DownloadId) -> Result<DownloadRecord> {
        self.db
            .get_download(id)
            .await?
            .ok_or_else(|| PipelineError::NotFound { id: id.0 }.into())
    }

    /// Move a record to `to`
    ///
    /// Returns the status the record was in before the write. Writes the
    /// transition table forbids fail with [`PipelineError::InvalidTransition`].
    pub async fn update_status(
        &self,
        id: DownloadId,
        to: DownloadStatus,
        message: Option<&str>,
    ) -> Result<DownloadStatus> {
        let mut from = self.current(id).await?.status;

        for _ in 0..MAX_CAS_ATTEMPTS {
            if !from.can_transition_to(to) {
                break;
            }

            if self.db.transition_status(id, from, to, message).await? {
                if from == to {
                    tracing::debug!(download_id = id.0, status = %to, "status re-entered");
                } else {
                    tracing::info!(
                        download_id = id.0,
                        from = %from,
                        to = %to,
                        message = message.unwrap_or_default(),
                        "status changed"
                    );
                    self.event_tx
                        .send(Event::StatusChanged {
                            id,
                            from,
                            to,
                            message: message.map(str::to_string),
                        })
                        .ok();
                }
                return Ok(from);
            }

            // Someone else moved the record first
            from = self.current(id).await?.status;
        }

        tracing::warn!(
            download_id = id.0,
            from = %from,
            to = %to,
            "illegal status transition rejected"
        );
        Err(PipelineError::InvalidTransition { id: id.0, from, to }.into())
    }

    /// Move a record to `failed` and persist the reason
    pub async fn mark_failed(&self, id: DownloadId, reason: &str) -> Result<()> {
        self.db.set_error_message(id, reason).await?;
        self.update_status(id, DownloadStatus::Failed, Some(reason))
            .await?;

        tracing::error!(download_id = id.0, error = reason, "download failed");
        self.event_tx
            .send(Event::Failed {
                id,
                error: reason.to_string(),
            })
            .ok();
        Ok(())
    }
}
