//! Download cancellation and record queries.

use crate::db::DownloadRecord;
use crate::error::{PipelineError, Result};
use crate::types::{DownloadId, DownloadStatus, StatusView};

use super::Pipeline;

impl Pipeline {
    /// Cancel a download that has not reached a terminal state
    ///
    /// Jobs already queued for the record skip once they see it cancelled.
    /// A payload still in quarantine is removed.
    pub async fn cancel_download(&self, id: DownloadId) -> Result<()> {
        let record = self.status.current(id).await?;
        if record.status.is_terminal() {
            return Err(PipelineError::InvalidTransition {
                id: id.0,
                from: record.status,
                to: DownloadStatus::Cancelled,
            }
            .into());
        }

        self.status
            .update_status(id, DownloadStatus::Cancelled, Some("Cancelled"))
            .await?;

        if record.in_quarantine() {
            if let Some(key) = record.path.as_deref() {
                if let Err(e) = self.quarantine.quarantine().delete(key).await {
                    tracing::warn!(download_id = id.0, key, error = %e, "failed to remove cancelled payload");
                }
            }
        }

        tracing::info!(download_id = id.0, "download cancelled");
        Ok(())
    }

    /// Get a download by ID, including rejected (soft-deleted) records
    pub async fn get_download(&self, id: DownloadId) -> Result<DownloadRecord> {
        self.db
            .get_download_with_trashed(id)
            .await?
            .ok_or_else(|| PipelineError::NotFound { id: id.0 }.into())
    }

    /// Live downloads with a specific status
    pub async fn list_downloads_by_status(&self, status: DownloadStatus) -> Result<Vec<DownloadRecord>> {
        self.db.list_downloads_by_status(status).await
    }

    /// Status snapshot for polling clients
    pub async fn status_view(&self, id: DownloadId) -> Result<StatusView> {
        let record = self.get_download(id).await?;
        let status = record.status;
        Ok(StatusView {
            id,
            status,
            label: status.label().to_string(),
            color: status.color().to_string(),
            progress: status.progress(),
            message: record.status_message,
        })
    }
}
