//! Promotion stage.

use crate::error::Result;
use crate::types::{DownloadId, DownloadStatus, Event, StorageLocation};

use super::Pipeline;
use super::jobs::StageOutcome;

const STAGE: &str = "promote";

impl Pipeline {
    /// Move a verified payload to its permanent disk
    pub(crate) async fn promote(
        &self,
        id: DownloadId,
        destination_disk: &str,
    ) -> Result<StageOutcome> {
        let Some(record) = self.load_active(id, STAGE).await? else {
            return Ok(StageOutcome::Finished);
        };
        if !matches!(
            record.status,
            DownloadStatus::FileVerified | DownloadStatus::MovingToStorage
        ) {
            tracing::debug!(download_id = id.0, status = %record.status, "record not ready for promotion, skipping");
            return Ok(StageOutcome::Finished);
        }

        self.status
            .update_status(id, DownloadStatus::MovingToStorage, Some("Moving to storage"))
            .await?;

        // A previous attempt may have moved the payload before failing
        let (disk, path) = match (record.location(), record.path.clone()) {
            (Some(StorageLocation::Disk(disk)), Some(path)) if disk == destination_disk => {
                tracing::debug!(download_id = id.0, disk = %disk, "payload already on destination disk");
                (disk, path)
            }
            _ => {
                let promoted = self
                    .quarantine
                    .move_to_storage(&record, destination_disk)
                    .await?;
                (promoted.disk, promoted.path)
            }
        };

        self.status
            .update_status(id, DownloadStatus::Completed, Some("Completed"))
            .await?;
        tracing::info!(download_id = id.0, disk = %disk, path = %path, "download completed");
        self.emit_event(Event::Completed { id, disk, path });

        Ok(StageOutcome::Finished)
    }
}
