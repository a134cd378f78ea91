//! Payload fetch stage.

use crate::db::StoredPayload;
use crate::error::{Error, Result};
use crate::fetcher::FetchRequest;
use crate::types::{DownloadId, DownloadStatus};
use crate::utils::{mime_for_extension, sanitize_filename, storage_key, unique_key};

use super::Pipeline;
use super::jobs::{Job, StageOutcome};

const STAGE: &str = "download";

impl Pipeline {
    /// Fetch the payload into quarantine at `torrents/YYYY/MM/DD/<name>.<ext>`
    pub(crate) async fn download(&self, id: DownloadId) -> Result<StageOutcome> {
        let Some(record) = self.load_active(id, STAGE).await? else {
            return Ok(StageOutcome::Finished);
        };
        if !matches!(
            record.status,
            DownloadStatus::Pending | DownloadStatus::UrlVerified | DownloadStatus::Downloading
        ) {
            tracing::debug!(download_id = id.0, status = %record.status, "payload already fetched, skipping");
            return Ok(StageOutcome::Finished);
        }

        self.status
            .update_status(id, DownloadStatus::Downloading, Some("Fetching torrent"))
            .await?;

        let quarantine = self.quarantine.quarantine();

        // A previous attempt recorded its payload but never advanced the status
        if record.in_quarantine() {
            if let Some(path) = record.path.as_deref() {
                if quarantine.exists(path).await? {
                    tracing::debug!(download_id = id.0, key = %path, "reusing recorded payload");
                    return self.finish_download(id).await;
                }
            }
        }

        let request = FetchRequest {
            magnet_link: record.magnet_link.clone(),
            torrent_link: record.torrent_link.clone(),
        };
        let extension = request.extension();

        let key = storage_key(
            &sanitize_filename(&record.name),
            extension,
            chrono::Utc::now(),
        );
        let key = unique_key(quarantine, &key).await?;

        let stored = match self.fetcher.fetch(&request, quarantine, &key).await {
            Ok(stored) => stored,
            Err(e) => {
                // Drop anything a failed attempt left behind
                if let Err(cleanup) = quarantine.delete(&key).await {
                    tracing::debug!(download_id = id.0, key = %key, error = %cleanup, "failed to remove partial payload");
                }
                return Err(e);
            }
        };

        let recorded = async {
            let size = quarantine.size(&stored).await?;
            self.db
                .record_download_completed(
                    id,
                    &StoredPayload {
                        disk: quarantine.name().to_string(),
                        path: stored.clone(),
                        size_bytes: i64::try_from(size).unwrap_or(i64::MAX),
                        mime_type: mime_for_extension(extension).to_string(),
                        extension: extension.to_string(),
                    },
                )
                .await?;
            Ok::<_, Error>(size)
        }
        .await;

        let size = match recorded {
            Ok(size) => size,
            Err(e) => {
                // No record points at the payload, so the sweeper would never find it
                if let Err(cleanup) = quarantine.delete(&stored).await {
                    tracing::warn!(download_id = id.0, key = %stored, error = %cleanup, "failed to remove unrecorded payload");
                }
                return Err(e);
            }
        };

        tracing::info!(download_id = id.0, key = %stored, size, "payload stored in quarantine");
        self.finish_download(id).await
    }

    async fn finish_download(&self, id: DownloadId) -> Result<StageOutcome> {
        self.status
            .update_status(id, DownloadStatus::DownloadCompleted, Some("Awaiting file scan"))
            .await?;
        Ok(StageOutcome::Next(Job::ScanFile { id }))
    }
}
