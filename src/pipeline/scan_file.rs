//! Payload scan stage.

use crate::audit::AuditContext;
use crate::db::DownloadRecord;
use crate::error::{Error, QuarantineError, Result};
use crate::retry::IsRetryable;
use crate::threat_intel::ScanReport;
use crate::types::{DownloadId, DownloadStatus, Event, ScanStatus};

use super::Pipeline;
use super::jobs::{Job, StageOutcome};

const STAGE: &str = "scan_file";

impl Pipeline {
    /// Scan the quarantined payload and act on the verdict
    ///
    /// Payloads up to the large-file threshold are uploaded directly; larger
    /// ones go through a one-off upload URL.
    pub(crate) async fn scan_file(
        &self,
        id: DownloadId,
        context: &AuditContext,
    ) -> Result<StageOutcome> {
        let Some(record) = self.load_active(id, STAGE).await? else {
            self.finish_file_rejection(id).await?;
            return Ok(StageOutcome::Finished);
        };
        if !matches!(
            record.status,
            DownloadStatus::DownloadCompleted | DownloadStatus::ScanningFile
        ) {
            tracing::debug!(download_id = id.0, status = %record.status, "payload already scanned, skipping");
            return Ok(StageOutcome::Finished);
        }
        if !record.in_quarantine() {
            return Err(QuarantineError::NotInQuarantine {
                id: id.0,
                location: record.storage_disk.clone().unwrap_or_else(|| "none".into()),
            }
            .into());
        }

        self.status
            .update_status(id, DownloadStatus::ScanningFile, Some("Scanning file"))
            .await?;

        let scan_id = match (&record.scan_status, &record.scan_id) {
            // A verdict stored by an interrupted attempt is fetched again
            (Some(ScanStatus::Scanning | ScanStatus::Completed), Some(scan_id)) => scan_id.clone(),
            _ => {
                let scan_id = match self.submit_file(&record).await {
                    Ok(scan_id) => scan_id,
                    Err(e) => return self.file_scan_failed(id, e).await,
                };
                self.db
                    .set_file_scan(id, ScanStatus::Scanning, Some(&scan_id))
                    .await?;
                scan_id
            }
        };

        let report = match self.threat_intel.get_file_report(&scan_id).await {
            Ok(report) => report,
            Err(e) => return self.file_scan_failed(id, e.into()).await,
        };

        match report {
            ScanReport::Pending => Ok(StageOutcome::Poll(self.config.pipeline.poll_delay)),
            ScanReport::Ready(report) if report.is_malicious() => {
                // Dispose while the record is live so a failed step is retried
                let summary = self
                    .quarantine
                    .dispose_malicious_file(&record, &report, context)
                    .await?;
                self.db
                    .set_error_message(id, "File flagged as malicious")
                    .await?;
                self.status
                    .update_status(id, DownloadStatus::FileRejected, Some("File flagged as malicious"))
                    .await?;
                self.db.soft_delete_download(id).await?;
                self.emit_event(Event::FileRejected {
                    id,
                    threats: summary.threat_names,
                });
                Ok(StageOutcome::Finished)
            }
            ScanReport::Ready(report) => {
                self.db
                    .set_file_scan_result(id, ScanStatus::Completed, &report.to_verdict_json())
                    .await?;
                self.status
                    .update_status(id, DownloadStatus::FileVerified, Some("File verified"))
                    .await?;
                Ok(StageOutcome::Next(Job::PromoteToStorage {
                    id,
                    destination_disk: record.destination_disk.clone(),
                }))
            }
        }
    }

    /// Soft-delete a rejected record left live by an interrupted attempt
    async fn finish_file_rejection(&self, id: DownloadId) -> Result<()> {
        if let Some(record) = self.db.get_download(id).await? {
            if record.status == DownloadStatus::FileRejected {
                self.db.soft_delete_download(id).await?;
                tracing::info!(download_id = id.0, "finished disposal of rejected download");
            }
        }
        Ok(())
    }

    /// Upload the payload, returning the id to poll its report with
    async fn submit_file(&self, record: &DownloadRecord) -> Result<String> {
        let quarantine = self.quarantine.quarantine();
        let key = record
            .path
            .as_deref()
            .ok_or(QuarantineError::NoPayload { id: record.id.0 })?;
        let path = quarantine.path(key)?;
        let size = quarantine.size(key).await?;

        let threshold = self.config.threat_intel.large_file_threshold;
        let scan_id = if size <= threshold {
            self.threat_intel.scan_file(&path).await?
        } else {
            tracing::debug!(download_id = record.id.0, size, threshold, "using upload URL for large file");
            let upload_url = self.threat_intel.get_upload_url().await?;
            self.threat_intel
                .upload_large_file(&path, &upload_url)
                .await?
        };

        tracing::info!(download_id = record.id.0, scan_id = %scan_id, size, "payload submitted for scanning");
        Ok(scan_id)
    }

    /// Persist a permanent scan failure on the record and hand the error to the job
    async fn file_scan_failed<T>(&self, id: DownloadId, error: Error) -> Result<T> {
        if !error.is_retryable() {
            self.db.set_file_scan(id, ScanStatus::Error, None).await?;
        }
        Err(error)
    }
}
