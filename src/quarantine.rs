//! Quarantine disposal and promotion
//!
//! Payloads arrive on the quarantine disk and leave it one of three ways:
//! promoted to a permanent disk after a clean scan, deleted after a malicious
//! verdict, or swept once they have sat unscanned for too long. The two
//! destructive paths leave an audit entry.

use crate::audit::{
    ACTION_MALICIOUS_FILE_DELETED, ACTION_MALICIOUS_URL_BLOCKED, ACTION_QUARANTINE_CLEANUP,
    AuditContext, AuditEntry, AuditSink, MODEL_DOWNLOAD, MODEL_SCANNED_URL,
};
use crate::db::{Database, DownloadRecord, ScannedUrl};
use crate::error::{QuarantineError, Result};
use crate::storage::{Disk, Disks};
use crate::threat_intel::{AnalysisReport, ThreatSummary};
use crate::types::ScanStatus;
use crate::utils::unique_key;
use serde_json::json;
use std::sync::Arc;

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// Where a promoted payload ended up
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromotedPayload {
    /// Permanent disk name
    pub disk: String,
    /// Storage key on that disk
    pub path: String,
}

/// Storage operations on quarantined payloads
pub struct QuarantineStore {
    db: Arc<Database>,
    disks: Disks,
    audit: Arc<dyn AuditSink>,
}

impl QuarantineStore {
    /// Create a store over `disks`, recording destructive actions to `audit`
    pub fn new(db: Arc<Database>, disks: Disks, audit: Arc<dyn AuditSink>) -> Self {
        Self { db, disks, audit }
    }

    /// The configured disks
    pub fn disks(&self) -> &Disks {
        &self.disks
    }

    /// The quarantine disk
    pub fn quarantine(&self) -> &Disk {
        self.disks.quarantine()
    }

    /// Copy a verified payload to `destination_disk`, then drop the quarantine copy
    ///
    /// The record must sit in quarantine with its object present. An existing
    /// object on the destination is never overwritten; the payload takes the
    /// next free key instead.
    pub async fn move_to_storage(
        &self,
        record: &DownloadRecord,
        destination_disk: &str,
    ) -> Result<PromotedPayload> {
        let key = self.quarantined_key(record)?;
        let destination = self.disks.get(destination_disk)?;
        let quarantine = self.disks.quarantine();

        if !quarantine.exists(key).await? {
            return Err(QuarantineError::ObjectMissing {
                disk: quarantine.name().to_string(),
                key: key.to_string(),
            }
            .into());
        }

        let dest_key = unique_key(destination, key).await?;
        let bytes = quarantine.copy_to(key, destination, &dest_key).await?;

        // The copy is already safe on the destination
        if let Err(e) = quarantine.delete(key).await {
            tracing::warn!(
                download_id = record.id.0,
                key,
                error = %e,
                "failed to remove quarantine copy after promotion"
            );
        }

        self.db
            .mark_promoted(record.id, destination.name(), &dest_key)
            .await?;

        tracing::info!(
            download_id = record.id.0,
            disk = destination.name(),
            path = %dest_key,
            bytes,
            "payload promoted out of quarantine"
        );

        Ok(PromotedPayload {
            disk: destination.name().to_string(),
            path: dest_key,
        })
    }

    /// Dispose of a payload with a malicious verdict
    ///
    /// Deletes the quarantined object, audits the deletion with the record's
    /// pre-deletion metadata and the verdict, and soft-deletes the record.
    pub async fn handle_malicious_file(
        &self,
        record: &DownloadRecord,
        report: &AnalysisReport,
        context: &AuditContext,
    ) -> Result<ThreatSummary> {
        let summary = self.dispose_malicious_file(record, report, context).await?;
        self.db.soft_delete_download(record.id).await?;
        Ok(summary)
    }

    /// Delete and audit a malicious payload, leaving the record live
    ///
    /// Safe to repeat: a payload that is already gone only logs a warning.
    pub(crate) async fn dispose_malicious_file(
        &self,
        record: &DownloadRecord,
        report: &AnalysisReport,
        context: &AuditContext,
    ) -> Result<ThreatSummary> {
        let key = self.quarantined_key(record)?;
        let summary = report.threat_summary();
        let verdict = report.to_verdict_json();

        let deleted = self.disks.quarantine().delete(key).await?;
        if !deleted {
            tracing::warn!(download_id = record.id.0, key, "malicious payload was already gone");
        }

        self.db
            .set_file_scan_result(record.id, ScanStatus::Completed, &verdict)
            .await?;

        self.audit
            .log(AuditEntry {
                action: ACTION_MALICIOUS_FILE_DELETED.to_string(),
                model_type: MODEL_DOWNLOAD.to_string(),
                model_id: record.id.0,
                old_values: Some(payload_snapshot(record)),
                new_values: Some(json!({
                    "scan_result": verdict,
                    "threats": summary,
                })),
                description: format!(
                    "Deleted malicious file '{}' ({} malicious, {} suspicious of {} engines)",
                    record.name, summary.malicious, summary.suspicious, summary.total_engines
                ),
                context: context.clone(),
            })
            .await?;

        tracing::warn!(
            download_id = record.id.0,
            threats = ?summary.threat_names,
            malicious = summary.malicious,
            suspicious = summary.suspicious,
            "malicious payload deleted from quarantine"
        );

        Ok(summary)
    }

    /// Block a source URL with a malicious verdict
    ///
    /// Persists the verdict on the cache row and audits the block. Nothing is
    /// deleted.
    pub async fn handle_malicious_url(
        &self,
        scanned: &ScannedUrl,
        report: &AnalysisReport,
        context: &AuditContext,
    ) -> Result<ThreatSummary> {
        let summary = report.threat_summary();
        let verdict = report.to_verdict_json();
        let blocked_at = chrono::Utc::now().timestamp();

        self.db
            .mark_url_malicious(scanned.id, &verdict, blocked_at)
            .await?;

        self.audit
            .log(AuditEntry {
                action: ACTION_MALICIOUS_URL_BLOCKED.to_string(),
                model_type: MODEL_SCANNED_URL.to_string(),
                model_id: scanned.id,
                old_values: Some(json!({
                    "url": scanned.url,
                    "domain": scanned.domain,
                    "is_malicious": scanned.is_malicious,
                    "scan_status": scanned.scan_status,
                })),
                new_values: Some(json!({
                    "is_malicious": true,
                    "blocked_at": blocked_at,
                    "scan_result": verdict,
                    "threats": summary,
                })),
                description: format!("Blocked malicious URL {}", scanned.url),
                context: context.clone(),
            })
            .await?;

        tracing::warn!(
            url = %scanned.url,
            malicious = summary.malicious,
            suspicious = summary.suspicious,
            reputation = summary.reputation,
            "source URL blocked"
        );

        Ok(summary)
    }

    /// Sweep quarantine records older than `days_threshold` whose scan never finished
    ///
    /// Each swept record loses its object, gains an audit entry and is
    /// soft-deleted. A record that fails is logged and skipped. Returns the
    /// number of records swept.
    pub async fn cleanup_old_files(
        &self,
        days_threshold: u32,
        context: &AuditContext,
    ) -> Result<u64> {
        let cutoff =
            chrono::Utc::now().timestamp() - i64::from(days_threshold) * SECONDS_PER_DAY;
        let stale = self.db.list_stale_quarantined(cutoff).await?;

        let mut removed = 0;
        for record in &stale {
            match self.sweep(record, days_threshold, context).await {
                Ok(()) => removed += 1,
                Err(e) => {
                    tracing::warn!(
                        download_id = record.id.0,
                        error = %e,
                        "failed to sweep quarantine record, skipping"
                    );
                }
            }
        }

        if removed > 0 {
            tracing::info!(removed, days_threshold, "quarantine sweep finished");
        } else {
            tracing::debug!(days_threshold, "quarantine sweep found nothing to remove");
        }
        Ok(removed)
    }

    async fn sweep(
        &self,
        record: &DownloadRecord,
        days_threshold: u32,
        context: &AuditContext,
    ) -> Result<()> {
        if let Some(key) = record.path.as_deref() {
            self.disks.quarantine().delete(key).await?;
        }

        self.audit
            .log(AuditEntry {
                action: ACTION_QUARANTINE_CLEANUP.to_string(),
                model_type: MODEL_DOWNLOAD.to_string(),
                model_id: record.id.0,
                old_values: Some(payload_snapshot(record)),
                new_values: None,
                description: format!(
                    "Removed '{}' from quarantine after {} days without a completed scan",
                    record.name, days_threshold
                ),
                context: context.clone(),
            })
            .await?;

        self.db.soft_delete_download(record.id).await?;
        Ok(())
    }

    fn quarantined_key<'a>(&self, record: &'a DownloadRecord) -> Result<&'a str> {
        if !record.in_quarantine() {
            return Err(QuarantineError::NotInQuarantine {
                id: record.id.0,
                location: record
                    .storage_disk
                    .clone()
                    .unwrap_or_else(|| "none".to_string()),
            }
            .into());
        }
        record
            .path
            .as_deref()
            .ok_or_else(|| QuarantineError::NoPayload { id: record.id.0 }.into())
    }
}

fn payload_snapshot(record: &DownloadRecord) -> serde_json::Value {
    json!({
        "name": record.name,
        "status": record.status,
        "storage_disk": record.storage_disk,
        "path": record.path,
        "size_bytes": record.size_bytes,
        "mime_type": record.mime_type,
        "extension": record.extension,
        "scan_id": record.scan_id,
        "scan_status": record.scan_status,
        "quarantined_at": record.quarantined_at,
        "source_url": record.source_url,
        "torrent_link": record.torrent_link,
    })
}
