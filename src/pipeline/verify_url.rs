//! Source URL verification stage.

use crate::audit::AuditContext;
use crate::db::ScannedUrl;
use crate::error::{Result, ThreatIntelError};
use crate::threat_intel::{AnalysisReport, ScanReport};
use crate::types::{DownloadId, DownloadStatus, Event, ScanStatus};
use crate::utils::extract_domain;
use serde_json::json;

use super::Pipeline;
use super::jobs::{Job, StageOutcome};

const STAGE: &str = "verify_url";

impl Pipeline {
    /// Check `url` against the scanned-URL cache, scanning it when unknown
    ///
    /// A cached verdict short-circuits the scan. An unfinished report is
    /// polled again after the configured poll delay.
    pub(crate) async fn verify_url(
        &self,
        id: DownloadId,
        url: &str,
        context: &AuditContext,
    ) -> Result<StageOutcome> {
        let Some(record) = self.load_active(id, STAGE).await? else {
            return Ok(StageOutcome::Finished);
        };
        if !matches!(
            record.status,
            DownloadStatus::Pending | DownloadStatus::VerifyingUrl
        ) {
            tracing::debug!(download_id = id.0, status = %record.status, "URL already verified, skipping");
            return Ok(StageOutcome::Finished);
        }

        let domain = extract_domain(url);
        let scanned = self
            .db
            .find_or_create_scanned_url(url, domain.as_deref())
            .await?;
        self.db.set_scanned_url(id, scanned.id).await?;

        if scanned.is_malicious {
            tracing::info!(download_id = id.0, url, "source URL previously flagged as malicious");
            self.reject_url(id, url, "URL previously flagged as malicious")
                .await?;
            return Ok(StageOutcome::Finished);
        }
        if scanned.is_known_clean() {
            tracing::info!(download_id = id.0, url, "source URL previously verified");
            self.status
                .update_status(id, DownloadStatus::UrlVerified, Some("URL previously verified"))
                .await?;
            return Ok(StageOutcome::Next(Job::Download { id }));
        }

        self.status
            .update_status(id, DownloadStatus::VerifyingUrl, Some("Scanning source URL"))
            .await?;

        let scan_id = match (&scanned.scan_status, &scanned.scan_id) {
            (Some(ScanStatus::Scanning), Some(scan_id)) => scan_id.clone(),
            _ => {
                let scan_id = match self.threat_intel.scan_url(url).await {
                    Ok(scan_id) => scan_id,
                    Err(e) => return self.url_scan_failed(&scanned, e).await,
                };
                self.db.mark_url_scanning(scanned.id, &scan_id).await?;
                scan_id
            }
        };

        let report = match self.threat_intel.get_url_report(&scan_id).await {
            Ok(report) => report,
            Err(e) => return self.url_scan_failed(&scanned, e).await,
        };

        match report {
            ScanReport::Pending => Ok(StageOutcome::Poll(self.config.pipeline.poll_delay)),
            ScanReport::Ready(report) if report.is_malicious() => {
                self.quarantine
                    .handle_malicious_url(&scanned, &report, context)
                    .await?;
                self.reject_url(id, url, "URL flagged as malicious").await?;
                Ok(StageOutcome::Finished)
            }
            ScanReport::Ready(report) => {
                self.db
                    .mark_url_clean(scanned.id, &report.to_verdict_json())
                    .await?;
                if let Some(domain) = domain.as_deref() {
                    self.enrich_domain(&scanned, domain, &report).await;
                }
                self.status
                    .update_status(id, DownloadStatus::UrlVerified, Some("URL verified"))
                    .await?;
                Ok(StageOutcome::Next(Job::Download { id }))
            }
        }
    }

    /// Reject a download whose source URL is malicious
    async fn reject_url(&self, id: DownloadId, url: &str, reason: &str) -> Result<()> {
        self.status
            .update_status(id, DownloadStatus::UrlRejected, Some(reason))
            .await?;
        self.db.set_error_message(id, reason).await?;
        self.db.soft_delete_download(id).await?;
        self.emit_event(Event::UrlRejected {
            id,
            url: url.to_string(),
        });
        Ok(())
    }

    /// Persist a permanent scan failure on the cache row and hand the error to the job
    async fn url_scan_failed<T>(&self, scanned: &ScannedUrl, error: ThreatIntelError) -> Result<T> {
        if !error.is_retryable() {
            self.db
                .mark_url_scan_error(scanned.id, &format!("{}: {}", error.status(), error))
                .await?;
        }
        Err(error.into())
    }

    /// Store domain reputation next to a clean verdict
    ///
    /// Best effort: failures are logged and never fail the stage.
    async fn enrich_domain(&self, scanned: &ScannedUrl, domain: &str, report: &AnalysisReport) {
        if !self.config.threat_intel.enrich_domains {
            return;
        }

        let info = match self.threat_intel.get_domain_info(domain).await {
            Ok(info) => info,
            Err(e) => {
                tracing::debug!(domain, error = %e, "domain lookup failed, skipping enrichment");
                return;
            }
        };
        let votes = match self.threat_intel.get_domain_votes(domain).await {
            Ok(votes) => Some(votes),
            Err(e) => {
                tracing::debug!(domain, error = %e, "domain votes lookup failed");
                None
            }
        };

        let payload = json!({
            "domain": info.domain,
            "reputation": info.attributes.reputation,
            "last_analysis_stats": info.attributes.last_analysis_stats,
            "categories": info.attributes.categories,
            "total_votes": info.attributes.total_votes,
            "votes": votes,
            "url_scan_id": report.id,
        });
        if let Err(e) = self.db.set_domain_info(scanned.id, &payload).await {
            tracing::warn!(domain, error = %e, "failed to store domain info");
        }
    }
}
