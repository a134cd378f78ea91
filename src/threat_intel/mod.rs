//! Threat-intelligence API access
//!
//! [`ThreatIntel`] is the seam the pipeline scans through;
//! [`VirusTotalClient`] speaks the VirusTotal v3 wire format.

use crate::error::ThreatIntelError;
use async_trait::async_trait;
use std::path::Path;

mod client;
mod report;

pub use client::{VirusTotalClient, url_id};
pub use report::{
    AnalysisReport, AnalysisStats, DomainInfo, DomainVotes, EngineHit, EngineResult,
    ObjectAttributes, ScanReport, ThreatSummary, VoteTotals, is_malicious,
};

/// URL and file reputation lookups
///
/// Every call retries transient failures internally; an error returned here
/// has already exhausted the client's own retry budget.
#[async_trait]
pub trait ThreatIntel: Send + Sync {
    /// Submit a URL for analysis, returning the id to poll its report with
    async fn scan_url(&self, url: &str) -> Result<String, ThreatIntelError>;

    /// Fetch the report of a submitted URL
    async fn get_url_report(&self, scan_id: &str) -> Result<ScanReport, ThreatIntelError>;

    /// Upload a file directly, returning the id to poll its report with
    async fn scan_file(&self, path: &Path) -> Result<String, ThreatIntelError>;

    /// Request a one-off upload URL for files above the direct-upload limit
    async fn get_upload_url(&self) -> Result<String, ThreatIntelError>;

    /// Upload a file to a URL from [`ThreatIntel::get_upload_url`]
    async fn upload_large_file(
        &self,
        path: &Path,
        upload_url: &str,
    ) -> Result<String, ThreatIntelError>;

    /// Fetch the report of an uploaded file
    async fn get_file_report(&self, scan_id: &str) -> Result<ScanReport, ThreatIntelError>;

    /// Fetch a domain's reputation report
    async fn get_domain_info(&self, domain: &str) -> Result<DomainInfo, ThreatIntelError>;

    /// Fetch aggregated community votes on a domain
    async fn get_domain_votes(&self, domain: &str) -> Result<DomainVotes, ThreatIntelError>;
}
