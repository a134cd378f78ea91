//! Database layer for torrent-quarantine
//!
//! Handles SQLite persistence for download records, the scanned-URL cache and
//! the audit log.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`downloads`] - Download record CRUD and compare-and-set status writes
//! - [`scanned_urls`] - Scanned-URL verdict cache
//! - [`audit`] - Audit log persistence

use crate::error::Result;
use crate::types::{DownloadId, DownloadMetadata, DownloadStatus, ScanStatus, StorageLocation};
use sqlx::{FromRow, sqlite::SqlitePool};

mod audit;
mod downloads;
mod migrations;
mod scanned_urls;

/// New download to be inserted into the database
#[derive(Debug, Clone)]
pub struct NewDownload {
    /// Display name, also used to build the stored filename
    pub name: String,
    /// Magnet URI
    pub magnet_link: Option<String>,
    /// HTTP(S) link to a .torrent file
    pub torrent_link: Option<String>,
    /// Page the links were found on
    pub source_url: Option<String>,
    /// Caller metadata, stored as JSON
    pub metadata: DownloadMetadata,
    /// Permanent disk the payload is promoted to
    pub destination_disk: String,
}

/// Download record from database
#[derive(Debug, Clone, FromRow)]
pub struct DownloadRecord {
    /// Unique database ID
    pub id: DownloadId,
    /// Display name
    pub name: String,
    /// Magnet URI
    pub magnet_link: Option<String>,
    /// HTTP(S) link to a .torrent file
    pub torrent_link: Option<String>,
    /// Page the links were found on
    pub source_url: Option<String>,
    /// Caller metadata (JSON)
    pub metadata: Option<String>,
    /// Disk currently holding the payload (None until downloaded)
    pub storage_disk: Option<String>,
    /// Permanent disk the payload is promoted to
    pub destination_disk: String,
    /// Storage key on `storage_disk`
    pub path: Option<String>,
    /// Payload size in bytes
    pub size_bytes: Option<i64>,
    /// Payload MIME type
    pub mime_type: Option<String>,
    /// Payload file extension
    pub extension: Option<String>,
    /// Current lifecycle status
    pub status: DownloadStatus,
    /// Message attached to the last status write
    pub status_message: Option<String>,
    /// Threat-intel identifier of the payload scan
    pub scan_id: Option<String>,
    /// Payload scan state
    pub scan_status: Option<ScanStatus>,
    /// Payload scan verdict (JSON)
    pub scan_result: Option<String>,
    /// Whether the payload is held in quarantine
    pub is_quarantined: bool,
    /// Unix timestamp when the payload entered quarantine
    pub quarantined_at: Option<i64>,
    /// Cache row of the verified source URL
    pub scanned_url_id: Option<i64>,
    /// Last error message
    pub error_message: Option<String>,
    /// Unix timestamp when the record was created
    pub created_at: i64,
    /// Unix timestamp of the last write
    pub updated_at: i64,
    /// Unix timestamp when the record reached `completed`
    pub completed_at: Option<i64>,
    /// Unix timestamp of the soft delete
    pub deleted_at: Option<i64>,
}

impl DownloadRecord {
    /// Where the payload currently lives (None until downloaded)
    pub fn location(&self) -> Option<StorageLocation> {
        self.storage_disk
            .as_deref()
            .map(StorageLocation::from_disk_name)
    }

    /// Whether the payload currently sits on the quarantine disk
    pub fn in_quarantine(&self) -> bool {
        self.location() == Some(StorageLocation::Quarantine)
    }

    /// Parsed caller metadata
    pub fn metadata(&self) -> Result<DownloadMetadata> {
        match &self.metadata {
            Some(raw) => Ok(serde_json::from_str(raw)?),
            None => Ok(DownloadMetadata::default()),
        }
    }

    /// Whether the record was soft-deleted
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Where a downloaded payload landed
#[derive(Debug, Clone)]
pub struct StoredPayload {
    /// Disk name
    pub disk: String,
    /// Storage key
    pub path: String,
    /// Size in bytes
    pub size_bytes: i64,
    /// MIME type
    pub mime_type: String,
    /// File extension
    pub extension: String,
}

/// Scanned URL record from database
#[derive(Debug, Clone, FromRow)]
pub struct ScannedUrl {
    /// Unique database ID
    pub id: i64,
    /// URL exactly as submitted
    pub url: String,
    /// Host extracted from the URL
    pub domain: Option<String>,
    /// Scan state
    pub scan_status: Option<ScanStatus>,
    /// Threat-intel identifier of the URL analysis
    pub scan_id: Option<String>,
    /// Scan verdict (JSON)
    pub scan_result: Option<String>,
    /// Domain report and votes (JSON)
    pub domain_info: Option<String>,
    /// Whether the URL was found malicious
    pub is_malicious: bool,
    /// Unix timestamp when the URL was blocked
    pub blocked_at: Option<i64>,
    /// Last scan error
    pub error_message: Option<String>,
    /// Unix timestamp when the record was created
    pub created_at: i64,
    /// Unix timestamp of the last write
    pub updated_at: i64,
    /// Unix timestamp of the soft delete
    pub deleted_at: Option<i64>,
}

impl ScannedUrl {
    /// Whether a completed scan found this URL clean
    pub fn is_known_clean(&self) -> bool {
        !self.is_malicious && self.scan_status == Some(ScanStatus::Completed)
    }
}

/// Audit log record from database
#[derive(Debug, Clone, FromRow)]
pub struct AuditLogRow {
    /// Unique database ID
    pub id: i64,
    /// Action name
    pub action: String,
    /// Kind of record affected
    pub model_type: String,
    /// Affected record
    pub model_id: i64,
    /// State before the action (JSON)
    pub old_values: Option<String>,
    /// State after the action (JSON)
    pub new_values: Option<String>,
    /// Human-readable summary
    pub description: String,
    /// Acting user
    pub user_id: Option<i64>,
    /// Client IP address
    pub ip: Option<String>,
    /// Client user agent
    pub user_agent: Option<String>,
    /// Request URL
    pub url: Option<String>,
    /// Request method
    pub method: Option<String>,
    /// Unix timestamp of the entry
    pub created_at: i64,
}

/// Database handle for torrent-quarantine
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
