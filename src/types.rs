//! Core types for torrent-quarantine

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::storage::QUARANTINE_DISK;

/// Unique identifier for a download record
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DownloadId(pub i64);

impl DownloadId {
    /// Create a new DownloadId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for DownloadId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<DownloadId> for i64 {
    fn from(id: DownloadId) -> Self {
        id.0
    }
}

impl std::fmt::Display for DownloadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for DownloadId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for DownloadId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for DownloadId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Lifecycle state of a download record
///
/// The main path runs `Pending` through `Completed`; `UrlRejected`,
/// `FileRejected`, `Failed` and `Cancelled` are terminal side branches.
/// Variants are declared in pipeline order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    /// Record created, no stage has run yet
    Pending,
    /// Source URL is being checked against the threat-intel API
    VerifyingUrl,
    /// Source URL came back clean
    UrlVerified,
    /// Source URL is known or found to be malicious
    UrlRejected,
    /// Torrent payload is being fetched into quarantine
    Downloading,
    /// Payload is in quarantine and awaiting a scan
    DownloadCompleted,
    /// Payload is being scanned
    ScanningFile,
    /// Payload came back clean
    FileVerified,
    /// Payload was found to be malicious and disposed of
    FileRejected,
    /// Payload is being copied to its permanent disk
    MovingToStorage,
    /// Payload lives on its permanent disk
    Completed,
    /// Pipeline gave up on this record
    Failed,
    /// Download was cancelled
    Cancelled,
}

impl DownloadStatus {
    /// Every status, in declaration order
    pub const ALL: [DownloadStatus; 13] = [
        DownloadStatus::Pending,
        DownloadStatus::VerifyingUrl,
        DownloadStatus::UrlVerified,
        DownloadStatus::UrlRejected,
        DownloadStatus::Downloading,
        DownloadStatus::DownloadCompleted,
        DownloadStatus::ScanningFile,
        DownloadStatus::FileVerified,
        DownloadStatus::FileRejected,
        DownloadStatus::MovingToStorage,
        DownloadStatus::Completed,
        DownloadStatus::Failed,
        DownloadStatus::Cancelled,
    ];

    /// Storage representation (snake_case)
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::Pending => "pending",
            DownloadStatus::VerifyingUrl => "verifying_url",
            DownloadStatus::UrlVerified => "url_verified",
            DownloadStatus::UrlRejected => "url_rejected",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::DownloadCompleted => "download_completed",
            DownloadStatus::ScanningFile => "scanning_file",
            DownloadStatus::FileVerified => "file_verified",
            DownloadStatus::FileRejected => "file_rejected",
            DownloadStatus::MovingToStorage => "moving_to_storage",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Failed => "failed",
            DownloadStatus::Cancelled => "cancelled",
        }
    }

    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            DownloadStatus::Pending => "Pending",
            DownloadStatus::VerifyingUrl => "Verifying URL",
            DownloadStatus::UrlVerified => "URL Verified",
            DownloadStatus::UrlRejected => "URL Rejected",
            DownloadStatus::Downloading => "Downloading",
            DownloadStatus::DownloadCompleted => "Download Completed",
            DownloadStatus::ScanningFile => "Scanning File",
            DownloadStatus::FileVerified => "File Verified",
            DownloadStatus::FileRejected => "File Rejected",
            DownloadStatus::MovingToStorage => "Moving to Storage",
            DownloadStatus::Completed => "Completed",
            DownloadStatus::Failed => "Failed",
            DownloadStatus::Cancelled => "Cancelled",
        }
    }

    /// CSS color class used by status badges
    pub fn color(&self) -> &'static str {
        match self {
            DownloadStatus::Pending => "gray",
            DownloadStatus::VerifyingUrl
            | DownloadStatus::Downloading
            | DownloadStatus::ScanningFile
            | DownloadStatus::MovingToStorage => "blue",
            DownloadStatus::UrlVerified
            | DownloadStatus::DownloadCompleted
            | DownloadStatus::FileVerified => "indigo",
            DownloadStatus::Completed => "green",
            DownloadStatus::UrlRejected | DownloadStatus::FileRejected | DownloadStatus::Failed => {
                "red"
            }
            DownloadStatus::Cancelled => "yellow",
        }
    }

    /// Progress percentage shown to polling clients
    ///
    /// Non-decreasing along the main path; rejection and failure branches report 0.
    pub fn progress(&self) -> u8 {
        match self {
            DownloadStatus::Pending => 0,
            DownloadStatus::VerifyingUrl => 10,
            DownloadStatus::UrlVerified => 20,
            DownloadStatus::UrlRejected => 0,
            DownloadStatus::Downloading => 40,
            DownloadStatus::DownloadCompleted => 50,
            DownloadStatus::ScanningFile => 70,
            DownloadStatus::FileVerified => 80,
            DownloadStatus::FileRejected => 0,
            DownloadStatus::MovingToStorage => 90,
            DownloadStatus::Completed => 100,
            DownloadStatus::Failed => 0,
            DownloadStatus::Cancelled => 0,
        }
    }

    /// Whether no further pipeline work may happen for this record
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadStatus::Completed
                | DownloadStatus::Failed
                | DownloadStatus::Cancelled
                | DownloadStatus::UrlRejected
                | DownloadStatus::FileRejected
        )
    }

    /// Whether the record was rejected by a scan verdict
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            DownloadStatus::UrlRejected | DownloadStatus::FileRejected
        )
    }

    /// Check a status write against the transition table
    ///
    /// Any status may move to `Failed` or `Cancelled`. Terminal states accept
    /// nothing else. In-progress states may be re-entered so a requeued stage
    /// can rewrite its own status.
    pub fn can_transition_to(&self, next: DownloadStatus) -> bool {
        use DownloadStatus::*;

        if matches!(next, Failed | Cancelled) {
            return true;
        }
        if self.is_terminal() {
            return false;
        }

        matches!(
            (self, next),
            (Pending, VerifyingUrl)
                | (Pending, Downloading)
                | (VerifyingUrl, VerifyingUrl)
                | (VerifyingUrl, UrlVerified)
                | (VerifyingUrl, UrlRejected)
                | (Pending, UrlVerified)
                | (Pending, UrlRejected)
                | (UrlVerified, Downloading)
                | (Downloading, Downloading)
                | (Downloading, DownloadCompleted)
                | (DownloadCompleted, ScanningFile)
                | (ScanningFile, ScanningFile)
                | (ScanningFile, FileVerified)
                | (ScanningFile, FileRejected)
                | (FileVerified, MovingToStorage)
                | (MovingToStorage, MovingToStorage)
                | (MovingToStorage, Completed)
        )
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DownloadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DownloadStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown download status '{}'", s))
    }
}

impl sqlx::Type<sqlx::Sqlite> for DownloadStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <str as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for DownloadStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.as_str(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for DownloadStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let raw = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(raw.parse()?)
    }
}

/// Threat-intel scan state of a URL or payload
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    /// Waiting to be submitted
    Pending,
    /// Submitted, report not ready yet
    Scanning,
    /// Report received
    Completed,
    /// Scan could not be completed
    Error,
}

impl ScanStatus {
    /// Storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Scanning => "scanning",
            ScanStatus::Completed => "completed",
            ScanStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ScanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ScanStatus::Pending),
            "scanning" => Ok(ScanStatus::Scanning),
            "completed" => Ok(ScanStatus::Completed),
            "error" => Ok(ScanStatus::Error),
            other => Err(format!("unknown scan status '{}'", other)),
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for ScanStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <str as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for ScanStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.as_str(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for ScanStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let raw = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(raw.parse()?)
    }
}

/// Where a record's payload currently lives
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageLocation {
    /// Isolated quarantine disk
    Quarantine,
    /// A named permanent disk
    Disk(String),
}

impl StorageLocation {
    /// Parse the disk name stored on a record
    pub fn from_disk_name(name: &str) -> Self {
        if name == QUARANTINE_DISK {
            StorageLocation::Quarantine
        } else {
            StorageLocation::Disk(name.to_string())
        }
    }

    /// Disk name as stored on a record
    pub fn disk_name(&self) -> &str {
        match self {
            StorageLocation::Quarantine => QUARANTINE_DISK,
            StorageLocation::Disk(name) => name,
        }
    }
}

/// Caller-supplied metadata for a new download
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DownloadMetadata {
    /// Display title (used to build the stored filename)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Permanent disk the payload is promoted to (default disk if None)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_disk: Option<String>,

    /// Anything else the search layer attached (seeders, size hints, ...)
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Request to start the acquisition pipeline
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InitiateDownload {
    /// Magnet URI
    #[serde(default)]
    pub magnet_link: Option<String>,
    /// HTTP(S) link to a .torrent file
    #[serde(default)]
    pub torrent_link: Option<String>,
    /// Page the links were found on
    #[serde(default)]
    pub source_url: Option<String>,
    /// Extra metadata
    #[serde(default)]
    pub metadata: DownloadMetadata,
}

/// Acknowledgement returned by [`crate::Pipeline::initiate_download`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiateResponse {
    /// Whether the pipeline was started
    pub success: bool,
    /// Record created for this download
    pub file_id: DownloadId,
    /// URL that will be verified first (None = verification skipped)
    pub url_to_verify: Option<String>,
}

/// Snapshot of a record's status for polling clients
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusView {
    /// Download ID
    pub id: DownloadId,
    /// Current status
    pub status: DownloadStatus,
    /// Human-readable label
    pub label: String,
    /// Badge color class
    pub color: String,
    /// Progress percentage
    pub progress: u8,
    /// Last status message
    pub message: Option<String>,
}

/// Event emitted during the pipeline lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A download record was created and its first job dispatched
    Initiated {
        /// Download ID
        id: DownloadId,
        /// Download name
        name: String,
    },

    /// A record changed status
    StatusChanged {
        /// Download ID
        id: DownloadId,
        /// Previous status
        from: DownloadStatus,
        /// New status
        to: DownloadStatus,
        /// Optional status message
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// A source URL was blocked
    UrlRejected {
        /// Download ID
        id: DownloadId,
        /// The rejected URL
        url: String,
    },

    /// A quarantined payload was found malicious and disposed of
    FileRejected {
        /// Download ID
        id: DownloadId,
        /// Threat names reported by the scan engines
        threats: Vec<String>,
    },

    /// A payload reached its permanent disk
    Completed {
        /// Download ID
        id: DownloadId,
        /// Destination disk
        disk: String,
        /// Storage key on that disk
        path: String,
    },

    /// The pipeline gave up on a record
    Failed {
        /// Download ID
        id: DownloadId,
        /// Failure reason
        error: String,
    },

    /// Stale quarantine records were swept
    QuarantineSwept {
        /// Number of records removed
        removed: u64,
    },

    /// Pipeline is shutting down
    Shutdown,
}
