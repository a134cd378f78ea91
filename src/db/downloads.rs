//! Download record CRUD operations.

use crate::error::DatabaseError;
use crate::storage::QUARANTINE_DISK;
use crate::types::{DownloadId, DownloadStatus, ScanStatus};
use crate::{Error, Result};

use super::{Database, DownloadRecord, NewDownload, StoredPayload};

const DOWNLOAD_COLUMNS: &str = r#"
    id, name, magnet_link, torrent_link, source_url, metadata,
    storage_disk, destination_disk, path, size_bytes, mime_type, extension,
    status, status_message, scan_id, scan_status, scan_result,
    is_quarantined, quarantined_at, scanned_url_id, error_message,
    created_at, updated_at, completed_at, deleted_at
"#;

fn query_failed(context: &str, e: sqlx::Error) -> Error {
    Error::Database(DatabaseError::QueryFailed(format!("{}: {}", context, e)))
}

impl Database {
    /// Insert a new download record in `pending` status
    pub async fn insert_download(&self, download: &NewDownload) -> Result<DownloadId> {
        let now = chrono::Utc::now().timestamp();
        let metadata = serde_json::to_string(&download.metadata)?;

        let result = sqlx::query(
            r#"
            INSERT INTO downloads (
                name, magnet_link, torrent_link, source_url, metadata,
                destination_disk, status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&download.name)
        .bind(&download.magnet_link)
        .bind(&download.torrent_link)
        .bind(&download.source_url)
        .bind(metadata)
        .bind(&download.destination_disk)
        .bind(DownloadStatus::Pending)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to insert download", e))?;

        Ok(DownloadId(result.last_insert_rowid()))
    }

    /// Get a live (not soft-deleted) download by ID
    pub async fn get_download(&self, id: DownloadId) -> Result<Option<DownloadRecord>> {
        let sql = format!(
            "SELECT {} FROM downloads WHERE id = ? AND deleted_at IS NULL",
            DOWNLOAD_COLUMNS
        );
        sqlx::query_as::<_, DownloadRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| query_failed("Failed to get download", e))
    }

    /// Get a download by ID, including soft-deleted records
    pub async fn get_download_with_trashed(&self, id: DownloadId) -> Result<Option<DownloadRecord>> {
        let sql = format!("SELECT {} FROM downloads WHERE id = ?", DOWNLOAD_COLUMNS);
        sqlx::query_as::<_, DownloadRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| query_failed("Failed to get download", e))
    }

    /// List all live downloads, oldest first
    pub async fn list_downloads(&self) -> Result<Vec<DownloadRecord>> {
        let sql = format!(
            "SELECT {} FROM downloads WHERE deleted_at IS NULL ORDER BY created_at ASC, id ASC",
            DOWNLOAD_COLUMNS
        );
        sqlx::query_as::<_, DownloadRecord>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_failed("Failed to list downloads", e))
    }

    /// List live downloads with a specific status
    pub async fn list_downloads_by_status(
        &self,
        status: DownloadStatus,
    ) -> Result<Vec<DownloadRecord>> {
        let sql = format!(
            "SELECT {} FROM downloads WHERE status = ? AND deleted_at IS NULL ORDER BY created_at ASC, id ASC",
            DOWNLOAD_COLUMNS
        );
        sqlx::query_as::<_, DownloadRecord>(&sql)
            .bind(status)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_failed("Failed to list downloads by status", e))
    }

    /// Move a record from `from` to `to` if it is still in `from`
    ///
    /// Returns false when the record is gone or another writer changed its
    /// status first. Reaching `completed` stamps `completed_at`.
    pub async fn transition_status(
        &self,
        id: DownloadId,
        from: DownloadStatus,
        to: DownloadStatus,
        message: Option<&str>,
    ) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let completed_at = (to == DownloadStatus::Completed).then_some(now);

        let result = sqlx::query(
            r#"
            UPDATE downloads
            SET status = ?, status_message = ?, updated_at = ?,
                completed_at = COALESCE(?, completed_at)
            WHERE id = ? AND status = ? AND deleted_at IS NULL
            "#,
        )
        .bind(to)
        .bind(message)
        .bind(now)
        .bind(completed_at)
        .bind(id)
        .bind(from)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to update status", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Record the last error seen for a download
    pub async fn set_error_message(&self, id: DownloadId, message: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("UPDATE downloads SET error_message = ?, updated_at = ? WHERE id = ?")
            .bind(message)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| query_failed("Failed to set error message", e))?;

        Ok(())
    }

    /// Link the scanned-URL cache row that verified this download's source
    pub async fn set_scanned_url(&self, id: DownloadId, scanned_url_id: i64) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("UPDATE downloads SET scanned_url_id = ?, updated_at = ? WHERE id = ?")
            .bind(scanned_url_id)
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| query_failed("Failed to link scanned URL", e))?;

        Ok(())
    }

    /// Record a payload that landed in quarantine
    ///
    /// Marks the record quarantined and its scan `pending`.
    pub async fn record_download_completed(
        &self,
        id: DownloadId,
        payload: &StoredPayload,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            UPDATE downloads
            SET storage_disk = ?, path = ?, size_bytes = ?, mime_type = ?, extension = ?,
                is_quarantined = ?, quarantined_at = ?, scan_status = ?,
                scan_id = NULL, scan_result = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&payload.disk)
        .bind(&payload.path)
        .bind(payload.size_bytes)
        .bind(&payload.mime_type)
        .bind(&payload.extension)
        .bind(payload.disk == QUARANTINE_DISK)
        .bind((payload.disk == QUARANTINE_DISK).then_some(now))
        .bind(ScanStatus::Pending)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to record downloaded payload", e))?;

        Ok(())
    }

    /// Update the payload scan state, keeping the scan id when `scan_id` is None
    pub async fn set_file_scan(
        &self,
        id: DownloadId,
        status: ScanStatus,
        scan_id: Option<&str>,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            UPDATE downloads
            SET scan_status = ?, scan_id = COALESCE(?, scan_id), updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status)
        .bind(scan_id)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to update file scan", e))?;

        Ok(())
    }

    /// Persist the payload scan verdict
    pub async fn set_file_scan_result(
        &self,
        id: DownloadId,
        status: ScanStatus,
        result: &serde_json::Value,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "UPDATE downloads SET scan_status = ?, scan_result = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status)
        .bind(result.to_string())
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to store file scan result", e))?;

        Ok(())
    }

    /// Point the record at its permanent disk and clear quarantine markers
    pub async fn mark_promoted(&self, id: DownloadId, disk: &str, path: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            UPDATE downloads
            SET storage_disk = ?, path = ?, is_quarantined = 0, quarantined_at = NULL,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(disk)
        .bind(path)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to mark download promoted", e))?;

        Ok(())
    }

    /// Soft-delete a download
    ///
    /// Returns false when the record was already deleted.
    pub async fn soft_delete_download(&self, id: DownloadId) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "UPDATE downloads SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to delete download", e))?;

        Ok(result.rows_affected() > 0)
    }

    /// Quarantined records created before `cutoff` whose scan never finished
    ///
    /// Scan status must be absent, `pending` or `scanning`.
    pub async fn list_stale_quarantined(&self, cutoff: i64) -> Result<Vec<DownloadRecord>> {
        let sql = format!(
            r#"
            SELECT {} FROM downloads
            WHERE storage_disk = ?
              AND deleted_at IS NULL
              AND created_at < ?
              AND (scan_status IS NULL OR scan_status IN (?, ?))
            ORDER BY created_at ASC, id ASC
            "#,
            DOWNLOAD_COLUMNS
        );
        sqlx::query_as::<_, DownloadRecord>(&sql)
            .bind(QUARANTINE_DISK)
            .bind(cutoff)
            .bind(ScanStatus::Pending)
            .bind(ScanStatus::Scanning)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| query_failed("Failed to list stale quarantine records", e))
    }
}
