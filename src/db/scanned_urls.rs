//! Scanned-URL verdict cache.
//!
//! URLs are matched exactly as submitted; only the domain is derived.

use crate::error::DatabaseError;
use crate::types::ScanStatus;
use crate::{Error, Result};

use super::{Database, ScannedUrl};

const SCANNED_URL_COLUMNS: &str = r#"
    id, url, domain, scan_status, scan_id, scan_result, domain_info,
    is_malicious, blocked_at, error_message, created_at, updated_at, deleted_at
"#;

fn query_failed(context: &str, e: sqlx::Error) -> Error {
    Error::Database(DatabaseError::QueryFailed(format!("{}: {}", context, e)))
}

impl Database {
    /// Find the live cache row for `url`
    pub async fn find_scanned_url(&self, url: &str) -> Result<Option<ScannedUrl>> {
        let sql = format!(
            "SELECT {} FROM scanned_urls WHERE url = ? AND deleted_at IS NULL",
            SCANNED_URL_COLUMNS
        );
        sqlx::query_as::<_, ScannedUrl>(&sql)
            .bind(url)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| query_failed("Failed to find scanned URL", e))
    }

    /// Get a cache row by ID
    pub async fn get_scanned_url(&self, id: i64) -> Result<Option<ScannedUrl>> {
        let sql = format!(
            "SELECT {} FROM scanned_urls WHERE id = ?",
            SCANNED_URL_COLUMNS
        );
        sqlx::query_as::<_, ScannedUrl>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| query_failed("Failed to get scanned URL", e))
    }

    /// Return the live cache row for `url`, creating it if absent
    ///
    /// Concurrent callers racing on the same URL end up with the same row.
    pub async fn find_or_create_scanned_url(
        &self,
        url: &str,
        domain: Option<&str>,
    ) -> Result<ScannedUrl> {
        let now = chrono::Utc::now().timestamp();

        // The partial unique index turns a losing insert into a no-op
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO scanned_urls (url, domain, is_malicious, created_at, updated_at)
            VALUES (?, ?, 0, ?, ?)
            "#,
        )
        .bind(url)
        .bind(domain)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to create scanned URL", e))?;

        self.find_scanned_url(url).await?.ok_or_else(|| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "scanned URL row for {} vanished after insert",
                url
            )))
        })
    }

    /// Record that the URL was submitted for analysis
    pub async fn mark_url_scanning(&self, id: i64, scan_id: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            UPDATE scanned_urls
            SET scan_status = ?, scan_id = ?, error_message = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(ScanStatus::Scanning)
        .bind(scan_id)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to mark URL scanning", e))?;

        Ok(())
    }

    /// Persist a clean verdict
    pub async fn mark_url_clean(&self, id: i64, result: &serde_json::Value) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            UPDATE scanned_urls
            SET scan_status = ?, scan_result = ?, is_malicious = 0, error_message = NULL,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(ScanStatus::Completed)
        .bind(result.to_string())
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to mark URL clean", e))?;

        Ok(())
    }

    /// Persist a malicious verdict and block the URL
    pub async fn mark_url_malicious(
        &self,
        id: i64,
        result: &serde_json::Value,
        blocked_at: i64,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            UPDATE scanned_urls
            SET scan_status = ?, scan_result = ?, is_malicious = 1, blocked_at = ?,
                error_message = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(ScanStatus::Completed)
        .bind(result.to_string())
        .bind(blocked_at)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to mark URL malicious", e))?;

        Ok(())
    }

    /// Record a scan failure
    pub async fn mark_url_scan_error(&self, id: i64, message: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "UPDATE scanned_urls SET scan_status = ?, error_message = ?, updated_at = ? WHERE id = ?",
        )
        .bind(ScanStatus::Error)
        .bind(message)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to mark URL scan error", e))?;

        Ok(())
    }

    /// Store domain reputation gathered after the verdict
    pub async fn set_domain_info(&self, id: i64, info: &serde_json::Value) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("UPDATE scanned_urls SET domain_info = ?, updated_at = ? WHERE id = ?")
            .bind(info.to_string())
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| query_failed("Failed to store domain info", e))?;

        Ok(())
    }

    /// Soft-delete a cache row so the URL is scanned afresh next time
    pub async fn soft_delete_scanned_url(&self, id: i64) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "UPDATE scanned_urls SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("Failed to delete scanned URL", e))?;

        Ok(result.rows_affected() > 0)
    }
}
