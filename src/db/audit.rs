//! Audit log persistence.

use crate::audit::{AuditEntry, AuditSink};
use crate::error::DatabaseError;
use crate::{Error, Result};
use async_trait::async_trait;

use super::{AuditLogRow, Database};

const AUDIT_COLUMNS: &str = r#"
    id, action, model_type, model_id, old_values, new_values, description,
    user_id, ip, user_agent, url, method, created_at
"#;

impl Database {
    /// Insert an audit log entry
    pub async fn insert_audit_log(&self, entry: &AuditEntry) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO audit_logs (
                action, model_type, model_id, old_values, new_values, description,
                user_id, ip, user_agent, url, method, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.action)
        .bind(&entry.model_type)
        .bind(entry.model_id)
        .bind(entry.old_values.as_ref().map(|v| v.to_string()))
        .bind(entry.new_values.as_ref().map(|v| v.to_string()))
        .bind(&entry.description)
        .bind(entry.context.user_id)
        .bind(&entry.context.ip)
        .bind(&entry.context.user_agent)
        .bind(&entry.context.url)
        .bind(&entry.context.method)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert audit log: {}",
                e
            )))
        })?;

        Ok(result.last_insert_rowid())
    }

    /// Audit entries for one record, oldest first
    pub async fn list_audit_logs(&self, model_type: &str, model_id: i64) -> Result<Vec<AuditLogRow>> {
        let sql = format!(
            "SELECT {} FROM audit_logs WHERE model_type = ? AND model_id = ? ORDER BY id ASC",
            AUDIT_COLUMNS
        );
        sqlx::query_as::<_, AuditLogRow>(&sql)
            .bind(model_type)
            .bind(model_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to list audit logs: {}",
                    e
                )))
            })
    }

    /// Audit entries with the given action, oldest first
    pub async fn list_audit_logs_by_action(&self, action: &str) -> Result<Vec<AuditLogRow>> {
        let sql = format!(
            "SELECT {} FROM audit_logs WHERE action = ? ORDER BY id ASC",
            AUDIT_COLUMNS
        );
        sqlx::query_as::<_, AuditLogRow>(&sql)
            .bind(action)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to list audit logs: {}",
                    e
                )))
            })
    }
}

#[async_trait]
impl AuditSink for Database {
    async fn log(&self, entry: AuditEntry) -> Result<()> {
        self.insert_audit_log(&entry).await?;
        tracing::debug!(
            action = %entry.action,
            model_type = %entry.model_type,
            model_id = entry.model_id,
            "audit entry recorded"
        );
        Ok(())
    }
}
