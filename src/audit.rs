//! Audit trail for destructive quarantine actions
//!
//! Every rejection and every sweep deletion produces an [`AuditEntry`]. Who
//! triggered the pipeline travels with the job as an explicit
//! [`AuditContext`]; there is no ambient request state.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Action recorded when a malicious payload is deleted
pub const ACTION_MALICIOUS_FILE_DELETED: &str = "malicious_file_deleted";
/// Action recorded when a source URL is blocked
pub const ACTION_MALICIOUS_URL_BLOCKED: &str = "malicious_url_blocked";
/// Action recorded when the sweeper removes a stale quarantine record
pub const ACTION_QUARANTINE_CLEANUP: &str = "quarantine_cleanup";

/// Model type of download records
pub const MODEL_DOWNLOAD: &str = "download";
/// Model type of scanned URL records
pub const MODEL_SCANNED_URL: &str = "scanned_url";

/// Who triggered an action
///
/// The default context describes the system itself (sweeper, retries).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditContext {
    /// Acting user
    #[serde(default)]
    pub user_id: Option<i64>,
    /// Client IP address
    #[serde(default)]
    pub ip: Option<String>,
    /// Client user agent
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Request URL that started the pipeline
    #[serde(default)]
    pub url: Option<String>,
    /// Request method
    #[serde(default)]
    pub method: Option<String>,
}

impl AuditContext {
    /// Context for actions taken by background tasks
    pub fn system() -> Self {
        Self::default()
    }

    /// Context for actions taken on behalf of a user
    pub fn for_user(user_id: i64) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::default()
        }
    }
}

/// One audit log entry
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEntry {
    /// What happened (see the `ACTION_*` constants)
    pub action: String,
    /// Kind of record affected
    pub model_type: String,
    /// Affected record
    pub model_id: i64,
    /// Record state before the action
    pub old_values: Option<serde_json::Value>,
    /// Record state after the action
    pub new_values: Option<serde_json::Value>,
    /// Human-readable summary
    pub description: String,
    /// Who triggered it
    pub context: AuditContext,
}

/// Destination for audit entries
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persist one entry
    async fn log(&self, entry: AuditEntry) -> Result<()>;
}

/// Sink that only emits a tracing event
///
/// Useful when the embedding application keeps its own audit store and
/// collects entries from the log stream.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn log(&self, entry: AuditEntry) -> Result<()> {
        tracing::info!(
            action = %entry.action,
            model_type = %entry.model_type,
            model_id = entry.model_id,
            user_id = ?entry.context.user_id,
            ip = ?entry.context.ip,
            "{}",
            entry.description
        );
        Ok(())
    }
}
