use crate::audit::{AuditContext, AuditEntry, AuditSink, ACTION_QUARANTINE_CLEANUP, MODEL_DOWNLOAD};
use crate::db::*;
use tempfile::NamedTempFile;

#[tokio::test]
async fn test_audit_sink_persists_entries_with_context() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let entry = AuditEntry {
        action: ACTION_QUARANTINE_CLEANUP.to_string(),
        model_type: MODEL_DOWNLOAD.to_string(),
        model_id: 42,
        old_values: Some(serde_json::json!({"path": "torrents/a.torrent"})),
        new_values: None,
        description: "Removed stale quarantine file".to_string(),
        context: AuditContext {
            user_id: Some(7),
            ip: Some("10.0.0.1".to_string()),
            user_agent: Some("curl/8".to_string()),
            url: Some("/api/downloads".to_string()),
            method: Some("POST".to_string()),
        },
    };
    db.log(entry).await.unwrap();

    let rows = db.list_audit_logs(MODEL_DOWNLOAD, 42).await.unwrap();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.action, ACTION_QUARANTINE_CLEANUP);
    assert_eq!(row.user_id, Some(7));
    assert_eq!(row.ip.as_deref(), Some("10.0.0.1"));
    assert_eq!(row.method.as_deref(), Some("POST"));
    assert!(row.new_values.is_none());
    let old: serde_json::Value = serde_json::from_str(row.old_values.as_deref().unwrap()).unwrap();
    assert_eq!(old["path"], "torrents/a.torrent");

    let by_action = db
        .list_audit_logs_by_action(ACTION_QUARANTINE_CLEANUP)
        .await
        .unwrap();
    assert_eq!(by_action.len(), 1);

    db.close().await;
}

#[tokio::test]
async fn test_system_context_has_no_user() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    db.log(AuditEntry {
        action: ACTION_QUARANTINE_CLEANUP.to_string(),
        model_type: MODEL_DOWNLOAD.to_string(),
        model_id: 1,
        old_values: None,
        new_values: None,
        description: "sweep".to_string(),
        context: AuditContext::system(),
    })
    .await
    .unwrap();

    let rows = db.list_audit_logs(MODEL_DOWNLOAD, 1).await.unwrap();
    assert_eq!(rows[0].user_id, None);
    assert_eq!(rows[0].ip, None);

    db.close().await;
}
