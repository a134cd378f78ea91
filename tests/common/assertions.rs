//! Custom test assertions for E2E tests

use std::time::Duration;
use torrent_quarantine::{DownloadId, Event, Pipeline};

/// Result of waiting for a download to finish
#[derive(Debug)]
pub enum WaitResult {
    /// Payload reached its permanent disk
    Completed {
        /// Destination disk
        disk: String,
        /// Storage key on that disk
        path: String,
    },
    /// Source URL was blocked
    UrlRejected,
    /// Payload was found malicious
    FileRejected(Vec<String>),
    /// Pipeline gave up with an error
    Failed(String),
    /// Timeout waiting for an outcome
    Timeout,
    /// Channel closed unexpectedly
    ChannelClosed,
}

/// Wait for a download to reach a terminal outcome
///
/// Subscribe before initiating the download and pass the receiver in, so no
/// event is missed.
pub async fn wait_for_outcome(
    events: &mut tokio::sync::broadcast::Receiver<Event>,
    id: DownloadId,
    timeout: Duration,
) -> WaitResult {
    let result = tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(Event::Completed {
                    id: event_id,
                    disk,
                    path,
                }) if event_id == id => return WaitResult::Completed { disk, path },
                Ok(Event::UrlRejected { id: event_id, .. }) if event_id == id => {
                    return WaitResult::UrlRejected;
                }
                Ok(Event::FileRejected {
                    id: event_id,
                    threats,
                }) if event_id == id => return WaitResult::FileRejected(threats),
                Ok(Event::Failed { id: event_id, error }) if event_id == id => {
                    return WaitResult::Failed(error);
                }
                Ok(_) | Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    return WaitResult::ChannelClosed;
                }
            }
        }
    })
    .await;

    result.unwrap_or(WaitResult::Timeout)
}

/// Assert that the payload for `id` sits on `disk` under `path`
pub async fn assert_stored(pipeline: &Pipeline, disk: &str, path: &str) {
    let disk = pipeline
        .quarantine()
        .disks()
        .get(disk)
        .expect("destination disk is configured");
    assert!(
        disk.exists(path).await.expect("failed to check object"),
        "expected {} on disk {}",
        path,
        disk.name()
    );
}

/// Assert that the quarantine disk holds no payloads
pub async fn assert_quarantine_empty(pipeline: &Pipeline) {
    let root = pipeline.quarantine().quarantine().root().to_path_buf();
    let mut stack = vec![root];
    while let Some(dir) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .expect("failed to read quarantine dir");
        while let Some(entry) = entries.next_entry().await.expect("failed to read entry") {
            let file_type = entry.file_type().await.expect("failed to stat entry");
            if file_type.is_dir() {
                stack.push(entry.path());
            } else {
                panic!("quarantine still holds {}", entry.path().display());
            }
        }
    }
}
