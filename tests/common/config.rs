//! Test configuration helpers for pipelines backed by mock HTTP servers

use std::collections::HashMap;
use std::time::Duration;
use tempfile::TempDir;
use torrent_quarantine::config::{JobPolicy, RetryConfig};
use torrent_quarantine::{Config, Pipeline};

/// API key the mock threat-intel server expects
pub const TEST_API_KEY: &str = "test-key";

/// Configuration rooted in `dir` that talks to a threat-intel API at `base_url`
///
/// Job backoff and report polling are shortened to milliseconds, rate
/// limiting is off, and the quarantine sweeper is disabled.
pub fn test_config(dir: &TempDir, base_url: &str) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = dir.path().join("torrent-quarantine.db");
    config.storage.quarantine_dir = dir.path().join("quarantine");
    config.storage.disks = HashMap::from([("local".to_string(), dir.path().join("local"))]);
    config.storage.default_disk = "local".to_string();

    config.threat_intel.api_key = Some(TEST_API_KEY.to_string());
    config.threat_intel.base_url = base_url.to_string();
    config.threat_intel.requests_per_minute = None;
    config.threat_intel.timeout = Duration::from_secs(5);
    config.threat_intel.retry = RetryConfig {
        max_attempts: 2,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        jitter: false,
    };

    let fast = JobPolicy {
        max_attempts: 3,
        backoff: Duration::from_millis(20),
    };
    config.pipeline.verify_url = fast;
    config.pipeline.download = fast;
    config.pipeline.scan_file = fast;
    config.pipeline.promote = fast;
    config.pipeline.poll_delay = Duration::from_millis(20);

    config.fetcher.timeout = Duration::from_secs(5);
    config.cleanup.enabled = false;
    config
}

/// Create and start a pipeline, returning it with its tempdir (which must be kept alive)
pub async fn start_pipeline(base_url: &str) -> (Pipeline, TempDir) {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let pipeline = Pipeline::new(test_config(&dir, base_url))
        .await
        .expect("failed to create pipeline");
    pipeline.start();
    (pipeline, dir)
}
