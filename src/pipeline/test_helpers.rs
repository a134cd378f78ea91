//! Shared test helpers for creating Pipeline instances with fake collaborators.

use crate::audit::{AuditEntry, AuditSink};
use crate::config::{Config, JobPolicy};
use crate::error::{Error, Result, ThreatIntelError};
use crate::fetcher::{FetchRequest, TorrentFetcher};
use crate::pipeline::{Collaborators, Pipeline};
use crate::storage::Disk;
use crate::threat_intel::{
    AnalysisReport, AnalysisStats, DomainInfo, DomainVotes, EngineResult, ObjectAttributes,
    ScanReport, ThreatIntel,
};
use crate::types::Event;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::{TempDir, tempdir};
use tokio::sync::broadcast;

/// Build a finished analysis report
pub(crate) fn report(id: &str, malicious: bool) -> AnalysisReport {
    let mut results = HashMap::new();
    let stats = if malicious {
        results.insert(
            "EngineA".to_string(),
            EngineResult {
                category: Some("malicious".into()),
                engine_name: Some("EngineA".into()),
                result: Some("Trojan.Generic".into()),
                method: Some("blacklist".into()),
            },
        );
        AnalysisStats {
            malicious: 1,
            undetected: 60,
            ..Default::default()
        }
    } else {
        AnalysisStats {
            harmless: 10,
            undetected: 60,
            ..Default::default()
        }
    };

    AnalysisReport {
        id: id.to_string(),
        attributes: ObjectAttributes {
            last_analysis_stats: stats,
            last_analysis_date: Some(1_700_000_000),
            last_analysis_results: results,
            ..Default::default()
        },
    }
}

/// Scripted threat-intel API
#[derive(Default)]
pub(crate) struct FakeThreatIntel {
    pub url_malicious: AtomicBool,
    pub file_malicious: AtomicBool,
    /// Number of `Pending` answers before a URL report is ready
    pub url_pending: AtomicU32,
    /// Number of `Pending` answers before a file report is ready
    pub file_pending: AtomicU32,
    /// Errors returned by `scan_url` before it succeeds
    pub url_errors: Mutex<VecDeque<ThreatIntelError>>,
    /// Errors returned by file submission before it succeeds
    pub file_errors: Mutex<VecDeque<ThreatIntelError>>,

    pub scan_url_calls: AtomicU32,
    pub url_report_calls: AtomicU32,
    pub scan_file_calls: AtomicU32,
    pub upload_url_calls: AtomicU32,
    pub large_upload_calls: AtomicU32,
    pub file_report_calls: AtomicU32,
    pub domain_calls: AtomicU32,
}

impl FakeThreatIntel {
    pub fn clean() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn malicious_url() -> Arc<Self> {
        let fake = Self::default();
        fake.url_malicious.store(true, Ordering::SeqCst);
        Arc::new(fake)
    }

    pub fn malicious_file() -> Arc<Self> {
        let fake = Self::default();
        fake.file_malicious.store(true, Ordering::SeqCst);
        Arc::new(fake)
    }

    pub fn calls(counter: &AtomicU32) -> u32 {
        counter.load(Ordering::SeqCst)
    }

    fn pending(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ThreatIntel for FakeThreatIntel {
    async fn scan_url(&self, url: &str) -> std::result::Result<String, ThreatIntelError> {
        self.scan_url_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.url_errors.lock().unwrap().pop_front() {
            return Err(e);
        }
        Ok(format!("url-{}", url.len()))
    }

    async fn get_url_report(
        &self,
        scan_id: &str,
    ) -> std::result::Result<ScanReport, ThreatIntelError> {
        self.url_report_calls.fetch_add(1, Ordering::SeqCst);
        if Self::pending(&self.url_pending) {
            return Ok(ScanReport::Pending);
        }
        Ok(ScanReport::Ready(report(
            scan_id,
            self.url_malicious.load(Ordering::SeqCst),
        )))
    }

    async fn scan_file(&self, _path: &Path) -> std::result::Result<String, ThreatIntelError> {
        self.scan_file_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.file_errors.lock().unwrap().pop_front() {
            return Err(e);
        }
        Ok("file-sha256".into())
    }

    async fn get_upload_url(&self) -> std::result::Result<String, ThreatIntelError> {
        self.upload_url_calls.fetch_add(1, Ordering::SeqCst);
        Ok("http://upload.example/one-off".into())
    }

    async fn upload_large_file(
        &self,
        _path: &Path,
        _upload_url: &str,
    ) -> std::result::Result<String, ThreatIntelError> {
        self.large_upload_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.file_errors.lock().unwrap().pop_front() {
            return Err(e);
        }
        Ok("large-file-sha256".into())
    }

    async fn get_file_report(
        &self,
        scan_id: &str,
    ) -> std::result::Result<ScanReport, ThreatIntelError> {
        self.file_report_calls.fetch_add(1, Ordering::SeqCst);
        if Self::pending(&self.file_pending) {
            return Ok(ScanReport::Pending);
        }
        Ok(ScanReport::Ready(report(
            scan_id,
            self.file_malicious.load(Ordering::SeqCst),
        )))
    }

    async fn get_domain_info(
        &self,
        domain: &str,
    ) -> std::result::Result<DomainInfo, ThreatIntelError> {
        self.domain_calls.fetch_add(1, Ordering::SeqCst);
        Ok(DomainInfo {
            domain: domain.to_string(),
            attributes: ObjectAttributes {
                reputation: 5,
                ..Default::default()
            },
        })
    }

    async fn get_domain_votes(
        &self,
        _domain: &str,
    ) -> std::result::Result<DomainVotes, ThreatIntelError> {
        Ok(DomainVotes {
            harmless: 3,
            malicious: 0,
        })
    }
}

/// Fetcher that writes a fixed payload, optionally failing first
pub(crate) struct FakeFetcher {
    pub payload: Vec<u8>,
    pub errors: Mutex<VecDeque<Error>>,
    pub calls: AtomicU32,
}

impl FakeFetcher {
    pub fn new() -> Arc<Self> {
        Self::with_payload(b"d8:announce35:http://tracker.example/announcee".to_vec())
    }

    pub fn with_payload(payload: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            payload,
            errors: Mutex::new(VecDeque::new()),
            calls: AtomicU32::new(0),
        })
    }

    pub fn fail_with(&self, error: Error) {
        self.errors.lock().unwrap().push_back(error);
    }
}

#[async_trait]
impl TorrentFetcher for FakeFetcher {
    async fn fetch(&self, _request: &FetchRequest, quarantine: &Disk, key: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.errors.lock().unwrap().pop_front() {
            return Err(e);
        }
        quarantine.put(key, &self.payload).await?;
        Ok(key.to_string())
    }
}

/// Audit sink whose first writes time out
#[derive(Default)]
pub(crate) struct FlakyAudit {
    pub failures: AtomicU32,
    pub entries: Mutex<Vec<AuditEntry>>,
}

impl FlakyAudit {
    pub fn failing(times: u32) -> Arc<Self> {
        Arc::new(Self {
            failures: AtomicU32::new(times),
            entries: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl AuditSink for FlakyAudit {
    async fn log(&self, entry: AuditEntry) -> Result<()> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "audit store slow").into());
        }
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }
}

/// Configuration rooted in `dir` with fast job backoff and no sweeper
pub(crate) fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = dir.join("test.db");
    config.storage.quarantine_dir = dir.join("quarantine");
    config.storage.disks = HashMap::from([
        ("local".to_string(), dir.join("local")),
        ("archive".to_string(), dir.join("archive")),
    ]);
    config.storage.default_disk = "local".into();

    let fast = JobPolicy {
        max_attempts: 3,
        backoff: Duration::from_millis(10),
    };
    config.pipeline.verify_url = fast;
    config.pipeline.download = fast;
    config.pipeline.scan_file = fast;
    config.pipeline.promote = fast;
    config.pipeline.poll_delay = Duration::from_millis(10);
    config.pipeline.workers = 2;
    config.cleanup.enabled = false;
    config.threat_intel.requests_per_minute = None;
    config
}

/// Create a pipeline over fakes, returning it with the tempdir (which must be kept alive)
pub(crate) async fn create_test_pipeline(
    threat_intel: Arc<FakeThreatIntel>,
    fetcher: Arc<FakeFetcher>,
) -> (Pipeline, TempDir) {
    let dir = tempdir().unwrap();
    let pipeline = create_pipeline_in(dir.path(), threat_intel, fetcher).await;
    (pipeline, dir)
}

/// Create a pipeline over an existing directory (used to simulate restarts)
pub(crate) async fn create_pipeline_in(
    dir: &Path,
    threat_intel: Arc<FakeThreatIntel>,
    fetcher: Arc<FakeFetcher>,
) -> Pipeline {
    Pipeline::with_collaborators(
        test_config(dir),
        Collaborators {
            threat_intel,
            fetcher,
            audit: None,
        },
    )
    .await
    .unwrap()
}

/// Wait for the first event matching `predicate`, failing after 5 seconds
pub(crate) async fn wait_for_event<F>(rx: &mut broadcast::Receiver<Event>, predicate: F) -> Event
where
    F: Fn(&Event) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
