//! Configuration types for torrent-quarantine

use crate::error::{Error, Result};
use crate::storage::QUARANTINE_DISK;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::PathBuf, time::Duration};

/// Main configuration for the pipeline
///
/// Fields are organized into logical sub-configs:
/// - [`storage`](StorageConfig) - quarantine and permanent disks
/// - [`threat_intel`](ThreatIntelConfig) - scan API access, retries, rate limits
/// - [`fetcher`](FetcherConfig) - torrent file fetching
/// - [`pipeline`](PipelineConfig) - workers and per-stage job policies
/// - [`cleanup`](CleanupConfig) - periodic quarantine sweep
/// - [`persistence`](PersistenceConfig) - database location
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Storage disks
    #[serde(default)]
    pub storage: StorageConfig,

    /// Threat-intel API settings
    #[serde(default)]
    pub threat_intel: ThreatIntelConfig,

    /// Torrent fetch settings
    #[serde(default)]
    pub fetcher: FetcherConfig,

    /// Worker pool and job policies
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Quarantine sweep settings
    #[serde(default)]
    pub cleanup: CleanupConfig,

    /// Data storage
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Check cross-field invariants
    pub fn validate(&self) -> Result<()> {
        if self.storage.disks.is_empty() {
            return Err(Error::config(
                "at least one permanent disk is required",
                "storage.disks",
            ));
        }
        if self.storage.disks.contains_key(QUARANTINE_DISK) {
            return Err(Error::config(
                format!("'{}' is reserved for the quarantine disk", QUARANTINE_DISK),
                "storage.disks",
            ));
        }
        if !self.storage.disks.contains_key(&self.storage.default_disk) {
            return Err(Error::config(
                format!(
                    "default disk '{}' is not among the configured disks",
                    self.storage.default_disk
                ),
                "storage.default_disk",
            ));
        }
        if self.pipeline.workers == 0 {
            return Err(Error::config(
                "worker count must be at least 1",
                "pipeline.workers",
            ));
        }
        if self.threat_intel.retry.max_attempts == 0 {
            return Err(Error::config(
                "max_attempts must be at least 1",
                "threat_intel.retry.max_attempts",
            ));
        }
        if self.threat_intel.requests_per_minute == Some(0) {
            return Err(Error::config(
                "requests_per_minute must be positive (omit it to disable rate limiting)",
                "threat_intel.requests_per_minute",
            ));
        }
        if self.pipeline.poll_delay.is_zero() {
            return Err(Error::config(
                "poll_delay must be greater than zero",
                "pipeline.poll_delay",
            ));
        }
        if self.cleanup.interval.is_zero() {
            return Err(Error::config(
                "sweep interval must be greater than zero",
                "cleanup.interval",
            ));
        }
        for (key, policy) in [
            ("pipeline.verify_url", &self.pipeline.verify_url),
            ("pipeline.download", &self.pipeline.download),
            ("pipeline.scan_file", &self.pipeline.scan_file),
            ("pipeline.promote", &self.pipeline.promote),
        ] {
            if policy.max_attempts == 0 {
                return Err(Error::config("max_attempts must be at least 1", key));
            }
        }
        Ok(())
    }
}

/// Quarantine and permanent disk locations
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of the quarantine disk (default: "storage/quarantine")
    #[serde(default = "default_quarantine_dir")]
    pub quarantine_dir: PathBuf,

    /// Permanent disks by name (default: {"local": "storage/local"})
    #[serde(default = "default_disks")]
    pub disks: HashMap<String, PathBuf>,

    /// Disk verified payloads are promoted to when the request names none
    #[serde(default = "default_disk_name")]
    pub default_disk: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            quarantine_dir: default_quarantine_dir(),
            disks: default_disks(),
            default_disk: default_disk_name(),
        }
    }
}

/// Retry configuration for a single remote call
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of attempts, including the first (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay; retry `n` waits `base_delay × n` (default: 5 seconds)
    #[serde(default = "default_base_delay", with = "duration_serde")]
    pub base_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            jitter: false,
        }
    }
}

/// Threat-intel (VirusTotal v3) client configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThreatIntelConfig {
    /// API key sent in the `x-apikey` header
    #[serde(default)]
    pub api_key: Option<String>,

    /// API base URL (default: "https://www.virustotal.com/api/v3")
    #[serde(default = "default_threat_intel_base_url")]
    pub base_url: String,

    /// Per-request timeout (default: 60 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// In-place retry policy for each API call
    #[serde(default)]
    pub retry: RetryConfig,

    /// Wait applied on HTTP 429 when the server sends no Retry-After (default: 60 seconds)
    #[serde(default = "default_retry_after", with = "duration_serde")]
    pub default_retry_after: Duration,

    /// Request budget per minute (default: 4, the public API quota; None = unlimited)
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: Option<u32>,

    /// Files above this size use the upload-URL flow (default: 32 MiB)
    #[serde(default = "default_large_file_threshold")]
    pub large_file_threshold: u64,

    /// Fetch domain reputation and votes after a clean URL verdict (default: true)
    #[serde(default = "default_true")]
    pub enrich_domains: bool,
}

impl Default for ThreatIntelConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_threat_intel_base_url(),
            timeout: default_request_timeout(),
            retry: RetryConfig::default(),
            default_retry_after: default_retry_after(),
            requests_per_minute: default_requests_per_minute(),
            large_file_threshold: default_large_file_threshold(),
            enrich_domains: true,
        }
    }
}

/// Torrent fetcher configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// Timeout for fetching a .torrent file (default: 60 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Largest .torrent file accepted (default: 10 MiB)
    #[serde(default = "default_max_torrent_size")]
    pub max_torrent_size: u64,

    /// Store magnet-only requests as .magnet files (default: true)
    ///
    /// When false, a request without a torrent link is a configuration error.
    #[serde(default = "default_true")]
    pub allow_magnet_only: bool,

    /// User agent sent when fetching torrent files
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: default_request_timeout(),
            max_torrent_size: default_max_torrent_size(),
            allow_magnet_only: true,
            user_agent: default_user_agent(),
        }
    }
}

/// Retry policy of one job type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPolicy {
    /// Total attempts before the record is marked failed
    pub max_attempts: u32,

    /// Requeue delay; attempt `n` waits `backoff × n`
    #[serde(with = "duration_serde")]
    pub backoff: Duration,
}

impl JobPolicy {
    /// Policy with the given attempts and backoff in seconds
    pub const fn new(max_attempts: u32, backoff_secs: u64) -> Self {
        Self {
            max_attempts,
            backoff: Duration::from_secs(backoff_secs),
        }
    }

    /// Requeue delay after failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt.max(1))
    }
}

/// Worker pool and stage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Jobs executed concurrently (default: 4)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Delay before re-polling a report that is not ready (default: 30 seconds)
    #[serde(default = "default_poll_delay", with = "duration_serde")]
    pub poll_delay: Duration,

    /// URL verification job (default: 3 attempts, 60s)
    #[serde(default = "default_verify_url_policy")]
    pub verify_url: JobPolicy,

    /// Download job (default: 3 attempts, 120s)
    #[serde(default = "default_download_policy")]
    pub download: JobPolicy,

    /// File scan job (default: 3 attempts, 60s)
    #[serde(default = "default_scan_file_policy")]
    pub scan_file: JobPolicy,

    /// Promotion job (default: 3 attempts, 60s)
    #[serde(default = "default_promote_policy")]
    pub promote: JobPolicy,

    /// Add random jitter to job requeue delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_delay: default_poll_delay(),
            verify_url: default_verify_url_policy(),
            download: default_download_policy(),
            scan_file: default_scan_file_policy(),
            promote: default_promote_policy(),
            jitter: false,
        }
    }
}

/// Periodic quarantine sweep
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Run the sweeper background task (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Records older than this many days are swept (default: 7)
    #[serde(default = "default_days_threshold")]
    pub days_threshold: u32,

    /// Time between sweeps (default: 1 hour)
    #[serde(default = "default_sweep_interval", with = "duration_serde")]
    pub interval: Duration,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            days_threshold: default_days_threshold(),
            interval: default_sweep_interval(),
        }
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./torrent-quarantine.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

fn default_quarantine_dir() -> PathBuf {
    PathBuf::from("storage/quarantine")
}

fn default_disks() -> HashMap<String, PathBuf> {
    HashMap::from([(default_disk_name(), PathBuf::from("storage/local"))])
}

fn default_disk_name() -> String {
    "local".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("torrent-quarantine.db")
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_threat_intel_base_url() -> String {
    "https://www.virustotal.com/api/v3".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_retry_after() -> Duration {
    Duration::from_secs(60)
}

fn default_requests_per_minute() -> Option<u32> {
    Some(4)
}

fn default_large_file_threshold() -> u64 {
    32 * 1024 * 1024
}

fn default_max_torrent_size() -> u64 {
    10 * 1024 * 1024
}

fn default_user_agent() -> String {
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_workers() -> usize {
    4
}

fn default_poll_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_verify_url_policy() -> JobPolicy {
    JobPolicy::new(3, 60)
}

fn default_download_policy() -> JobPolicy {
    JobPolicy::new(3, 120)
}

fn default_scan_file_policy() -> JobPolicy {
    JobPolicy::new(3, 60)
}

fn default_promote_policy() -> JobPolicy {
    JobPolicy::new(3, 60)
}

fn default_days_threshold() -> u32 {
    7
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(60 * 60)
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
