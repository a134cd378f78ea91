//! Job types passed between pipeline stages.

use crate::audit::AuditContext;
use crate::config::{JobPolicy, PipelineConfig};
use crate::db::DownloadRecord;
use crate::types::{DownloadId, DownloadStatus};
use std::time::Duration;

/// One unit of pipeline work, addressed by record id
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Job {
    /// Check a source URL against the scan API
    VerifyUrl {
        /// Download record
        id: DownloadId,
        /// URL to verify
        url: String,
    },
    /// Fetch the payload into quarantine
    Download {
        /// Download record
        id: DownloadId,
    },
    /// Scan the quarantined payload
    ScanFile {
        /// Download record
        id: DownloadId,
    },
    /// Move the verified payload to its permanent disk
    PromoteToStorage {
        /// Download record
        id: DownloadId,
        /// Permanent disk name
        destination_disk: String,
    },
}

impl Job {
    /// Record the job works on
    pub fn id(&self) -> DownloadId {
        match self {
            Job::VerifyUrl { id, .. }
            | Job::Download { id }
            | Job::ScanFile { id }
            | Job::PromoteToStorage { id, .. } => *id,
        }
    }

    /// Stage name used in logs
    pub fn stage(&self) -> &'static str {
        match self {
            Job::VerifyUrl { .. } => "verify_url",
            Job::Download { .. } => "download",
            Job::ScanFile { .. } => "scan_file",
            Job::PromoteToStorage { .. } => "promote",
        }
    }

    /// Retry policy of this job type
    pub fn policy(&self, config: &PipelineConfig) -> JobPolicy {
        match self {
            Job::VerifyUrl { .. } => config.verify_url,
            Job::Download { .. } => config.download,
            Job::ScanFile { .. } => config.scan_file,
            Job::PromoteToStorage { .. } => config.promote,
        }
    }

    /// The job that resumes a record left at its current status
    ///
    /// Returns None for terminal records.
    pub fn resume(record: &DownloadRecord) -> Option<Job> {
        let id = record.id;
        let job = match record.status {
            DownloadStatus::Pending | DownloadStatus::VerifyingUrl => {
                match record.torrent_link.as_ref().or(record.source_url.as_ref()) {
                    Some(url) => Job::VerifyUrl {
                        id,
                        url: url.clone(),
                    },
                    None => Job::Download { id },
                }
            }
            DownloadStatus::UrlVerified | DownloadStatus::Downloading => Job::Download { id },
            DownloadStatus::DownloadCompleted | DownloadStatus::ScanningFile => {
                Job::ScanFile { id }
            }
            DownloadStatus::FileVerified | DownloadStatus::MovingToStorage => {
                Job::PromoteToStorage {
                    id,
                    destination_disk: record.destination_disk.clone(),
                }
            }
            // Still live means the soft-delete was interrupted
            DownloadStatus::FileRejected => Job::ScanFile { id },
            DownloadStatus::UrlRejected
            | DownloadStatus::Completed
            | DownloadStatus::Failed
            | DownloadStatus::Cancelled => return None,
        };
        Some(job)
    }
}

/// A job plus its retry bookkeeping and the caller it runs on behalf of
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobEnvelope {
    /// The work
    pub job: Job,
    /// 1-based attempt number
    pub attempt: u32,
    /// Who started the pipeline
    pub context: AuditContext,
}

impl JobEnvelope {
    /// First attempt of `job`
    pub fn new(job: Job, context: AuditContext) -> Self {
        Self {
            job,
            attempt: 1,
            context,
        }
    }

    /// Next job in the chain; the attempt counter restarts
    pub fn next(&self, job: Job) -> Self {
        Self::new(job, self.context.clone())
    }

    /// The same job, one attempt further
    pub fn retry(&self) -> Self {
        Self {
            job: self.job.clone(),
            attempt: self.attempt + 1,
            context: self.context.clone(),
        }
    }
}

/// What a stage asks the dispatcher to do next
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StageOutcome {
    /// Dispatch the next stage now
    Next(Job),
    /// The report is not ready; run this stage again after the delay
    Poll(Duration),
    /// Nothing further to do for this record
    Finished,
}
