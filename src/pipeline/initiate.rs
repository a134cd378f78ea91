//! Starting the pipeline for a new download.

use crate::audit::AuditContext;
use crate::db::NewDownload;
use crate::error::{Error, PipelineError, Result};
use crate::types::{Event, InitiateDownload, InitiateResponse};
use crate::utils::download_name;
use std::sync::atomic::Ordering;
use std::time::Duration;

use super::Pipeline;
use super::jobs::{Job, JobEnvelope};

impl Pipeline {
    /// Create a download record and dispatch its first job
    ///
    /// At least one of `magnet_link` and `torrent_link` is required. The URL
    /// verified first is the torrent link, else the source URL; with neither
    /// the pipeline goes straight to the download stage.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::MissingLink`] when no link is given
    /// - [`PipelineError::InvalidUrl`] when the torrent link does not parse
    /// - [`crate::error::QuarantineError::UnknownDisk`] for an unconfigured destination
    /// - [`Error::ShuttingDown`] once shutdown has begun
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use torrent_quarantine::*;
    /// # async fn example(pipeline: Pipeline) -> Result<()> {
    /// let response = pipeline
    ///     .initiate_download(
    ///         InitiateDownload {
    ///             torrent_link: Some("https://tracker.example/ubuntu.torrent".into()),
    ///             ..Default::default()
    ///         },
    ///         AuditContext::for_user(42),
    ///     )
    ///     .await?;
    /// assert!(response.success);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn initiate_download(
        &self,
        request: InitiateDownload,
        context: AuditContext,
    ) -> Result<InitiateResponse> {
        if !self.queue.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let magnet_link = non_empty(request.magnet_link);
        let torrent_link = non_empty(request.torrent_link);
        let source_url = non_empty(request.source_url);

        if magnet_link.is_none() && torrent_link.is_none() {
            return Err(PipelineError::MissingLink.into());
        }
        if let Some(link) = torrent_link.as_deref() {
            url::Url::parse(link).map_err(|e| PipelineError::InvalidUrl {
                url: link.to_string(),
                reason: e.to_string(),
            })?;
        }

        let destination_disk = request
            .metadata
            .destination_disk
            .clone()
            .unwrap_or_else(|| self.quarantine.disks().default_disk().to_string());
        self.quarantine.disks().get(&destination_disk)?;

        let name = download_name(
            request.metadata.title.as_deref(),
            magnet_link.as_deref(),
            torrent_link.as_deref(),
        );
        let url_to_verify = torrent_link.clone().or_else(|| source_url.clone());

        let id = self
            .db
            .insert_download(&NewDownload {
                name: name.clone(),
                magnet_link,
                torrent_link,
                source_url,
                metadata: request.metadata,
                destination_disk,
            })
            .await?;

        tracing::info!(
            download_id = id.0,
            name = %name,
            url = url_to_verify.as_deref().unwrap_or_default(),
            user_id = ?context.user_id,
            "download initiated"
        );
        self.emit_event(Event::Initiated { id, name });

        let job = match &url_to_verify {
            Some(url) => Job::VerifyUrl {
                id,
                url: url.clone(),
            },
            None => Job::Download { id },
        };
        self.dispatch(JobEnvelope::new(job, context), Duration::ZERO);

        Ok(InitiateResponse {
            success: true,
            file_id: id,
            url_to_verify,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
