//! Job dispatch and job-level retries.
//!
//! Stages never sleep in a worker. A delayed job (a report poll or a retry
//! backoff) waits in a [`DelayQueue`] owned by the dispatcher and only takes a
//! worker slot once its delay has passed.

use crate::error::{Error, PipelineError};
use crate::retry::{IsRetryable, add_jitter};
use std::future::poll_fn;
use std::time::Duration;
use tokio_util::time::DelayQueue;

use super::jobs::{Job, JobEnvelope, StageOutcome};
use super::{Pipeline, Scheduled};

impl Pipeline {
    /// Queue a job to run after `delay`
    pub(crate) fn dispatch(&self, envelope: JobEnvelope, delay: Duration) {
        tracing::debug!(
            download_id = envelope.job.id().0,
            stage = envelope.job.stage(),
            attempt = envelope.attempt,
            delay_ms = delay.as_millis(),
            "job dispatched"
        );
        if self.queue.tx.send(Scheduled { envelope, delay }).is_err() {
            tracing::warn!("job dispatcher has stopped, dropping job");
        }
    }

    /// Start the dispatcher task
    ///
    /// The dispatcher holds delayed jobs until they are due, then runs each on
    /// its own task once a worker slot frees up. Calling this twice is a no-op
    /// for the second call.
    pub fn start_dispatcher(&self) -> tokio::task::JoinHandle<()> {
        let pipeline = self.clone();

        tokio::spawn(async move {
            let Some(mut inbox) = pipeline.queue.rx.lock().await.take() else {
                tracing::warn!("job dispatcher already running");
                return;
            };
            let shutdown = pipeline.queue.shutdown.clone();
            let mut delayed: DelayQueue<JobEnvelope> = DelayQueue::new();

            loop {
                let ready = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    scheduled = inbox.recv() => match scheduled {
                        Some(Scheduled { envelope, delay }) if delay.is_zero() => envelope,
                        Some(Scheduled { envelope, delay }) => {
                            delayed.insert(envelope, delay);
                            continue;
                        }
                        None => break,
                    },
                    Some(expired) = poll_fn(|cx| delayed.poll_expired(cx)), if !delayed.is_empty() => {
                        expired.into_inner()
                    }
                };

                let permit = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    permit = pipeline.queue.workers.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };

                let worker = pipeline.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    worker.run_job(ready).await;
                });
            }

            if !delayed.is_empty() {
                tracing::info!(
                    pending = delayed.len(),
                    "job dispatcher stopped with delayed jobs outstanding"
                );
            }
        })
    }

    /// Run one job and act on its outcome
    pub(crate) async fn run_job(&self, envelope: JobEnvelope) {
        let job = &envelope.job;
        tracing::debug!(
            download_id = job.id().0,
            stage = job.stage(),
            attempt = envelope.attempt,
            "running job"
        );

        match self.run_stage(&envelope).await {
            Ok(StageOutcome::Next(next)) => self.dispatch(envelope.next(next), Duration::ZERO),
            Ok(StageOutcome::Poll(delay)) => {
                tracing::debug!(
                    download_id = job.id().0,
                    stage = job.stage(),
                    delay_secs = delay.as_secs(),
                    "report not ready, polling again later"
                );
                self.dispatch(envelope, delay);
            }
            Ok(StageOutcome::Finished) => {}
            Err(e) => self.handle_failure(envelope, e).await,
        }
    }

    /// Execute the stage a job names
    pub(crate) async fn run_stage(&self, envelope: &JobEnvelope) -> crate::Result<StageOutcome> {
        let context = &envelope.context;
        match &envelope.job {
            Job::VerifyUrl { id, url } => self.verify_url(*id, url, context).await,
            Job::Download { id } => self.download(*id).await,
            Job::ScanFile { id } => self.scan_file(*id, context).await,
            Job::PromoteToStorage {
                id,
                destination_disk,
            } => self.promote(*id, destination_disk).await,
        }
    }

    /// Requeue a failed job or mark its record failed
    ///
    /// A retryable error with attempts left records the error and requeues
    /// after the job's backoff. Anything else marks the record failed, unless
    /// it already reached a terminal state.
    pub(crate) async fn handle_failure(&self, envelope: JobEnvelope, error: Error) {
        let job = &envelope.job;
        let id = job.id();

        // Another worker moved the record first; nothing left for this job
        if let Error::Pipeline(PipelineError::InvalidTransition { from, to, .. }) = &error {
            tracing::info!(
                download_id = id.0,
                stage = job.stage(),
                from = %from,
                to = %to,
                "record changed underneath job, skipping"
            );
            return;
        }

        let policy = job.policy(&self.config.pipeline);
        let message = error.to_string();

        if error.is_retryable() && envelope.attempt < policy.max_attempts {
            let mut delay = policy.delay_for(envelope.attempt);
            if self.config.pipeline.jitter {
                delay = add_jitter(delay);
            }

            tracing::warn!(
                download_id = id.0,
                stage = job.stage(),
                attempt = envelope.attempt,
                max_attempts = policy.max_attempts,
                delay_secs = delay.as_secs(),
                error = %message,
                "job failed, retrying"
            );
            if let Err(e) = self.db.set_error_message(id, &message).await {
                tracing::error!(download_id = id.0, error = %e, "failed to record job error");
            }
            self.dispatch(envelope.retry(), delay);
            return;
        }

        tracing::error!(
            download_id = id.0,
            stage = job.stage(),
            attempt = envelope.attempt,
            retryable = error.is_retryable(),
            error = %message,
            "job failed permanently"
        );

        match self.db.get_download(id).await {
            Ok(Some(record)) if !record.status.is_terminal() => {
                if let Err(e) = self.status.mark_failed(id, &message).await {
                    tracing::error!(download_id = id.0, error = %e, "failed to mark download failed");
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(download_id = id.0, error = %e, "failed to load download after job failure");
            }
        }
    }
}
