//! Job progress reporting.
//!
//! Progress updates are requests on `soren.cpu.<id>.<job>.<command>`. The
//! host may briefly have no subscriber for a fresh job, so "no responders"
//! is retried a bounded number of times; every other failure is returned at
//! once. Failures are always returned to the caller, never panicked on.

use bytes::Bytes;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::model::{Command, JobProgress};
use crate::session::Session;
use crate::subject;
use crate::transport::{Message, Transport, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum ProgressError {
    #[error("no responder for {subject} after {attempts} attempts")]
    NoResponders { subject: String, attempts: u32 },
    #[error(transparent)]
    Transport(TransportError),
    #[error("encode progress failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Retry behaviour for progress requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub delay: Duration,
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
            request_timeout: Duration::from_secs(3),
        }
    }
}

/// Sends progress, stop and context commands for running jobs.
#[derive(Debug, Clone)]
pub struct JobReporter {
    session: Arc<Session>,
    policy: RetryPolicy,
}

impl JobReporter {
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            policy: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Send `data` as `command` for `job_id` and return the host's reply.
    pub async fn progress(
        &self,
        job_id: &str,
        command: Command,
        data: &JobProgress,
    ) -> Result<Message, ProgressError> {
        let subject = subject::job(self.session.plugin_id(), job_id, command.as_str());
        let body: Bytes = serde_json::to_vec(data)?.into();
        let max_attempts = self.policy.max_attempts.max(1);

        let mut attempt = 1;
        loop {
            let result = self
                .session
                .request(&subject, body.clone(), self.policy.request_timeout, None)
                .await;

            match result {
                Ok(reply) => {
                    if let Err(e) = self.session.flush().await {
                        tracing::warn!(%subject, error = %e, "flush after progress failed");
                    }
                    tracing::info!(%subject, reply = %reply.text(), "progress sent");
                    return Ok(reply);
                }
                Err(e) if e.is_no_responders() => {
                    if attempt > 1 {
                        tracing::warn!(
                            %command,
                            %subject,
                            attempt,
                            max_attempts,
                            error = %e,
                            "progress command has no responder"
                        );
                    }
                    if attempt >= max_attempts {
                        tracing::error!(
                            %command,
                            %subject,
                            attempts = attempt,
                            "progress command has no responder after all attempts"
                        );
                        return Err(ProgressError::NoResponders {
                            subject,
                            attempts: attempt,
                        });
                    }
                    tokio::time::sleep(self.policy.delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(%command, %subject, error = %e, "progress command failed");
                    return Err(ProgressError::Transport(e));
                }
            }
        }
    }

    /// Report the job as completed with `details`.
    pub async fn done(
        &self,
        job_id: &str,
        details: Option<Value>,
    ) -> Result<Message, ProgressError> {
        self.progress(job_id, Command::Progress, &JobProgress::completed(details))
            .await
    }
}
