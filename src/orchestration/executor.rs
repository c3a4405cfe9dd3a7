//! Worker Executor - runs one job attempt in isolation
//!
//! Turns a [`Job`] into an [`AttemptResult`]:
//! - resolves the capability through the registry
//! - runs `publish` in its own task under the job timeout
//! - converts errors, panics and timeouts into failed results
//! - emits start/success/failure events on the relay
//!
//! The executor never writes campaign log state; the caller merges the
//! returned result through the aggregator.

use crate::core::campaign::{CredentialBundle, Job};
use crate::core::error::CampaignError;
use crate::core::log_state::{AttemptResult, ErrorKind, LogLine, Severity};
use crate::core::traits::PublishResult;
use crate::orchestration::relay::{LogEvent, LogRelay};
use crate::plugins::registry::CapabilityRegistry;
use crate::security::CredentialManager;
use chrono::Utc;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tracing::{info, instrument, warn};

/// Outcome of the capability task before classification
enum Invocation {
    Completed(anyhow::Result<PublishResult>),
    Crashed(JoinError),
    TimedOut,
}

pub struct WorkerExecutor {
    registry: Arc<CapabilityRegistry>,
    relay: Arc<LogRelay>,
    credentials: Arc<CredentialManager>,
    timeout: Duration,
}

impl WorkerExecutor {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        relay: Arc<LogRelay>,
        credentials: Arc<CredentialManager>,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            relay,
            credentials,
            timeout,
        }
    }

    fn emit(&self, job: &Job, severity: Severity, message: &str) {
        let event = LogEvent::new(&job.campaign_id, severity, message)
            .for_destination(job.destination.url.clone());
        self.relay.publish(&job.campaign_id, event);
    }

    /// Execute one attempt of `job`
    #[instrument(
        skip(self, job),
        fields(campaign_id = %job.campaign_id, key = %job.key(), job_id = %job.id)
    )]
    pub async fn execute(&self, job: &Job) -> AttemptResult {
        let started_at = Utc::now();
        let url = job.destination.url.clone();
        let mut logs = Vec::new();

        let start_message = format!("publishing to {} [{}]", url, job.destination.category);
        self.emit(job, Severity::Info, &start_message);
        logs.push(LogLine::new(Severity::Info, start_message));

        let handle = match self.registry.resolve(&job.destination) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(error = %e, "capability resolution failed");
                let mut result = self.fail(job, e, logs);
                result.started_at = started_at;
                return result;
            }
        };

        let bundle = self.credentials.resolve(&job.destination);
        let mut destination = job.destination.clone();
        destination.credentials = bundle.clone();

        let capability = handle.capability();
        let content = Arc::clone(&job.content);
        let mut task =
            tokio::spawn(async move { capability.publish(&destination, &content).await });

        let invocation = match tokio::time::timeout(self.timeout, &mut task).await {
            Ok(Ok(outcome)) => Invocation::Completed(outcome),
            Ok(Err(join_error)) => Invocation::Crashed(join_error),
            Err(_) => {
                task.abort();
                Invocation::TimedOut
            }
        };

        let mut result = self.classify(job, invocation, &bundle, logs);
        result.capability = Some(handle.name().to_string());
        result.started_at = started_at;
        result.finished_at = Utc::now();
        result
    }

    fn classify(
        &self,
        job: &Job,
        invocation: Invocation,
        bundle: &CredentialBundle,
        mut logs: Vec<LogLine>,
    ) -> AttemptResult {
        let mask = |text: &str| self.credentials.mask_secrets(text, bundle);
        let execution = |message: String| CampaignError::Execution {
            url: job.destination.url.clone(),
            category: job.destination.category.clone(),
            message,
        };

        let error = match invocation {
            Invocation::Completed(Ok(published)) => {
                logs.extend(
                    published
                        .logs
                        .iter()
                        .map(|line| LogLine::new(Severity::Info, mask(line.as_str()))),
                );

                if published.success {
                    let message = match &published.artifact_url {
                        Some(artifact) => format!("published: {}", artifact),
                        None => "published".to_string(),
                    };
                    info!(artifact = ?published.artifact_url, "publish succeeded");
                    self.emit(job, Severity::Success, &message);
                    logs.push(LogLine::new(Severity::Success, message));
                    return AttemptResult::success(published.artifact_url, logs);
                }

                let reason = published
                    .error
                    .as_deref()
                    .unwrap_or("capability reported failure");
                execution(mask(reason))
            }
            Invocation::Completed(Err(e)) => execution(mask(format!("{:#}", e).as_str())),
            Invocation::Crashed(join_error) => {
                let detail = if join_error.is_panic() {
                    panic_message(join_error.into_panic())
                } else {
                    "task cancelled".to_string()
                };
                execution(mask(format!("capability crashed: {}", detail).as_str()))
            }
            Invocation::TimedOut => CampaignError::Timeout {
                url: job.destination.url.clone(),
                category: job.destination.category.clone(),
                timeout: self.timeout,
            },
        };

        self.fail(job, error, logs)
    }

    /// Record `error` as a failed attempt
    fn fail(&self, job: &Job, error: CampaignError, mut logs: Vec<LogLine>) -> AttemptResult {
        let kind = error.kind().unwrap_or(ErrorKind::Execution);
        let message = error.to_string();

        warn!(kind = kind.as_str(), code = error.code(), error = %message, "publish failed");
        self.emit(job, Severity::Error, &message);
        logs.push(LogLine::new(Severity::Error, message.clone()));
        AttemptResult::failure(kind, message, logs)
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}
