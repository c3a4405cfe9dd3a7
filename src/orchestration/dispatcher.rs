//! Queue Dispatcher - Campaign intake and bounded-concurrency job dispatch
//!
//! Features:
//! - Synchronous validation and acknowledgment, asynchronous processing
//! - Eligibility filtering (category, verification, credentials)
//! - Randomized job order
//! - Global concurrency limit shared by every campaign
//! - Automatic retries per `RetryPolicy` and operator-forced retries
//! - Completion notification to sinks, relay and waiters

use crate::core::campaign::{
    Campaign, CampaignRequest, Destination, DestinationKey, Job, SkipReason, SkippedDestination,
    SubmissionReceipt,
};
use crate::core::config::{DEFAULT_JOB_TIMEOUT_SECS, DEFAULT_MAX_CONCURRENCY, OrchestratorConfig};
use crate::core::error::CampaignError;
use crate::core::log_state::{AttemptResult, CampaignLogState, ErrorKind, Severity};
use crate::core::retry::RetryPolicy;
use crate::orchestration::aggregator::{InMemoryLogStore, LogAggregator, LogStateStore};
use crate::orchestration::completion::CompletionSink;
use crate::orchestration::executor::WorkerExecutor;
use crate::orchestration::relay::{LogEvent, LogRelay, LogSubscription};
use crate::plugins::registry::CapabilityRegistry;
use crate::security::CredentialManager;
use crate::validation::SubmissionValidator;
use chrono::Utc;
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Semaphore, watch};
use tracing::{debug, error, info, warn};

/// Dispatcher options
#[derive(Debug, Clone)]
pub struct DispatcherOptions {
    /// Jobs executing at once across all campaigns
    pub max_concurrency: usize,

    /// Budget for one capability invocation
    pub job_timeout: Duration,

    /// Automatic retry policy
    pub retry_policy: RetryPolicy,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            job_timeout: Duration::from_secs(DEFAULT_JOB_TIMEOUT_SECS),
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl From<&OrchestratorConfig> for DispatcherOptions {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            max_concurrency: config.max_concurrency(),
            job_timeout: config.job_timeout(),
            retry_policy: config.retry_policy(),
        }
    }
}

/// Dispatcher-side bookkeeping for one campaign
struct CampaignEntry {
    campaign: Arc<Campaign>,
    /// Keys that became jobs (skipped destinations are excluded)
    jobs: HashSet<DestinationKey>,
    /// Keys with an attempt scheduled, running, or waiting for backoff
    in_flight: HashSet<DestinationKey>,
    /// Bumped by every accepted forced retry
    round: u64,
    completion: watch::Sender<Option<CampaignLogState>>,
}

impl CampaignEntry {
    /// Whether `round` is still the latest round and all of its jobs finished
    fn round_finished(&self, round: u64) -> bool {
        self.round == round && self.in_flight.is_empty()
    }
}

struct Shared {
    registry: Arc<CapabilityRegistry>,
    relay: Arc<LogRelay>,
    credentials: Arc<CredentialManager>,
    executor: WorkerExecutor,
    aggregator: LogAggregator,
    semaphore: Arc<Semaphore>,
    retry_policy: RetryPolicy,
    sinks: Vec<Arc<dyn CompletionSink>>,
    campaigns: Mutex<HashMap<String, CampaignEntry>>,
}

/// Accepts campaigns and drives their jobs to completion
///
/// Cloning is cheap; clones share queues, limits and campaign state.
#[derive(Clone)]
pub struct QueueDispatcher {
    shared: Arc<Shared>,
}

/// Builder for [`QueueDispatcher`]
pub struct DispatcherBuilder {
    registry: Arc<CapabilityRegistry>,
    options: DispatcherOptions,
    relay: Option<Arc<LogRelay>>,
    store: Option<Arc<dyn LogStateStore>>,
    credentials: Option<Arc<CredentialManager>>,
    sinks: Vec<Arc<dyn CompletionSink>>,
}

impl DispatcherBuilder {
    pub fn options(mut self, options: DispatcherOptions) -> Self {
        self.options = options;
        self
    }

    pub fn relay(mut self, relay: Arc<LogRelay>) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn store(mut self, store: Arc<dyn LogStateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn credentials(mut self, credentials: CredentialManager) -> Self {
        self.credentials = Some(Arc::new(credentials));
        self
    }

    pub fn sink(mut self, sink: Arc<dyn CompletionSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn build(self) -> QueueDispatcher {
        let relay = self.relay.unwrap_or_default();
        let credentials = self.credentials.unwrap_or_default();
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryLogStore::new()) as Arc<dyn LogStateStore>);

        let executor = WorkerExecutor::new(
            Arc::clone(&self.registry),
            Arc::clone(&relay),
            Arc::clone(&credentials),
            self.options.job_timeout,
        );

        QueueDispatcher {
            shared: Arc::new(Shared {
                registry: self.registry,
                relay,
                credentials,
                executor,
                aggregator: LogAggregator::new(store),
                semaphore: Arc::new(Semaphore::new(self.options.max_concurrency.max(1))),
                retry_policy: self.options.retry_policy,
                sinks: self.sinks,
                campaigns: Mutex::new(HashMap::new()),
            }),
        }
    }
}

impl QueueDispatcher {
    pub fn builder(registry: Arc<CapabilityRegistry>) -> DispatcherBuilder {
        DispatcherBuilder {
            registry,
            options: DispatcherOptions::default(),
            relay: None,
            store: None,
            credentials: None,
            sinks: Vec::new(),
        }
    }

    pub fn relay(&self) -> Arc<LogRelay> {
        Arc::clone(&self.shared.relay)
    }

    /// Subscribe to the live events of a campaign
    pub fn subscribe(&self, campaign_id: &str) -> LogSubscription {
        self.shared.relay.subscribe(campaign_id)
    }

    /// Permits currently free in the global limit
    pub fn available_permits(&self) -> usize {
        self.shared.semaphore.available_permits()
    }

    /// Validate, expand and enqueue a campaign
    ///
    /// Only validation problems are returned; everything that happens to the
    /// jobs afterwards is recorded in the campaign log.
    pub async fn submit(
        &self,
        request: CampaignRequest,
    ) -> Result<SubmissionReceipt, CampaignError> {
        let validation = SubmissionValidator::new().validate(&request);
        for warning in &validation.warnings {
            warn!(field = %warning.field, "{}", warning.message);
        }
        if let Some(error) = validation.to_error() {
            return Err(error);
        }

        let content = request
            .content
            .clone()
            .ok_or_else(|| CampaignError::validation("content", "content is required"))?;
        let campaign_id = request
            .campaign_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        if self.shared.lock_campaigns()?.contains_key(&campaign_id) {
            return Err(CampaignError::validation(
                "campaignId",
                format!("campaign {} already exists", campaign_id),
            ));
        }

        let destinations = SubmissionValidator::dedupe(&request.destinations);
        let (mut eligible, skipped) = self.shared.expand(&request, &destinations);

        if let Some(minimum) = &request.minimum_include {
            let keys: Vec<_> = eligible.iter().map(Destination::key).collect();
            SubmissionValidator::check_minimum_include(minimum, &keys)?;
        }

        self.shared
            .aggregator
            .open(&campaign_id, &request.user_id, &skipped)
            .await?;

        eligible.shuffle(&mut rand::rng());

        let campaign = Arc::new(Campaign {
            id: campaign_id.clone(),
            user_id: request.user_id.clone(),
            destinations,
            content,
            created_at: Utc::now(),
        });
        let content = Arc::new(campaign.content.clone());
        let keys: HashSet<_> = eligible.iter().map(Destination::key).collect();
        let (completion, _) = watch::channel(None);

        self.shared.lock_campaigns()?.insert(
            campaign_id.clone(),
            CampaignEntry {
                campaign: Arc::clone(&campaign),
                jobs: keys.clone(),
                in_flight: keys,
                round: 0,
                completion,
            },
        );

        info!(
            campaign_id = %campaign_id,
            jobs = eligible.len(),
            skipped = skipped.len(),
            "campaign accepted"
        );

        let job_count = eligible.len();
        if eligible.is_empty() {
            let shared = Arc::clone(&self.shared);
            let id = campaign_id.clone();
            tokio::spawn(async move { shared.complete(&id, 0).await });
        }
        for destination in eligible {
            let job = Job::new(&campaign_id, destination, Arc::clone(&content));
            tokio::spawn(Arc::clone(&self.shared).run_job(job));
        }

        Ok(SubmissionReceipt {
            accepted: true,
            campaign_id,
            job_count,
            skipped,
        })
    }

    /// Re-dispatch the given destinations of a known campaign
    ///
    /// The campaign reopens and completes again when the retried jobs finish.
    /// Returns the number of jobs dispatched.
    pub async fn retry(
        &self,
        campaign_id: &str,
        keys: Vec<DestinationKey>,
    ) -> Result<usize, CampaignError> {
        let mut unique = Vec::new();
        for key in keys {
            if !unique.contains(&key) {
                unique.push(key);
            }
        }

        let jobs = {
            let mut campaigns = self.shared.lock_campaigns()?;
            let entry = campaigns
                .get_mut(campaign_id)
                .ok_or_else(|| CampaignError::UnknownCampaign(campaign_id.to_string()))?;

            let mut destinations = Vec::new();
            for key in &unique {
                let destination = entry.campaign.destination(key).ok_or_else(|| {
                    CampaignError::RetryRejected {
                        destination: key.to_string(),
                        reason: "not a destination of this campaign".to_string(),
                    }
                })?;
                if !entry.jobs.contains(key) {
                    return Err(CampaignError::RetryRejected {
                        destination: key.to_string(),
                        reason: "destination was skipped at submission".to_string(),
                    });
                }
                if entry.in_flight.contains(key) {
                    return Err(CampaignError::RetryRejected {
                        destination: key.to_string(),
                        reason: "an attempt is still in flight".to_string(),
                    });
                }
                destinations.push(destination.clone());
            }

            entry.in_flight.extend(unique.iter().cloned());
            if !destinations.is_empty() {
                entry.round += 1;
                entry.completion.send_replace(None);
            }

            let content = Arc::new(entry.campaign.content.clone());
            destinations
                .into_iter()
                .map(|d| Job::new(campaign_id, d, Arc::clone(&content)))
                .collect::<Vec<_>>()
        };

        info!(campaign_id, jobs = jobs.len(), "forced retry");
        let count = jobs.len();
        for job in jobs {
            tokio::spawn(Arc::clone(&self.shared).run_job(job));
        }
        Ok(count)
    }

    /// Wait until the campaign's current round of jobs has completed
    pub async fn wait_for_completion(
        &self,
        campaign_id: &str,
    ) -> Result<CampaignLogState, CampaignError> {
        let mut receiver = {
            let campaigns = self.shared.lock_campaigns()?;
            campaigns
                .get(campaign_id)
                .ok_or_else(|| CampaignError::UnknownCampaign(campaign_id.to_string()))?
                .completion
                .subscribe()
        };

        let state = receiver
            .wait_for(Option::is_some)
            .await
            .map_err(|_| CampaignError::Store("completion channel closed".to_string()))?;
        state
            .clone()
            .ok_or_else(|| CampaignError::Store("completion state missing".to_string()))
    }

    /// Current log state of a campaign
    pub async fn status(&self, campaign_id: &str) -> Result<CampaignLogState, CampaignError> {
        self.shared
            .aggregator
            .snapshot(campaign_id)
            .await?
            .ok_or_else(|| CampaignError::UnknownCampaign(campaign_id.to_string()))
    }

    /// Whether every job of the campaign has reached a terminal state
    pub fn is_complete(&self, campaign_id: &str) -> Result<bool, CampaignError> {
        let campaigns = self.shared.lock_campaigns()?;
        campaigns
            .get(campaign_id)
            .map(|entry| entry.in_flight.is_empty())
            .ok_or_else(|| CampaignError::UnknownCampaign(campaign_id.to_string()))
    }
}

impl Shared {
    fn lock_campaigns(
        &self,
    ) -> Result<MutexGuard<'_, HashMap<String, CampaignEntry>>, CampaignError> {
        self.campaigns
            .lock()
            .map_err(|_| CampaignError::Store("campaign table lock poisoned".to_string()))
    }

    /// Split destinations into the job set and the skipped list
    fn expand(
        &self,
        request: &CampaignRequest,
        destinations: &[Destination],
    ) -> (Vec<Destination>, Vec<SkippedDestination>) {
        let mut eligible = Vec::new();
        let mut skipped = Vec::new();

        for destination in destinations {
            let skip = |reason, detail: Option<String>| SkippedDestination {
                destination_key: destination.key(),
                reason,
                detail,
            };

            if let Some(category) = &request.category
                && &destination.category != category
            {
                skipped.push(skip(
                    SkipReason::CategoryMismatch,
                    Some(format!("campaign category is {}", category)),
                ));
                continue;
            }

            if !destination.verified {
                skipped.push(skip(SkipReason::Unverified, None));
                continue;
            }

            // No capability is not a skip; the job fails with ResolutionError
            if let Ok(handle) = self.registry.resolve(destination) {
                let bundle = self.credentials.resolve(destination);
                let missing = self
                    .credentials
                    .missing(&bundle, &handle.required_credentials());
                if !missing.is_empty() {
                    skipped.push(skip(
                        SkipReason::MissingCredentials,
                        Some(missing.join(", ")),
                    ));
                    continue;
                }
            }

            eligible.push(destination.clone());
        }

        for entry in &skipped {
            debug!(
                key = %entry.destination_key,
                reason = entry.reason.as_str(),
                "destination skipped"
            );
        }

        (eligible, skipped)
    }

    /// Run attempts for one job until it succeeds or the policy gives up
    async fn run_job(self: Arc<Self>, job: Job) {
        let key = job.key();
        let mut round_attempts = 0u32;

        loop {
            let result = match Arc::clone(&self.semaphore).acquire_owned().await {
                Ok(_permit) => self.executor.execute(&job).await,
                Err(_) => AttemptResult::failure(
                    ErrorKind::Execution,
                    "dispatcher queue closed",
                    Vec::new(),
                ),
            };
            round_attempts += 1;

            let kind = result.error_kind;
            let succeeded = result.is_success();

            if let Err(e) = self.aggregator.merge(&job.campaign_id, &key, result).await {
                error!(
                    campaign_id = %job.campaign_id,
                    key = %key,
                    error = %e,
                    "failed to record attempt"
                );
                break;
            }

            if succeeded || !self.retry_policy.should_retry(kind, round_attempts) {
                break;
            }

            let delay = self.retry_policy.delay_for(round_attempts);
            let message = format!(
                "retrying {} in {}ms (attempt {} of {})",
                key.url(),
                delay.as_millis(),
                round_attempts + 1,
                self.retry_policy.max_attempts
            );
            info!(campaign_id = %job.campaign_id, key = %key, "{}", message);
            self.relay.publish(
                &job.campaign_id,
                LogEvent::new(&job.campaign_id, Severity::Warning, message)
                    .for_destination(key.url()),
            );
            tokio::time::sleep(delay).await;
        }

        self.finish_job(&job.campaign_id, &key).await;
    }

    async fn finish_job(&self, campaign_id: &str, key: &DestinationKey) {
        let finished_round = match self.lock_campaigns() {
            Ok(mut campaigns) => match campaigns.get_mut(campaign_id) {
                Some(entry) => {
                    entry.in_flight.remove(key);
                    entry.in_flight.is_empty().then_some(entry.round)
                }
                None => None,
            },
            Err(e) => {
                error!(campaign_id, error = %e, "cannot update campaign table");
                None
            }
        };

        if let Some(round) = finished_round {
            self.complete(campaign_id, round).await;
        }
    }

    /// Whether `round` of the campaign is still the one to report
    fn is_current_round(&self, campaign_id: &str, round: u64) -> bool {
        self.lock_campaigns()
            .map(|campaigns| {
                campaigns
                    .get(campaign_id)
                    .is_some_and(|entry| entry.round_finished(round))
            })
            .unwrap_or(false)
    }

    /// Notify sinks, relay and waiters that a round of the campaign completed
    ///
    /// A round overtaken by a forced retry is not reported; the retry round
    /// reports the newer state when it finishes.
    async fn complete(&self, campaign_id: &str, round: u64) {
        if !self.is_current_round(campaign_id, round) {
            debug!(campaign_id, round, "stale round, completion skipped");
            return;
        }

        let state = match self.aggregator.snapshot(campaign_id).await {
            Ok(Some(state)) => state,
            Ok(None) => {
                error!(campaign_id, "completed campaign has no log state");
                return;
            }
            Err(e) => {
                error!(campaign_id, error = %e, "cannot read final log state");
                return;
            }
        };

        for sink in &self.sinks {
            if let Err(e) = sink.on_complete(&state).await {
                warn!(campaign_id, sink = sink.name(), error = %e, "completion sink failed");
            }
        }

        // Relay close and the watch update happen under the table lock so a
        // retry accepted meanwhile cannot be overwritten by this round.
        let campaigns = match self.lock_campaigns() {
            Ok(campaigns) => campaigns,
            Err(e) => {
                error!(campaign_id, error = %e, "cannot publish completion");
                return;
            }
        };
        let Some(entry) = campaigns.get(campaign_id) else {
            return;
        };
        if !entry.round_finished(round) {
            debug!(campaign_id, round, "round overtaken by a retry during completion");
            return;
        }

        info!(
            campaign_id,
            success = state.success_count,
            total = state.total_count,
            "campaign complete"
        );
        let severity = if state.total_count > 0 && state.success_count == state.total_count {
            Severity::Success
        } else {
            Severity::Warning
        };
        self.relay.publish(
            campaign_id,
            LogEvent::new(
                campaign_id,
                severity,
                format!(
                    "campaign complete: {}/{} published",
                    state.success_count, state.total_count
                ),
            ),
        );
        self.relay.close(campaign_id);
        entry.completion.send_replace(Some(state));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::campaign::{Content, CredentialBundle};
    use crate::core::log_state::Outcome;
    use crate::core::traits::{Capability, PublishResult};
    use crate::plugins::{DryRunCapability, WebhookCapability};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails the first `failures` calls, then succeeds
    struct Flaky {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Capability for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn publish(
            &self,
            destination: &Destination,
            _: &Content,
        ) -> anyhow::Result<PublishResult> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                Ok(PublishResult::failed("service unavailable"))
            } else {
                Ok(PublishResult::published(format!("{}/posted", destination.url)))
            }
        }
    }

    /// Tracks how many publishes run at once
    struct Gauge {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Capability for Gauge {
        fn name(&self) -> &str {
            "gauge"
        }

        async fn publish(&self, _: &Destination, _: &Content) -> anyhow::Result<PublishResult> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(PublishResult::published("https://gauge.example/ok"))
        }
    }

    fn content() -> Content {
        Content {
            title: "Launch".to_string(),
            body: "We shipped v2".to_string(),
            ..Default::default()
        }
    }

    fn flaky(failures: usize) -> Arc<Flaky> {
        Arc::new(Flaky {
            failures,
            calls: AtomicUsize::new(0),
        })
    }

    fn dispatcher(registry: CapabilityRegistry, options: DispatcherOptions) -> QueueDispatcher {
        QueueDispatcher::builder(Arc::new(registry))
            .options(options)
            .credentials(CredentialManager::with_env(HashMap::new(), HashMap::new()))
            .build()
    }

    fn fast_retries(max_attempts: u32) -> DispatcherOptions {
        DispatcherOptions {
            retry_policy: RetryPolicy {
                max_attempts,
                initial_delay_ms: 1,
                max_delay_ms: 5,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_forced_retry_scenario() {
        let registry = CapabilityRegistry::builder()
            .category("blog", Arc::new(DryRunCapability::new()))
            .category("forum", flaky(1))
            .category("social", Arc::new(DryRunCapability::new()))
            .build();
        let dispatcher = dispatcher(registry, DispatcherOptions::default());

        let a = Destination::new("https://a.example", "blog");
        let b = Destination::new("https://b.example", "forum");
        let c = Destination::new("https://c.example", "social");
        let key_b = b.key();

        let receipt = dispatcher
            .submit(CampaignRequest::new("u1", content(), vec![a, b, c]))
            .await
            .unwrap();
        assert!(receipt.accepted);
        assert_eq!(receipt.job_count, 3);

        let first = dispatcher.wait_for_completion(&receipt.campaign_id).await.unwrap();
        assert_eq!(first.success_count, 2);
        assert_eq!(first.results[&key_b].final_result, Outcome::Failure);

        let dispatched = dispatcher
            .retry(&receipt.campaign_id, vec![key_b.clone()])
            .await
            .unwrap();
        assert_eq!(dispatched, 1);

        let state = dispatcher.wait_for_completion(&receipt.campaign_id).await.unwrap();
        assert_eq!(state.results[&key_b].final_result, Outcome::Success);
        assert_eq!(state.attempts[&key_b].len(), 2);
        assert!(state.attempts[&key_b][1].is_retry);
        assert_eq!(state.attempts[&key_b][1].attempt_number, 2);
        assert_eq!(state.success_count, 3);
        assert_eq!(state.total_count, 3);
        assert!(state.totals_consistent());
    }

    /// Completion sink that takes a while to persist
    struct SlowSink {
        delay: Duration,
        seen: Mutex<Vec<CampaignLogState>>,
    }

    #[async_trait]
    impl CompletionSink for SlowSink {
        fn name(&self) -> &str {
            "slow"
        }

        async fn on_complete(&self, state: &CampaignLogState) -> anyhow::Result<()> {
            tokio::time::sleep(self.delay).await;
            self.seen.lock().unwrap().push(state.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_retry_during_slow_completion_reports_retry_round() {
        let sink = Arc::new(SlowSink {
            delay: Duration::from_millis(200),
            seen: Mutex::new(Vec::new()),
        });
        let registry = CapabilityRegistry::builder()
            .category("blog", Arc::new(DryRunCapability::new()))
            .category("forum", flaky(1))
            .build();
        let dispatcher = QueueDispatcher::builder(Arc::new(registry))
            .credentials(CredentialManager::with_env(HashMap::new(), HashMap::new()))
            .sink(sink.clone())
            .build();

        let b = Destination::new("https://b.example", "forum");
        let mut request = CampaignRequest::new(
            "u1",
            content(),
            vec![Destination::new("https://a.example", "blog"), b.clone()],
        );
        request.campaign_id = Some("slow-sink".to_string());
        dispatcher.submit(request).await.unwrap();

        // The first round has finished its jobs but is still inside the sink
        while !dispatcher.is_complete("slow-sink").unwrap() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(dispatcher.retry("slow-sink", vec![b.key()]).await.unwrap(), 1);

        let state = dispatcher.wait_for_completion("slow-sink").await.unwrap();
        assert_eq!(state.attempts[&b.key()].len(), 2);
        assert_eq!(state.results[&b.key()].final_result, Outcome::Success);
        assert_eq!(state.success_count, 2);

        // The overtaken round must not replace the retry round's state
        tokio::time::sleep(Duration::from_millis(300)).await;
        let again = dispatcher.wait_for_completion("slow-sink").await.unwrap();
        assert_eq!(again.results[&b.key()].final_result, Outcome::Success);
        assert!(sink.seen.lock().unwrap().iter().any(|s| s.success_count == 2));
    }

    #[tokio::test]
    async fn test_retry_round_streams_until_it_completes() {
        let registry = CapabilityRegistry::builder()
            .category("forum", flaky(1))
            .build();
        let dispatcher = dispatcher(registry, DispatcherOptions::default());
        let b = Destination::new("https://b.example", "forum");
        let mut request = CampaignRequest::new("u1", content(), vec![b.clone()]);
        request.campaign_id = Some("streamed".to_string());
        dispatcher.submit(request).await.unwrap();
        dispatcher.wait_for_completion("streamed").await.unwrap();

        let mut events = dispatcher.subscribe("streamed");
        dispatcher.retry("streamed", vec![b.key()]).await.unwrap();

        let mut last = None;
        while let Some(event) = events.recv().await {
            last = Some(event.message);
        }
        assert_eq!(last.as_deref(), Some("campaign complete: 1/1 published"));
    }

    #[tokio::test]
    async fn test_missing_capability_fails_only_that_destination() {
        let registry = CapabilityRegistry::builder()
            .category("blog", Arc::new(DryRunCapability::new()))
            .build();
        let dispatcher = dispatcher(registry, fast_retries(3));

        let orphan = Destination::new("https://wiki.example", "wiki");
        let receipt = dispatcher
            .submit(CampaignRequest::new(
                "u1",
                content(),
                vec![
                    Destination::new("https://a.example", "blog"),
                    orphan.clone(),
                    Destination::new("https://b.example", "blog"),
                ],
            ))
            .await
            .unwrap();

        let state = dispatcher.wait_for_completion(&receipt.campaign_id).await.unwrap();
        let failed = &state.attempts[&orphan.key()];
        assert_eq!(failed.len(), 1, "resolution failures are never retried");
        assert_eq!(failed[0].result.error_kind, Some(ErrorKind::Resolution));
        assert_eq!(state.success_count, 2);
        assert_eq!(state.total_count, 3);
        for (key, attempts) in &state.attempts {
            if key != &orphan.key() {
                assert!(attempts[0].result.is_success());
            }
        }
    }

    #[tokio::test]
    async fn test_automatic_retry() {
        let capability = flaky(2);
        let registry = CapabilityRegistry::builder()
            .category("forum", capability.clone())
            .build();
        let dispatcher = dispatcher(registry, fast_retries(3));
        let destination = Destination::new("https://forum.example", "forum");

        let receipt = dispatcher
            .submit(CampaignRequest::new("u1", content(), vec![destination.clone()]))
            .await
            .unwrap();
        let state = dispatcher.wait_for_completion(&receipt.campaign_id).await.unwrap();

        let attempts = &state.attempts[&destination.key()];
        assert_eq!(attempts.len(), 3);
        assert_eq!(
            attempts.iter().map(|a| a.attempt_number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(state.results[&destination.key()].final_result, Outcome::Success);
        assert_eq!(capability.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_limit_is_global() {
        let gauge = Arc::new(Gauge {
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let registry = CapabilityRegistry::builder()
            .category("blog", gauge.clone())
            .build();
        let dispatcher = dispatcher(
            registry,
            DispatcherOptions {
                max_concurrency: 2,
                ..Default::default()
            },
        );

        let mut ids = Vec::new();
        for campaign in 0..3 {
            let destinations = (0..4)
                .map(|n| {
                    Destination::new(format!("https://site{}-{}.example", campaign, n), "blog")
                })
                .collect();
            let receipt = dispatcher
                .submit(CampaignRequest::new("u1", content(), destinations))
                .await
                .unwrap();
            ids.push(receipt.campaign_id);
        }
        for id in &ids {
            let state = dispatcher.wait_for_completion(id).await.unwrap();
            assert_eq!(state.success_count, 4);
        }

        assert!(gauge.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(dispatcher.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_skipped_destinations() {
        let registry = CapabilityRegistry::builder()
            .category("blog", Arc::new(WebhookCapability::new("hook")))
            .category("forum", Arc::new(DryRunCapability::new()))
            .build();
        let dispatcher = dispatcher(registry, DispatcherOptions::default());

        let mut unverified = Destination::new("https://b.example", "blog");
        unverified.verified = false;
        let mut request = CampaignRequest::new(
            "u1",
            content(),
            vec![
                Destination::new("https://a.example", "blog"),
                unverified,
                Destination::new("https://c.example", "forum"),
            ],
        );
        request.category = Some("blog".to_string());

        let receipt = dispatcher.submit(request).await.unwrap();
        assert_eq!(receipt.job_count, 0);
        let reasons: Vec<_> = receipt.skipped.iter().map(|s| s.reason).collect();
        assert_eq!(
            reasons,
            vec![
                SkipReason::MissingCredentials,
                SkipReason::Unverified,
                SkipReason::CategoryMismatch
            ]
        );
        assert_eq!(receipt.skipped[0].detail.as_deref(), Some("token"));

        let state = dispatcher.wait_for_completion(&receipt.campaign_id).await.unwrap();
        assert_eq!(state.total_count, 0);
        assert_eq!(state.skipped.len(), 3);
        assert!(state.attempts.is_empty());
    }

    #[tokio::test]
    async fn test_credentials_present_make_destination_eligible() {
        let registry = CapabilityRegistry::builder()
            .category("blog", Arc::new(WebhookCapability::new("hook")))
            .build();
        let dispatcher = dispatcher(registry, DispatcherOptions::default());
        let destination = Destination::new("http://127.0.0.1:9/hook", "blog")
            .with_credentials(CredentialBundle::from_pairs([("token", "t0k3n-value-xyz")]));

        let receipt = dispatcher
            .submit(CampaignRequest::new("u1", content(), vec![destination]))
            .await
            .unwrap();

        assert_eq!(receipt.job_count, 1);
        assert!(receipt.skipped.is_empty());
    }

    #[tokio::test]
    async fn test_validation_rejections() {
        let registry = CapabilityRegistry::builder()
            .category("forum", Arc::new(DryRunCapability::new()))
            .build();
        let dispatcher = dispatcher(registry, DispatcherOptions::default());

        let empty = dispatcher
            .submit(CampaignRequest::new("u1", content(), vec![]))
            .await;
        assert!(matches!(empty, Err(CampaignError::Validation { .. })));

        let mut request = CampaignRequest::new(
            "u1",
            content(),
            vec![Destination::new("https://a.example", "forum")],
        );
        request.campaign_id = Some("needs-two".to_string());
        request.minimum_include = Some(HashMap::from([("forum".to_string(), 2)]));
        let short = dispatcher.submit(request).await;
        assert!(matches!(short, Err(CampaignError::Validation { .. })));
        assert!(matches!(
            dispatcher.status("needs-two").await,
            Err(CampaignError::UnknownCampaign(_))
        ));
    }

    #[tokio::test]
    async fn test_pipe_in_category_is_rejected_before_persisting() {
        let registry = CapabilityRegistry::builder()
            .category("news|tech", Arc::new(DryRunCapability::new()))
            .build();
        let dispatcher = dispatcher(registry, DispatcherOptions::default());

        let mut request = CampaignRequest::new(
            "u1",
            content(),
            vec![Destination::new("https://a.example", "news|tech")],
        );
        request.campaign_id = Some("piped".to_string());
        request.minimum_include = Some(HashMap::from([("news|tech".to_string(), 1)]));

        let rejected = dispatcher.submit(request).await;
        assert!(matches!(
            rejected,
            Err(CampaignError::Validation { ref field, .. }) if field == "destinations[0].category"
        ));
        assert!(matches!(
            dispatcher.status("piped").await,
            Err(CampaignError::UnknownCampaign(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_campaign_id_and_keys() {
        let registry = CapabilityRegistry::builder()
            .category("forum", Arc::new(DryRunCapability::new()))
            .build();
        let dispatcher = dispatcher(registry, DispatcherOptions::default());
        let destination = Destination::new("https://a.example", "forum");

        let mut request =
            CampaignRequest::new("u1", content(), vec![destination.clone(), destination.clone()]);
        request.campaign_id = Some("launch".to_string());

        let receipt = dispatcher.submit(request.clone()).await.unwrap();
        assert_eq!(receipt.campaign_id, "launch");
        assert_eq!(receipt.job_count, 1);

        let again = dispatcher.submit(request).await;
        assert!(matches!(again, Err(CampaignError::Validation { .. })));

        let state = dispatcher.wait_for_completion("launch").await.unwrap();
        assert_eq!(state.attempts[&destination.key()].len(), 1);
    }

    #[tokio::test]
    async fn test_retry_rejections() {
        let registry = CapabilityRegistry::builder()
            .category("forum", Arc::new(DryRunCapability::new()))
            .build();
        let dispatcher = dispatcher(registry, DispatcherOptions::default());

        assert!(matches!(
            dispatcher.retry("nope", vec![]).await,
            Err(CampaignError::UnknownCampaign(_))
        ));

        let mut unverified = Destination::new("https://b.example", "forum");
        unverified.verified = false;
        let receipt = dispatcher
            .submit(CampaignRequest::new(
                "u1",
                content(),
                vec![Destination::new("https://a.example", "forum"), unverified.clone()],
            ))
            .await
            .unwrap();
        dispatcher.wait_for_completion(&receipt.campaign_id).await.unwrap();

        let unknown = DestinationKey::new("https://z.example", "forum");
        assert!(matches!(
            dispatcher.retry(&receipt.campaign_id, vec![unknown]).await,
            Err(CampaignError::RetryRejected { .. })
        ));
        assert!(matches!(
            dispatcher.retry(&receipt.campaign_id, vec![unverified.key()]).await,
            Err(CampaignError::RetryRejected { .. })
        ));
    }

    #[tokio::test]
    async fn test_events_and_completion_sink() {
        struct Recorder(Mutex<Vec<CampaignLogState>>);

        #[async_trait]
        impl CompletionSink for Recorder {
            fn name(&self) -> &str {
                "recorder"
            }

            async fn on_complete(&self, state: &CampaignLogState) -> anyhow::Result<()> {
                self.0.lock().unwrap().push(state.clone());
                Ok(())
            }
        }

        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let registry = CapabilityRegistry::builder()
            .category("forum", Arc::new(DryRunCapability::new()))
            .build();
        let dispatcher = QueueDispatcher::builder(Arc::new(registry))
            .sink(recorder.clone())
            .build();

        let mut events = dispatcher.subscribe("observed");
        let mut request = CampaignRequest::new(
            "u1",
            content(),
            vec![Destination::new("https://a.example", "forum")],
        );
        request.campaign_id = Some("observed".to_string());
        dispatcher.submit(request).await.unwrap();

        let mut messages = Vec::new();
        while let Some(event) = events.recv().await {
            assert_eq!(event.campaign_id, "observed");
            messages.push(event.message);
        }

        assert!(messages.first().unwrap().starts_with("publishing to"));
        assert_eq!(messages.last().unwrap(), "campaign complete: 1/1 published");
        dispatcher.wait_for_completion("observed").await.unwrap();
        assert_eq!(recorder.0.lock().unwrap().len(), 1);
        assert!(dispatcher.is_complete("observed").unwrap());
    }
}
