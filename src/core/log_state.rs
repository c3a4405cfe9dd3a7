//! Campaign log state
//!
//! The merged, versioned record of every attempt made for a campaign. It is
//! also the shape handed to persistence collaborators when a campaign
//! completes. Mutation goes through `orchestration::aggregator` only.

use crate::core::campaign::{DestinationKey, SkippedDestination};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Severity of a log line or relay event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// Terminal outcome of one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

/// Failure classification recorded on an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "ResolutionError")]
    Resolution,
    #[serde(rename = "ExecutionError")]
    Execution,
    #[serde(rename = "Timeout")]
    Timeout,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Resolution => "ResolutionError",
            ErrorKind::Execution => "ExecutionError",
            ErrorKind::Timeout => "Timeout",
        }
    }
}

/// One structured log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default)]
    pub is_retry: bool,
    #[serde(default)]
    pub attempt_number: u32,
}

impl LogLine {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            severity,
            message: message.into(),
            destination: None,
            is_retry: false,
            attempt_number: 0,
        }
    }

    pub fn for_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }
}

/// Result of executing a job once, before it is numbered by the aggregator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptResult {
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
    pub logs: Vec<LogLine>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl AttemptResult {
    pub fn success(artifact_url: Option<String>, logs: Vec<LogLine>) -> Self {
        let now = Utc::now();
        Self {
            outcome: Outcome::Success,
            error_kind: None,
            error: None,
            artifact_url,
            capability: None,
            logs,
            started_at: now,
            finished_at: now,
        }
    }

    pub fn failure(kind: ErrorKind, error: impl Into<String>, logs: Vec<LogLine>) -> Self {
        let now = Utc::now();
        Self {
            outcome: Outcome::Failure,
            error_kind: Some(kind),
            error: Some(error.into()),
            artifact_url: None,
            capability: None,
            logs,
            started_at: now,
            finished_at: now,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

/// One numbered, append-only attempt record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    pub attempt_number: u32,
    pub is_retry: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub result: AttemptResult,
}

/// Latest result per destination key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationResult {
    pub final_result: Outcome,
    pub total_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

/// Per-category log lines
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryLogs {
    pub logs: Vec<LogLine>,
}

/// Merged log state of one campaign
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignLogState {
    pub campaign_id: String,
    pub user_id: String,
    pub logs: BTreeMap<String, CategoryLogs>,
    pub attempts: BTreeMap<DestinationKey, Vec<Attempt>>,
    pub results: BTreeMap<DestinationKey, DestinationResult>,
    pub success_count: usize,
    pub total_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedDestination>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl CampaignLogState {
    pub fn new(campaign_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            campaign_id: campaign_id.into(),
            user_id: user_id.into(),
            logs: BTreeMap::new(),
            attempts: BTreeMap::new(),
            results: BTreeMap::new(),
            success_count: 0,
            total_count: 0,
            skipped: Vec::new(),
            created_at: now,
            last_updated: now,
        }
    }

    /// Number of attempts recorded so far for `key`
    pub fn attempt_count(&self, key: &DestinationKey) -> usize {
        self.attempts.get(key).map(Vec::len).unwrap_or(0)
    }

    /// Append a new attempt for `key` and refresh the derived fields
    ///
    /// Returns the attempt number assigned (1-based).
    pub fn record_attempt(&mut self, key: &DestinationKey, mut result: AttemptResult) -> u32 {
        let attempt_number = self.attempt_count(key) as u32 + 1;
        let is_retry = attempt_number > 1;
        let now = Utc::now();

        for line in result.logs.iter_mut() {
            line.is_retry = is_retry;
            line.attempt_number = attempt_number;
            if line.destination.is_none() {
                line.destination = Some(key.url().to_string());
            }
        }

        self.logs
            .entry(key.category().to_string())
            .or_default()
            .logs
            .extend(result.logs.iter().cloned());

        self.results.insert(
            key.clone(),
            DestinationResult {
                final_result: result.outcome,
                total_attempts: attempt_number,
                artifact_url: result.artifact_url.clone(),
                error_kind: result.error_kind,
            },
        );

        self.attempts.entry(key.clone()).or_default().push(Attempt {
            attempt_number,
            is_retry,
            timestamp: now,
            result,
        });

        self.recompute_totals();
        self.last_updated = now;
        attempt_number
    }

    /// Record a destination that was excluded from the job set
    pub fn record_skipped(&mut self, skipped: SkippedDestination) {
        let mut line = LogLine::new(
            Severity::Warning,
            format!("skipped: {}", skipped.reason.as_str()),
        )
        .for_destination(skipped.destination_key.url());
        if let Some(detail) = &skipped.detail {
            line.message = format!("{} ({})", line.message, detail);
        }
        self.logs
            .entry(skipped.destination_key.category().to_string())
            .or_default()
            .logs
            .push(line);
        self.skipped.push(skipped);
        self.last_updated = Utc::now();
    }

    /// Recompute the aggregate counters from `results`
    pub fn recompute_totals(&mut self) {
        self.success_count = self
            .results
            .values()
            .filter(|r| r.final_result.is_success())
            .count();
        self.total_count = self.results.len();
    }

    /// Whether the counters agree with `results`
    pub fn totals_consistent(&self) -> bool {
        let success = self
            .results
            .values()
            .filter(|r| r.final_result.is_success())
            .count();
        self.success_count == success && self.total_count == self.results.len()
    }
}
