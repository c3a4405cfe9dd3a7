//! Error handling for campaign orchestration
//!
//! Only validation problems reach the submitter. Resolution, execution and
//! timeout failures are folded into attempts, and concurrency conflicts are
//! retried inside the aggregator.

use crate::core::log_state::ErrorKind;
use std::time::Duration;
use thiserror::Error;

/// Main error type for orchestration operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CampaignError {
    // Submission errors
    #[error("invalid submission: {field}: {message}")]
    Validation { field: String, message: String },

    // Attempt-level errors
    #[error("[{category}] no capability registered for {url}")]
    Resolution { url: String, category: String },

    #[error("[{category}] publish to {url} failed: {message}")]
    Execution {
        url: String,
        category: String,
        message: String,
    },

    #[error("[{category}] publish to {url} timed out after {timeout:?}")]
    Timeout {
        url: String,
        category: String,
        timeout: Duration,
    },

    // Internal errors
    #[error(
        "log state for campaign {campaign_id} changed concurrently (expected version {expected})"
    )]
    ConcurrencyConflict { campaign_id: String, expected: u64 },

    #[error("log store error: {0}")]
    Store(String),

    #[error("configuration error: {0}")]
    Config(String),

    // Retry errors
    #[error("unknown campaign: {0}")]
    UnknownCampaign(String),

    #[error("retry rejected for {destination}: {reason}")]
    RetryRejected { destination: String, reason: String },
}

impl CampaignError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Attempt-level classification, if this error is recorded on an attempt
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Resolution { .. } => Some(ErrorKind::Resolution),
            Self::Execution { .. } => Some(ErrorKind::Execution),
            Self::Timeout { .. } => Some(ErrorKind::Timeout),
            _ => None,
        }
    }

    /// Get error code for this error
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Resolution { .. } => "RESOLUTION_ERROR",
            Self::Execution { .. } => "EXECUTION_ERROR",
            Self::Timeout { .. } => "TIMEOUT",
            Self::ConcurrencyConflict { .. } => "CONCURRENCY_CONFLICT",
            Self::Store(_) => "STORE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::UnknownCampaign(_) => "UNKNOWN_CAMPAIGN",
            Self::RetryRejected { .. } => "RETRY_REJECTED",
        }
    }

    /// Get suggested actions for this error
    pub fn suggested_actions(&self) -> Vec<&'static str> {
        match self {
            Self::Validation { .. } => vec![
                "Check that content has a title and body",
                "Provide at least one destination",
            ],
            Self::Resolution { .. } => vec![
                "Register a capability for the destination hostname or category",
                "Check the category spelling in the campaign file",
            ],
            Self::Execution { .. } => vec![
                "Check the destination credentials",
                "Retry the destination once it is reachable",
            ],
            Self::Timeout { .. } => vec![
                "Increase dispatcher.jobTimeoutSecs",
                "Check whether the destination is responding",
            ],
            Self::ConcurrencyConflict { .. } => vec!["Retried automatically; no action needed"],
            Self::Store(_) => vec!["Check the log store backend"],
            Self::Config(_) => vec!["Check .campaign-config.yaml"],
            Self::UnknownCampaign(_) => vec!["Check the campaign id"],
            Self::RetryRejected { .. } => vec![
                "Wait for the running attempt to finish",
                "Check the destination key (category|url)",
            ],
        }
    }
}
