//! Core traits for destination capabilities
//!
//! A capability knows how to authenticate against and submit content to one
//! destination type (a forum engine, a blog CMS, a social network). The
//! orchestrator only sees this interface.

use crate::core::campaign::{Content, Destination};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ============================================================================
// Publishing
// ============================================================================

/// Result reported by a capability for one publish call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Free-form progress lines the capability wants kept in the campaign log
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
}

impl PublishResult {
    pub fn published(artifact_url: impl Into<String>) -> Self {
        Self {
            success: true,
            artifact_url: Some(artifact_url.into()),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_log(mut self, line: impl Into<String>) -> Self {
        self.logs.push(line.into());
        self
    }
}

// ============================================================================
// Capability Trait
// ============================================================================

/// Interface every destination-type implementation exposes to the core
///
/// Expected failures (rejected credentials, unreachable site) should come back
/// as `Ok(PublishResult { success: false, .. })`. Errors and panics are still
/// caught by the worker executor and recorded as failed attempts.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Capability name (e.g., "webhook", "discourse")
    fn name(&self) -> &str;

    /// Credential keys that must be present before a job is dispatched
    fn required_credentials(&self) -> Vec<String> {
        Vec::new()
    }

    /// Submit `content` to `destination`
    async fn publish(
        &self,
        destination: &Destination,
        content: &Content,
    ) -> anyhow::Result<PublishResult>;
}
