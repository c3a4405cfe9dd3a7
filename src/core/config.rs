//! Configuration structures and types for campaign-publisher
//!
//! This module provides type-safe configuration management with serde support.

use crate::core::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Default global concurrency limit
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Default per-job timeout in seconds
pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 120;

/// Default per-campaign relay buffer
pub const DEFAULT_RELAY_CAPACITY: usize = 256;

/// Root configuration object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrchestratorConfig {
    /// Schema version (required)
    pub version: String,

    /// Extend from base configuration file (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,

    /// Queue dispatcher settings (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatcher: Option<DispatcherConfig>,

    /// Log relay settings (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay: Option<RelayConfig>,

    /// Named capability instances (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<HashMap<String, CapabilityConfig>>,

    /// Static resolution tables (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<RegistryConfig>,

    /// Credential resolution settings (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<CredentialsConfig>,

    /// Output settings (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputConfig>,
}

/// Queue dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DispatcherConfig {
    /// Global concurrency limit across all campaigns (default: 4)
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "maxConcurrency")]
    pub max_concurrency: Option<usize>,

    /// Per-job timeout in seconds (default: 120)
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "jobTimeoutSecs")]
    pub job_timeout_secs: Option<u64>,

    /// Automatic retry policy (default: no automatic retry)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

/// Log relay configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RelayConfig {
    /// Buffered events per campaign topic before slow subscribers lag (default: 256)
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "channelCapacity")]
    pub channel_capacity: Option<usize>,
}

/// Built-in capability types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum CapabilityType {
    Webhook,
    DryRun,
}

/// Named capability instance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapabilityConfig {
    /// Capability type
    #[serde(rename = "type")]
    pub capability_type: CapabilityType,

    /// Fixed endpoint; the destination URL is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Extra request headers (environment variable expansion supported)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,

    /// Credential keys a destination must carry (default for webhook: ["token"])
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "requiredCredentials")]
    pub required_credentials: Option<Vec<String>>,
}

/// Static capability resolution tables
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RegistryConfig {
    /// Hostname -> capability name (checked first)
    #[serde(default)]
    pub domains: HashMap<String, String>,

    /// Category -> capability name
    #[serde(default)]
    pub categories: HashMap<String, String>,
}

/// Credential resolution configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CredentialsConfig {
    /// Category -> environment variable holding a fallback `token`
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "envFallback")]
    pub env_fallback: Option<HashMap<String, String>>,

    /// Environment variable expansion settings
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "envVarExpansion")]
    pub env_var_expansion: Option<EnvVarExpansionConfig>,
}

/// Environment variable expansion configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnvVarExpansionConfig {
    /// Enable environment variable expansion (default: true)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Allowed environment variable prefixes (default: all)
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "allowedPrefixes")]
    pub allowed_prefixes: Option<Vec<String>>,

    /// Forbidden patterns (regex) for environment variable names
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "forbiddenPatterns")]
    pub forbidden_patterns: Option<Vec<String>>,
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct OutputConfig {
    /// Directory for persisted campaign records (disabled when absent)
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "logDir")]
    pub log_dir: Option<String>,
}

/// Default configuration values
impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            extends: None,
            dispatcher: Some(DispatcherConfig::default()),
            relay: None,
            capabilities: None,
            registry: None,
            credentials: Some(CredentialsConfig {
                env_fallback: None,
                env_var_expansion: Some(EnvVarExpansionConfig {
                    enabled: Some(true),
                    allowed_prefixes: None,
                    forbidden_patterns: None,
                }),
            }),
            output: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn max_concurrency(&self) -> usize {
        self.dispatcher
            .as_ref()
            .and_then(|d| d.max_concurrency)
            .unwrap_or(DEFAULT_MAX_CONCURRENCY)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(
            self.dispatcher
                .as_ref()
                .and_then(|d| d.job_timeout_secs)
                .unwrap_or(DEFAULT_JOB_TIMEOUT_SECS),
        )
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.dispatcher
            .as_ref()
            .and_then(|d| d.retry.clone())
            .unwrap_or_default()
    }

    pub fn relay_capacity(&self) -> usize {
        self.relay
            .as_ref()
            .and_then(|r| r.channel_capacity)
            .unwrap_or(DEFAULT_RELAY_CAPACITY)
    }

    pub fn log_dir(&self) -> Option<&str> {
        self.output.as_ref().and_then(|o| o.log_dir.as_deref())
    }

    pub fn env_fallback(&self) -> HashMap<String, String> {
        self.credentials
            .as_ref()
            .and_then(|c| c.env_fallback.clone())
            .unwrap_or_default()
    }
}
