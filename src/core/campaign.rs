//! Campaign data model
//!
//! A campaign is one content submission fanned out to many destinations.
//! Each eligible destination becomes a [`Job`]; each execution of a job is
//! recorded as an attempt in the campaign log (see `log_state`).

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Content
// ============================================================================

/// Content payload published to every destination of a campaign
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

// ============================================================================
// Credentials
// ============================================================================

/// Opaque credential bundle attached to a destination
///
/// Values are held as [`SecretString`] and never serialized. Cloning is cheap
/// (the map is shared), so a bundle can travel with every job snapshot.
#[derive(Debug, Clone, Default)]
pub struct CredentialBundle {
    values: Arc<HashMap<String, SecretString>>,
}

impl CredentialBundle {
    pub fn new(values: HashMap<String, SecretString>) -> Self {
        Self {
            values: Arc::new(values),
        }
    }

    /// Build a bundle from plain key/value pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let values = pairs
            .into_iter()
            .map(|(k, v)| {
                let value: String = v.into();
                (k.into(), SecretString::new(value.into_boxed_str()))
            })
            .collect();
        Self::new(values)
    }

    pub fn get(&self, key: &str) -> Option<&SecretString> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SecretString)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Return a new bundle with `extra` entries added where the key is absent
    pub fn with_fallbacks(&self, extra: HashMap<String, SecretString>) -> Self {
        if extra.is_empty() {
            return self.clone();
        }
        let mut merged: HashMap<String, SecretString> = extra;
        for (key, value) in self.values.iter() {
            merged.insert(key.clone(), SecretString::new(secret_text(value).into()));
        }
        Self::new(merged)
    }
}

fn secret_text(secret: &SecretString) -> &str {
    use secrecy::ExposeSecret;
    secret.expose_secret()
}

impl<'de> Deserialize<'de> for CredentialBundle {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let plain = HashMap::<String, String>::deserialize(deserializer)?;
        Ok(Self::from_pairs(plain))
    }
}

// ============================================================================
// Destination
// ============================================================================

/// One publication target
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    pub url: String,
    pub category: String,
    #[serde(default)]
    pub credentials: CredentialBundle,
    /// Unverified destinations are skipped at expansion time
    #[serde(default = "default_verified")]
    pub verified: bool,
}

fn default_verified() -> bool {
    true
}

impl Destination {
    pub fn new(url: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            category: category.into(),
            credentials: CredentialBundle::default(),
            verified: true,
        }
    }

    pub fn with_credentials(mut self, credentials: CredentialBundle) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn key(&self) -> DestinationKey {
        DestinationKey::new(&self.url, &self.category)
    }

    /// Lowercased hostname of the destination URL, without a leading `www.`
    pub fn hostname(&self) -> Option<String> {
        let parsed = reqwest::Url::parse(&self.url).ok()?;
        let host = parsed.host_str()?.to_ascii_lowercase();
        Some(host.strip_prefix("www.").map(str::to_string).unwrap_or(host))
    }
}

/// Retry identity of a destination: `(url, category)`
///
/// Rendered as `category|url`, which is also the key used in the persisted
/// campaign record. Categories never contain `|`; the validator rejects them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DestinationKey {
    category: String,
    url: String,
}

impl DestinationKey {
    pub fn new(url: &str, category: &str) -> Self {
        Self {
            category: category.to_string(),
            url: url.to_string(),
        }
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for DestinationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.category, self.url)
    }
}

impl Serialize for DestinationKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DestinationKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let (category, url) = raw
            .split_once('|')
            .ok_or_else(|| serde::de::Error::custom(format!("invalid destination key {:?}", raw)))?;
        Ok(Self::new(url, category))
    }
}

// ============================================================================
// Submission
// ============================================================================

/// Campaign submission as accepted from callers
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignRequest {
    /// Caller-chosen id; lets observers subscribe before the first event
    #[serde(default)]
    pub campaign_id: Option<String>,
    #[serde(default)]
    pub user_id: String,
    pub content: Option<Content>,
    #[serde(default)]
    pub destinations: Vec<Destination>,
    /// Restrict eligibility to destinations of this category
    #[serde(default)]
    pub category: Option<String>,
    /// Minimum number of eligible destinations required per category
    #[serde(default)]
    pub minimum_include: Option<HashMap<String, usize>>,
}

impl CampaignRequest {
    pub fn new(
        user_id: impl Into<String>,
        content: Content,
        destinations: Vec<Destination>,
    ) -> Self {
        Self {
            campaign_id: None,
            user_id: user_id.into(),
            content: Some(content),
            destinations,
            category: None,
            minimum_include: None,
        }
    }
}

/// An accepted campaign
#[derive(Debug, Clone)]
pub struct Campaign {
    pub id: String,
    pub user_id: String,
    pub destinations: Vec<Destination>,
    pub content: Content,
    pub created_at: DateTime<Utc>,
}

impl Campaign {
    pub fn destination(&self, key: &DestinationKey) -> Option<&Destination> {
        self.destinations.iter().find(|d| &d.key() == key)
    }
}

/// One (campaign, destination) pairing scheduled for execution
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub campaign_id: String,
    pub destination: Destination,
    pub content: Arc<Content>,
}

impl Job {
    pub fn new(campaign_id: &str, destination: Destination, content: Arc<Content>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            campaign_id: campaign_id.to_string(),
            destination,
            content,
        }
    }

    pub fn key(&self) -> DestinationKey {
        self.destination.key()
    }
}

/// Why a destination was excluded from the job set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    CategoryMismatch,
    Unverified,
    MissingCredentials,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::CategoryMismatch => "category_mismatch",
            SkipReason::Unverified => "unverified",
            SkipReason::MissingCredentials => "missing_credentials",
        }
    }
}

/// A destination left out of the job set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedDestination {
    pub destination_key: DestinationKey,
    pub reason: SkipReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Synchronous acknowledgment returned by `submit`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReceipt {
    pub accepted: bool,
    pub campaign_id: String,
    pub job_count: usize,
    pub skipped: Vec<SkippedDestination>,
}
