//! Credential resolution and masking
//!
//! Destinations carry their own credential bundle. A category can also name
//! an environment variable whose value is used as the `token` credential when
//! the destination does not provide one. Values are kept in [`SecretString`]
//! and masked before any capability output reaches logs.

use crate::core::campaign::{CredentialBundle, Destination};
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::env;

/// Credential key filled from the environment fallback
pub const FALLBACK_CREDENTIAL_KEY: &str = "token";

/// Resolves effective credentials for destinations
///
/// # Examples
///
/// ```
/// use campaign_publisher::security::CredentialManager;
///
/// let manager = CredentialManager::new(Default::default());
/// assert_eq!(manager.mask_token("abcdef123456"), "abc...456");
/// ```
#[derive(Debug, Default, Clone)]
pub struct CredentialManager {
    /// category -> environment variable name
    env_fallback: HashMap<String, String>,
    /// Snapshot of the environment; read from the process when absent
    env: Option<HashMap<String, String>>,
}

impl CredentialManager {
    /// Creates a manager reading fallbacks from the process environment
    pub fn new(env_fallback: HashMap<String, String>) -> Self {
        Self {
            env_fallback,
            env: None,
        }
    }

    /// Creates a manager reading fallbacks from a fixed environment snapshot
    pub fn with_env(env_fallback: HashMap<String, String>, env: HashMap<String, String>) -> Self {
        Self {
            env_fallback,
            env: Some(env),
        }
    }

    fn lookup_env(&self, name: &str) -> Option<String> {
        match &self.env {
            Some(snapshot) => snapshot.get(name).cloned(),
            None => env::var(name).ok(),
        }
    }

    /// Gets the environment variable name used as fallback for a category
    pub fn fallback_variable(&self, category: &str) -> Option<&str> {
        self.env_fallback.get(category).map(|s| s.as_str())
    }

    /// Effective bundle for `destination`: explicit values win over fallbacks
    pub fn resolve(&self, destination: &Destination) -> CredentialBundle {
        let mut fallbacks = HashMap::new();

        if !destination.credentials.contains(FALLBACK_CREDENTIAL_KEY)
            && let Some(variable) = self.fallback_variable(&destination.category)
            && let Some(value) = self.lookup_env(variable)
        {
            fallbacks.insert(
                FALLBACK_CREDENTIAL_KEY.to_string(),
                SecretString::new(value.into_boxed_str()),
            );
        }

        destination.credentials.with_fallbacks(fallbacks)
    }

    /// Required keys that are absent or empty in `bundle`
    pub fn missing(&self, bundle: &CredentialBundle, required: &[String]) -> Vec<String> {
        required
            .iter()
            .filter(|key| {
                bundle
                    .get(key)
                    .map(|v| v.expose_secret().trim().is_empty())
                    .unwrap_or(true)
            })
            .cloned()
            .collect()
    }

    /// Masks a token for safe logging
    ///
    /// Shows only the first 3 and last 3 characters for identification purposes.
    /// Tokens shorter than 10 characters are fully masked as "****".
    pub fn mask_token(&self, token: &str) -> String {
        if token.chars().count() < 10 {
            return "****".to_string();
        }

        let chars: Vec<char> = token.chars().collect();
        let prefix: String = chars[..3].iter().collect();
        let suffix: String = chars[chars.len() - 3..].iter().collect();
        format!("{}...{}", prefix, suffix)
    }

    /// Masks every credential value of `bundle` that appears in `text`
    pub fn mask_secrets(&self, text: &str, bundle: &CredentialBundle) -> String {
        let mut masked = text.to_string();

        for (_, secret) in bundle.iter() {
            let value = secret.expose_secret();
            if value.is_empty() {
                continue;
            }
            if let Ok(regex) = Regex::new(&regex::escape(value)) {
                let replacement = self.mask_token(value);
                masked = regex.replace_all(&masked, replacement.as_str()).to_string();
            }
        }

        masked
    }
}
