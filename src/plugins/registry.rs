//! Capability Registry - Resolves destinations to capability implementations
//!
//! Resolution order, first match wins:
//! 1. exact hostname match in the domain table
//! 2. exact category match in the category table
//! 3. `ResolutionError`
//!
//! The tables are built once at startup and are read-only afterwards, so the
//! registry is shared between workers behind a plain `Arc`.
//!
//! # Example
//!
//! ```
//! use campaign_publisher::plugins::{CapabilityRegistry, DryRunCapability};
//! use campaign_publisher::Destination;
//! use std::sync::Arc;
//!
//! let registry = CapabilityRegistry::builder()
//!     .category("forum", Arc::new(DryRunCapability::new()))
//!     .build();
//!
//! let handle = registry.resolve(&Destination::new("https://board.example", "forum")).unwrap();
//! assert_eq!(handle.name(), "dry-run");
//! ```

use crate::core::campaign::Destination;
use crate::core::config::{CapabilityType, OrchestratorConfig};
use crate::core::error::CampaignError;
use crate::core::traits::Capability;
use crate::plugins::dry_run_plugin::DryRunCapability;
use crate::plugins::webhook_plugin::WebhookCapability;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Which table produced a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    Domain,
    Category,
}

/// A resolved capability
#[derive(Clone)]
pub struct CapabilityHandle {
    capability: Arc<dyn Capability>,
    matched: MatchKind,
}

impl CapabilityHandle {
    pub fn name(&self) -> &str {
        self.capability.name()
    }

    pub fn matched(&self) -> MatchKind {
        self.matched
    }

    pub fn capability(&self) -> Arc<dyn Capability> {
        Arc::clone(&self.capability)
    }

    pub fn required_credentials(&self) -> Vec<String> {
        self.capability.required_credentials()
    }
}

impl fmt::Debug for CapabilityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityHandle")
            .field("name", &self.name())
            .field("matched", &self.matched)
            .finish()
    }
}

/// Static destination -> capability table
#[derive(Default, Clone)]
pub struct CapabilityRegistry {
    by_domain: HashMap<String, Arc<dyn Capability>>,
    by_category: HashMap<String, Arc<dyn Capability>>,
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut domains: Vec<_> = self.by_domain.keys().collect();
        let mut categories: Vec<_> = self.by_category.keys().collect();
        domains.sort();
        categories.sort();
        f.debug_struct("CapabilityRegistry")
            .field("domains", &domains)
            .field("categories", &categories)
            .finish()
    }
}

impl CapabilityRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Build the registry from the `capabilities` and `registry` config sections
    pub fn from_config(config: &OrchestratorConfig) -> Result<Self, CampaignError> {
        let mut instances: HashMap<String, Arc<dyn Capability>> = HashMap::new();

        for (name, capability_config) in config.capabilities.clone().unwrap_or_default() {
            let instance: Arc<dyn Capability> = match capability_config.capability_type {
                CapabilityType::Webhook => {
                    Arc::new(WebhookCapability::from_config(&name, &capability_config)?)
                }
                CapabilityType::DryRun => Arc::new(DryRunCapability::named(&name)),
            };
            instances.insert(name, instance);
        }

        let mut builder = Self::builder();
        if let Some(tables) = &config.registry {
            for (domain, name) in &tables.domains {
                let capability = instances.get(name).ok_or_else(|| {
                    CampaignError::Config(format!(
                        "registry.domains.{}: unknown capability {}",
                        domain, name
                    ))
                })?;
                builder = builder.domain(domain, Arc::clone(capability));
            }
            for (category, name) in &tables.categories {
                let capability = instances.get(name).ok_or_else(|| {
                    CampaignError::Config(format!(
                        "registry.categories.{}: unknown capability {}",
                        category, name
                    ))
                })?;
                builder = builder.category(category, Arc::clone(capability));
            }
        }

        Ok(builder.build())
    }

    /// Resolve the capability for `destination`
    pub fn resolve(&self, destination: &Destination) -> Result<CapabilityHandle, CampaignError> {
        if let Some(host) = destination.hostname()
            && let Some(capability) = self.by_domain.get(&host)
        {
            debug!(host = %host, capability = capability.name(), "resolved by domain");
            return Ok(CapabilityHandle {
                capability: Arc::clone(capability),
                matched: MatchKind::Domain,
            });
        }

        if let Some(capability) = self.by_category.get(&destination.category) {
            debug!(
                category = %destination.category,
                capability = capability.name(),
                "resolved by category"
            );
            return Ok(CapabilityHandle {
                capability: Arc::clone(capability),
                matched: MatchKind::Category,
            });
        }

        Err(CampaignError::Resolution {
            url: destination.url.clone(),
            category: destination.category.clone(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.by_domain.is_empty() && self.by_category.is_empty()
    }
}

/// Builder for [`CapabilityRegistry`]
#[derive(Default)]
pub struct RegistryBuilder {
    registry: CapabilityRegistry,
}

impl RegistryBuilder {
    /// Map a hostname (a leading `www.` is ignored) to a capability
    pub fn domain(mut self, host: &str, capability: Arc<dyn Capability>) -> Self {
        let host = host.trim().to_ascii_lowercase();
        let host = host.strip_prefix("www.").map(str::to_string).unwrap_or(host);
        self.registry.by_domain.insert(host, capability);
        self
    }

    /// Map a category to a capability
    pub fn category(mut self, category: &str, capability: Arc<dyn Capability>) -> Self {
        self.registry
            .by_category
            .insert(category.to_string(), capability);
        self
    }

    pub fn build(self) -> CapabilityRegistry {
        self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::campaign::Content;
    use crate::core::config::{CapabilityConfig, RegistryConfig};
    use crate::core::traits::PublishResult;
    use async_trait::async_trait;

    struct Named(&'static str);

    #[async_trait]
    impl Capability for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn publish(&self, _: &Destination, _: &Content) -> anyhow::Result<PublishResult> {
            Ok(PublishResult::published("https://example.com/ok"))
        }
    }

    fn registry() -> CapabilityRegistry {
        CapabilityRegistry::builder()
            .domain("www.Medium.com", Arc::new(Named("medium")))
            .category("blog", Arc::new(Named("wordpress")))
            .category("forum", Arc::new(Named("discourse")))
            .build()
    }

    #[test]
    fn test_domain_match_takes_precedence_over_category() {
        let destination = Destination::new("https://medium.com/@writer", "blog");
        let handle = registry().resolve(&destination).unwrap();

        assert_eq!(handle.name(), "medium");
        assert_eq!(handle.matched(), MatchKind::Domain);
    }

    #[test]
    fn test_category_match() {
        let destination = Destination::new("https://myblog.example/wp-admin", "blog");
        let handle = registry().resolve(&destination).unwrap();

        assert_eq!(handle.name(), "wordpress");
        assert_eq!(handle.matched(), MatchKind::Category);
    }

    #[test]
    fn test_unparseable_url_falls_back_to_category() {
        let destination = Destination::new("not a url", "forum");
        assert_eq!(registry().resolve(&destination).unwrap().name(), "discourse");
    }

    #[test]
    fn test_not_found() {
        let destination = Destination::new("https://wiki.example", "wiki");
        let error = registry().resolve(&destination).unwrap_err();

        assert!(matches!(error, CampaignError::Resolution { .. }));
        assert_eq!(error.code(), "RESOLUTION_ERROR");
    }

    #[test]
    fn test_from_config() {
        let mut capabilities = HashMap::new();
        capabilities.insert(
            "preview".to_string(),
            CapabilityConfig {
                capability_type: CapabilityType::DryRun,
                endpoint: None,
                headers: None,
                required_credentials: None,
            },
        );
        let mut tables = RegistryConfig::default();
        tables.domains.insert("dev.to".to_string(), "preview".to_string());

        let config = OrchestratorConfig {
            capabilities: Some(capabilities),
            registry: Some(tables),
            ..Default::default()
        };
        let registry = CapabilityRegistry::from_config(&config).unwrap();
        let handle = registry
            .resolve(&Destination::new("https://dev.to/me", "social"))
            .unwrap();

        assert_eq!(handle.name(), "preview");
        assert_eq!(handle.matched(), MatchKind::Domain);
    }

    #[test]
    fn test_from_config_unknown_capability() {
        let mut tables = RegistryConfig::default();
        tables.categories.insert("forum".to_string(), "ghost".to_string());
        let config = OrchestratorConfig {
            registry: Some(tables),
            ..Default::default()
        };

        assert!(matches!(
            CapabilityRegistry::from_config(&config),
            Err(CampaignError::Config(_))
        ));
    }
}
