//! Dry-run Plugin - Reports success without contacting the destination

use crate::core::campaign::{Content, Destination};
use crate::core::traits::{Capability, PublishResult};
use async_trait::async_trait;

/// Capability that performs no I/O
pub struct DryRunCapability {
    name: String,
}

impl Default for DryRunCapability {
    fn default() -> Self {
        Self::new()
    }
}

impl DryRunCapability {
    pub fn new() -> Self {
        Self::named("dry-run")
    }

    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl Capability for DryRunCapability {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(
        &self,
        destination: &Destination,
        content: &Content,
    ) -> anyhow::Result<PublishResult> {
        Ok(PublishResult::published(destination.url.clone()).with_log(format!(
            "dry run: would publish \"{}\" ({} bytes, {} tags)",
            content.title,
            content.body.len(),
            content.tags.len()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reports_destination_as_artifact() {
        let plugin = DryRunCapability::new();
        let content = Content {
            title: "Release notes".to_string(),
            body: "v2 is out".to_string(),
            ..Default::default()
        };

        let result = plugin
            .publish(&Destination::new("https://forum.example/t/1", "forum"), &content)
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.artifact_url.as_deref(), Some("https://forum.example/t/1"));
        assert!(result.logs[0].contains("Release notes"));
    }

    #[test]
    fn test_named() {
        assert_eq!(DryRunCapability::named("preview").name(), "preview");
        assert_eq!(DryRunCapability::default().name(), "dry-run");
    }
}
