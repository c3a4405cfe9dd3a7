//! Webhook Plugin - Publishes content as a JSON POST
//!
//! The request goes to the configured endpoint, or to the destination URL
//! when none is configured. The destination's `token` credential is sent as a
//! bearer token. The artifact URL is taken from the response body (`url`,
//! `link` or `permalink`) or, failing that, from the `Location` header.

use crate::core::campaign::{Content, Destination};
use crate::core::config::CapabilityConfig;
use crate::core::error::CampaignError;
use crate::core::traits::{Capability, PublishResult};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Serialize;
use std::collections::HashMap;

/// Response fields checked for the published URL, in order
const ARTIFACT_FIELDS: &[&str] = &["url", "link", "permalink"];

/// Request body sent to the webhook
#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    title: &'a str,
    body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<&'a str>,
    tags: &'a [String],
    destination: &'a str,
    category: &'a str,
}

/// Generic JSON webhook capability
pub struct WebhookCapability {
    name: String,
    client: reqwest::Client,
    endpoint: Option<String>,
    headers: HashMap<String, String>,
    required_credentials: Vec<String>,
}

impl WebhookCapability {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            client: reqwest::Client::new(),
            endpoint: None,
            headers: HashMap::new(),
            required_credentials: vec!["token".to_string()],
        }
    }

    pub fn from_config(name: &str, config: &CapabilityConfig) -> Result<Self, CampaignError> {
        let mut capability = Self::new(name);

        if let Some(endpoint) = &config.endpoint {
            reqwest::Url::parse(endpoint).map_err(|e| {
                CampaignError::Config(format!("capabilities.{}.endpoint: {}", name, e))
            })?;
            capability.endpoint = Some(endpoint.clone());
        }
        if let Some(headers) = &config.headers {
            capability.headers = headers.clone();
        }
        if let Some(required) = &config.required_credentials {
            capability.required_credentials = required.clone();
        }

        Ok(capability)
    }

    fn target(&self, destination: &Destination) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| destination.url.clone())
    }

    fn artifact_from_body(body: &serde_json::Value) -> Option<String> {
        ARTIFACT_FIELDS
            .iter()
            .find_map(|field| body.get(field).and_then(|v| v.as_str()))
            .map(str::to_string)
    }
}

#[async_trait]
impl Capability for WebhookCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn required_credentials(&self) -> Vec<String> {
        self.required_credentials.clone()
    }

    async fn publish(
        &self,
        destination: &Destination,
        content: &Content,
    ) -> anyhow::Result<PublishResult> {
        let target = self.target(destination);
        let payload = WebhookPayload {
            title: &content.title,
            body: &content.body,
            url: content.url.as_deref(),
            tags: &content.tags,
            destination: &destination.url,
            category: &destination.category,
        };

        let mut request = self.client.post(&target).json(&payload);
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }
        if let Some(token) = destination.credentials.get("token") {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                return Ok(PublishResult::failed(format!(
                    "request to {} failed: {}",
                    target, e
                )));
            }
        };

        let status = response.status();
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            let snippet: String = text.chars().take(200).collect();
            return Ok(PublishResult::failed(format!("HTTP {}: {}", status, snippet))
                .with_log(format!("POST {} -> {}", target, status)));
        }

        let artifact = serde_json::from_str::<serde_json::Value>(&text)
            .ok()
            .and_then(|body| Self::artifact_from_body(&body))
            .or(location);

        Ok(PublishResult {
            success: true,
            artifact_url: artifact,
            error: None,
            logs: vec![format!("POST {} -> {}", target, status)],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::campaign::CredentialBundle;
    use crate::core::config::CapabilityType;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one HTTP response and return the raw request text
    async fn serve_once(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                        })
                        .unwrap_or(0);
                    if request.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
            }

            let response = format!(
                "{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).to_string()
        });

        (format!("http://{}/hook", addr), handle)
    }

    #[tokio::test]
    async fn test_publish_success_reads_artifact() {
        let (url, server) = serve_once(
            "HTTP/1.1 201 Created",
            r#"{"permalink":"https://blog.example/p/42"}"#,
        )
        .await;
        let plugin = WebhookCapability::new("blog-hook");
        let destination = Destination::new(url, "blog")
            .with_credentials(CredentialBundle::from_pairs([("token", "abc123")]));
        let content = Content {
            title: "Hello".to_string(),
            body: "World".to_string(),
            ..Default::default()
        };

        let result = plugin.publish(&destination, &content).await.unwrap();
        let request = server.await.unwrap();

        assert!(result.success);
        assert_eq!(result.artifact_url.as_deref(), Some("https://blog.example/p/42"));
        assert!(request.to_ascii_lowercase().contains("authorization: bearer abc123"));
        assert!(request.contains("\"title\":\"Hello\""));
    }

    #[tokio::test]
    async fn test_publish_http_error_is_failed_result() {
        let (url, server) = serve_once("HTTP/1.1 403 Forbidden", r#"{"error":"bad token"}"#).await;
        let plugin = WebhookCapability::new("blog-hook");

        let result = plugin
            .publish(&Destination::new(url, "blog"), &Content::default())
            .await
            .unwrap();
        server.await.unwrap();

        assert!(!result.success);
        assert!(result.error.unwrap().contains("403"));
    }

    #[tokio::test]
    async fn test_publish_unreachable_is_failed_result() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let plugin = WebhookCapability::new("blog-hook");
        let result = plugin
            .publish(&Destination::new(format!("http://{}/", addr), "blog"), &Content::default())
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[test]
    fn test_from_config() {
        let config = CapabilityConfig {
            capability_type: CapabilityType::Webhook,
            endpoint: Some("https://hooks.example/publish".to_string()),
            headers: None,
            required_credentials: Some(vec!["token".to_string(), "site_id".to_string()]),
        };
        let plugin = WebhookCapability::from_config("hook", &config).unwrap();

        assert_eq!(plugin.required_credentials().len(), 2);
        assert_eq!(
            plugin.target(&Destination::new("https://ignored.example", "blog")),
            "https://hooks.example/publish"
        );
    }

    #[test]
    fn test_from_config_rejects_bad_endpoint() {
        let config = CapabilityConfig {
            capability_type: CapabilityType::Webhook,
            endpoint: Some("::not a url".to_string()),
            headers: None,
            required_credentials: None,
        };
        assert!(WebhookCapability::from_config("hook", &config).is_err());
    }

    #[test]
    fn test_artifact_from_body() {
        let body = serde_json::json!({
            "link": "https://a.example/1",
            "permalink": "https://a.example/2"
        });
        assert_eq!(
            WebhookCapability::artifact_from_body(&body).as_deref(),
            Some("https://a.example/1")
        );
        assert_eq!(WebhookCapability::artifact_from_body(&serde_json::json!({})), None);
    }
}
