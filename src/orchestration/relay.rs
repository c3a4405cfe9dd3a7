//! Log Relay - per-campaign pub/sub for live log events
//!
//! - One broadcast topic per campaign id, created on first subscribe
//! - Best-effort, at-most-once per connected subscriber
//! - Events published while nobody is subscribed are dropped
//! - Topics without receivers are pruned on publish and subscribe

use crate::core::log_state::Severity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::broadcast;
use tracing::{trace, warn};

/// Ephemeral event pushed to observers of a campaign
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub campaign_id: String,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
}

impl LogEvent {
    pub fn new(campaign_id: &str, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            campaign_id: campaign_id.to_string(),
            severity,
            message: message.into(),
            destination: None,
        }
    }

    pub fn for_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }
}

/// Topic registry keyed by campaign id
#[derive(Debug)]
pub struct LogRelay {
    topics: RwLock<HashMap<String, broadcast::Sender<LogEvent>>>,
    capacity: usize,
}

impl Default for LogRelay {
    fn default() -> Self {
        Self::new(crate::core::config::DEFAULT_RELAY_CAPACITY)
    }
}

impl LogRelay {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Publish `event` to the campaign's topic
    ///
    /// Returns the number of subscribers that received it; zero means the
    /// event was dropped.
    pub fn publish(&self, campaign_id: &str, event: LogEvent) -> usize {
        let delivered = {
            let topics = self.topics.read().unwrap_or_else(|e| e.into_inner());
            topics.get(campaign_id).map(|sender| sender.send(event).unwrap_or(0))
        };

        match delivered {
            Some(0) => {
                let mut topics = self.topics.write().unwrap_or_else(|e| e.into_inner());
                if topics
                    .get(campaign_id)
                    .is_some_and(|sender| sender.receiver_count() == 0)
                {
                    topics.remove(campaign_id);
                    trace!(campaign_id, "last subscriber gone, topic pruned");
                }
                0
            }
            Some(n) => n,
            None => {
                trace!(campaign_id, "no subscribers, event dropped");
                0
            }
        }
    }

    /// Subscribe to events published from now on
    pub fn subscribe(&self, campaign_id: &str) -> LogSubscription {
        let mut topics = self.topics.write().unwrap_or_else(|e| e.into_inner());
        topics.retain(|id, sender| id == campaign_id || sender.receiver_count() > 0);
        let sender = topics
            .entry(campaign_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);

        LogSubscription {
            campaign_id: campaign_id.to_string(),
            receiver: sender.subscribe(),
        }
    }

    /// Drop the campaign's topic; subscribers see the end of the stream
    pub fn close(&self, campaign_id: &str) {
        let mut topics = self.topics.write().unwrap_or_else(|e| e.into_inner());
        topics.remove(campaign_id);
    }
}

/// Stream of events for one campaign
#[derive(Debug)]
pub struct LogSubscription {
    campaign_id: String,
    receiver: broadcast::Receiver<LogEvent>,
}

impl LogSubscription {
    /// Next event, or `None` once the topic is closed
    ///
    /// A subscriber that falls behind loses the oldest events and keeps going.
    pub async fn recv(&mut self) -> Option<LogEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(campaign_id = %self.campaign_id, missed, "log subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn campaign_id(&self) -> &str {
        &self.campaign_id
    }
}
