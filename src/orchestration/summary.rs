//! CampaignSummary - Derived statistics and reports for a campaign
//!
//! Features:
//! - Per-category success/failure/attempt counts
//! - Retry and error-kind breakdown
//! - Markdown and JSON rendering
//!
//! Everything is computed from a `CampaignLogState` alone.

use crate::core::log_state::{CampaignLogState, ErrorKind};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Statistics for one destination category
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryStatistics {
    pub category: String,
    pub destinations: usize,
    pub successes: usize,
    pub failures: usize,
    pub attempts: usize,
    pub retries: usize,
    pub skipped: usize,
}

/// One row of the per-destination table
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationRow {
    pub destination: String,
    pub category: String,
    pub success: bool,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignSummary {
    pub campaign_id: String,
    pub success_count: usize,
    pub total_count: usize,
    pub skipped_count: usize,
    pub retry_count: usize,
    pub success_rate: f64,
    pub by_category: BTreeMap<String, CategoryStatistics>,
    pub by_error_kind: BTreeMap<ErrorKind, usize>,
    pub destinations: Vec<DestinationRow>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl CampaignSummary {
    pub fn from_state(state: &CampaignLogState) -> Self {
        let mut by_category: BTreeMap<String, CategoryStatistics> = BTreeMap::new();
        let mut by_error_kind: BTreeMap<ErrorKind, usize> = BTreeMap::new();
        let mut destinations = Vec::new();
        let mut retry_count = 0;

        for (key, result) in &state.results {
            let attempts = state.attempts.get(key).map(Vec::as_slice).unwrap_or(&[]);
            let retries = attempts.iter().filter(|a| a.is_retry).count();
            retry_count += retries;

            let stats = by_category
                .entry(key.category().to_string())
                .or_insert_with(|| CategoryStatistics {
                    category: key.category().to_string(),
                    ..Default::default()
                });
            stats.destinations += 1;
            stats.attempts += attempts.len();
            stats.retries += retries;
            if result.final_result.is_success() {
                stats.successes += 1;
            } else {
                stats.failures += 1;
            }

            if let Some(kind) = result.error_kind {
                *by_error_kind.entry(kind).or_insert(0) += 1;
            }

            destinations.push(DestinationRow {
                destination: key.url().to_string(),
                category: key.category().to_string(),
                success: result.final_result.is_success(),
                attempts: result.total_attempts,
                artifact_url: result.artifact_url.clone(),
                error_kind: result.error_kind,
                error: attempts.last().and_then(|a| a.result.error.clone()),
            });
        }

        for skipped in &state.skipped {
            let category = skipped.destination_key.category().to_string();
            by_category
                .entry(category.clone())
                .or_insert_with(|| CategoryStatistics {
                    category,
                    ..Default::default()
                })
                .skipped += 1;
        }

        let success_rate = if state.total_count > 0 {
            (state.success_count as f64 / state.total_count as f64) * 100.0
        } else {
            0.0
        };

        Self {
            campaign_id: state.campaign_id.clone(),
            success_count: state.success_count,
            total_count: state.total_count,
            skipped_count: state.skipped.len(),
            retry_count,
            success_rate,
            by_category,
            by_error_kind,
            destinations,
            created_at: state.created_at,
            last_updated: state.last_updated,
        }
    }

    /// Whether the campaign published anywhere and every job succeeded
    ///
    /// A campaign whose destinations were all skipped did not succeed.
    pub fn all_succeeded(&self) -> bool {
        self.total_count > 0 && self.success_count == self.total_count
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Render a Markdown report
    pub fn to_markdown(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("# Campaign {}\n", self.campaign_id));
        lines.push(format!("**Completed**: {}\n", self.last_updated.to_rfc3339()));

        lines.push("## Overall\n".to_string());
        lines.push(format!(
            "- **Published**: {}/{}",
            self.success_count, self.total_count
        ));
        lines.push(format!("- **Success Rate**: {:.2}%", self.success_rate));
        lines.push(format!("- **Retries**: {}", self.retry_count));
        lines.push(format!("- **Skipped**: {}\n", self.skipped_count));

        if !self.by_error_kind.is_empty() {
            lines.push("### Failures by Kind\n".to_string());
            for (kind, count) in &self.by_error_kind {
                lines.push(format!("- **{}**: {}", kind.as_str(), count));
            }
            lines.push(String::new());
        }

        if !self.by_category.is_empty() {
            lines.push("## Categories\n".to_string());
            lines.push(
                "| Category | Destinations | Successes | Failures | Attempts | Retries | Skipped |"
                    .to_string(),
            );
            lines.push(
                "|----------|--------------|-----------|----------|----------|---------|---------|"
                    .to_string(),
            );
            for stats in self.by_category.values() {
                lines.push(format!(
                    "| {} | {} | {} | {} | {} | {} | {} |",
                    stats.category,
                    stats.destinations,
                    stats.successes,
                    stats.failures,
                    stats.attempts,
                    stats.retries,
                    stats.skipped
                ));
            }
            lines.push(String::new());
        }

        if !self.destinations.is_empty() {
            lines.push("## Destinations\n".to_string());
            lines.push("| Destination | Category | Status | Attempts | Result |".to_string());
            lines.push("|-------------|----------|--------|----------|--------|".to_string());
            for row in &self.destinations {
                let status = if row.success { "✅ Success" } else { "❌ Failed" };
                let detail = if row.success {
                    row.artifact_url.clone().unwrap_or_default()
                } else {
                    row.error.clone().unwrap_or_default().replace('|', "\\|")
                };
                lines.push(format!(
                    "| {} | {} | {} | {} | {} |",
                    row.destination, row.category, status, row.attempts, detail
                ));
            }
            lines.push(String::new());
        }

        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::campaign::{DestinationKey, SkipReason, SkippedDestination};
    use crate::core::log_state::AttemptResult;

    fn state() -> CampaignLogState {
        let mut state = CampaignLogState::new("c1", "u1");
        let a = DestinationKey::new("https://a.example", "blog");
        let b = DestinationKey::new("https://b.example", "blog");
        let c = DestinationKey::new("https://c.example", "forum");

        state.record_attempt(
            &a,
            AttemptResult::success(Some("https://a.example/1".into()), vec![]),
        );
        state.record_attempt(&b, AttemptResult::failure(ErrorKind::Execution, "401", vec![]));
        state.record_attempt(
            &b,
            AttemptResult::success(Some("https://b.example/2".into()), vec![]),
        );
        state.record_attempt(
            &c,
            AttemptResult::failure(ErrorKind::Resolution, "no capability", vec![]),
        );
        state.record_skipped(SkippedDestination {
            destination_key: DestinationKey::new("https://d.example", "forum"),
            reason: SkipReason::Unverified,
            detail: None,
        });
        state
    }

    #[test]
    fn test_from_state() {
        let summary = CampaignSummary::from_state(&state());

        assert_eq!(summary.success_count, 2);
        assert_eq!(summary.total_count, 3);
        assert_eq!(summary.retry_count, 1);
        assert_eq!(summary.skipped_count, 1);
        assert!(!summary.all_succeeded());

        let blog = &summary.by_category["blog"];
        assert_eq!((blog.successes, blog.failures, blog.attempts, blog.retries), (2, 0, 3, 1));
        let forum = &summary.by_category["forum"];
        assert_eq!((forum.failures, forum.skipped), (1, 1));

        assert_eq!(summary.by_error_kind.get(&ErrorKind::Resolution), Some(&1));
        assert_eq!(summary.by_error_kind.get(&ErrorKind::Execution), None);
    }

    #[test]
    fn test_markdown() {
        let markdown = CampaignSummary::from_state(&state()).to_markdown();

        assert!(markdown.contains("# Campaign c1"));
        assert!(markdown.contains("- **Published**: 2/3"));
        assert!(markdown.contains("- **ResolutionError**: 1"));
        assert!(markdown.contains("| blog | 2 | 2 | 0 | 3 | 1 | 0 |"));
        assert!(
            markdown.contains("| https://c.example | forum | ❌ Failed | 1 | no capability |")
        );
    }

    #[test]
    fn test_all_succeeded() {
        let mut state = CampaignLogState::new("c2", "u");
        state.record_attempt(
            &DestinationKey::new("https://a.example", "blog"),
            AttemptResult::success(None, vec![]),
        );
        assert!(CampaignSummary::from_state(&state).all_succeeded());
    }

    #[test]
    fn test_empty_campaign() {
        let summary = CampaignSummary::from_state(&CampaignLogState::new("c0", "u"));
        assert_eq!(summary.success_rate, 0.0);
        assert!(!summary.all_succeeded());
        assert!(summary.to_json().unwrap().contains("\"campaignId\": \"c0\""));
    }
}
