//! Completion sinks
//!
//! A sink receives the final campaign log record once every job of the
//! campaign has reached a terminal state. Sink failures are logged by the
//! dispatcher and never affect the campaign.

use crate::core::log_state::CampaignLogState;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Downstream consumer of completed campaign records
#[async_trait]
pub trait CompletionSink: Send + Sync {
    fn name(&self) -> &str;

    async fn on_complete(&self, state: &CampaignLogState) -> anyhow::Result<()>;
}

/// Writes `<dir>/<campaignId>.json`
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    dir: PathBuf,
}

impl JsonFileSink {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Path of the record for `campaign_id`
    pub fn record_path(&self, campaign_id: &str) -> PathBuf {
        let file_stem: String = campaign_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", file_stem))
    }

    /// Write the record (atomic: temp file, then rename)
    pub async fn save(&self, state: &CampaignLogState) -> Result<PathBuf, std::io::Error> {
        fs::create_dir_all(&self.dir).await?;

        let json = serde_json::to_string_pretty(state)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let path = self.record_path(&state.campaign_id);
        let temp_file = path.with_extension("json.tmp");
        fs::write(&temp_file, json).await?;
        fs::rename(&temp_file, &path).await?;

        Ok(path)
    }

    /// Read a previously written record
    pub async fn load(
        &self,
        campaign_id: &str,
    ) -> Result<Option<CampaignLogState>, std::io::Error> {
        let path = self.record_path(campaign_id);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await?;
        let state = serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(Some(state))
    }
}

#[async_trait]
impl CompletionSink for JsonFileSink {
    fn name(&self) -> &str {
        "json-file"
    }

    async fn on_complete(&self, state: &CampaignLogState) -> anyhow::Result<()> {
        let path = self.save(state).await?;
        tracing::debug!(path = %path.display(), "campaign record written");
        Ok(())
    }
}
