//! Retry-Safe Log Aggregator
//!
//! Every write to a campaign's log state goes through a compare-and-swap loop
//! over a versioned record:
//!
//! 1. load the current state and its version (version 0 means absent)
//! 2. apply the change to a local copy
//! 3. write back conditioned on the version read in step 1
//! 4. on `ConcurrencyConflict`, discard the copy and start over
//!
//! There is no global lock. Writers for different destination keys of the
//! same campaign race freely and none of their attempts are lost.

use crate::core::campaign::{DestinationKey, SkippedDestination};
use crate::core::error::CampaignError;
use crate::core::log_state::{AttemptResult, CampaignLogState};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, instrument, trace};

/// A value together with the version it was stored under
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

// ============================================================================
// Store seam
// ============================================================================

/// Versioned storage for campaign log states
#[async_trait]
pub trait LogStateStore: Send + Sync {
    /// Current record for the campaign, if any
    async fn load(&self, campaign_id: &str)
    -> Result<Option<Versioned<CampaignLogState>>, CampaignError>;

    /// Store `state` if the record is still at `expected_version`
    ///
    /// `expected_version == 0` means "create; must not exist yet". Returns the
    /// new version, or `ConcurrencyConflict` when the record moved on.
    async fn compare_and_swap(
        &self,
        campaign_id: &str,
        expected_version: u64,
        state: CampaignLogState,
    ) -> Result<u64, CampaignError>;
}

/// Mutex-guarded map of versioned records
#[derive(Debug, Default)]
pub struct InMemoryLogStore {
    records: Mutex<HashMap<String, Versioned<CampaignLogState>>>,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LogStateStore for InMemoryLogStore {
    async fn load(
        &self,
        campaign_id: &str,
    ) -> Result<Option<Versioned<CampaignLogState>>, CampaignError> {
        let records = self
            .records
            .lock()
            .map_err(|_| CampaignError::Store("log store lock poisoned".to_string()))?;
        Ok(records.get(campaign_id).cloned())
    }

    async fn compare_and_swap(
        &self,
        campaign_id: &str,
        expected_version: u64,
        state: CampaignLogState,
    ) -> Result<u64, CampaignError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| CampaignError::Store("log store lock poisoned".to_string()))?;

        let current = records.get(campaign_id).map(|r| r.version).unwrap_or(0);
        if current != expected_version {
            return Err(CampaignError::ConcurrencyConflict {
                campaign_id: campaign_id.to_string(),
                expected: expected_version,
            });
        }

        let version = current + 1;
        records.insert(
            campaign_id.to_string(),
            Versioned {
                version,
                value: state,
            },
        );
        Ok(version)
    }
}

// ============================================================================
// Aggregator
// ============================================================================

/// Sole writer of `CampaignLogState`
pub struct LogAggregator {
    store: Arc<dyn LogStateStore>,
    conflicts: AtomicU64,
}

impl LogAggregator {
    pub fn new(store: Arc<dyn LogStateStore>) -> Self {
        Self {
            store,
            conflicts: AtomicU64::new(0),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryLogStore::new()))
    }

    /// Number of lost CAS races so far
    pub fn conflict_count(&self) -> u64 {
        self.conflicts.load(Ordering::Relaxed)
    }

    /// Create the log state for a new campaign and record its skipped destinations
    ///
    /// Fails with `Validation` if the campaign id is already in use.
    pub async fn open(
        &self,
        campaign_id: &str,
        user_id: &str,
        skipped: &[SkippedDestination],
    ) -> Result<CampaignLogState, CampaignError> {
        if self.store.load(campaign_id).await?.is_some() {
            return Err(CampaignError::validation(
                "campaignId",
                format!("campaign {} already exists", campaign_id),
            ));
        }

        let mut state = CampaignLogState::new(campaign_id, user_id);
        for entry in skipped {
            state.record_skipped(entry.clone());
        }

        match self.store.compare_and_swap(campaign_id, 0, state.clone()).await {
            Ok(_) => Ok(state),
            Err(CampaignError::ConcurrencyConflict { .. }) => Err(CampaignError::validation(
                "campaignId",
                format!("campaign {} already exists", campaign_id),
            )),
            Err(e) => Err(e),
        }
    }

    /// Record one attempt for `key` and return the merged state
    #[instrument(skip(self, result), fields(key = %key, success = result.is_success()))]
    pub async fn merge(
        &self,
        campaign_id: &str,
        key: &DestinationKey,
        result: AttemptResult,
    ) -> Result<CampaignLogState, CampaignError> {
        let mut rounds = 0u32;

        loop {
            rounds += 1;
            let (expected, mut state) = match self.store.load(campaign_id).await? {
                Some(current) => (current.version, current.value),
                None => (0, CampaignLogState::new(campaign_id, "")),
            };

            let attempt_number = state.record_attempt(key, result.clone());

            match self
                .store
                .compare_and_swap(campaign_id, expected, state.clone())
                .await
            {
                Ok(version) => {
                    debug!(attempt_number, version, rounds, "attempt merged");
                    return Ok(state);
                }
                Err(CampaignError::ConcurrencyConflict { .. }) => {
                    self.conflicts.fetch_add(1, Ordering::Relaxed);
                    trace!(expected, rounds, "lost CAS race, retrying");
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Current state of the campaign, if it exists
    pub async fn snapshot(
        &self,
        campaign_id: &str,
    ) -> Result<Option<CampaignLogState>, CampaignError> {
        Ok(self.store.load(campaign_id).await?.map(|r| r.value))
    }
}
