//! Submission Validator - Structural checks on campaign requests
//!
//! Runs before a campaign is created. Errors reject the submission
//! synchronously; warnings are logged and the submission proceeds.
//!
//! # Example
//!
//! ```
//! use campaign_publisher::validation::SubmissionValidator;
//! use campaign_publisher::{CampaignRequest, Content, Destination};
//!
//! let request = CampaignRequest::new(
//!     "user-1",
//!     Content { title: "Launch".into(), body: "We shipped".into(), ..Default::default() },
//!     vec![Destination::new("https://forum.example", "forum")],
//! );
//! assert!(SubmissionValidator::new().validate(&request).is_valid);
//! ```

use crate::core::campaign::{CampaignRequest, Destination, DestinationKey};
use crate::core::error::CampaignError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// One problem found in a submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
}

impl ValidationIssue {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Result of submission validation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Whether the submission can be accepted
    pub is_valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// The first error as a `CampaignError::Validation`
    pub fn to_error(&self) -> Option<CampaignError> {
        self.errors
            .first()
            .map(|issue| CampaignError::validation(&issue.field, &issue.message))
    }
}

pub struct SubmissionValidator;

impl Default for SubmissionValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl SubmissionValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, request: &CampaignRequest) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        match &request.content {
            None => errors.push(ValidationIssue::new("content", "content is required")),
            Some(content) => {
                if content.title.trim().is_empty() {
                    errors.push(ValidationIssue::new("content.title", "title is empty"));
                }
                if content.body.trim().is_empty() {
                    errors.push(ValidationIssue::new("content.body", "body is empty"));
                }
            }
        }

        if request.user_id.trim().is_empty() {
            warnings.push(ValidationIssue::new(
                "userId",
                "user id is empty; the campaign has no owner",
            ));
        }

        if let Some(id) = &request.campaign_id
            && id.trim().is_empty()
        {
            errors.push(ValidationIssue::new("campaignId", "campaign id is empty"));
        }

        if request.destinations.is_empty() {
            errors.push(ValidationIssue::new(
                "destinations",
                "at least one destination is required",
            ));
        }

        let mut seen = HashSet::new();
        for (index, destination) in request.destinations.iter().enumerate() {
            let field = format!("destinations[{}]", index);

            if destination.category.trim().is_empty() {
                errors.push(ValidationIssue::new(
                    format!("{}.category", field),
                    "category is empty",
                ));
            } else if destination.category.contains('|') {
                errors.push(ValidationIssue::new(
                    format!("{}.category", field),
                    format!("category {:?} must not contain '|'", destination.category),
                ));
            }
            if let Err(e) = reqwest::Url::parse(&destination.url) {
                errors.push(ValidationIssue::new(
                    format!("{}.url", field),
                    format!("invalid URL {:?}: {}", destination.url, e),
                ));
            }
            if !seen.insert(destination.key()) {
                warnings.push(ValidationIssue::new(
                    field,
                    format!("duplicate destination {}; only the first is used", destination.key()),
                ));
            }
        }

        if let Some(minimum) = &request.minimum_include {
            for (category, count) in minimum {
                let available = request
                    .destinations
                    .iter()
                    .filter(|d| &d.category == category)
                    .count();
                if available < *count {
                    warnings.push(ValidationIssue::new(
                        format!("minimumInclude.{}", category),
                        format!("requires {} but only {} submitted", count, available),
                    ));
                }
            }
        }

        ValidationResult {
            is_valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Keep the first destination for every key
    pub fn dedupe(destinations: &[Destination]) -> Vec<Destination> {
        let mut seen = HashSet::new();
        destinations
            .iter()
            .filter(|d| seen.insert(d.key()))
            .cloned()
            .collect()
    }

    /// Check per-category minimums against the eligible destination keys
    pub fn check_minimum_include(
        minimum: &HashMap<String, usize>,
        eligible: &[DestinationKey],
    ) -> Result<(), CampaignError> {
        let mut categories: Vec<_> = minimum.iter().collect();
        categories.sort();

        for (category, required) in categories {
            let available = eligible.iter().filter(|k| k.category() == category).count();
            if available < *required {
                return Err(CampaignError::validation(
                    format!("minimumInclude.{}", category),
                    format!(
                        "{} eligible destinations required, {} available",
                        required, available
                    ),
                ));
            }
        }
        Ok(())
    }
}
