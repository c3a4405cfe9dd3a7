pub mod submission_validator;

pub use submission_validator::{SubmissionValidator, ValidationIssue, ValidationResult};
