pub mod credential_manager;

pub use credential_manager::{CredentialManager, FALLBACK_CREDENTIAL_KEY};
