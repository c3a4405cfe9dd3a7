pub mod core;
pub mod orchestration;
pub mod plugins;
pub mod security;
pub mod validation;

pub use crate::core::*;
pub use crate::orchestration::{
    CampaignSummary, CompletionSink, DispatcherOptions, JsonFileSink, LogEvent, LogRelay,
    QueueDispatcher,
};
pub use crate::plugins::CapabilityRegistry;
pub use crate::security::CredentialManager;
