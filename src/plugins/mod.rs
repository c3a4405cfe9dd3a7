pub mod dry_run_plugin;
pub mod registry;
pub mod webhook_plugin;

pub use dry_run_plugin::DryRunCapability;
pub use registry::{CapabilityHandle, CapabilityRegistry, MatchKind, RegistryBuilder};
pub use webhook_plugin::WebhookCapability;
