pub mod campaign;
pub mod config;
pub mod config_loader;
pub mod error;
pub mod log_state;
pub mod retry;
pub mod traits;

pub use campaign::*;
pub use config::{CapabilityConfig, CapabilityType, OrchestratorConfig};
pub use config_loader::{ConfigLoadOptions, ConfigLoader};
pub use error::*;
pub use log_state::*;
pub use retry::*;
pub use traits::*;
