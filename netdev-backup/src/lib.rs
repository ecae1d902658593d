//! Network device backup collector.
//!
//! Exports device configuration, compares it with the last stored copy and
//! pulls a full backup only when something changed.

pub mod artifact;
pub mod change;
pub mod config;
pub mod daemon;
pub mod device;
pub mod orchestrator;
pub mod store;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use artifact::{Artifact, StageResult};
pub use config::Config;
pub use orchestrator::{DeviceOutcome, Orchestrator, RunReport};
pub use utils::errors::BackupError;
pub type Result<T> = std::result::Result<T, BackupError>;
