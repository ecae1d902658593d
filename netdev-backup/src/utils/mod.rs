//! Utility modules shared by the pipeline and the binary.

pub mod errors;
pub mod logger;

pub use errors::{BackupError, CancelReason, Result, StoreError, TargetError};
