//! Per-device and per-run results.

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreOutcome;
use crate::utils::BackupError;

/// Pipeline step a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Connect,
    FetchIdentity,
    TriggerExport,
    DownloadExport,
    CheckExisting,
    TriggerBackup,
    DownloadBackup,
    StoreExport,
    StoreBackup,
    /// The device task itself died
    Task,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Connect => "connect",
            Stage::FetchIdentity => "identity",
            Stage::TriggerExport => "export",
            Stage::DownloadExport => "export download",
            Stage::CheckExisting => "change check",
            Stage::TriggerBackup => "backup",
            Stage::DownloadBackup => "backup download",
            Stage::StoreExport => "export upload",
            Stage::StoreBackup => "backup upload",
            Stage::Task => "device task",
        };
        f.write_str(name)
    }
}

/// A stage failure with the device and stage it belongs to.
#[derive(Debug, Error)]
#[error("{host}: {stage} failed: {source}")]
pub struct PipelineError {
    pub host: String,
    pub stage: Stage,
    #[source]
    pub source: BackupError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub name: String,
    pub outcome: StoreOutcome,
}

/// Terminal state of one device pipeline.
#[derive(Debug)]
pub enum DeviceOutcome {
    /// Configuration unchanged since the last stored export
    Skipped { identity: String },
    Stored {
        identity: String,
        artifacts: Vec<StoredArtifact>,
    },
    /// `stored` lists what was written before the failure; it stays written.
    Failed {
        error: PipelineError,
        stored: Vec<StoredArtifact>,
    },
}

impl DeviceOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, DeviceOutcome::Failed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, DeviceOutcome::Skipped { .. })
    }

    pub fn is_timed_out(&self) -> bool {
        matches!(self, DeviceOutcome::Failed { error, .. } if error.source.is_timeout())
    }
}

#[derive(Debug)]
pub struct DeviceReport {
    pub host: String,
    pub outcome: DeviceOutcome,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub devices: Vec<DeviceReport>,
}

impl RunReport {
    pub fn stored(&self) -> usize {
        self.count(|o| matches!(o, DeviceOutcome::Stored { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(DeviceOutcome::is_skipped)
    }

    pub fn failed(&self) -> usize {
        self.count(DeviceOutcome::is_failed)
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn device(&self, host: &str) -> Option<&DeviceReport> {
        self.devices.iter().find(|d| d.host == host)
    }

    fn count(&self, pred: impl Fn(&DeviceOutcome) -> bool) -> usize {
        self.devices.iter().filter(|d| pred(&d.outcome)).count()
    }
}
