//! Device orchestrator - runs the backup pipeline for every device.
//!
//! Each device gets its own task and its own deadline. Within a device the
//! stages run strictly one after another:
//!
//! ```text
//! Start -> IdentityKnown -> ExportRequested -> ChangeEvaluated
//!   -> Skipped
//!   -> BackupRequested -> Downloaded -> Stored
//! ```
//!
//! Any stage error ends the pipeline in `Failed`. Nothing is retried and
//! nothing already written is rolled back.

pub mod report;

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::artifact::{Artifact, StageResult};
use crate::change::{decide, ChangeDecision};
use crate::device::{DeviceClient, DeviceTarget};
use crate::store::SharedStore;
use crate::utils::{BackupError, CancelReason};
pub use report::{DeviceOutcome, DeviceReport, PipelineError, RunReport, Stage, StoredArtifact};

enum PipelineState {
    Start,
    IdentityKnown {
        identity: String,
    },
    ExportRequested {
        identity: String,
        export_name: String,
    },
    ChangeEvaluated {
        identity: String,
        export: Artifact,
        decision: ChangeDecision,
    },
    BackupRequested {
        identity: String,
        export: Artifact,
        backup_name: String,
    },
    Downloaded {
        identity: String,
        export: Artifact,
        backup: Artifact,
    },
    Skipped {
        identity: String,
    },
    Stored {
        identity: String,
    },
    Failed(PipelineError),
}

/// Backup pipeline for a single device.
pub struct DevicePipeline {
    client: DeviceClient,
    store: SharedStore,
    cancel: CancellationToken,
    host: String,
    timeout: Duration,
    deadline: Instant,
    stored: Vec<StoredArtifact>,
}

impl DevicePipeline {
    /// The deadline starts counting when the pipeline is created.
    pub fn new(client: DeviceClient, store: SharedStore, cancel: CancellationToken) -> Self {
        let host = client.target().host();
        let timeout = client.target().timeout;
        Self {
            client,
            store,
            cancel,
            host,
            timeout,
            deadline: Instant::now() + timeout,
            stored: Vec::new(),
        }
    }

    pub async fn run(mut self) -> DeviceOutcome {
        let mut state = PipelineState::Start;
        loop {
            state = match state {
                PipelineState::Skipped { identity } => {
                    return DeviceOutcome::Skipped { identity };
                }
                PipelineState::Stored { identity } => {
                    return DeviceOutcome::Stored {
                        identity,
                        artifacts: self.stored,
                    };
                }
                PipelineState::Failed(error) => {
                    return DeviceOutcome::Failed {
                        error,
                        stored: self.stored,
                    };
                }
                active => self.step(active).await.unwrap_or_else(PipelineState::Failed),
            };
        }
    }

    async fn step(&mut self, state: PipelineState) -> Result<PipelineState, PipelineError> {
        let next = match state {
            PipelineState::Start => {
                let identity = self
                    .guard(Stage::FetchIdentity, self.client.fetch_identity())
                    .await?;
                PipelineState::IdentityKnown { identity }
            }
            PipelineState::IdentityKnown { identity } => {
                let export_name = self
                    .guard(Stage::TriggerExport, self.client.trigger_export(&identity))
                    .await?;
                PipelineState::ExportRequested {
                    identity,
                    export_name,
                }
            }
            PipelineState::ExportRequested {
                identity,
                export_name,
            } => {
                let export = self
                    .guard(
                        Stage::DownloadExport,
                        self.client.download(&export_name, self.deadline),
                    )
                    .await?;
                let remote = self.stored_checksum(&export_name).await?;
                let decision = decide(export.checksum_excluding_header(), remote.as_deref());
                PipelineState::ChangeEvaluated {
                    identity,
                    export,
                    decision,
                }
            }
            PipelineState::ChangeEvaluated {
                identity,
                export: _,
                decision: ChangeDecision::Unchanged,
            } => {
                info!(identity = %identity, "config has not changed, skipping backup");
                PipelineState::Skipped { identity }
            }
            PipelineState::ChangeEvaluated {
                identity,
                export,
                decision: ChangeDecision::Changed,
            } => {
                info!(identity = %identity, "config has changed, proceeding with backup");
                let encryption_key = self.client.target().encryption_key.clone();
                let backup_name = self
                    .guard(
                        Stage::TriggerBackup,
                        self.client.trigger_backup(&identity, &encryption_key),
                    )
                    .await?;
                PipelineState::BackupRequested {
                    identity,
                    export,
                    backup_name,
                }
            }
            PipelineState::BackupRequested {
                identity,
                export,
                backup_name,
            } => {
                let backup = self
                    .guard(
                        Stage::DownloadBackup,
                        self.client.download(&backup_name, self.deadline),
                    )
                    .await?;
                info!(file = %backup.name(), bytes = backup.len(), "backup file downloaded");
                PipelineState::Downloaded {
                    identity,
                    export,
                    backup,
                }
            }
            PipelineState::Downloaded {
                identity,
                export,
                backup,
            } => {
                self.store(Stage::StoreExport, &export).await?;
                self.store(Stage::StoreBackup, &backup).await?;
                PipelineState::Stored { identity }
            }
            terminal => terminal,
        };
        Ok(next)
    }

    /// Checksum recorded with the previous export.
    ///
    /// A store that cannot answer is treated like one that has nothing, so the
    /// backup still runs. Cancellation is not swallowed.
    async fn stored_checksum(&self, export_name: &str) -> Result<Option<String>, PipelineError> {
        let lookup = async { Ok::<_, BackupError>(self.store.existing_checksum(export_name).await) };
        match self.guard(Stage::CheckExisting, lookup).await? {
            Ok(checksum) => Ok(checksum),
            Err(e) => {
                warn!(file = %export_name, "cannot read stored checksum, assuming changed: {}", e);
                Ok(None)
            }
        }
    }

    async fn store(&mut self, stage: Stage, artifact: &Artifact) -> Result<(), PipelineError> {
        let metadata = &self.client.target().metadata;
        let put = async {
            self.store
                .put(artifact, metadata)
                .await
                .map_err(BackupError::from)
        };
        let outcome = self.guard(stage, put).await?;
        self.stored.push(StoredArtifact {
            name: artifact.name().to_string(),
            outcome,
        });
        Ok(())
    }

    /// Run one stage against the shutdown token and the device deadline.
    ///
    /// Dropping `fut` aborts in-flight HTTP requests; blocking SCP sessions
    /// only stop at their own timeout.
    async fn guard<T, F>(&self, stage: Stage, fut: F) -> Result<T, PipelineError>
    where
        F: Future<Output = StageResult<T>>,
    {
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(BackupError::Cancelled(CancelReason::Shutdown)),
            _ = tokio::time::sleep_until(self.deadline) => {
                Err(BackupError::Cancelled(CancelReason::TimedOut(self.timeout)))
            }
            result = fut => result,
        };

        result.map_err(|source| PipelineError {
            host: self.host.clone(),
            stage,
            source,
        })
    }
}

/// Runs one pipeline per device, all at once.
pub struct Orchestrator {
    store: SharedStore,
    http_timeout: Duration,
    cancel_token: CancellationToken,
}

impl Orchestrator {
    pub fn new(store: SharedStore, http_timeout: Duration) -> Self {
        Self::with_cancel(store, http_timeout, CancellationToken::new())
    }

    /// Cancelling `cancel_token` stops every device at its next suspension point.
    pub fn with_cancel(
        store: SharedStore,
        http_timeout: Duration,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            store,
            http_timeout,
            cancel_token,
        }
    }

    /// Back up every target concurrently and wait for all of them.
    ///
    /// A failing device never affects the others.
    pub async fn run_all(&self, targets: Vec<DeviceTarget>) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, devices = targets.len(), store = %self.store.describe(), "starting backup run");

        let run_started = std::time::Instant::now();
        let mut handles = Vec::with_capacity(targets.len());
        for target in targets {
            let host = target.host();
            let span = info_span!("device", host = %host);
            let store = Arc::clone(&self.store);
            let cancel = self.cancel_token.child_token();
            let http_timeout = self.http_timeout;

            let handle = tokio::spawn(
                async move { run_device(target, store, http_timeout, cancel).await }.instrument(span),
            );
            handles.push((host, handle));
        }

        let mut devices = Vec::with_capacity(handles.len());
        for (host, handle) in handles {
            let report = match handle.await {
                Ok(report) => report,
                Err(e) => task_failure(host, run_started.elapsed(), e),
            };
            devices.push(report);
        }

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            devices,
        };
        info!(
            %run_id,
            stored = report.stored(),
            skipped = report.skipped(),
            failed = report.failed(),
            "backup run finished"
        );
        report
    }
}

/// Report for a device task that panicked or was aborted.
///
/// Only that device is marked failed; its siblings keep their reports.
fn task_failure(host: String, elapsed: Duration, err: JoinError) -> DeviceReport {
    let source = if err.is_panic() {
        let payload = err.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|m| m.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        BackupError::Transport(format!("device task panicked: {}", message))
    } else {
        BackupError::Cancelled(CancelReason::Shutdown)
    };

    let error = PipelineError {
        host: host.clone(),
        stage: Stage::Task,
        source,
    };
    error!(host = %host, "{}", error);

    DeviceReport {
        host,
        outcome: DeviceOutcome::Failed {
            error,
            stored: Vec::new(),
        },
        elapsed,
    }
}

/// Run the full pipeline for one device and log how it ended.
pub async fn run_device(
    target: DeviceTarget,
    store: SharedStore,
    http_timeout: Duration,
    cancel: CancellationToken,
) -> DeviceReport {
    let host = target.host();
    let started = std::time::Instant::now();
    info!(timeout = ?target.timeout, transfer = ?target.transfer, "backing up device");

    let outcome = match DeviceClient::new(target, http_timeout) {
        Ok(client) => DevicePipeline::new(client, store, cancel).run().await,
        Err(source) => DeviceOutcome::Failed {
            error: PipelineError {
                host: host.clone(),
                stage: Stage::Connect,
                source,
            },
            stored: Vec::new(),
        },
    };

    match &outcome {
        DeviceOutcome::Skipped { identity } => {
            info!(identity = %identity, "device unchanged, nothing stored");
        }
        DeviceOutcome::Stored {
            identity,
            artifacts,
        } => {
            info!(identity = %identity, artifacts = artifacts.len(), "backup completed successfully");
        }
        DeviceOutcome::Failed { error, stored } => {
            error!(stage = %error.stage, "{}", error);
            if !stored.is_empty() {
                let names: Vec<&str> = stored.iter().map(|a| a.name.as_str()).collect();
                warn!(stored = ?names, "backup incomplete, earlier artifacts were kept");
            }
        }
    }

    DeviceReport {
        host,
        outcome,
        elapsed: started.elapsed(),
    }
}
