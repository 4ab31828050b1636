//! Tracking sink that keeps everything in process memory.

use super::store::{ArtifactRecord, RunRecord, TrackingStore};
use super::{
    ExperimentId, ModelVersion, RunHandle, RunId, RunStatus, TrackingSink, artifact_relative_path,
};
use crate::artifact::sha256_file;
use crate::error::MlError;
use async_trait::async_trait;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Records runs in memory. Artifacts are fingerprinted, not copied.
#[derive(Debug, Default)]
pub struct InMemoryTracker {
    store: Mutex<TrackingStore>,
}

impl InMemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self) -> MutexGuard<'_, TrackingStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> TrackingStore {
        self.store().clone()
    }

    pub fn run(&self, run_id: &RunId) -> Option<RunRecord> {
        self.store().run(run_id).cloned()
    }
}

#[async_trait]
impl TrackingSink for InMemoryTracker {
    async fn set_experiment(&self, name: &str) -> Result<ExperimentId, MlError> {
        Ok(self.store().set_experiment(name))
    }

    async fn start_run(&self, experiment: &ExperimentId) -> Result<RunHandle, MlError> {
        self.store().start_run(experiment)
    }

    async fn log_param(&self, run: &RunHandle, key: &str, value: &str) -> Result<(), MlError> {
        self.store().log_param(&run.run_id, key, value)
    }

    async fn log_metric(&self, run: &RunHandle, key: &str, value: f64) -> Result<(), MlError> {
        self.store().log_metric(&run.run_id, key, value)
    }

    async fn set_tag(&self, run: &RunHandle, key: &str, value: &str) -> Result<(), MlError> {
        self.store().set_tag(&run.run_id, key, value)
    }

    async fn log_artifact(
        &self,
        run: &RunHandle,
        local_path: &Path,
        artifact_path: Option<&str>,
    ) -> Result<(), MlError> {
        let record = ArtifactRecord {
            path: artifact_relative_path(local_path, artifact_path)?,
            size: std::fs::metadata(local_path)?.len(),
            sha256: sha256_file(local_path)?,
        };
        self.store().add_artifact(&run.run_id, record)
    }

    async fn end_run(&self, run: &RunHandle, status: RunStatus) -> Result<(), MlError> {
        self.store().end_run(&run.run_id, status)
    }

    async fn search_best_run(
        &self,
        experiment: &ExperimentId,
        metric: &str,
    ) -> Result<RunId, MlError> {
        self.store().search_best_run(experiment, metric)
    }

    async fn register_model(
        &self,
        run_id: &RunId,
        artifact_path: &str,
        name: &str,
    ) -> Result<ModelVersion, MlError> {
        self.store().register_model(run_id, artifact_path, name)
    }
}
