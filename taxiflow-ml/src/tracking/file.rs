//! Tracking sink backed by a JSON file and an artifact directory.
//!
//! Layout under the store root:
//!
//! ```text
//! tracking.json
//! <run_id>/artifacts/<artifact_path>/<file>
//! ```

use super::store::{ArtifactRecord, TrackingStore};
use super::{
    ExperimentId, ModelVersion, RunHandle, RunId, RunStatus, TrackingSink, artifact_relative_path,
};
use crate::artifact::{atomic_write_json, load_json, sha256_file};
use crate::error::MlError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

const STORE_FILE: &str = "tracking.json";

pub struct FileTracker {
    root: PathBuf,
    store: Mutex<TrackingStore>,
}

impl FileTracker {
    /// Open the store at `root`, starting empty if it doesn't exist yet.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, MlError> {
        let root = root.into();
        let store = load_json(&root.join(STORE_FILE))?.unwrap_or_default();
        Ok(Self {
            root,
            store: Mutex::new(store),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding a run's artifacts.
    pub fn artifact_dir(&self, run_id: &RunId) -> PathBuf {
        self.root.join(run_id.as_str()).join("artifacts")
    }

    pub fn snapshot(&self) -> TrackingStore {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, TrackingStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `change` and persist the store.
    fn update<T>(
        &self,
        change: impl FnOnce(&mut TrackingStore) -> Result<T, MlError>,
    ) -> Result<T, MlError> {
        let mut store = self.lock();
        let out = change(&mut store)?;
        atomic_write_json(&self.root.join(STORE_FILE), &*store)?;
        Ok(out)
    }
}

#[async_trait]
impl TrackingSink for FileTracker {
    async fn set_experiment(&self, name: &str) -> Result<ExperimentId, MlError> {
        self.update(|s| Ok(s.set_experiment(name)))
    }

    async fn start_run(&self, experiment: &ExperimentId) -> Result<RunHandle, MlError> {
        self.update(|s| s.start_run(experiment))
    }

    async fn log_param(&self, run: &RunHandle, key: &str, value: &str) -> Result<(), MlError> {
        self.update(|s| s.log_param(&run.run_id, key, value))
    }

    async fn log_params(&self, run: &RunHandle, params: &[(String, String)]) -> Result<(), MlError> {
        self.update(|s| {
            for (key, value) in params {
                s.log_param(&run.run_id, key, value)?;
            }
            Ok(())
        })
    }

    async fn log_metric(&self, run: &RunHandle, key: &str, value: f64) -> Result<(), MlError> {
        self.update(|s| s.log_metric(&run.run_id, key, value))
    }

    async fn set_tag(&self, run: &RunHandle, key: &str, value: &str) -> Result<(), MlError> {
        self.update(|s| s.set_tag(&run.run_id, key, value))
    }

    async fn log_artifact(
        &self,
        run: &RunHandle,
        local_path: &Path,
        artifact_path: Option<&str>,
    ) -> Result<(), MlError> {
        let known = self.lock().run(&run.run_id).is_some();
        if !known {
            return Err(MlError::not_found(format!("run {}", run.run_id)));
        }
        let relative = artifact_relative_path(local_path, artifact_path)?;
        let dest = self.artifact_dir(&run.run_id).join(&relative);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let size = tokio::fs::copy(local_path, &dest).await?;
        debug!(run_id = %run.run_id, artifact = %relative, size, "Artifact stored");

        let record = ArtifactRecord {
            path: relative,
            size,
            sha256: sha256_file(&dest)?,
        };
        self.update(|s| s.add_artifact(&run.run_id, record))
    }

    async fn end_run(&self, run: &RunHandle, status: RunStatus) -> Result<(), MlError> {
        self.update(|s| s.end_run(&run.run_id, status))
    }

    async fn search_best_run(
        &self,
        experiment: &ExperimentId,
        metric: &str,
    ) -> Result<RunId, MlError> {
        self.lock().search_best_run(experiment, metric)
    }

    async fn register_model(
        &self,
        run_id: &RunId,
        artifact_path: &str,
        name: &str,
    ) -> Result<ModelVersion, MlError> {
        self.update(|s| s.register_model(run_id, artifact_path, name))
    }
}
