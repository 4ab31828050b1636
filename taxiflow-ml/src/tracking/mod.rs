//! Experiment tracking: runs, parameters, metrics, artifacts, and the model
//! registry.
//!
//! Pipelines talk to a [`TrackingSink`]. Three sinks ship with the crate:
//! [`MlflowClient`] for a tracking server, [`FileTracker`] for a local JSON
//! store, and [`InMemoryTracker`] for tests and dry runs.

pub mod file;
pub mod memory;
pub mod mlflow;
pub mod store;

pub use file::FileTracker;
pub use memory::InMemoryTracker;
pub use mlflow::MlflowClient;
pub use store::{ArtifactRecord, MetricRecord, RunRecord, TrackingStore};

use crate::error::MlError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Tracking-server identifier of a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tracking-server identifier of an experiment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExperimentId(String);

impl ExperimentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExperimentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An open run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunHandle {
    pub run_id: RunId,
    pub experiment_id: ExperimentId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Finished,
    Failed,
    Killed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Finished => "FINISHED",
            RunStatus::Failed => "FAILED",
            RunStatus::Killed => "KILLED",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered model version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub name: String,
    pub version: String,
    pub source: String,
    pub run_id: RunId,
}

/// Destination for run parameters, metrics, tags, and artifacts.
#[async_trait]
pub trait TrackingSink: Send + Sync {
    /// Resolve an experiment by name, creating it if needed.
    async fn set_experiment(&self, name: &str) -> Result<ExperimentId, MlError>;

    async fn start_run(&self, experiment: &ExperimentId) -> Result<RunHandle, MlError>;

    async fn log_param(&self, run: &RunHandle, key: &str, value: &str) -> Result<(), MlError>;

    async fn log_params(&self, run: &RunHandle, params: &[(String, String)]) -> Result<(), MlError> {
        for (key, value) in params {
            self.log_param(run, key, value).await?;
        }
        Ok(())
    }

    async fn log_metric(&self, run: &RunHandle, key: &str, value: f64) -> Result<(), MlError>;

    async fn set_tag(&self, run: &RunHandle, key: &str, value: &str) -> Result<(), MlError>;

    /// Upload `local_path` under `artifact_path` (run root when `None`).
    async fn log_artifact(
        &self,
        run: &RunHandle,
        local_path: &Path,
        artifact_path: Option<&str>,
    ) -> Result<(), MlError>;

    async fn end_run(&self, run: &RunHandle, status: RunStatus) -> Result<(), MlError>;

    /// Active run of `experiment` with the lowest value of `metric`.
    async fn search_best_run(
        &self,
        experiment: &ExperimentId,
        metric: &str,
    ) -> Result<RunId, MlError>;

    /// Register the run's `artifact_path` as a new version of model `name`.
    async fn register_model(
        &self,
        run_id: &RunId,
        artifact_path: &str,
        name: &str,
    ) -> Result<ModelVersion, MlError>;
}

/// `runs:/<run_id>/<artifact_path>`
pub fn runs_uri(run_id: &RunId, artifact_path: &str) -> String {
    format!("runs:/{run_id}/{}", artifact_path.trim_matches('/'))
}

fn artifact_file_name(local_path: &Path) -> Result<String, MlError> {
    local_path
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            MlError::invalid_input(format!("artifact path {} has no file name", local_path.display()))
        })
}

/// Relative location of an uploaded artifact inside its run.
fn artifact_relative_path(local_path: &Path, artifact_path: Option<&str>) -> Result<String, MlError> {
    let file_name = artifact_file_name(local_path)?;
    Ok(match artifact_path.map(|p| p.trim_matches('/')) {
        Some(dir) if !dir.is_empty() => format!("{dir}/{file_name}"),
        _ => file_name,
    })
}
