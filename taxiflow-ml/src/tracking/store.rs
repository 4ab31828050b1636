//! In-process tracking state shared by the memory and file sinks.

use super::{ExperimentId, ModelVersion, RunHandle, RunId, RunStatus, runs_uri};
use crate::error::MlError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRecord {
    pub id: ExperimentId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub key: String,
    pub value: f64,
    pub step: i64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Path relative to the run's artifact root.
    pub path: String,
    pub size: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub experiment_id: ExperimentId,
    pub status: RunStatus,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub metrics: Vec<MetricRecord>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactRecord>,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl RunRecord {
    /// Most recent value logged for `key`.
    pub fn latest_metric(&self, key: &str) -> Option<f64> {
        self.metrics
            .iter()
            .rev()
            .find(|m| m.key == key)
            .map(|m| m.value)
    }

    pub fn metric_count(&self, key: &str) -> usize {
        self.metrics.iter().filter(|m| m.key == key).count()
    }

    pub fn artifact(&self, path: &str) -> Option<&ArtifactRecord> {
        self.artifacts.iter().find(|a| a.path == path)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredModel {
    pub name: String,
    pub versions: Vec<ModelVersion>,
}

/// Experiments, runs, and registered models.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackingStore {
    #[serde(default)]
    pub experiments: Vec<ExperimentRecord>,
    #[serde(default)]
    pub runs: Vec<RunRecord>,
    #[serde(default)]
    pub models: Vec<RegisteredModel>,
}

impl TrackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_experiment(&mut self, name: &str) -> ExperimentId {
        if let Some(exp) = self.experiments.iter().find(|e| e.name == name) {
            return exp.id.clone();
        }
        let id = ExperimentId::new(self.experiments.len().to_string());
        self.experiments.push(ExperimentRecord {
            id: id.clone(),
            name: name.to_string(),
            created_at: Utc::now(),
        });
        id
    }

    pub fn start_run(&mut self, experiment: &ExperimentId) -> Result<RunHandle, MlError> {
        if !self.experiments.iter().any(|e| &e.id == experiment) {
            return Err(MlError::not_found(format!("experiment {experiment}")));
        }
        let run_id = RunId::new(uuid::Uuid::new_v4().simple().to_string());
        self.runs.push(RunRecord {
            run_id: run_id.clone(),
            experiment_id: experiment.clone(),
            status: RunStatus::Running,
            params: BTreeMap::new(),
            metrics: Vec::new(),
            tags: BTreeMap::new(),
            artifacts: Vec::new(),
            start_time: Utc::now(),
            end_time: None,
        });
        Ok(RunHandle {
            run_id,
            experiment_id: experiment.clone(),
        })
    }

    pub fn run(&self, run_id: &RunId) -> Option<&RunRecord> {
        self.runs.iter().find(|r| &r.run_id == run_id)
    }

    fn run_mut(&mut self, run_id: &RunId) -> Result<&mut RunRecord, MlError> {
        self.runs
            .iter_mut()
            .find(|r| &r.run_id == run_id)
            .ok_or_else(|| MlError::not_found(format!("run {run_id}")))
    }

    /// Parameters are write-once: re-logging the same value is accepted,
    /// changing it is an error.
    pub fn log_param(&mut self, run_id: &RunId, key: &str, value: &str) -> Result<(), MlError> {
        let run = self.run_mut(run_id)?;
        match run.params.get(key) {
            Some(existing) if existing != value => Err(MlError::tracking(format!(
                "param '{key}' already logged as '{existing}', refusing '{value}'"
            ))),
            _ => {
                run.params.insert(key.to_string(), value.to_string());
                Ok(())
            }
        }
    }

    pub fn log_metric(&mut self, run_id: &RunId, key: &str, value: f64) -> Result<(), MlError> {
        let run = self.run_mut(run_id)?;
        let step = run.metric_count(key) as i64;
        run.metrics.push(MetricRecord {
            key: key.to_string(),
            value,
            step,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    pub fn set_tag(&mut self, run_id: &RunId, key: &str, value: &str) -> Result<(), MlError> {
        self.run_mut(run_id)?
            .tags
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    pub fn add_artifact(&mut self, run_id: &RunId, artifact: ArtifactRecord) -> Result<(), MlError> {
        let run = self.run_mut(run_id)?;
        run.artifacts.retain(|a| a.path != artifact.path);
        run.artifacts.push(artifact);
        Ok(())
    }

    pub fn end_run(&mut self, run_id: &RunId, status: RunStatus) -> Result<(), MlError> {
        let run = self.run_mut(run_id)?;
        run.status = status;
        run.end_time = Some(Utc::now());
        Ok(())
    }

    /// Lowest latest value of `metric` among the experiment's runs. Runs that
    /// never logged the metric are not candidates.
    pub fn search_best_run(&self, experiment: &ExperimentId, metric: &str) -> Result<RunId, MlError> {
        self.runs
            .iter()
            .filter(|r| &r.experiment_id == experiment)
            .filter_map(|r| r.latest_metric(metric).map(|v| (v, r)))
            .filter(|(v, _)| !v.is_nan())
            .min_by(|(a, _), (b, _)| a.total_cmp(b))
            .map(|(_, r)| r.run_id.clone())
            .ok_or_else(|| {
                MlError::not_found(format!(
                    "no run in experiment {experiment} has metric '{metric}'"
                ))
            })
    }

    pub fn register_model(
        &mut self,
        run_id: &RunId,
        artifact_path: &str,
        name: &str,
    ) -> Result<ModelVersion, MlError> {
        if self.run(run_id).is_none() {
            return Err(MlError::not_found(format!("run {run_id}")));
        }
        let index = match self.models.iter().position(|m| m.name == name) {
            Some(i) => i,
            None => {
                self.models.push(RegisteredModel {
                    name: name.to_string(),
                    versions: Vec::new(),
                });
                self.models.len() - 1
            }
        };
        let model = &mut self.models[index];
        let version = ModelVersion {
            name: name.to_string(),
            version: (model.versions.len() + 1).to_string(),
            source: runs_uri(run_id, artifact_path),
            run_id: run_id.clone(),
        };
        model.versions.push(version.clone());
        Ok(version)
    }
}
