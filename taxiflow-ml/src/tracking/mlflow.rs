//! MLflow tracking server client (REST API 2.0).

use super::{
    ExperimentId, ModelVersion, RunHandle, RunId, RunStatus, TrackingSink, artifact_relative_path,
    runs_uri,
};
use crate::error::MlError;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::Path;
use tracing::{debug, info, warn};
use url::Url;

const RESOURCE_DOES_NOT_EXIST: &str = "RESOURCE_DOES_NOT_EXIST";
const RESOURCE_ALREADY_EXISTS: &str = "RESOURCE_ALREADY_EXISTS";

/// Error body returned by the tracking server.
#[derive(Debug)]
struct ApiError {
    endpoint: String,
    status: u16,
    code: String,
    message: String,
}

impl From<ApiError> for MlError {
    fn from(e: ApiError) -> Self {
        MlError::tracking(format!(
            "{} returned HTTP {} ({}): {}",
            e.endpoint, e.status, e.code, e.message
        ))
    }
}

/// Client for an MLflow tracking server, e.g. `http://127.0.0.1:5000`.
pub struct MlflowClient {
    client: reqwest::Client,
    base: String,
}

impl MlflowClient {
    pub fn new(client: reqwest::Client, tracking_uri: &str) -> Result<Self, MlError> {
        let url = Url::parse(tracking_uri).map_err(|e| {
            MlError::invalid_input(format!("invalid tracking uri '{tracking_uri}': {e}"))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(MlError::invalid_input(format!(
                "tracking uri must be http(s), got '{tracking_uri}'"
            )));
        }
        Ok(Self {
            client,
            base: url.as_str().trim_end_matches('/').to_string(),
        })
    }

    pub fn tracking_uri(&self) -> &str {
        &self.base
    }

    fn api(&self, endpoint: &str) -> String {
        format!("{}/api/2.0/mlflow/{endpoint}", self.base)
    }

    fn artifact_url(&self, run: &RunHandle, relative: &str) -> String {
        let encoded: Vec<_> = relative.split('/').map(urlencoding::encode).collect();
        format!(
            "{}/api/2.0/mlflow-artifacts/artifacts/{}/{}/artifacts/{}",
            self.base,
            urlencoding::encode(run.experiment_id.as_str()),
            urlencoding::encode(run.run_id.as_str()),
            encoded.join("/")
        )
    }

    /// Send a request; the outer error is transport, the inner one is the
    /// server's error body.
    async fn send(
        &self,
        endpoint: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<Result<Value, ApiError>, MlError> {
        let response = request.send().await.map_err(|e| {
            MlError::tracking(format!("request to {endpoint} failed: {e}"))
        })?;
        let status = response.status();
        let body = response.text().await?;
        debug!(endpoint, status = status.as_u16(), "MLflow response");

        if !status.is_success() {
            let parsed: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
            return Ok(Err(ApiError {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                code: parsed
                    .get("error_code")
                    .and_then(Value::as_str)
                    .unwrap_or("UNKNOWN")
                    .to_string(),
                message: parsed
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or(body),
            }));
        }

        if body.trim().is_empty() {
            return Ok(Ok(json!({})));
        }
        Ok(Ok(serde_json::from_str(&body)?))
    }

    async fn post(&self, endpoint: &str, body: Value) -> Result<Value, MlError> {
        let request = self.client.post(self.api(endpoint)).json(&body);
        Ok(self.send(endpoint, request).await??)
    }

    async fn get(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<Value, MlError> {
        let request = self.client.get(self.api(endpoint)).query(query);
        Ok(self.send(endpoint, request).await??)
    }

    async fn artifact_uri(&self, run_id: &RunId) -> Result<String, MlError> {
        let run = self.get("runs/get", &[("run_id", run_id.as_str())]).await?;
        Ok(required_str(&run, "/run/info/artifact_uri", "runs/get")?.to_string())
    }
}

fn required_str<'a>(value: &'a Value, pointer: &str, endpoint: &str) -> Result<&'a str, MlError> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .ok_or_else(|| MlError::tracking(format!("{endpoint} response is missing {pointer}")))
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[async_trait]
impl TrackingSink for MlflowClient {
    async fn set_experiment(&self, name: &str) -> Result<ExperimentId, MlError> {
        let endpoint = "experiments/get-by-name";
        let request = self
            .client
            .get(self.api(endpoint))
            .query(&[("experiment_name", name)]);

        match self.send(endpoint, request).await? {
            Ok(found) => {
                let id = required_str(&found, "/experiment/experiment_id", endpoint)?;
                Ok(ExperimentId::new(id))
            }
            Err(e) if e.code == RESOURCE_DOES_NOT_EXIST || e.status == 404 => {
                info!(experiment = name, "Creating MLflow experiment");
                let created = self
                    .post("experiments/create", json!({ "name": name }))
                    .await?;
                let id = required_str(&created, "/experiment_id", "experiments/create")?;
                Ok(ExperimentId::new(id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn start_run(&self, experiment: &ExperimentId) -> Result<RunHandle, MlError> {
        let created = self
            .post(
                "runs/create",
                json!({
                    "experiment_id": experiment.as_str(),
                    "start_time": now_millis(),
                }),
            )
            .await?;
        let run_id = RunId::new(required_str(&created, "/run/info/run_id", "runs/create")?);
        info!(run_id = %run_id, experiment_id = %experiment, "Started MLflow run");
        Ok(RunHandle {
            run_id,
            experiment_id: experiment.clone(),
        })
    }

    async fn log_param(&self, run: &RunHandle, key: &str, value: &str) -> Result<(), MlError> {
        self.post(
            "runs/log-parameter",
            json!({ "run_id": run.run_id.as_str(), "key": key, "value": value }),
        )
        .await?;
        Ok(())
    }

    async fn log_metric(&self, run: &RunHandle, key: &str, value: f64) -> Result<(), MlError> {
        // JSON has no NaN or infinity; serde_json would send null.
        if !value.is_finite() {
            return Err(MlError::evaluation(format!(
                "metric '{key}' is not a finite number: {value}"
            )));
        }
        self.post(
            "runs/log-metric",
            json!({
                "run_id": run.run_id.as_str(),
                "key": key,
                "value": value,
                "timestamp": now_millis(),
                "step": 0,
            }),
        )
        .await?;
        Ok(())
    }

    async fn set_tag(&self, run: &RunHandle, key: &str, value: &str) -> Result<(), MlError> {
        self.post(
            "runs/set-tag",
            json!({ "run_id": run.run_id.as_str(), "key": key, "value": value }),
        )
        .await?;
        Ok(())
    }

    async fn log_artifact(
        &self,
        run: &RunHandle,
        local_path: &Path,
        artifact_path: Option<&str>,
    ) -> Result<(), MlError> {
        let relative = artifact_relative_path(local_path, artifact_path)?;
        let data = tokio::fs::read(local_path).await?;
        let size = data.len();
        let endpoint = "mlflow-artifacts/artifacts";
        let request = self
            .client
            .put(self.artifact_url(run, &relative))
            .header("content-type", "application/octet-stream")
            .body(data);
        self.send(endpoint, request).await??;
        info!(run_id = %run.run_id, artifact = %relative, size, "Uploaded artifact");
        Ok(())
    }

    async fn end_run(&self, run: &RunHandle, status: RunStatus) -> Result<(), MlError> {
        self.post(
            "runs/update",
            json!({
                "run_id": run.run_id.as_str(),
                "status": status.as_str(),
                "end_time": now_millis(),
            }),
        )
        .await?;
        Ok(())
    }

    async fn search_best_run(
        &self,
        experiment: &ExperimentId,
        metric: &str,
    ) -> Result<RunId, MlError> {
        let found = self
            .post(
                "runs/search",
                json!({
                    "experiment_ids": [experiment.as_str()],
                    "filter": "",
                    "run_view_type": "ACTIVE_ONLY",
                    "max_results": 1,
                    "order_by": [format!("metrics.{metric} ASC")],
                }),
            )
            .await?;
        let run_id = found
            .pointer("/runs/0/info/run_id")
            .and_then(Value::as_str)
            .ok_or_else(|| MlError::not_found(format!("no active runs in experiment {experiment}")))?;
        Ok(RunId::new(run_id))
    }

    async fn register_model(
        &self,
        run_id: &RunId,
        artifact_path: &str,
        name: &str,
    ) -> Result<ModelVersion, MlError> {
        let endpoint = "registered-models/create";
        let request = self
            .client
            .post(self.api(endpoint))
            .json(&json!({ "name": name }));
        match self.send(endpoint, request).await? {
            Ok(_) => info!(model = name, "Created registered model"),
            Err(e) if e.code == RESOURCE_ALREADY_EXISTS => {
                debug!(model = name, "Registered model already exists");
            }
            Err(e) => return Err(e.into()),
        }

        let source = format!(
            "{}/{}",
            self.artifact_uri(run_id).await?.trim_end_matches('/'),
            artifact_path.trim_matches('/')
        );
        let created = self
            .post(
                "model-versions/create",
                json!({ "name": name, "source": source, "run_id": run_id.as_str() }),
            )
            .await?;
        let version = required_str(&created, "/model_version/version", "model-versions/create")?;
        if created.pointer("/model_version/status").and_then(Value::as_str) == Some("FAILED_REGISTRATION") {
            warn!(model = name, version, "Model version registration reported failure");
        }

        Ok(ModelVersion {
            name: name.to_string(),
            version: version.to_string(),
            source: runs_uri(run_id, artifact_path),
            run_id: run_id.clone(),
        })
    }
}
