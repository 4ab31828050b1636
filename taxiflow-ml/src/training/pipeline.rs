//! Trip-duration training flows.
//!
//! [`DurationPipeline`] trains gradient-boosted trees on one month and
//! validates on the next. [`BaselinePipeline`] fits a linear regression on a
//! single month of yellow-taxi data, scores on the training set, and
//! registers the best run. Both run as a
//! [`Flow`] so every read, encode, train, and register step is recorded and
//! retried according to its [`TaskPolicy`].

use crate::algorithms::{GradientBoosting, LinearRegression, LinearRegressionParams};
use crate::data::{TripSource, TripTable, TripWindow};
use crate::error::MlError;
use crate::features::{DesignMatrix, DictVectorizer, FeatureSet, encode};
use crate::tracking::{ModelVersion, RunHandle, RunId, RunStatus, TrackingSink};
use crate::training::metrics::RegressionMetrics;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use taxiflow_core::{
    AppConfig, BoosterParams, Flow, FlowContext, FlowRun, TaskContext, TaskObserver, TaskPolicy, TaxiColor,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const ENCODER_FILE: &str = "preprocessor.b";
pub const ENCODER_ARTIFACT_PATH: &str = "preprocessor";
pub const RMSE_METRIC: &str = "rmse";

/// Model family a flow trains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// XGBoost regression trees.
    Booster,
    /// Least squares with intercept.
    Linear,
}

impl ModelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelKind::Booster => "xgboost",
            ModelKind::Linear => "linear_regression",
        }
    }

    /// Local file name of the saved model.
    pub fn file_name(self) -> &'static str {
        match self {
            ModelKind::Booster => "model.xgb",
            ModelKind::Linear => "model.b",
        }
    }

    /// Artifact directory the model is logged under.
    pub fn artifact_path(self) -> &'static str {
        match self {
            ModelKind::Booster => "models_mlflow",
            ModelKind::Linear => "model",
        }
    }
}

/// Collaborators shared by the pipelines.
#[derive(Clone)]
pub struct PipelineContext {
    pub source: Arc<dyn TripSource>,
    pub tracker: Arc<dyn TrackingSink>,
    pub observer: Arc<dyn TaskObserver>,
}

/// Settings resolved from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub color: TaxiColor,
    pub experiment: String,
    pub registered_model: String,
    pub developer: Option<String>,
    /// Local directory for the encoder and model files.
    pub models_dir: PathBuf,
    pub linear: LinearRegressionParams,
    pub booster: BoosterParams,
    pub read: TaskPolicy,
    pub train: TaskPolicy,
    pub register: TaskPolicy,
}

impl PipelineSettings {
    /// Relative output paths are resolved against `workspace`.
    pub fn from_config(config: &AppConfig, workspace: &Path) -> Self {
        let models_dir = if config.output.models_dir.is_absolute() {
            config.output.models_dir.clone()
        } else {
            workspace.join(&config.output.models_dir)
        };
        Self {
            color: config.data.color,
            experiment: config.tracking.experiment.clone(),
            registered_model: config.tracking.registered_model.clone(),
            developer: config.tracking.developer.clone(),
            models_dir,
            linear: LinearRegressionParams {
                rcond: config.model.rcond,
            },
            booster: config.model.booster.clone(),
            read: config.tasks.read.clone(),
            train: config.tasks.train.clone(),
            register: config.tasks.register.clone(),
        }
    }

    pub fn encoder_path(&self) -> PathBuf {
        self.models_dir.join(ENCODER_FILE)
    }

    pub fn model_path(&self, kind: ModelKind) -> PathBuf {
        self.models_dir.join(kind.file_name())
    }
}

/// Result of a completed training flow.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub run_id: RunId,
    pub rmse: f64,
    /// Set for linear models only.
    pub intercept: Option<f64>,
    pub n_features: usize,
    pub encoder_path: PathBuf,
    pub model_path: PathBuf,
    pub registered: Option<ModelVersion>,
    pub flow: FlowRun,
}

/// What the training step fits and how it is scored.
struct TrainJob {
    model: ModelKind,
    features: FeatureSet,
    encoder: DictVectorizer,
    x_train: DesignMatrix,
    y_train: Vec<f64>,
    /// Set the metric is computed on; `None` scores the training set.
    eval: Option<(DesignMatrix, Vec<f64>)>,
    params: Vec<(String, String)>,
}

/// Output of the training step, before the flow wraps it up.
struct TrainedRun {
    run_id: RunId,
    rmse: f64,
    intercept: Option<f64>,
    n_features: usize,
    model_path: PathBuf,
}

/// A fitted model already written to disk, reduced to what the run logs.
struct FittedModel {
    predictions: Vec<f64>,
    intercept: Option<f64>,
    path: PathBuf,
}

// ---------------------------------------------------------------------------
// Shared steps
// ---------------------------------------------------------------------------

/// Load one window, drop trips outside the duration range, and report the
/// row counts through the task's print channel.
async fn read_window(
    flow: &FlowContext,
    policy: &TaskPolicy,
    step: &str,
    source: &dyn TripSource,
    window: TripWindow,
    color: TaxiColor,
) -> Result<TripTable, MlError> {
    let task = policy.task(step);
    flow.task(&task, |tc| async move {
        tc.print(format!("Reading {}", source.location(window, color)));
        let raw = source.load(window, color).await?;
        tc.print(format!("Read {} rows for {window}", raw.len()));
        let table = TripTable::prepare(raw);
        tc.print(format!(
            "Kept {} of {} rows with a duration between 1 and 60 minutes",
            table.len(),
            table.raw_rows()
        ));
        Ok::<_, MlError>(table)
    })
    .await
}

async fn train_and_log(
    ctx: &PipelineContext,
    settings: &PipelineSettings,
    job: &TrainJob,
    flow_run_id: Uuid,
    tc: TaskContext,
) -> Result<TrainedRun, MlError> {
    let tracker = ctx.tracker.as_ref();
    let experiment = tracker.set_experiment(&settings.experiment).await?;
    let run = tracker.start_run(&experiment).await?;

    match log_run(tracker, settings, job, &run, flow_run_id, &tc).await {
        Ok(trained) => {
            tracker.end_run(&run, RunStatus::Finished).await?;
            Ok(trained)
        }
        Err(e) => {
            if let Err(end_err) = tracker.end_run(&run, RunStatus::Failed).await {
                warn!(run_id = %run.run_id, error = %end_err, "Could not mark run as failed");
            }
            Err(e)
        }
    }
}

async fn log_run(
    tracker: &dyn TrackingSink,
    settings: &PipelineSettings,
    job: &TrainJob,
    run: &RunHandle,
    flow_run_id: Uuid,
    tc: &TaskContext,
) -> Result<TrainedRun, MlError> {
    if let Some(developer) = &settings.developer {
        tracker.set_tag(run, "developer", developer).await?;
    }
    tracker
        .set_tag(run, "flow_run_id", &flow_run_id.to_string())
        .await?;

    let mut params = job.params.clone();
    params.extend([
        ("model".to_string(), job.model.as_str().to_string()),
        ("features".to_string(), job.features.to_string()),
        ("n_features".to_string(), job.encoder.n_features().to_string()),
    ]);
    params.extend(model_params(job.model, settings));
    tracker.log_params(run, &params).await?;

    let fitted = fit_and_save(job, settings)?;
    let y_eval = match &job.eval {
        Some((_, y)) => y.as_slice(),
        None => job.y_train.as_slice(),
    };
    let metrics = RegressionMetrics::compute(y_eval, &fitted.predictions)?;
    let score = metrics.rmse;
    tracker.log_metric(run, RMSE_METRIC, score).await?;
    tc.print(format!("RMSE: {score:.4}"));
    if let Some(intercept) = fitted.intercept {
        tc.print(format!("Intercept: {intercept:.2}"));
    }

    let encoder_path = settings.encoder_path();
    job.encoder.save(&encoder_path)?;
    tracker
        .log_artifact(run, &encoder_path, Some(ENCODER_ARTIFACT_PATH))
        .await?;
    tracker
        .log_artifact(run, &fitted.path, Some(job.model.artifact_path()))
        .await?;

    info!(
        run_id = %run.run_id,
        model = job.model.as_str(),
        rmse = score,
        mae = metrics.mae,
        r_squared = metrics.r_squared,
        "Training run logged"
    );

    Ok(TrainedRun {
        run_id: run.run_id.clone(),
        rmse: score,
        intercept: fitted.intercept,
        n_features: job.encoder.n_features(),
        model_path: fitted.path,
    })
}

fn model_params(kind: ModelKind, settings: &PipelineSettings) -> Vec<(String, String)> {
    match kind {
        ModelKind::Booster => {
            let mut params = settings.booster.as_pairs();
            params.extend([
                (
                    "num_boost_round".to_string(),
                    settings.booster.num_boost_round.to_string(),
                ),
                (
                    "early_stopping_rounds".to_string(),
                    settings.booster.early_stopping_rounds.to_string(),
                ),
            ]);
            params
        }
        ModelKind::Linear => vec![("rcond".to_string(), settings.linear.rcond.to_string())],
    }
}

/// Fit, predict on the evaluation set, and save the model file.
///
/// Synchronous so the native booster handle never lives across an `.await`.
fn fit_and_save(job: &TrainJob, settings: &PipelineSettings) -> Result<FittedModel, MlError> {
    let path = settings.model_path(job.model);
    let x_eval = job.eval.as_ref().map_or(&job.x_train, |(x, _)| x);
    match job.model {
        ModelKind::Booster => {
            let Some((x_val, y_val)) = &job.eval else {
                return Err(MlError::training("boosting needs a validation set"));
            };
            let model = GradientBoosting::fit(
                &job.x_train,
                &job.y_train,
                x_val,
                y_val,
                &settings.booster,
            )?;
            debug!(
                rounds = model.rounds(),
                best_round = model.best_round(),
                "Booster trained"
            );
            let predictions = model.predict(x_eval)?;
            model.save(&path)?;
            Ok(FittedModel {
                predictions,
                intercept: None,
                path,
            })
        }
        ModelKind::Linear => {
            let model = LinearRegression::fit(&job.x_train, &job.y_train, &settings.linear)?;
            let predictions = model.predict(x_eval)?;
            model.save(&path)?;
            Ok(FittedModel {
                predictions,
                intercept: Some(model.intercept()),
                path,
            })
        }
    }
}

/// Register the experiment's lowest-RMSE run under the configured name.
///
/// `artifact_path` names the model directory inside the run.
pub async fn register_best(
    tracker: &dyn TrackingSink,
    experiment: &str,
    artifact_path: &str,
    model_name: &str,
) -> Result<ModelVersion, MlError> {
    let experiment = tracker.set_experiment(experiment).await?;
    let best = tracker.search_best_run(&experiment, RMSE_METRIC).await?;
    let version = tracker
        .register_model(&best, artifact_path, model_name)
        .await?;
    info!(
        run_id = %best,
        model = model_name,
        version = %version.version,
        "Registered model version"
    );
    Ok(version)
}

async fn register_step(
    flow: &FlowContext,
    ctx: &PipelineContext,
    settings: &PipelineSettings,
    kind: ModelKind,
) -> Result<ModelVersion, MlError> {
    let task = settings.register.task("register_model");
    flow.task(&task, |tc| async move {
        let version = register_best(
            ctx.tracker.as_ref(),
            &settings.experiment,
            kind.artifact_path(),
            &settings.registered_model,
        )
        .await?;
        tc.print(format!(
            "Registered {} version {} from {}",
            version.name, version.version, version.source
        ));
        Ok::<_, MlError>(version)
    })
    .await
}

fn outcome(
    trained: TrainedRun,
    registered: Option<ModelVersion>,
    settings: &PipelineSettings,
    flow: FlowRun,
) -> TrainingOutcome {
    TrainingOutcome {
        run_id: trained.run_id,
        rmse: trained.rmse,
        intercept: trained.intercept,
        n_features: trained.n_features,
        encoder_path: settings.encoder_path(),
        model_path: trained.model_path,
        registered,
        flow,
    }
}

// ---------------------------------------------------------------------------
// DurationPipeline
// ---------------------------------------------------------------------------

/// Train boosted trees on month `m`, validate on month `m + 1`.
pub struct DurationPipeline {
    ctx: PipelineContext,
    settings: PipelineSettings,
    register: bool,
}

impl DurationPipeline {
    pub fn new(ctx: PipelineContext, settings: PipelineSettings) -> Self {
        Self {
            ctx,
            settings,
            register: false,
        }
    }

    /// Also register the best run once training finishes.
    pub fn with_registration(mut self, register: bool) -> Self {
        self.register = register;
        self
    }

    pub async fn run(&self, window: TripWindow) -> Result<TrainingOutcome, MlError> {
        let ctx = &self.ctx;
        let settings = &self.settings;
        let register = self.register;
        let color = settings.color;
        let validation = window.next()?;

        let flow = Flow::new("duration-prediction").with_observer(Arc::clone(&ctx.observer));
        let done = flow
            .run(|fc| async move {
                let source = ctx.source.as_ref();
                let train =
                    read_window(&fc, &settings.read, "read_train", source, window, color).await?;
                let val =
                    read_window(&fc, &settings.read, "read_validation", source, validation, color)
                        .await?;

                let (x_train, dv) = fc
                    .step("encode_train", async {
                        encode(&train, FeatureSet::Route, None)
                    })
                    .await?;
                let (x_val, dv) = fc
                    .step("encode_validation", async {
                        encode(&val, FeatureSet::Route, Some(dv))
                    })
                    .await?;

                let job = TrainJob {
                    model: ModelKind::Booster,
                    features: FeatureSet::Route,
                    encoder: dv,
                    x_train,
                    y_train: train.durations(),
                    eval: Some((x_val, val.durations())),
                    params: vec![
                        ("color".to_string(), color.to_string()),
                        ("train_window".to_string(), window.to_string()),
                        ("validation_window".to_string(), validation.to_string()),
                        ("train_rows".to_string(), train.len().to_string()),
                        ("validation_rows".to_string(), val.len().to_string()),
                    ],
                };
                let run_id = fc.run_id();
                let trained = fc
                    .task(&settings.train.task("train_model"), |tc| {
                        train_and_log(ctx, settings, &job, run_id, tc)
                    })
                    .await?;

                let registered = if register {
                    Some(register_step(&fc, ctx, settings, ModelKind::Booster).await?)
                } else {
                    None
                };
                Ok::<_, MlError>((trained, registered))
            })
            .await?;

        let (trained, registered) = done.output;
        Ok(outcome(trained, registered, settings, done.run))
    }
}

// ---------------------------------------------------------------------------
// BaselinePipeline
// ---------------------------------------------------------------------------

/// Single-month location baseline, always followed by registration.
pub struct BaselinePipeline {
    ctx: PipelineContext,
    settings: PipelineSettings,
}

impl BaselinePipeline {
    pub fn new(ctx: PipelineContext, settings: PipelineSettings) -> Self {
        Self { ctx, settings }
    }

    pub async fn run(&self, window: TripWindow) -> Result<TrainingOutcome, MlError> {
        let ctx = &self.ctx;
        let settings = &self.settings;
        let color = settings.color;

        let flow = Flow::new("yellow-taxi-baseline").with_observer(Arc::clone(&ctx.observer));
        let done = flow
            .run(|fc| async move {
                let train = read_window(
                    &fc,
                    &settings.read,
                    "read_dataframe",
                    ctx.source.as_ref(),
                    window,
                    color,
                )
                .await?;

                let (x_train, dv) = fc
                    .step("encode_train", async {
                        encode(&train, FeatureSet::Locations, None)
                    })
                    .await?;

                let job = TrainJob {
                    model: ModelKind::Linear,
                    features: FeatureSet::Locations,
                    encoder: dv,
                    x_train,
                    y_train: train.durations(),
                    eval: None,
                    params: vec![
                        ("color".to_string(), color.to_string()),
                        ("train_window".to_string(), window.to_string()),
                        ("train_rows".to_string(), train.len().to_string()),
                    ],
                };
                let run_id = fc.run_id();
                let trained = fc
                    .task(&settings.train.task("train_model"), |tc| {
                        train_and_log(ctx, settings, &job, run_id, tc)
                    })
                    .await?;

                let registered = register_step(&fc, ctx, settings, ModelKind::Linear).await?;
                Ok::<_, MlError>((trained, registered))
            })
            .await?;

        let (trained, registered) = done.output;
        Ok(outcome(trained, Some(registered), settings, done.run))
    }
}

/// Write the run id to `path`, creating parent directories.
pub fn write_run_id(path: &Path, run_id: &RunId) -> Result<(), MlError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, run_id.as_str())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_resolve_relative_models_dir() {
        let config = AppConfig::default();
        let settings = PipelineSettings::from_config(&config, Path::new("/work"));
        assert_eq!(settings.models_dir, PathBuf::from("/work/models"));
        assert_eq!(
            settings.encoder_path(),
            PathBuf::from("/work/models/preprocessor.b")
        );
        assert_eq!(settings.read.retries, 3);
        assert_eq!(settings.color, TaxiColor::Green);
        assert_eq!(
            settings.model_path(ModelKind::Booster),
            PathBuf::from("/work/models/model.xgb")
        );
        assert_eq!(settings.booster.max_depth, 30);
    }

    #[test]
    fn test_booster_run_logs_the_tuned_params() {
        let settings = PipelineSettings::from_config(&AppConfig::default(), Path::new("/work"));
        let params: std::collections::HashMap<_, _> =
            model_params(ModelKind::Booster, &settings).into_iter().collect();
        assert_eq!(params["learning_rate"], "0.09585355369315604");
        assert_eq!(params["min_child_weight"], "1.060597050922164");
        assert_eq!(params["objective"], "reg:linear");
        assert_eq!(params["seed"], "42");
        assert_eq!(params["num_boost_round"], "30");
        assert!(!params.contains_key("rcond"));
    }

    #[test]
    fn test_write_run_id() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("out").join("run_id.txt");
        write_run_id(&path, &RunId::new("abc123")).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "abc123");
    }
}
