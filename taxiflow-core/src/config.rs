//! Configuration system for taxiflow.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> CLI args.
//! Configuration is loaded from `~/.config/taxiflow/config.toml` and/or `.taxiflow/config.toml`
//! in the workspace directory.

use crate::error::{ConfigError, CoreError};
use crate::task::Task;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub tasks: TasksConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
}

impl AppConfig {
    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, policy) in self.tasks.policies() {
            if !policy.retry_delay_secs.is_finite() || policy.retry_delay_secs < 0.0 {
                return Err(ConfigError::Invalid {
                    message: format!(
                        "tasks.{name}.retry_delay_secs must be a non-negative number, got {}",
                        policy.retry_delay_secs
                    ),
                });
            }
        }
        if !(self.model.rcond > 0.0 && self.model.rcond < 1.0) {
            return Err(ConfigError::Invalid {
                message: format!(
                    "model.rcond must be between 0 and 1, got {}",
                    self.model.rcond
                ),
            });
        }
        self.model.booster.validate()?;
        if self.tracking.experiment.trim().is_empty() {
            return Err(ConfigError::Invalid {
                message: "tracking.experiment must not be empty".into(),
            });
        }
        Ok(())
    }
}

/// Which tracking sink receives params, metrics and artifacts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingBackend {
    /// MLflow tracking server over its REST API.
    #[default]
    Mlflow,
    /// JSON store on local disk.
    File,
    /// Process memory only; nothing survives the run.
    Memory,
}

impl fmt::Display for TrackingBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackingBackend::Mlflow => write!(f, "mlflow"),
            TrackingBackend::File => write!(f, "file"),
            TrackingBackend::Memory => write!(f, "memory"),
        }
    }
}

impl FromStr for TrackingBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mlflow" => Ok(TrackingBackend::Mlflow),
            "file" => Ok(TrackingBackend::File),
            "memory" => Ok(TrackingBackend::Memory),
            other => Err(ConfigError::Invalid {
                message: format!("unknown tracking backend '{other}' (expected mlflow, file or memory)"),
            }),
        }
    }
}

/// Experiment tracking configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingConfig {
    #[serde(default)]
    pub backend: TrackingBackend,
    /// Tracking server URI for the MLflow backend.
    #[serde(default = "default_tracking_uri")]
    pub uri: String,
    /// Experiment name, created if it does not exist.
    #[serde(default = "default_experiment")]
    pub experiment: String,
    /// Registry name used when promoting the best run.
    #[serde(default = "default_registered_model")]
    pub registered_model: String,
    /// Value for the `developer` tag on every run.
    #[serde(default)]
    pub developer: Option<String>,
    /// Root directory for the file backend.
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            backend: TrackingBackend::default(),
            uri: default_tracking_uri(),
            experiment: default_experiment(),
            registered_model: default_registered_model(),
            developer: None,
            store_dir: default_store_dir(),
        }
    }
}

fn default_tracking_uri() -> String {
    "http://127.0.0.1:5000".to_string()
}

fn default_experiment() -> String {
    "nyc-taxi-experiment".to_string()
}

fn default_registered_model() -> String {
    "nyc-taxi-regressor".to_string()
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("mlruns")
}

/// Taxi dataset family. Each family names its timestamp columns differently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxiColor {
    Yellow,
    #[default]
    Green,
}

impl TaxiColor {
    /// Prefix of the pickup/dropoff timestamp columns.
    pub fn timestamp_prefix(self) -> &'static str {
        match self {
            TaxiColor::Yellow => "tpep",
            TaxiColor::Green => "lpep",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaxiColor::Yellow => "yellow",
            TaxiColor::Green => "green",
        }
    }
}

impl fmt::Display for TaxiColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaxiColor {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "yellow" => Ok(TaxiColor::Yellow),
            "green" => Ok(TaxiColor::Green),
            other => Err(ConfigError::Invalid {
                message: format!("unknown taxi color '{other}' (expected yellow or green)"),
            }),
        }
    }
}

/// Trip data location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    /// Base URL the monthly parquet files live under.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Dataset family for the duration pipeline.
    #[serde(default)]
    pub color: TaxiColor,
    /// Read parquet files from this directory instead of `base_url`.
    #[serde(default)]
    pub local_dir: Option<PathBuf>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            color: TaxiColor::default(),
            local_dir: None,
        }
    }
}

fn default_base_url() -> String {
    "https://d37ci6vzurychx.cloudfront.net/trip-data".to_string()
}

/// Retry policy of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPolicy {
    /// Additional attempts after the first.
    #[serde(default)]
    pub retries: u32,
    /// Fixed delay between attempts, in seconds.
    #[serde(default)]
    pub retry_delay_secs: f64,
    /// Forward task output to the log.
    #[serde(default = "default_true")]
    pub log_prints: bool,
}

impl TaskPolicy {
    pub fn new(retries: u32, retry_delay_secs: f64, log_prints: bool) -> Self {
        Self {
            retries,
            retry_delay_secs,
            log_prints,
        }
    }

    /// Build a [`Task`] named `name` with this policy.
    pub fn task(&self, name: &str) -> Task {
        Task::new(name)
            .retries(self.retries)
            .retry_delay_secs(self.retry_delay_secs)
            .log_prints(self.log_prints)
    }

    pub fn delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.retry_delay_secs).unwrap_or(Duration::ZERO)
    }
}

impl Default for TaskPolicy {
    fn default() -> Self {
        Self::new(0, 0.0, true)
    }
}

fn default_true() -> bool {
    true
}

/// Per-task retry policies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TasksConfig {
    #[serde(default = "default_read_policy")]
    pub read: TaskPolicy,
    #[serde(default)]
    pub train: TaskPolicy,
    #[serde(default)]
    pub register: TaskPolicy,
    #[serde(default = "default_fetch_policy")]
    pub fetch: TaskPolicy,
}

impl TasksConfig {
    fn policies(&self) -> [(&'static str, &TaskPolicy); 4] {
        [
            ("read", &self.read),
            ("train", &self.train),
            ("register", &self.register),
            ("fetch", &self.fetch),
        ]
    }
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            read: default_read_policy(),
            train: TaskPolicy::default(),
            register: TaskPolicy::default(),
            fetch: default_fetch_policy(),
        }
    }
}

fn default_read_policy() -> TaskPolicy {
    TaskPolicy::new(3, 2.0, true)
}

fn default_fetch_policy() -> TaskPolicy {
    TaskPolicy::new(4, 0.1, true)
}

/// Model settings for both training flows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Relative cutoff below which singular values of the linear system count
    /// as zero.
    #[serde(default = "default_rcond")]
    pub rcond: f64,
    /// Gradient-boosted trees used by the duration flow.
    #[serde(default)]
    pub booster: BoosterParams,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            rcond: default_rcond(),
            booster: BoosterParams::default(),
        }
    }
}

fn default_rcond() -> f64 {
    1e-10
}

/// Tuned gradient-boosting parameters for the duration flow.
///
/// Field names match the parameter keys logged to the tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoosterParams {
    pub learning_rate: f64,
    pub max_depth: u32,
    pub min_child_weight: f64,
    pub objective: String,
    pub reg_alpha: f64,
    pub reg_lambda: f64,
    pub seed: u64,
    pub num_boost_round: u32,
    /// Stop once the validation RMSE has not improved for this many rounds.
    pub early_stopping_rounds: u32,
}

impl Default for BoosterParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.09585355369315604,
            max_depth: 30,
            min_child_weight: 1.060597050922164,
            objective: "reg:linear".to_string(),
            reg_alpha: 0.018060244040060163,
            reg_lambda: 0.011658731377413597,
            seed: 42,
            num_boost_round: 30,
            early_stopping_rounds: 50,
        }
    }
}

impl BoosterParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| Err(ConfigError::Invalid { message });
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return invalid(format!(
                "model.booster.learning_rate must be in (0, 1], got {}",
                self.learning_rate
            ));
        }
        if self.max_depth == 0 {
            return invalid("model.booster.max_depth must be at least 1".into());
        }
        if self.num_boost_round == 0 {
            return invalid("model.booster.num_boost_round must be at least 1".into());
        }
        for (name, value) in [
            ("min_child_weight", self.min_child_weight),
            ("reg_alpha", self.reg_alpha),
            ("reg_lambda", self.reg_lambda),
        ] {
            if !value.is_finite() || value < 0.0 {
                return invalid(format!(
                    "model.booster.{name} must be a non-negative number, got {value}"
                ));
            }
        }
        if !matches!(
            self.objective.as_str(),
            "reg:linear" | "reg:squarederror"
        ) {
            return invalid(format!(
                "model.booster.objective must be reg:linear or reg:squarederror, got '{}'",
                self.objective
            ));
        }
        Ok(())
    }

    /// Parameters as `(key, value)` pairs for the tracker.
    pub fn as_pairs(&self) -> Vec<(String, String)> {
        vec![
            ("learning_rate".into(), self.learning_rate.to_string()),
            ("max_depth".into(), self.max_depth.to_string()),
            ("min_child_weight".into(), self.min_child_weight.to_string()),
            ("objective".into(), self.objective.clone()),
            ("reg_alpha".into(), self.reg_alpha.to_string()),
            ("reg_lambda".into(), self.reg_lambda.to_string()),
            ("seed".into(), self.seed.to_string()),
        ]
    }
}

/// Local artifact locations, relative to the workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,
    #[serde(default = "default_run_id_file")]
    pub run_id_file: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            models_dir: default_models_dir(),
            run_id_file: default_run_id_file(),
        }
    }
}

fn default_models_dir() -> PathBuf {
    PathBuf::from("models")
}

fn default_run_id_file() -> PathBuf {
    PathBuf::from("run_id.txt")
}

/// Outbound HTTP settings shared by the data loader, tracker and fetch task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Upper bound on a single request, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl HttpConfig {
    /// Build a `reqwest` client honouring the request timeout.
    pub fn client(&self) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .user_agent(concat!("taxiflow/", env!("CARGO_PKG_VERSION")))
            .build()
    }
}

fn default_timeout_secs() -> u64 {
    300
}

/// Target of the `fetch` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_url")]
    pub url: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            url: default_fetch_url(),
        }
    }
}

fn default_fetch_url() -> String {
    "https://f3-vyx5c2hfpq-ue.a.run.app/".to_string()
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("dev", "taxiflow", "taxiflow")
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `TAXIFLOW_`)
/// 3. Explicit config file (`--config`), which must exist
/// 4. Workspace-local config (`.taxiflow/config.toml`)
/// 5. User config (`~/.config/taxiflow/config.toml`)
/// 6. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    config_file: Option<&Path>,
    overrides: Option<&AppConfig>,
) -> Result<AppConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    if let Some(dirs) = project_dirs() {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".taxiflow").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    if let Some(path) = config_file {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        figment = figment.merge(Toml::file(path));
    }

    // TAXIFLOW_TRACKING__URI, TAXIFLOW_TASKS__READ__RETRIES, etc.
    figment = figment.merge(Env::prefixed("TAXIFLOW_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    let config: AppConfig = figment.extract()?;
    config.validate()?;
    Ok(config)
}

/// Whether a user-level or workspace-level config file exists.
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if let Some(dirs) = project_dirs() {
        if dirs.config_dir().join("config.toml").exists() {
            return true;
        }
    }
    workspace.is_some_and(|ws| ws.join(".taxiflow").join("config.toml").exists())
}

/// Write the default configuration to `<workspace>/.taxiflow/config.toml`.
///
/// Returns the path and whether a new file was written; an existing file is
/// left untouched.
pub fn init_config(workspace: &Path) -> Result<(PathBuf, bool), CoreError> {
    let config_dir = workspace.join(".taxiflow");
    std::fs::create_dir_all(&config_dir)?;
    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        return Ok((config_path, false));
    }
    let toml_str = toml::to_string_pretty(&AppConfig::default())?;
    std::fs::write(&config_path, toml_str)?;
    Ok((config_path, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_values() {
        let config = AppConfig::default();
        assert_eq!(config.tracking.uri, "http://127.0.0.1:5000");
        assert_eq!(config.tracking.experiment, "nyc-taxi-experiment");
        assert_eq!(config.tasks.read.retries, 3);
        assert_eq!(config.tasks.read.delay(), Duration::from_secs(2));
        assert_eq!(config.tasks.fetch.retries, 4);
        assert_eq!(config.tasks.fetch.delay(), Duration::from_millis(100));
        assert_eq!(config.output.run_id_file, PathBuf::from("run_id.txt"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_task_policy_builds_task() {
        let task = TaskPolicy::new(3, 2.0, true).task("read_windows");
        assert_eq!(task.name(), "read_windows");
        assert_eq!(task.max_attempts(), 4);
        assert_eq!(task.delay(), Duration::from_secs(2));
        assert!(task.prints_logged());
    }

    #[test]
    fn test_validate_rejects_negative_delay() {
        let mut config = AppConfig::default();
        config.tasks.fetch.retry_delay_secs = -0.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("tasks.fetch.retry_delay_secs"));
    }

    #[test]
    fn test_validate_rejects_bad_rcond() {
        let mut config = AppConfig::default();
        config.model.rcond = 0.0;
        assert!(config.validate().is_err());
        config.model.rcond = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_booster_defaults_are_the_tuned_params() {
        let params = BoosterParams::default();
        assert_eq!(params.max_depth, 30);
        assert_eq!(params.seed, 42);
        assert_eq!(params.num_boost_round, 30);
        let keys: Vec<String> = params.as_pairs().into_iter().map(|(k, _)| k).collect();
        assert_eq!(
            keys,
            vec![
                "learning_rate",
                "max_depth",
                "min_child_weight",
                "objective",
                "reg_alpha",
                "reg_lambda",
                "seed"
            ]
        );
    }

    #[test]
    fn test_validate_rejects_bad_booster_params() {
        let mut config = AppConfig::default();
        config.model.booster.learning_rate = 0.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.model.booster.objective = "binary:logistic".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("objective"));
    }

    #[test]
    fn test_workspace_config_layer() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".taxiflow")).unwrap();
        std::fs::write(
            dir.path().join(".taxiflow").join("config.toml"),
            r#"
[tracking]
backend = "file"
experiment = "local-experiment"

[tasks.read]
retries = 1
retry_delay_secs = 0.5
"#,
        )
        .unwrap();

        let config = load_config(Some(dir.path()), None, None).unwrap();
        assert_eq!(config.tracking.backend, TrackingBackend::File);
        assert_eq!(config.tracking.experiment, "local-experiment");
        assert_eq!(config.tasks.read.retries, 1);
        assert_eq!(config.tasks.read.delay(), Duration::from_millis(500));
        assert_eq!(config.tasks.fetch, default_fetch_policy());
    }

    #[test]
    fn test_missing_explicit_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = load_config(None, Some(&missing), None).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn test_overrides_win() {
        let dir = tempfile::tempdir().unwrap();
        let mut overrides = AppConfig::default();
        overrides.tracking.backend = TrackingBackend::Memory;
        overrides.data.color = TaxiColor::Yellow;
        let config = load_config(Some(dir.path()), None, Some(&overrides)).unwrap();
        assert_eq!(config.tracking.backend, TrackingBackend::Memory);
        assert_eq!(config.data.color, TaxiColor::Yellow);
    }

    #[test]
    fn test_init_config_writes_once() {
        let dir = tempfile::tempdir().unwrap();
        let (path, created) = init_config(dir.path()).unwrap();
        assert!(created);
        let parsed: AppConfig = toml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed, AppConfig::default());

        let (_, created_again) = init_config(dir.path()).unwrap();
        assert!(!created_again);
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("GREEN".parse::<TaxiColor>().unwrap(), TaxiColor::Green);
        assert_eq!(TaxiColor::Yellow.timestamp_prefix(), "tpep");
        assert_eq!(TaxiColor::Green.timestamp_prefix(), "lpep");
        assert_eq!("file".parse::<TrackingBackend>().unwrap(), TrackingBackend::File);
        assert!("sqlite".parse::<TrackingBackend>().is_err());
    }
}
