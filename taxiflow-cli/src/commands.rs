//! Subcommand handlers.

use crate::{Commands, ConfigAction, GlobalOptions};
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use taxiflow_core::config::{config_exists, init_config, load_config};
use taxiflow_core::fetch::run_fetch_flow;
use taxiflow_core::{AppConfig, TaxiColor, TaskObserver, TrackingBackend, TracingObserver};
use taxiflow_ml::training::write_run_id;
use taxiflow_ml::{
    BaselinePipeline, DurationPipeline, FileTracker, HttpParquetSource, InMemoryTracker,
    LocalParquetSource, MlflowClient, PipelineContext, PipelineSettings, TrackingSink,
    TrainingOutcome, TripSource, TripWindow,
};
use tracing::{debug, info};

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, options: &GlobalOptions) -> anyhow::Result<()> {
    match command {
        Commands::Train {
            year,
            month,
            color,
            register,
        } => handle_train(options, year, month, color, register).await,
        Commands::Baseline {
            year,
            month,
            color,
            model_name,
        } => handle_baseline(options, year, month, color, model_name).await,
        Commands::Fetch { url } => handle_fetch(options, url).await,
        Commands::Config { action } => handle_config(action, options),
    }
}

/// Effective configuration with the global flag overrides applied.
fn load(options: &GlobalOptions) -> anyhow::Result<AppConfig> {
    if options.config.is_none() && !config_exists(Some(&options.workspace)) {
        debug!("No configuration file found, using defaults");
    }
    let mut config = load_config(
        Some(options.workspace.as_path()),
        options.config.as_deref(),
        None,
    )
    .context("Failed to load config")?;
    if let Some(backend) = options.tracking {
        config.tracking.backend = backend;
    }
    Ok(config)
}

fn in_workspace(workspace: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workspace.join(path)
    }
}

fn build_tracker(
    config: &AppConfig,
    workspace: &Path,
    client: reqwest::Client,
) -> anyhow::Result<Arc<dyn TrackingSink>> {
    let tracker: Arc<dyn TrackingSink> = match config.tracking.backend {
        TrackingBackend::Mlflow => {
            let mlflow = MlflowClient::new(client, &config.tracking.uri)?;
            info!(uri = mlflow.tracking_uri(), "Tracking to MLflow");
            Arc::new(mlflow)
        }
        TrackingBackend::File => {
            let store = FileTracker::open(in_workspace(workspace, &config.tracking.store_dir))?;
            info!(root = %store.root().display(), "Tracking to local store");
            Arc::new(store)
        }
        TrackingBackend::Memory => {
            info!("Tracking in memory, nothing will be kept");
            Arc::new(InMemoryTracker::new())
        }
    };
    Ok(tracker)
}

fn build_source(
    config: &AppConfig,
    workspace: &Path,
    client: reqwest::Client,
) -> Arc<dyn TripSource> {
    match &config.data.local_dir {
        Some(dir) => Arc::new(LocalParquetSource::new(in_workspace(workspace, dir))),
        None => Arc::new(HttpParquetSource::new(client, config.data.base_url.clone())),
    }
}

fn pipeline_context(config: &AppConfig, workspace: &Path) -> anyhow::Result<PipelineContext> {
    let client = config.http.client().context("Failed to build HTTP client")?;
    let observer: Arc<dyn TaskObserver> = Arc::new(TracingObserver);
    Ok(PipelineContext {
        source: build_source(config, workspace, client.clone()),
        tracker: build_tracker(config, workspace, client)?,
        observer,
    })
}

fn report(outcome: &TrainingOutcome) {
    println!("Run ID: {}", outcome.run_id);
    println!("RMSE: {:.4}", outcome.rmse);
    println!("Features: {}", outcome.n_features);
    if let Some(version) = &outcome.registered {
        println!(
            "Registered {} version {} ({})",
            version.name, version.version, version.source
        );
    }
}

async fn handle_train(
    options: &GlobalOptions,
    year: i32,
    month: u32,
    color: Option<TaxiColor>,
    register: bool,
) -> anyhow::Result<()> {
    let mut config = load(options)?;
    if let Some(color) = color {
        config.data.color = color;
    }
    let window = TripWindow::new(year, month)?;
    let workspace = &options.workspace;

    let ctx = pipeline_context(&config, workspace)?;
    let settings = PipelineSettings::from_config(&config, workspace);
    let outcome = DurationPipeline::new(ctx, settings)
        .with_registration(register)
        .run(window)
        .await
        .with_context(|| format!("Training flow for {window} failed"))?;

    let run_id_path = in_workspace(workspace, &config.output.run_id_file);
    write_run_id(&run_id_path, &outcome.run_id)
        .with_context(|| format!("Failed to write {}", run_id_path.display()))?;

    report(&outcome);
    println!("Run ID written to {}", run_id_path.display());
    Ok(())
}

async fn handle_baseline(
    options: &GlobalOptions,
    year: i32,
    month: u32,
    color: TaxiColor,
    model_name: Option<String>,
) -> anyhow::Result<()> {
    let mut config = load(options)?;
    config.data.color = color;
    if let Some(name) = model_name {
        config.tracking.registered_model = name;
    }
    let window = TripWindow::new(year, month)?;
    let workspace = &options.workspace;

    let ctx = pipeline_context(&config, workspace)?;
    let settings = PipelineSettings::from_config(&config, workspace);
    let outcome = BaselinePipeline::new(ctx, settings)
        .run(window)
        .await
        .with_context(|| format!("Baseline flow for {window} failed"))?;

    report(&outcome);
    if let Some(intercept) = outcome.intercept {
        println!("Intercept: {intercept:.2}");
    }
    Ok(())
}

async fn handle_fetch(options: &GlobalOptions, url: Option<String>) -> anyhow::Result<()> {
    let config = load(options)?;
    let url = url.unwrap_or(config.fetch.url);
    let client = config.http.client().context("Failed to build HTTP client")?;
    let task = config.tasks.fetch.task("fetch_cat_fact");

    let outcome = run_fetch_flow(&client, &url, &task, Arc::new(TracingObserver))
        .await
        .with_context(|| format!("Fetching {url} failed"))?;
    println!("{}", outcome.output);
    Ok(())
}

fn handle_config(action: ConfigAction, options: &GlobalOptions) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let (path, created) = init_config(&options.workspace)?;
            if created {
                println!("Created default configuration at: {}", path.display());
            } else {
                println!("Configuration file already exists at: {}", path.display());
            }
            Ok(())
        }
        ConfigAction::Show => {
            let config = load(options)?;
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn options(workspace: &Path) -> GlobalOptions {
        GlobalOptions {
            workspace: workspace.to_path_buf(),
            config: None,
            tracking: None,
        }
    }

    #[tokio::test]
    async fn test_config_init_creates_valid_file() {
        let dir = TempDir::new().unwrap();
        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(command, &options(dir.path())).await.unwrap();

        let config_path = dir.path().join(".taxiflow").join("config.toml");
        let content = std::fs::read_to_string(&config_path).unwrap();
        let parsed: AppConfig = toml::from_str(&content).unwrap();
        assert_eq!(parsed.tracking.experiment, "nyc-taxi-experiment");
        assert_eq!(parsed.tasks.read.retries, 3);
    }

    #[tokio::test]
    async fn test_config_init_idempotent() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join(".taxiflow").join("config.toml");

        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(command, &options(dir.path())).await.unwrap();
        std::fs::write(&config_path, "[tracking]\nexperiment = \"edited\"\n").unwrap();

        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(command, &options(dir.path())).await.unwrap();
        let content = std::fs::read_to_string(&config_path).unwrap();
        assert!(content.contains("edited"));
    }

    #[test]
    fn test_tracking_flag_overrides_config() {
        let dir = TempDir::new().unwrap();
        let mut opts = options(dir.path());
        opts.tracking = Some(TrackingBackend::Memory);
        let config = load(&opts).unwrap();
        assert_eq!(config.tracking.backend, TrackingBackend::Memory);
    }

    #[tokio::test]
    async fn test_train_rejects_bad_month() {
        let dir = TempDir::new().unwrap();
        let mut opts = options(dir.path());
        opts.tracking = Some(TrackingBackend::Memory);
        let command = Commands::Train {
            year: 2023,
            month: 13,
            color: None,
            register: false,
        };
        let err = handle_command(command, &opts).await.unwrap_err();
        assert!(err.to_string().contains("month"));
    }

    /// Write `rows` green trips for one month under the published file name.
    fn write_green_month(dir: &Path, year: i32, month: u32, rows: usize) {
        use chrono::{Duration, TimeZone, Utc};
        use parquet::data_type::{DoubleType, Int64Type};
        use parquet::file::properties::WriterProperties;
        use parquet::file::writer::SerializedFileWriter;
        use parquet::schema::parser::parse_message_type;

        let message = "message schema {
            REQUIRED INT64 lpep_pickup_datetime (TIMESTAMP(MICROS,false));
            REQUIRED INT64 lpep_dropoff_datetime (TIMESTAMP(MICROS,false));
            REQUIRED INT64 PULocationID;
            REQUIRED INT64 DOLocationID;
            REQUIRED DOUBLE trip_distance;
        }";
        let schema = Arc::new(parse_message_type(message).unwrap());
        let props = Arc::new(WriterProperties::builder().build());

        let start = Utc.with_ymd_and_hms(year, month, 1, 8, 0, 0).unwrap();
        let mut pickup = Vec::with_capacity(rows);
        let mut dropoff = Vec::with_capacity(rows);
        let mut pu = Vec::with_capacity(rows);
        let mut dl = Vec::with_capacity(rows);
        let mut distance = Vec::with_capacity(rows);
        for i in 0..rows {
            let miles = 1.0 + (i % 6) as f64;
            let at = start + Duration::minutes(i as i64);
            pickup.push(at.timestamp_micros());
            dropoff.push((at + Duration::minutes(3 + 4 * (i % 6) as i64)).timestamp_micros());
            pu.push(40 + (i % 4) as i64);
            dl.push(70 + (i % 3) as i64);
            distance.push(miles);
        }

        std::fs::create_dir_all(dir).unwrap();
        let file = std::fs::File::create(
            dir.join(format!("green_tripdata_{year:04}-{month:02}.parquet")),
        )
        .unwrap();
        let mut writer = SerializedFileWriter::new(file, schema, props).unwrap();
        let mut row_group = writer.next_row_group().unwrap();
        for values in [&pickup, &dropoff, &pu, &dl] {
            let mut col = row_group.next_column().unwrap().unwrap();
            col.typed::<Int64Type>()
                .write_batch(values, None, None)
                .unwrap();
            col.close().unwrap();
        }
        let mut col = row_group.next_column().unwrap().unwrap();
        col.typed::<DoubleType>()
            .write_batch(&distance, None, None)
            .unwrap();
        col.close().unwrap();
        row_group.close().unwrap();
        writer.close().unwrap();
    }

    #[tokio::test]
    async fn test_train_writes_run_id_and_preprocessor() {
        let dir = TempDir::new().unwrap();
        write_green_month(&dir.path().join("data"), 2023, 1, 120);
        write_green_month(&dir.path().join("data"), 2023, 2, 60);
        std::fs::create_dir_all(dir.path().join(".taxiflow")).unwrap();
        std::fs::write(
            dir.path().join(".taxiflow").join("config.toml"),
            "[data]\nlocal_dir = \"data\"\n\n[tasks.read]\nretries = 0\nretry_delay_secs = 0.0\n",
        )
        .unwrap();

        let mut opts = options(dir.path());
        opts.tracking = Some(TrackingBackend::Memory);
        let command = Commands::Train {
            year: 2023,
            month: 1,
            color: None,
            register: false,
        };
        handle_command(command, &opts).await.unwrap();

        let run_id = std::fs::read_to_string(dir.path().join("run_id.txt")).unwrap();
        assert!(!run_id.trim().is_empty());
        let preprocessor = std::fs::read(dir.path().join("models").join("preprocessor.b")).unwrap();
        assert!(!preprocessor.is_empty());
        assert!(dir.path().join("models").join("model.xgb").exists());
    }

    #[test]
    fn test_in_workspace() {
        let ws = Path::new("/work");
        assert_eq!(
            in_workspace(ws, Path::new("models")),
            PathBuf::from("/work/models")
        );
        assert_eq!(
            in_workspace(ws, Path::new("/abs/run_id.txt")),
            PathBuf::from("/abs/run_id.txt")
        );
    }
}
