//! # taxiflow-ml
//!
//! Trip-duration modelling for NYC taxi data: monthly parquet loading,
//! duration filtering, dictionary feature encoding, gradient-boosted trees and
//! least-squares regression, and experiment tracking against MLflow or a local store.
//!
//! The training flows in [`training::pipeline`] compose these pieces with the
//! retrying tasks from `taxiflow-core`.

pub mod algorithms;
pub mod artifact;
pub mod data;
pub mod error;
pub mod features;
pub mod tracking;
pub mod training;

// Re-exports
pub use algorithms::{BoosterParams, GradientBoosting, LinearRegression, LinearRegressionParams};
pub use data::{
    HttpParquetSource, LocalParquetSource, StaticSource, TripRecord, TripSource, TripTable,
    TripWindow,
};
pub use error::MlError;
pub use features::{DesignMatrix, DictVectorizer, FeatureSet, encode};
pub use tracking::{
    ExperimentId, FileTracker, InMemoryTracker, MlflowClient, ModelVersion, RunHandle, RunId,
    RunStatus, TrackingSink,
};
pub use training::{
    BaselinePipeline, DurationPipeline, ModelKind, PipelineContext, PipelineSettings,
    TrainingOutcome,
};
