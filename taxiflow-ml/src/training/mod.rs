//! Training flows and regression metrics.

pub mod metrics;
pub mod pipeline;

pub use metrics::{RegressionMetrics, mae, r_squared, rmse};
pub use pipeline::{
    BaselinePipeline, DurationPipeline, ModelKind, PipelineContext, PipelineSettings, TrainingOutcome,
    register_best, write_run_id,
};
