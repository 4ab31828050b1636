//! # taxiflow core
//!
//! Orchestration primitives shared by the taxiflow pipelines: retrying
//! tasks, linear flows, lifecycle observers, and layered configuration.

pub mod config;
pub mod error;
pub mod fetch;
pub mod flow;
pub mod observer;
pub mod task;

// Re-export commonly used types at the crate root.
pub use config::{AppConfig, BoosterParams, TaskPolicy, TaxiColor, TrackingBackend};
pub use error::{ConfigError, CoreError, FetchError, Result};
pub use flow::{Flow, FlowContext, FlowOutcome, FlowRun, FlowStatus, StepRecord};
pub use observer::{ObservedEvent, RecordingObserver, TaskObserver, TracingObserver};
pub use task::{Task, TaskContext, TaskReport, TaskState};
