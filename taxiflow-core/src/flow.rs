//! Linear flows of tasks.
//!
//! A [`Flow`] runs an async body once and hands it a [`FlowContext`]. Steps
//! inside the body are plain sequential calls: each step's output is a Rust
//! value passed to the next one. The flow adds a run identifier, records
//! every step with its attempt count, and reports the terminal status. It
//! never retries anything itself and never runs steps concurrently.

use crate::observer::{TaskObserver, TracingObserver};
use crate::task::{Task, TaskContext, TaskState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

/// Status of a flow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowStatus::Pending => write!(f, "pending"),
            FlowStatus::Running => write!(f, "running"),
            FlowStatus::Completed => write!(f, "completed"),
            FlowStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One executed step of a flow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub attempts: u32,
    pub state: TaskState,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// State of a single flow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowRun {
    pub run_id: Uuid,
    pub flow_name: String,
    pub status: FlowStatus,
    pub steps: Vec<StepRecord>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl FlowRun {
    pub fn new(flow_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            flow_name: flow_name.into(),
            status: FlowStatus::Pending,
            steps: Vec::new(),
            started_at: now,
            updated_at: now,
            error: None,
        }
    }

    /// Names of the executed steps, in order.
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn step(&self, name: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.name == name)
    }
}

/// Successful result of a flow: its run record plus the body's output.
#[derive(Debug, Clone)]
pub struct FlowOutcome<T> {
    pub run: FlowRun,
    pub output: T,
}

/// Handle passed to a flow body for running its steps.
#[derive(Clone)]
pub struct FlowContext {
    run: Arc<Mutex<FlowRun>>,
    run_id: Uuid,
    observer: Arc<dyn TaskObserver>,
}

impl FlowContext {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn observer(&self) -> Arc<dyn TaskObserver> {
        Arc::clone(&self.observer)
    }

    /// Run one step through the retry policy of `task`.
    pub async fn task<T, E, F, Fut>(&self, task: &Task, work: F) -> Result<T, E>
    where
        F: FnMut(TaskContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let started_at = Utc::now();
        let (result, report) = task.run_with_report(self.observer(), work).await;
        self.record(StepRecord {
            name: report.name,
            attempts: report.attempts,
            state: report.state,
            started_at,
            finished_at: Utc::now(),
        })
        .await;
        result
    }

    /// Run a step that has no retry policy. Recorded like a single-attempt task.
    pub async fn step<T, E, Fut>(&self, name: &str, work: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let started_at = Utc::now();
        self.observer.on_transition(name, 1, TaskState::Running);
        let result = work.await;
        let state = if result.is_ok() {
            TaskState::Succeeded
        } else {
            TaskState::FailedFinal
        };
        self.observer.on_transition(name, 1, state);
        self.record(StepRecord {
            name: name.to_string(),
            attempts: 1,
            state,
            started_at,
            finished_at: Utc::now(),
        })
        .await;
        result
    }

    async fn record(&self, step: StepRecord) {
        let mut run = self.run.lock().await;
        run.steps.push(step);
        run.updated_at = Utc::now();
    }
}

/// A named linear composition of steps.
pub struct Flow {
    name: String,
    observer: Arc<dyn TaskObserver>,
}

impl Flow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn TaskObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute `body` once. A failing body ends the run as `Failed` and its
    /// error is returned unchanged; artifacts produced by earlier steps are
    /// left as they are.
    pub async fn run<T, E, F, Fut>(&self, body: F) -> Result<FlowOutcome<T>, E>
    where
        F: FnOnce(FlowContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let mut initial = FlowRun::new(self.name.clone());
        initial.status = FlowStatus::Running;
        let run_id = initial.run_id;
        info!(flow = %self.name, %run_id, "Flow started");

        let shared = Arc::new(Mutex::new(initial));
        let ctx = FlowContext {
            run: Arc::clone(&shared),
            run_id,
            observer: Arc::clone(&self.observer),
        };

        let result = body(ctx).await;

        let mut run = shared.lock().await.clone();
        run.updated_at = Utc::now();
        match result {
            Ok(output) => {
                run.status = FlowStatus::Completed;
                self.observer.on_flow_finished(&run);
                Ok(FlowOutcome { run, output })
            }
            Err(err) => {
                run.status = FlowStatus::Failed;
                run.error = Some(err.to_string());
                self.observer.on_flow_finished(&run);
                Err(err)
            }
        }
    }
}
