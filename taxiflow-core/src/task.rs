//! Retrying tasks.
//!
//! A [`Task`] wraps a unit of work with a maximum attempt count and a fixed
//! delay between attempts. Every failure is treated the same way: if attempts
//! remain the task sleeps for the delay and tries again, otherwise the last
//! error is returned to the caller exactly as the unit of work produced it.

use crate::observer::{TaskObserver, TracingObserver};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{trace, warn};

/// Lifecycle state of a task invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Succeeded,
    FailedRetrying,
    FailedFinal,
}

impl TaskState {
    /// Whether no further transitions can follow this state.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::FailedFinal)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Pending => write!(f, "pending"),
            TaskState::Running => write!(f, "running"),
            TaskState::Succeeded => write!(f, "succeeded"),
            TaskState::FailedRetrying => write!(f, "failed_retrying"),
            TaskState::FailedFinal => write!(f, "failed_final"),
        }
    }
}

/// Handle given to each attempt of a unit of work.
#[derive(Clone)]
pub struct TaskContext {
    task: Arc<str>,
    attempt: u32,
    max_attempts: u32,
    log_prints: bool,
    observer: Arc<dyn TaskObserver>,
}

impl TaskContext {
    pub fn task_name(&self) -> &str {
        &self.task
    }

    /// 1-based attempt number.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Surface a line of output. Forwarded to the observer only when the
    /// task was built with `log_prints(true)`.
    pub fn print(&self, line: impl AsRef<str>) {
        let line = line.as_ref();
        if self.log_prints {
            self.observer.on_print(&self.task, self.attempt, line);
        } else {
            trace!(task = %self.task, attempt = self.attempt, "{line}");
        }
    }
}

/// Summary of one task invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskReport {
    pub name: String,
    pub attempts: u32,
    pub state: TaskState,
}

/// A named, retryable unit of work.
///
/// ```
/// use std::time::Duration;
/// use taxiflow_core::Task;
///
/// let task = Task::new("read_windows")
///     .retries(3)
///     .retry_delay(Duration::from_secs(2));
/// assert_eq!(task.max_attempts(), 4);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    name: String,
    max_attempts: u32,
    retry_delay: Duration,
    log_prints: bool,
}

impl Task {
    /// A task with a single attempt and no delay.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_attempts: 1,
            retry_delay: Duration::ZERO,
            log_prints: false,
        }
    }

    /// Allow `retries` additional attempts after the first one.
    pub fn retries(mut self, retries: u32) -> Self {
        self.max_attempts = retries.saturating_add(1);
        self
    }

    /// Set the total number of attempts. Zero is clamped to one.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        if attempts == 0 {
            warn!(task = %self.name, "max_attempts of 0 requested, using 1");
        }
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the delay in (fractional) seconds. Negative or non-finite values
    /// fall back to no delay.
    pub fn retry_delay_secs(self, secs: f64) -> Self {
        match Duration::try_from_secs_f64(secs) {
            Ok(delay) => self.retry_delay(delay),
            Err(_) => {
                warn!(task = %self.name, secs, "Invalid retry delay, using 0");
                self.retry_delay(Duration::ZERO)
            }
        }
    }

    pub fn log_prints(mut self, enabled: bool) -> Self {
        self.log_prints = enabled;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn prints_logged(&self) -> bool {
        self.log_prints
    }

    /// Run `work`, reporting to the tracing observer.
    pub async fn run<T, E, F, Fut>(&self, work: F) -> Result<T, E>
    where
        F: FnMut(TaskContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.run_observed(Arc::new(TracingObserver), work).await
    }

    /// Run `work`, reporting transitions and prints to `observer`.
    pub async fn run_observed<T, E, F, Fut>(
        &self,
        observer: Arc<dyn TaskObserver>,
        work: F,
    ) -> Result<T, E>
    where
        F: FnMut(TaskContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.run_with_report(observer, work).await.0
    }

    /// Run `work` and also return how the invocation went.
    pub async fn run_with_report<T, E, F, Fut>(
        &self,
        observer: Arc<dyn TaskObserver>,
        mut work: F,
    ) -> (Result<T, E>, TaskReport)
    where
        F: FnMut(TaskContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let name: Arc<str> = Arc::from(self.name.as_str());
        observer.on_transition(&name, 0, TaskState::Pending);

        let mut attempt = 0;
        loop {
            attempt += 1;
            observer.on_transition(&name, attempt, TaskState::Running);

            let ctx = TaskContext {
                task: Arc::clone(&name),
                attempt,
                max_attempts: self.max_attempts,
                log_prints: self.log_prints,
                observer: Arc::clone(&observer),
            };

            match work(ctx).await {
                Ok(value) => {
                    observer.on_transition(&name, attempt, TaskState::Succeeded);
                    return (Ok(value), self.report(attempt, TaskState::Succeeded));
                }
                Err(err) if attempt < self.max_attempts => {
                    warn!(
                        task = %name,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = self.retry_delay.as_millis() as u64,
                        error = %err,
                        "Retrying task after failure"
                    );
                    observer.on_transition(&name, attempt, TaskState::FailedRetrying);
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(err) => {
                    observer.on_transition(&name, attempt, TaskState::FailedFinal);
                    return (Err(err), self.report(attempt, TaskState::FailedFinal));
                }
            }
        }
    }

    fn report(&self, attempts: u32, state: TaskState) -> TaskReport {
        TaskReport {
            name: self.name.clone(),
            attempts,
            state,
        }
    }
}
