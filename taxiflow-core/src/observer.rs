//! Observers for task and flow lifecycle events.
//!
//! Every task attempt reports its state transitions, and tasks created with
//! `log_prints` forward their textual output here as well. The default
//! observer writes everything to `tracing`.

use crate::flow::{FlowRun, FlowStatus};
use crate::task::TaskState;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, error, info};

/// Receives lifecycle events from tasks and flows.
///
/// All hooks are synchronous and default to no-ops so observers only
/// implement what they care about.
pub trait TaskObserver: Send + Sync {
    /// A task entered `state` during `attempt` (attempt 0 is `Pending`).
    fn on_transition(&self, _task: &str, _attempt: u32, _state: TaskState) {}

    /// A task with `log_prints` enabled produced a line of output.
    fn on_print(&self, _task: &str, _attempt: u32, _line: &str) {}

    /// A flow run reached a terminal status.
    fn on_flow_finished(&self, _run: &FlowRun) {}
}

/// Observer that writes every event to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl TaskObserver for TracingObserver {
    fn on_transition(&self, task: &str, attempt: u32, state: TaskState) {
        match state {
            TaskState::FailedFinal => error!(task, attempt, "Task failed, no attempts left"),
            _ => debug!(task, attempt, %state, "Task transition"),
        }
    }

    fn on_print(&self, task: &str, attempt: u32, line: &str) {
        info!(task, attempt, "{line}");
    }

    fn on_flow_finished(&self, run: &FlowRun) {
        match run.status {
            FlowStatus::Completed => info!(
                flow = %run.flow_name,
                run_id = %run.run_id,
                steps = run.steps.len(),
                "Flow completed"
            ),
            _ => error!(
                flow = %run.flow_name,
                run_id = %run.run_id,
                status = %run.status,
                error = run.error.as_deref().unwrap_or_default(),
                "Flow did not complete"
            ),
        }
    }
}

/// A single event captured by [`RecordingObserver`].
#[derive(Debug, Clone, PartialEq)]
pub enum ObservedEvent {
    Transition {
        task: String,
        attempt: u32,
        state: TaskState,
    },
    Print {
        task: String,
        attempt: u32,
        line: String,
    },
    FlowFinished {
        flow: String,
        status: FlowStatus,
        error: Option<String>,
    },
}

/// Observer that keeps every event in memory, for tests and dry runs.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ObservedEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: ObservedEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    /// Snapshot of all events recorded so far.
    pub fn events(&self) -> Vec<ObservedEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of times `task` entered `state`.
    pub fn count(&self, task: &str, state: TaskState) -> usize {
        self.events()
            .iter()
            .filter(|e| {
                matches!(e, ObservedEvent::Transition { task: t, state: s, .. } if t == task && *s == state)
            })
            .count()
    }

    /// All printed lines of `task`, in order.
    pub fn prints(&self, task: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ObservedEvent::Print { task: t, line, .. } if t == task => Some(line),
                _ => None,
            })
            .collect()
    }
}

impl TaskObserver for RecordingObserver {
    fn on_transition(&self, task: &str, attempt: u32, state: TaskState) {
        self.push(ObservedEvent::Transition {
            task: task.to_string(),
            attempt,
            state,
        });
    }

    fn on_print(&self, task: &str, attempt: u32, line: &str) {
        self.push(ObservedEvent::Print {
            task: task.to_string(),
            attempt,
            line: line.to_string(),
        });
    }

    fn on_flow_finished(&self, run: &FlowRun) {
        self.push(ObservedEvent::FlowFinished {
            flow: run.flow_name.clone(),
            status: run.status,
            error: run.error.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_observer_counts_transitions() {
        let observer = RecordingObserver::new();
        observer.on_transition("read", 1, TaskState::Running);
        observer.on_transition("read", 1, TaskState::FailedRetrying);
        observer.on_transition("read", 2, TaskState::Running);
        observer.on_transition("other", 1, TaskState::Running);

        assert_eq!(observer.count("read", TaskState::Running), 2);
        assert_eq!(observer.count("read", TaskState::FailedRetrying), 1);
        assert_eq!(observer.count("other", TaskState::Succeeded), 0);
    }

    #[test]
    fn test_recording_observer_prints_are_per_task() {
        let observer = RecordingObserver::new();
        observer.on_print("fetch", 1, "first");
        observer.on_print("train", 1, "ignored");
        observer.on_print("fetch", 2, "second");

        assert_eq!(observer.prints("fetch"), vec!["first", "second"]);
    }
}
