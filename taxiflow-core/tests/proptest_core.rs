//! Property-based tests for the retry executor using proptest.

use proptest::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use taxiflow_core::{RecordingObserver, Task, TaskState};
use tokio::time::Instant;

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap()
}

#[derive(Debug, PartialEq)]
struct Failure(u32);

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failure on attempt {}", self.0)
    }
}

// --- Retry executor properties ---

proptest! {
    #[test]
    fn k_failures_then_success_uses_k_plus_one_attempts(
        (max_attempts, k) in (1u32..8).prop_flat_map(|n| (Just(n), 0..n)),
        delay_ms in 0u64..3_000,
    ) {
        let rt = paused_runtime();
        let delay = Duration::from_millis(delay_ms);
        let observer = Arc::new(RecordingObserver::new());
        let calls = AtomicU32::new(0);
        let task = Task::new("prop").with_max_attempts(max_attempts).retry_delay(delay);

        let (result, elapsed) = rt.block_on(async {
            let start = Instant::now();
            let result = task
                .run_observed(observer.clone(), |_| {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    async move { if n <= k { Err(Failure(n)) } else { Ok(n) } }
                })
                .await;
            (result, start.elapsed())
        });

        prop_assert_eq!(result, Ok(k + 1));
        prop_assert_eq!(calls.load(Ordering::SeqCst), k + 1);
        prop_assert_eq!(observer.count("prop", TaskState::FailedRetrying), k as usize);
        prop_assert_eq!(elapsed, delay * k);
    }

    #[test]
    fn always_failing_uses_all_attempts(
        max_attempts in 1u32..8,
        delay_ms in 0u64..3_000,
    ) {
        let rt = paused_runtime();
        let delay = Duration::from_millis(delay_ms);
        let observer = Arc::new(RecordingObserver::new());
        let calls = AtomicU32::new(0);
        let task = Task::new("doomed").with_max_attempts(max_attempts).retry_delay(delay);

        let (result, elapsed) = rt.block_on(async {
            let start = Instant::now();
            let result: Result<(), Failure> = task
                .run_observed(observer.clone(), |_| {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    async move { Err(Failure(n)) }
                })
                .await;
            (result, start.elapsed())
        });

        prop_assert_eq!(result, Err(Failure(max_attempts)));
        prop_assert_eq!(calls.load(Ordering::SeqCst), max_attempts);
        prop_assert_eq!(
            observer.count("doomed", TaskState::FailedRetrying),
            (max_attempts - 1) as usize
        );
        prop_assert_eq!(observer.count("doomed", TaskState::FailedFinal), 1);
        prop_assert_eq!(elapsed, delay * (max_attempts - 1));
    }

    #[test]
    fn retries_builder_adds_one(retries in 0u32..1_000) {
        prop_assert_eq!(Task::new("t").retries(retries).max_attempts(), retries + 1);
    }
}
