//! Plain HTTP fetch wrapped in a retrying task.
//!
//! The endpoint is expected to fail now and then; any status >= 400 counts
//! as a failure and goes through the task's retry policy like any other
//! error.

use crate::error::FetchError;
use crate::flow::{Flow, FlowOutcome};
use crate::observer::TaskObserver;
use crate::task::Task;
use std::sync::Arc;
use tracing::debug;

/// GET `url` and return the body text. HTTP statuses >= 400 are errors.
pub async fn fetch_text(client: &reqwest::Client, url: &str) -> Result<String, FetchError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| FetchError::Request {
            url: url.to_string(),
            message: e.to_string(),
        })?;

    let status = response.status();
    debug!(url, status = status.as_u16(), "Fetch response");
    if status.as_u16() >= 400 {
        return Err(FetchError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    response.text().await.map_err(|e| FetchError::Request {
        url: url.to_string(),
        message: e.to_string(),
    })
}

/// Run the single-step `fetch` flow: fetch `url` under `task`'s retry policy
/// and print the body through the task context.
pub async fn run_fetch_flow(
    client: &reqwest::Client,
    url: &str,
    task: &Task,
    observer: Arc<dyn TaskObserver>,
) -> Result<FlowOutcome<String>, FetchError> {
    Flow::new("fetch")
        .with_observer(observer)
        .run(|ctx| async move {
            ctx.task(task, |tc| async move {
                let body = fetch_text(client, url).await?;
                tc.print(&body);
                Ok(body)
            })
            .await
        })
        .await
}
