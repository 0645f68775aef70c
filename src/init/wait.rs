// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout_at};
use tower::BoxError;
use tracing::error;

/// Wait for the first task to finish and return its result
pub async fn wait_for_any_task(
    tasks: &mut JoinSet<Result<(), BoxError>>,
) -> Result<(), BoxError> {
    match tasks.join_next().await {
        None => std::future::pending().await,
        Some(res) => res?,
    }
}

/// Wait for every task, giving up after `timeout`. The last task error wins.
pub async fn wait_for_tasks_with_timeout(
    tasks: &mut JoinSet<Result<(), BoxError>>,
    timeout: Duration,
) -> Result<(), BoxError> {
    let stop_at = Instant::now() + timeout;
    let mut result = Ok(());

    loop {
        match timeout_at(stop_at, tasks.join_next()).await {
            Err(_) => {
                tasks.abort_all();
                return Err("timed out waiting for tasks to complete".into());
            }
            Ok(None) => break,
            Ok(Some(Ok(Ok(())))) => {}
            Ok(Some(Ok(Err(e)))) => result = Err(e),
            Ok(Some(Err(e))) => error!(error = %e, "Failed to join with task"),
        }
    }

    result
}
