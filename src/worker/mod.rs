//! Pull-based worker pool.
//!
//! The pool runs `COMPUTING_POWER` independent loops. Each loop fetches one
//! task (retrying forever with backoff while the queue is empty or the
//! coordinator is unreachable), waits out the task's simulated compute time,
//! applies the operation and submits the result with the same retry policy.
//! Workers share no state; the store serializes everything.

mod backoff;
mod client;

pub use backoff::{Backoff, INITIAL_DELAY, MAX_DELAY, MAX_JITTER};
pub use client::{AgentClient, ClientError, RPC_TIMEOUT};

use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::WorkerConfig;
use crate::messages::proto;
use crate::store::models::TaskOperation;

/// Run the pool until the shutdown signal flips and every loop has wound
/// down.
pub async fn run(config: WorkerConfig, shutdown: watch::Receiver<bool>) -> Result<()> {
    let client = AgentClient::connect_lazy(&config.calculator_api_addr)?;
    info!(
        addr = %config.calculator_api_addr,
        computing_power = config.computing_power,
        "starting worker pool"
    );

    let mut handles = Vec::with_capacity(config.computing_power);
    for worker_id in 0..config.computing_power {
        let client = client.clone();
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(worker_loop(worker_id, client, shutdown)));
    }

    for handle in handles {
        handle.await?;
    }
    info!("worker pool stopped");
    Ok(())
}

async fn worker_loop(worker_id: usize, mut client: AgentClient, mut shutdown: watch::Receiver<bool>) {
    info!(worker_id, "worker started");

    loop {
        let Some(task) = fetch_task(&mut client, &mut shutdown).await else {
            break;
        };
        debug!(worker_id, task_id = %task.id, "executing task");

        // Simulated compute. Cancellation here abandons the claimed task;
        // its lease expiry makes it recoverable later.
        let compute = sleep(Duration::from_millis(task.operation_time_ms.max(0) as u64));
        tokio::select! {
            _ = compute => {}
            _ = shutdown.wait_for(|stop| *stop) => break,
        }

        let result = execute(&task);
        if !submit_result(&mut client, &mut shutdown, &task.id, result).await {
            break;
        }
        metrics::counter!("tally_worker_tasks_total").increment(1);
        info!(worker_id, task_id = %task.id, result, "task completed");
    }

    info!(worker_id, "worker stopped");
}

/// Apply the task's operation. Unknown operations and division by zero both
/// yield the NaN sentinel, which the coordinator records as a failure.
fn execute(task: &proto::AgentTask) -> f64 {
    match TaskOperation::try_from(task.operation()) {
        Ok(operation) => operation.apply(task.arg1, task.arg2),
        Err(()) => f64::NAN,
    }
}

/// Fetch one task, retrying indefinitely. Returns `None` on shutdown.
async fn fetch_task(
    client: &mut AgentClient,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<proto::AgentTask> {
    let mut backoff = Backoff::default();
    loop {
        match client.get_task().await {
            Ok(task) => return Some(task),
            Err(ClientError::NoTasks) => debug!("no tasks"),
            Err(err) => warn!(error = %err, "failed to fetch task"),
        }
        let delay = backoff.next_delay();
        tokio::select! {
            _ = sleep(delay) => {}
            _ = shutdown.wait_for(|stop| *stop) => return None,
        }
    }
}

/// Submit a result, retrying transport failures. Returns `false` on
/// shutdown. A missing task means the result has nowhere to go, so it is
/// dropped rather than retried.
async fn submit_result(
    client: &mut AgentClient,
    shutdown: &mut watch::Receiver<bool>,
    task_id: &str,
    result: f64,
) -> bool {
    let mut backoff = Backoff::default();
    loop {
        match client.submit_task_result(task_id, result).await {
            Ok(()) => return true,
            Err(ClientError::TaskNotFound) => {
                warn!(task_id, "task vanished before submission, dropping result");
                return true;
            }
            Err(err) => warn!(task_id, error = %err, "failed to submit task result"),
        }
        let delay = backoff.next_delay();
        tokio::select! {
            _ = sleep(delay) => {}
            _ = shutdown.wait_for(|stop| *stop) => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent_task(operation: proto::TaskOperation, arg1: f64, arg2: f64) -> proto::AgentTask {
        proto::AgentTask {
            id: "t".into(),
            operation: operation as i32,
            arg1,
            arg2,
            operation_time_ms: 0,
        }
    }

    #[test]
    fn executes_each_operation() {
        assert_eq!(
            execute(&agent_task(proto::TaskOperation::Addition, 1.0, 2.0)),
            3.0
        );
        assert_eq!(
            execute(&agent_task(proto::TaskOperation::Subtraction, 5.0, 2.0)),
            3.0
        );
        assert_eq!(
            execute(&agent_task(proto::TaskOperation::Multiplication, 3.0, 4.0)),
            12.0
        );
        assert_eq!(
            execute(&agent_task(proto::TaskOperation::Division, 9.0, 3.0)),
            3.0
        );
    }

    #[test]
    fn division_by_zero_yields_the_sentinel() {
        assert!(execute(&agent_task(proto::TaskOperation::Division, 1.0, 0.0)).is_nan());
    }

    #[test]
    fn unspecified_operation_yields_the_sentinel() {
        assert!(execute(&agent_task(proto::TaskOperation::Unspecified, 1.0, 2.0)).is_nan());
    }
}
