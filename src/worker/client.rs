//! gRPC client for the coordinator's agent surface.

use std::time::Duration;

use thiserror::Error;
use tonic::transport::{Channel, Endpoint};
use tonic::Code;

use crate::messages::proto;
use crate::messages::proto::agent_service_client::AgentServiceClient;

/// Per-attempt timeout on every RPC.
pub const RPC_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no pending tasks")]
    NoTasks,
    #[error("task not found")]
    TaskNotFound,
    #[error("invalid coordinator address: {0}")]
    Address(#[from] tonic::transport::Error),
    #[error("rpc failed: {0}")]
    Rpc(#[from] tonic::Status),
}

/// Thin wrapper over the generated client; connects lazily so workers can
/// start before the coordinator is reachable.
#[derive(Clone)]
pub struct AgentClient {
    inner: AgentServiceClient<Channel>,
}

impl AgentClient {
    pub fn connect_lazy(addr: &str) -> Result<Self, ClientError> {
        let channel = Endpoint::from_shared(addr.to_string())?
            .timeout(RPC_TIMEOUT)
            .connect_timeout(RPC_TIMEOUT)
            .connect_lazy();
        Ok(Self {
            inner: AgentServiceClient::new(channel),
        })
    }

    /// Claim one pending task.
    pub async fn get_task(&mut self) -> Result<proto::AgentTask, ClientError> {
        let response = self
            .inner
            .get_task(proto::GetTaskRequest {})
            .await
            .map_err(|status| match status.code() {
                Code::NotFound => ClientError::NoTasks,
                _ => ClientError::Rpc(status),
            })?;
        response
            .into_inner()
            .task
            .ok_or_else(|| ClientError::Rpc(tonic::Status::internal("response carried no task")))
    }

    /// Report a task outcome; NaN marks a domain failure.
    pub async fn submit_task_result(
        &mut self,
        task_id: &str,
        result: f64,
    ) -> Result<(), ClientError> {
        self.inner
            .submit_task_result(proto::SubmitTaskResultRequest {
                id: task_id.to_string(),
                result,
            })
            .await
            .map_err(|status| match status.code() {
                Code::NotFound => ClientError::TaskNotFound,
                _ => ClientError::Rpc(status),
            })?;
        Ok(())
    }
}
