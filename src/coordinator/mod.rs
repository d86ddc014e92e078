//! Coordinator wiring: one gRPC server and one HTTP server over the same
//! store, auth manager and configuration.

pub mod grpc;
pub mod http;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tracing::info;

use crate::auth::AuthManager;
use crate::compiler::PlannedTask;
use crate::config::CoordinatorConfig;
use crate::messages::proto::{
    agent_service_server::AgentServiceServer,
    calculator_service_server::CalculatorServiceServer, user_service_server::UserServiceServer,
};
use crate::store::models::{CreateExpressionCmd, CreateTaskCmd};
use crate::store::Store;

use grpc::{AgentGrpcService, AuthInterceptor, CalculatorGrpcService, UserGrpcService};

/// Shared state behind every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub auth: Arc<AuthManager>,
    pub config: Arc<CoordinatorConfig>,
}

/// Attach per-operation durations from configuration to a compiled plan.
pub(crate) fn plan_to_cmd(
    source: &str,
    plan: Vec<PlannedTask>,
    config: &CoordinatorConfig,
) -> CreateExpressionCmd {
    CreateExpressionCmd {
        expression: source.to_string(),
        tasks: plan
            .into_iter()
            .map(|task| CreateTaskCmd {
                id: task.id,
                parent_task_1_id: task.parent_task_1_id,
                parent_task_2_id: task.parent_task_2_id,
                arg1: task.arg1,
                arg2: task.arg2,
                operation: task.operation,
                operation_time_ms: config.operation_time_ms(task.operation),
            })
            .collect(),
    }
}

/// Serve the gRPC and HTTP surfaces until the shutdown signal flips.
pub async fn serve(state: AppState, shutdown: watch::Receiver<bool>) -> Result<()> {
    let grpc_listener = TcpListener::bind(state.config.grpc_addr)
        .await
        .with_context(|| format!("failed to bind grpc listener on {}", state.config.grpc_addr))?;
    let http_listener = TcpListener::bind(state.config.http_addr)
        .await
        .with_context(|| format!("failed to bind http listener on {}", state.config.http_addr))?;

    info!(
        grpc_addr = %state.config.grpc_addr,
        http_addr = %state.config.http_addr,
        "coordinator listening"
    );

    let grpc_server = Server::builder()
        .add_service(UserServiceServer::new(UserGrpcService::new(
            state.store.clone(),
            state.auth.clone(),
        )))
        .add_service(CalculatorServiceServer::with_interceptor(
            CalculatorGrpcService::new(state.store.clone(), state.config.clone()),
            AuthInterceptor::new(state.auth.clone()),
        ))
        .add_service(AgentServiceServer::new(AgentGrpcService::new(
            state.store.clone(),
        )));

    let mut grpc_shutdown = shutdown.clone();
    let grpc = async move {
        grpc_server
            .serve_with_incoming_shutdown(TcpListenerStream::new(grpc_listener), async move {
                let _ = grpc_shutdown.wait_for(|stop| *stop).await;
            })
            .await
            .context("grpc server failed")
    };

    let mut http_shutdown = shutdown;
    let router = http::router(state);
    let http = async move {
        axum::serve(http_listener, router)
            .with_graceful_shutdown(async move {
                let _ = http_shutdown.wait_for(|stop| *stop).await;
            })
            .await
            .context("http server failed")
    };

    tokio::try_join!(grpc, http)?;
    info!("coordinator servers stopped");
    Ok(())
}
