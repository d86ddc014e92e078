//! gRPC services: user registration/login, the authenticated calculator
//! surface, and the trusted agent surface for workers.

use tonic::{Request, Response, Status};
use tracing::error;

use crate::auth::{AuthenticatedUser, AuthManager};
use crate::compiler;
use crate::config::CoordinatorConfig;
use crate::messages::{agent_task_to_proto, expression_to_proto, proto, task_to_proto};
use crate::store::models::TaskOutcome;
use crate::store::{Store, StoreError};

use std::sync::Arc;

/// Translate store errors into response codes. Database failures are logged
/// here and surfaced as opaque internal errors.
fn store_status(err: StoreError) -> Status {
    match err {
        StoreError::UserExists => Status::already_exists("user exists"),
        StoreError::UserNotFound => Status::failed_precondition("bad login or password"),
        StoreError::ExpressionNotFound => Status::not_found("expression not found"),
        StoreError::TaskNotFound => Status::not_found("task not found"),
        StoreError::NoPendingTasks => Status::not_found("no pending tasks"),
        StoreError::Database(_) | StoreError::Migrate(_) => {
            error!(error = %err, "store operation failed");
            Status::internal("internal error")
        }
    }
}

/// Bearer-token interceptor for the calculator service.
#[derive(Clone)]
pub struct AuthInterceptor {
    auth: Arc<AuthManager>,
}

impl AuthInterceptor {
    pub fn new(auth: Arc<AuthManager>) -> Self {
        Self { auth }
    }
}

impl tonic::service::Interceptor for AuthInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        let header = request
            .metadata()
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| Status::unauthenticated("missing auth token"))?;

        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .ok_or_else(|| Status::unauthenticated("missing bearer token"))?;

        let claims = self
            .auth
            .verify_token(token)
            .map_err(|_| Status::unauthenticated("invalid auth token"))?;

        request.extensions_mut().insert(AuthenticatedUser {
            id: claims.sub,
            login: claims.login,
        });
        Ok(request)
    }
}

fn authenticated_user<T>(request: &Request<T>) -> Result<AuthenticatedUser, Status> {
    request
        .extensions()
        .get::<AuthenticatedUser>()
        .cloned()
        .ok_or_else(|| Status::unauthenticated("missing auth token"))
}

// ---------------------------------------------------------------------------
// UserService
// ---------------------------------------------------------------------------

pub struct UserGrpcService {
    store: Store,
    auth: Arc<AuthManager>,
}

impl UserGrpcService {
    pub fn new(store: Store, auth: Arc<AuthManager>) -> Self {
        Self { store, auth }
    }
}

#[tonic::async_trait]
impl proto::user_service_server::UserService for UserGrpcService {
    async fn register(
        &self,
        request: Request<proto::RegisterRequest>,
    ) -> Result<Response<proto::RegisterResponse>, Status> {
        let req = request.into_inner();
        self.store
            .create_user(&req.login, &crate::auth::digest_password(&req.password))
            .await
            .map_err(store_status)?;
        Ok(Response::new(proto::RegisterResponse {}))
    }

    async fn login(
        &self,
        request: Request<proto::LoginRequest>,
    ) -> Result<Response<proto::LoginResponse>, Status> {
        let req = request.into_inner();
        let user = self
            .store
            .get_user(&req.login, &crate::auth::digest_password(&req.password))
            .await
            .map_err(store_status)?;
        let access_token = self
            .auth
            .mint_token(&user.id, &user.login)
            .map_err(|err| {
                error!(error = %err, "token minting failed");
                Status::internal("internal error")
            })?;
        Ok(Response::new(proto::LoginResponse { access_token }))
    }
}

// ---------------------------------------------------------------------------
// CalculatorService
// ---------------------------------------------------------------------------

pub struct CalculatorGrpcService {
    store: Store,
    config: Arc<CoordinatorConfig>,
}

impl CalculatorGrpcService {
    pub fn new(store: Store, config: Arc<CoordinatorConfig>) -> Self {
        Self { store, config }
    }
}

#[tonic::async_trait]
impl proto::calculator_service_server::CalculatorService for CalculatorGrpcService {
    async fn calculate(
        &self,
        request: Request<proto::CalculateRequest>,
    ) -> Result<Response<proto::CalculateResponse>, Status> {
        let user = authenticated_user(&request)?;
        let req = request.into_inner();

        let plan = compiler::compile(&req.expression)
            .map_err(|_| Status::invalid_argument("invalid expression"))?;
        let cmd = super::plan_to_cmd(&req.expression, plan, &self.config);

        let id = self
            .store
            .create_expression(&user.id, cmd)
            .await
            .map_err(store_status)?;
        Ok(Response::new(proto::CalculateResponse { id }))
    }

    async fn list_expressions(
        &self,
        request: Request<proto::ListExpressionsRequest>,
    ) -> Result<Response<proto::ListExpressionsResponse>, Status> {
        let user = authenticated_user(&request)?;
        let expressions = self
            .store
            .list_expressions(&user.id)
            .await
            .map_err(store_status)?;
        Ok(Response::new(proto::ListExpressionsResponse {
            expressions: expressions.iter().map(expression_to_proto).collect(),
        }))
    }

    async fn get_expression(
        &self,
        request: Request<proto::GetExpressionRequest>,
    ) -> Result<Response<proto::GetExpressionResponse>, Status> {
        let user = authenticated_user(&request)?;
        let req = request.into_inner();
        let expression = self
            .store
            .get_expression(&user.id, &req.id)
            .await
            .map_err(store_status)?;
        Ok(Response::new(proto::GetExpressionResponse {
            expression: Some(expression_to_proto(&expression)),
        }))
    }

    async fn list_expression_tasks(
        &self,
        request: Request<proto::ListExpressionTasksRequest>,
    ) -> Result<Response<proto::ListExpressionTasksResponse>, Status> {
        let user = authenticated_user(&request)?;
        let req = request.into_inner();
        let tasks = self
            .store
            .list_expression_tasks(&user.id, &req.id)
            .await
            .map_err(store_status)?;
        Ok(Response::new(proto::ListExpressionTasksResponse {
            tasks: tasks.iter().map(task_to_proto).collect(),
        }))
    }
}

// ---------------------------------------------------------------------------
// AgentService
// ---------------------------------------------------------------------------

pub struct AgentGrpcService {
    store: Store,
}

impl AgentGrpcService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[tonic::async_trait]
impl proto::agent_service_server::AgentService for AgentGrpcService {
    async fn get_task(
        &self,
        _request: Request<proto::GetTaskRequest>,
    ) -> Result<Response<proto::GetTaskResponse>, Status> {
        let task = self.store.claim_pending_task().await.map_err(store_status)?;
        Ok(Response::new(proto::GetTaskResponse {
            task: Some(agent_task_to_proto(&task)),
        }))
    }

    async fn submit_task_result(
        &self,
        request: Request<proto::SubmitTaskResultRequest>,
    ) -> Result<Response<proto::SubmitTaskResultResponse>, Status> {
        let req = request.into_inner();
        let outcome = if req.result.is_finite() {
            TaskOutcome::Completed(req.result)
        } else {
            TaskOutcome::Failed
        };
        self.store
            .finish_task(&req.id, outcome)
            .await
            .map_err(store_status)?;
        Ok(Response::new(proto::SubmitTaskResultResponse {}))
    }
}
